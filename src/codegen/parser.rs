//! Fenced code block parser.
//!
//! Turns a buffered model response into a [`CodeArtifact`]. Pure: no I/O, no
//! shared state, the same input always yields the same output.

use std::sync::LazyLock;

use regex::Regex;

use super::{CodeArtifact, Variant};
use crate::error::{Error, Result};

static HTML_BLOCK: LazyLock<Regex> = LazyLock::new(|| fence("html"));
static CSS_BLOCK: LazyLock<Regex> = LazyLock::new(|| fence("css"));
static JS_BLOCK: LazyLock<Regex> = LazyLock::new(|| fence("(?:javascript|js)"));

fn fence(tag: &str) -> Regex {
    Regex::new(&format!(r"(?is)```{tag}[ \t]*\r?\n(.*?)```")).expect("fence pattern compiles")
}

/// Which fenced block a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Html,
    Css,
    Js,
}

/// Non-fatal degradation noticed while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseWarning {
    /// No HTML fence in a single-page response; the whole buffer was kept as HTML.
    RawHtmlFallback,
    /// A multi-file response had no block of this kind; the field is empty.
    MissingBlock(BlockKind),
}

/// Parser output: the artifact plus any degradations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub artifact: CodeArtifact,
    pub warnings: Vec<ParseWarning>,
}

/// Parse a complete model response for the given variant.
///
/// Fails only for [`Variant::BuildableProject`], whose files are written by
/// tool calls rather than parsed from text.
pub fn parse(buffer: &str, variant: Variant) -> Result<Parsed> {
    match variant {
        Variant::SinglePage => Ok(parse_single_page(buffer)),
        Variant::MultiFile => Ok(parse_multi_file(buffer)),
        Variant::BuildableProject => Err(Error::Configuration(
            "buildable_project output is written by tools, not parsed".to_string(),
        )),
    }
}

/// Extract the first HTML fence, or keep the whole buffer as HTML.
pub fn parse_single_page(buffer: &str) -> Parsed {
    match first_block(&HTML_BLOCK, buffer) {
        Some(html) => Parsed {
            artifact: CodeArtifact::SinglePage { html },
            warnings: Vec::new(),
        },
        None => Parsed {
            artifact: CodeArtifact::SinglePage {
                html: buffer.trim().to_string(),
            },
            warnings: vec![ParseWarning::RawHtmlFallback],
        },
    }
}

/// Extract the first HTML, CSS and JS fences independently.
pub fn parse_multi_file(buffer: &str) -> Parsed {
    let mut warnings = Vec::new();
    let mut take = |re: &Regex, kind: BlockKind| {
        first_block(re, buffer).unwrap_or_else(|| {
            warnings.push(ParseWarning::MissingBlock(kind));
            String::new()
        })
    };

    let html = take(&HTML_BLOCK, BlockKind::Html);
    let css = take(&CSS_BLOCK, BlockKind::Css);
    let js = take(&JS_BLOCK, BlockKind::Js);

    Parsed {
        artifact: CodeArtifact::MultiFile { html, css, js },
        warnings,
    }
}

fn first_block(re: &Regex, buffer: &str) -> Option<String> {
    re.captures(buffer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
