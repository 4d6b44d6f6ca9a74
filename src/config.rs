use crate::deploy::{BuildSettings, BuildStep};
use crate::llm::provider::DEFAULT_AZURE_API_VERSION;
use crate::llm::{LlmSettings, Provider};
use crate::session::SessionSettings;
use crate::stream::TranslatorConfig;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Require JWT authentication
    #[arg(long, env = "JWT_REQUIRED")]
    pub jwt_required: Option<bool>,

    /// Directory generated code is saved under
    #[arg(long, env = "OUTPUT_ROOT")]
    pub output_root: Option<String>,

    /// Directory deployed apps are copied to
    #[arg(long, env = "DEPLOY_ROOT")]
    pub deploy_root: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub sessions: SessionsConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub jwt_required: bool,
    pub jwt_secret: String,
    /// Identity used for unauthenticated requests when JWT is optional.
    #[serde(default)]
    pub dev_user: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub output_root: PathBuf,
    pub deploy_root: PathBuf,
    pub deploy_host: String,
    /// Chat history and app metadata.
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    pub max_entries: usize,
    pub idle_timeout_secs: u64,
    pub max_age_secs: u64,
    pub max_tool_iterations: usize,
    pub stream_buffer: usize,
}

impl SessionsConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_entries: self.max_entries,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_age: Duration::from_secs(self.max_age_secs),
            max_tool_iterations: self.max_tool_iterations,
        }
    }

    pub fn translator(&self) -> TranslatorConfig {
        TranslatorConfig {
            buffer: self.stream_buffer.max(1),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    pub skip_install: bool,
    pub install: BuildStep,
    pub build: BuildStep,
    pub output_dir: String,
}

impl BuildConfig {
    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            install: (!self.skip_install).then(|| self.install.clone()),
            build: self.build.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let defaults = BuildSettings::default();
        let install = defaults.install.unwrap_or_else(|| defaults.build.clone());

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 8123)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("security.jwt_required", true)?
            .set_default("security.jwt_secret", "")?
            .set_default("storage.output_root", "tmp/code_output")?
            .set_default("storage.deploy_root", "tmp/code_deploy")?
            .set_default("storage.deploy_host", "http://localhost:8123/deploy")?
            .set_default("storage.data_dir", "tmp/data")?
            .set_default("sessions.max_entries", 1000)?
            .set_default("sessions.idle_timeout_secs", 600)?
            .set_default("sessions.max_age_secs", 1800)?
            .set_default("sessions.max_tool_iterations", 20)?
            .set_default("sessions.stream_buffer", 64)?
            .set_default("build.skip_install", false)?
            .set_default("build.install.command", install.command)?
            .set_default("build.install.args", install.args)?
            .set_default("build.install.timeout_secs", install.timeout_secs)?
            .set_default("build.build.command", defaults.build.command)?
            .set_default("build.build.args", defaults.build.args)?
            .set_default("build.build.timeout_secs", defaults.build.timeout_secs)?
            .set_default("build.output_dir", defaults.output_dir)?;

        // 2. Config file: explicit path, otherwise ./config.{yaml,toml,json} if present
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment (CODEGEN_SERVER__PORT=9000, CODEGEN_BUILD__BUILD__ARGS="run build")
        builder = builder.add_source(
            Environment::with_prefix("CODEGEN")
                .prefix_separator("_")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("build.install.args")
                .with_list_parse_key("build.build.args")
                .try_parsing(true),
        );

        // 4. CLI flags and their env fallbacks win over everything
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(required) = cli.jwt_required {
            builder = builder.set_override("security.jwt_required", required)?;
        }
        if let Some(root) = cli.output_root {
            builder = builder.set_override("storage.output_root", root)?;
        }
        if let Some(root) = cli.deploy_root {
            builder = builder.set_override("storage.deploy_root", root)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.security.jwt_required && self.security.jwt_secret.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "security.jwt_secret must be set when security.jwt_required is true".into(),
            ));
        }
        if self.build.output_dir.trim().is_empty() {
            return Err(config::ConfigError::Message("build.output_dir cannot be empty".into()));
        }
        Ok(())
    }
}

/// Connection settings for the two model roles.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Single-page and multi-file generation.
    pub chat: LlmSettings,
    /// Project agent; `LLM_REASONING_MODEL` on the same endpoint.
    pub reasoning: LlmSettings,
}

pub fn load_llm_settings() -> Result<ModelSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    // Auto-detect provider from base URL
    let mut provider = Provider::detect_from_url(&base_url);

    if let Provider::AzureOpenAI { .. } = &provider {
        let deployment_name = env::var("AZURE_DEPLOYMENT_NAME")
            .map_err(|_| "AZURE_DEPLOYMENT_NAME is required for Azure OpenAI".to_string())?;
        provider = Provider::AzureOpenAI {
            deployment_name,
            api_version: env::var("AZURE_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string()),
        };
    }

    let parallel_tool_calls = std::env::var("LLM_PARALLEL_TOOLS")
        .ok()
        .and_then(|s| s.parse().ok());

    let chat = LlmSettings {
        base_url,
        api_key,
        model,
        provider,
        parallel_tool_calls,
    };

    let reasoning = match env::var("LLM_REASONING_MODEL") {
        Ok(m) if !m.trim().is_empty() => chat.with_model(m),
        _ => chat.clone(),
    };

    Ok(ModelSettings { chat, reasoning })
}
