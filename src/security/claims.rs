use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    pub sub: String, // User ID (Subject)
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
    pub exp: usize, // Expiration time (UNIX timestamp)
}

/// Resolved caller identity, inserted into request extensions.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    /// `None` for the configured development user.
    pub claims: Option<UserClaims>,
}

impl UserContext {
    pub fn from_claims(claims: UserClaims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            claims: Some(claims),
        }
    }

    pub fn anonymous(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            claims: None,
        }
    }
}
