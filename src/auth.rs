//! Account collaborators consumed by the join protocol.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("no profile for {0}")]
    ProfileNotFound(String),

    #[error("users file: {0}")]
    Io(#[from] std::io::Error),

    #[error("users file: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub display_name: String,
}

/// Turns an opaque bearer token into an account identity.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate_token(&self, token: &str) -> AuthResult<String>;
}

/// Resolves an account identity to its public profile.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup_profile(&self, identity: &str) -> AuthResult<Profile>;
}

/// Process-local profile store.
#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `[{"id": "...", "displayName": "..."}, ...]`.
    pub fn from_json_file(path: &Path) -> AuthResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let profiles: Vec<Profile> = serde_json::from_str(&raw)?;
        let directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        Ok(directory)
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.write().insert(profile.id.clone(), profile);
    }

    /// Returns false when the identity already had a profile.
    pub fn insert_if_absent(&self, profile: Profile) -> bool {
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&profile.id) {
            return false;
        }
        profiles.insert(profile.id.clone(), profile);
        true
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryDirectory {
    async fn lookup_profile(&self, identity: &str) -> AuthResult<Profile> {
        self.profiles
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| AuthError::ProfileNotFound(identity.to_owned()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub exp: u64,
}

/// HS256 bearer token verifier.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
    directory: Option<Arc<InMemoryDirectory>>,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            directory: None,
        }
    }

    /// Accounts unknown to `directory` get their `name` claim recorded as
    /// display name on first successful validation.
    pub fn with_directory(mut self, directory: Arc<InMemoryDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate_token(&self, token: &str) -> AuthResult<String> {
        let data = decode::<TokenClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        if let (Some(directory), Some(name)) = (&self.directory, claims.name) {
            if directory.insert_if_absent(Profile {
                id: claims.sub.clone(),
                display_name: name,
            }) {
                debug!(account = %claims.sub, "profile recorded from token");
            }
        }
        Ok(claims.sub)
    }
}
