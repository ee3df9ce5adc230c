//! Credential providers

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::Origin;

/// Directory under the config home holding the credential store
///
/// Shared with the editor plugin so existing stores are picked up as is.
pub const CONFIG_DIR_NAME: &str = "denops-misskey";

/// File name of the credential store
pub const CONFIG_FILE_NAME: &str = "config.json";

/// An access token
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Token(String);

impl Token {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Token for unauthenticated access
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            f.write_str("Token(anonymous)")
        } else {
            f.write_str("Token(***)")
        }
    }
}

/// Resolves an origin to its access token
pub trait CredentialProvider: Send + Sync + 'static {
    fn resolve_token(&self, origin: &Origin) -> Result<Token, ConfigError>;
}

#[derive(Debug, Deserialize)]
struct StoredCredential {
    token: String,
}

/// JSON credential store on disk
///
/// The file is read on every lookup so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
    allow_anonymous: bool,
}

impl FileCredentials {
    /// Provider reading the store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            allow_anonymous: false,
        }
    }

    /// Provider reading `$XDG_CONFIG_HOME/denops-misskey/config.json`
    ///
    /// Falls back to `$HOME/.config` when `XDG_CONFIG_HOME` is unset.
    pub fn from_default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(default_path()?))
    }

    /// Resolve origins missing from the store to an anonymous token
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, StoredCredential>, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

impl CredentialProvider for FileCredentials {
    fn resolve_token(&self, origin: &Origin) -> Result<Token, ConfigError> {
        let mut store = self.load()?;

        match store.remove(origin.as_str()) {
            Some(stored) => Ok(Token::new(stored.token)),
            None if self.allow_anonymous => {
                tracing::debug!(origin = %origin, "No stored credential, connecting anonymously");
                Ok(Token::anonymous())
            }
            None => Err(ConfigError::MissingCredential(origin.clone())),
        }
    }
}

/// Location of the credential store
pub fn default_path() -> Result<PathBuf, ConfigError> {
    store_path(
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
    )
}

fn store_path(
    config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    let base = match config_home {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => home
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join(".config"))
            .ok_or(ConfigError::NoConfigDir)?,
    };

    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// In-memory credential provider
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<Origin, Token>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token for `origin`
    pub fn with_token(mut self, origin: impl Into<Origin>, token: impl Into<String>) -> Self {
        self.tokens.insert(origin.into(), Token::new(token));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve_token(&self, origin: &Origin) -> Result<Token, ConfigError> {
        self.tokens
            .get(origin)
            .cloned()
            .ok_or_else(|| ConfigError::MissingCredential(origin.clone()))
    }
}
