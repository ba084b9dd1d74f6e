//! Credentials for the remote host
//!
//! The token is read from `GITHUB_TOKEN` or, failing that, from
//! `~/.config/classroom/secrets.toml`. The file must not be readable by group
//! or others (mode 0600 on Unix).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Environment variable holding the GitHub token
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Secrets file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Secrets {
    pub github: GitHubSecrets,
}

/// GitHub credentials
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitHubSecrets {
    /// Token with `repo`, `admin:org` and `delete_repo` scopes
    pub token: Option<String>,
}

impl std::fmt::Debug for GitHubSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSecrets")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the default location, or empty secrets if absent
    pub fn load() -> Result<Self> {
        match Self::default_secrets_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load secrets from a specific file, rejecting insecure permissions
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(path)?.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. Run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let contents = std::fs::read_to_string(path)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        secrets.github.token = secrets
            .github
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(secrets)
    }

    /// `~/.config/classroom/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("classroom").join("secrets.toml"))
    }

    /// Token from the environment, falling back to the secrets file
    pub fn github_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            let token = token.trim();
            if !token.is_empty() {
                debug!("Using GitHub token from {}", TOKEN_ENV);
                return Some(token.to_string());
            }
        }

        self.github.token.clone()
    }

    /// Like [`Secrets::github_token`] but failing when no token is configured
    pub fn require_github_token(&self) -> Result<String> {
        self.github_token().ok_or_else(|| {
            Error::Config(format!(
                "GitHub token not found. Set {} or add it to ~/.config/classroom/secrets.toml",
                TOKEN_ENV
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_secrets() {
        let secrets: Secrets = toml::from_str("[github]\ntoken = \"ghp_abc\"\n").unwrap();
        assert_eq!(secrets.github.token.as_deref(), Some("ghp_abc"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let secrets: Secrets = toml::from_str("[github]\ntoken = \"ghp_abc\"\n").unwrap();
        let printed = format!("{:?}", secrets);
        assert!(!printed.contains("ghp_abc"));
        assert!(printed.contains("redacted"));
    }

    #[cfg(unix)]
    #[test]
    fn test_insecure_permissions_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"test\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = Secrets::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_trimmed_and_blank_dropped() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"  ghp_test  \"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.github.token.as_deref(), Some("ghp_test"));

        let mut blank = NamedTempFile::new().unwrap();
        writeln!(blank, "[github]\ntoken = \"   \"").unwrap();
        std::fs::set_permissions(blank.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::load_from_file(blank.path()).unwrap();
        assert!(secrets.github.token.is_none());
    }
}
