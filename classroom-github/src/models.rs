//! Request bodies and response conversions

use classroom_core::model::RemoteRepository;
use classroom_core::RemoteError;
use octocrab::models::Repository as OctocrabRepository;
use serde::{Deserialize, Serialize};

/// Body of `POST /organizations/{org}/repos`
#[derive(Debug, Serialize)]
pub(crate) struct CreateRepoBody<'a> {
    pub name: &'a str,
    pub private: bool,
}

/// Body of team and collaborator grants
#[derive(Debug, Serialize)]
pub(crate) struct PermissionBody<'a> {
    pub permission: &'a str,
}

/// Body of `PUT /repos/{owner}/{repo}/import`
#[derive(Debug, Serialize)]
pub(crate) struct ImportBody<'a> {
    pub vcs: &'a str,
    pub vcs_url: &'a str,
}

/// Error document returned with non-success statuses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| ErrorBody {
            message: text.trim().to_string(),
            errors: Vec::new(),
        })
    }

    /// Top-level message followed by the detail messages
    pub fn describe(&self) -> String {
        let details: Vec<&str> = self
            .errors
            .iter()
            .filter_map(|e| e.message.as_deref())
            .collect();
        if details.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, details.join("; "))
        }
    }

    /// The repository name is taken
    pub fn is_name_taken(&self) -> bool {
        self.errors.iter().any(|e| {
            e.message
                .as_deref()
                .is_some_and(|m| m.contains("already exists"))
        }) || self.message.contains("already exists")
    }

    pub fn is_secondary_rate_limit(&self) -> bool {
        self.message.to_lowercase().contains("rate limit")
    }
}

/// Convert an API repository into the core representation
pub(crate) fn remote_repository(repo: OctocrabRepository) -> Result<RemoteRepository, RemoteError> {
    let full_name = repo.full_name.ok_or_else(|| {
        RemoteError::InvalidResponse(format!("repository {} has no full_name", repo.id.0))
    })?;
    Ok(RemoteRepository::new(repo.id.0, full_name))
}

/// Clone URL of a repository, for starter code imports
pub(crate) fn clone_url(repo: &OctocrabRepository) -> Result<String, RemoteError> {
    repo.clone_url
        .as_ref()
        .or(repo.html_url.as_ref())
        .map(|u| u.to_string())
        .ok_or_else(|| {
            RemoteError::InvalidResponse(format!("repository {} has no clone URL", repo.id.0))
        })
}
