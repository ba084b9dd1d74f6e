//! GitHub REST client
//!
//! Each [`VersionControl`] operation maps to exactly one API request (two for
//! the starter code import) and never retries on its own. Failures are
//! classified into [`RemoteError`] so the provisioning job can decide.

use std::time::Duration;

use async_trait::async_trait;
use classroom_core::config::GitHubConfig;
use classroom_core::model::{Organization, Permission, RemoteRepository, Visibility};
use classroom_core::{RemoteError, RemoteResult, Secrets, VersionControl};
use octocrab::models::Repository as OctocrabRepository;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{
    clone_url, remote_repository, CreateRepoBody, ErrorBody, ImportBody, PermissionBody,
};
use crate::rate_limit::{header_u64, RateLimitState};
use crate::{Error, Result};

const API_VERSION: &str = "2022-11-28";

/// GitHub API client shared by all workers
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base: String,
    rate_limit: RateLimitState,
    rate_limit_buffer: u32,
}

impl GitHubClient {
    /// Create a client authenticated with `token`
    pub fn new(config: &GitHubConfig, token: &str) -> Result<Self> {
        let base = Url::parse(&config.api_url)?;
        if token.trim().is_empty() {
            return Err(Error::Auth("GitHub token is empty".to_string()));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| Error::Auth(format!("Invalid token: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("classroom-provisioner"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        info!(api = %base, "Created GitHub client");

        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            rate_limit: RateLimitState::new(),
            rate_limit_buffer: config.rate_limit_buffer,
        })
    }

    /// Create a client with the token from the secrets file or `GITHUB_TOKEN`
    pub fn from_secrets(config: &GitHubConfig, secrets: &Secrets) -> Result<Self> {
        let token = secrets.require_github_token().map_err(|e| Error::Auth(e.to_string()))?;
        Self::new(config, &token)
    }

    /// Shared rate-limit state
    pub fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// Issue one request and return the successful response
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> RemoteResult<Response> {
        if let Some(wait) = self.rate_limit.exhausted(self.rate_limit_buffer) {
            return Err(RemoteError::RateLimited {
                retry_after: Some(wait),
            });
        }

        debug!(%method, path, "GitHub request");
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&method, path, e))?;
        self.rate_limit.update_from_headers(response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        let err = classify(status, &headers, &text);
        debug!(%method, path, status = status.as_u16(), error = %err, "GitHub request failed");
        Err(err)
    }

    async fn json<T: DeserializeOwned>(path: &str, response: Response) -> RemoteResult<T> {
        response.json::<T>().await.map_err(|e| {
            RemoteError::InvalidResponse(format!("Failed to parse response of {}: {}", path, e))
        })
    }

    async fn get_repository(&self, path: &str) -> RemoteResult<OctocrabRepository> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Self::json(path, response).await
    }
}

#[async_trait]
impl VersionControl for GitHubClient {
    async fn create_org_repo(
        &self,
        org: &Organization,
        name: &str,
        visibility: Visibility,
    ) -> RemoteResult<RemoteRepository> {
        let path = format!("organizations/{}/repos", org.id);
        let body = CreateRepoBody {
            name,
            private: visibility.is_private(),
        };
        let response = self.send(Method::POST, &path, Some(&body)).await?;
        let repo = remote_repository(Self::json(&path, response).await?)?;
        info!(org = %org.login, repo = %repo.full_name, repo_id = repo.id, "Created repository");
        Ok(repo)
    }

    async fn find_org_repo(&self, org: &Organization, name: &str) -> RemoteResult<RemoteRepository> {
        let repo = self
            .get_repository(&format!("repos/{}/{}", org.login, name))
            .await?;
        remote_repository(repo)
    }

    async fn add_team_to_repo(
        &self,
        team_id: u64,
        repo_full_name: &str,
        permission: Permission,
    ) -> RemoteResult<()> {
        let path = format!("teams/{}/repos/{}", team_id, repo_full_name);
        let body = PermissionBody {
            permission: permission.as_str(),
        };
        self.send(Method::PUT, &path, Some(&body)).await?;
        debug!(team_id, repo = repo_full_name, "Granted team access");
        Ok(())
    }

    async fn add_collaborator(
        &self,
        repo_full_name: &str,
        login: &str,
        permission: Permission,
    ) -> RemoteResult<()> {
        let path = format!("repos/{}/collaborators/{}", repo_full_name, login);
        let body = PermissionBody {
            permission: permission.as_str(),
        };
        let response = self.send(Method::PUT, &path, Some(&body)).await?;
        // 201 creates an invitation, 204 means the account already had access
        debug!(
            repo = repo_full_name,
            login,
            invited = response.status() == StatusCode::CREATED,
            "Granted collaborator access"
        );
        Ok(())
    }

    async fn push_starter_code(
        &self,
        repo_full_name: &str,
        source_repo_id: u64,
    ) -> RemoteResult<()> {
        let source = self
            .get_repository(&format!("repositories/{}", source_repo_id))
            .await?;
        let vcs_url = clone_url(&source)?;

        let path = format!("repos/{}/import", repo_full_name);
        let body = ImportBody {
            vcs: "git",
            vcs_url: &vcs_url,
        };
        self.send(Method::PUT, &path, Some(&body)).await?;
        info!(repo = repo_full_name, source = %vcs_url, "Started starter code import");
        Ok(())
    }

    async fn delete_repo(&self, repo_id: u64) -> RemoteResult<()> {
        self.send::<()>(Method::DELETE, &format!("repositories/{}", repo_id), None)
            .await?;
        info!(repo_id, "Deleted repository");
        Ok(())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base", &self.base)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

fn transport_error(method: &Method, path: &str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        warn!(%method, path, "GitHub request timed out");
        RemoteError::Timeout(format!("{} {}", method, path))
    } else {
        RemoteError::Network(format!("{} {}: {}", method, path, err))
    }
}

/// Map a non-success response onto the remote error taxonomy
fn classify(status: StatusCode, headers: &HeaderMap, text: &str) -> RemoteError {
    let body = ErrorBody::parse(text);
    let retry_after = header_u64(headers, "retry-after").map(Duration::from_secs);

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Auth(body.describe()),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            if header_u64(headers, "x-ratelimit-remaining") == Some(0) =>
        {
            let until_reset = header_u64(headers, "x-ratelimit-reset").map(|reset| {
                let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
                Duration::from_secs(reset.saturating_sub(now))
            });
            RemoteError::RateLimited {
                retry_after: retry_after.or(until_reset),
            }
        }
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { retry_after },
        StatusCode::FORBIDDEN if retry_after.is_some() || body.is_secondary_rate_limit() => {
            RemoteError::RateLimited { retry_after }
        }
        StatusCode::NOT_FOUND => RemoteError::NotFound(body.describe()),
        StatusCode::UNPROCESSABLE_ENTITY if body.is_name_taken() => {
            RemoteError::AlreadyExists(body.describe())
        }
        _ => RemoteError::Status {
            status: status.as_u16(),
            message: body.describe(),
        },
    }
}
