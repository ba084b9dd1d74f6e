//! Wiring shared by the commands: database, GitHub client, lifecycle

use std::sync::Arc;

use anyhow::Context;
use classroom_core::jobs::ProvisioningJob;
use classroom_core::{Config, RepoLifecycle, Secrets};
use classroom_db::Database;
use classroom_github::GitHubClient;

/// Opened database plus the loaded configuration
pub struct App {
    pub config: Config,
    pub db: Database,
}

impl App {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let db = Database::new(&config.database.path)
            .await
            .with_context(|| {
                format!("Failed to open database {}", config.database.path.display())
            })?;
        Ok(Self {
            config: config.clone(),
            db,
        })
    }

    /// Lifecycle manager talking to GitHub with the configured token
    pub fn lifecycle(&self) -> anyhow::Result<RepoLifecycle> {
        let secrets = Secrets::load().context("Failed to load secrets")?;
        let client = GitHubClient::from_secrets(&self.config.github, &secrets)
            .context("Failed to create GitHub client")?;
        Ok(RepoLifecycle::new(
            Arc::new(client),
            Arc::new(self.db.bindings()),
        ))
    }

    pub fn provisioning_job(&self) -> anyhow::Result<ProvisioningJob> {
        Ok(ProvisioningJob::new(
            self.lifecycle()?,
            Arc::new(self.db.roster()),
            Arc::new(self.db.jobs()),
            self.config.queue.backoff(),
        ))
    }
}
