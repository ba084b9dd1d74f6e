//! Repo access linking
//!
//! Maps local membership onto remote permissions: a team grant when the group
//! mirrors a remote team, otherwise one collaborator invite per account.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::AccountFailure;
use crate::model::{Actor, Group, Permission, RemoteRepository};
use crate::remote::VersionControl;

/// Result of granting an actor access to its repository
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    /// Accounts (or `team:<id>`) granted access
    pub granted: Vec<String>,
    /// Accounts that could not be granted access
    pub failures: Vec<AccountFailure>,
}

impl LinkReport {
    /// Nobody received access
    pub fn is_total_failure(&self) -> bool {
        self.granted.is_empty() && !self.failures.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.granted.is_empty() && !self.failures.is_empty()
    }
}

/// Grants remote access for actors
#[derive(Clone)]
pub struct AccessLinker {
    remote: Arc<dyn VersionControl>,
}

impl AccessLinker {
    pub fn new(remote: Arc<dyn VersionControl>) -> Self {
        Self { remote }
    }

    /// Grant `actor` access to `repo`
    ///
    /// Individual account failures are collected; they never stop the grant
    /// for the remaining accounts.
    pub async fn link(
        &self,
        actor: &Actor,
        repo: &RemoteRepository,
        permission: Permission,
    ) -> LinkReport {
        match actor {
            Actor::Student(student) => {
                let mut report = LinkReport::default();
                self.invite(&mut report, repo, &student.login, permission)
                    .await;
                report
            }
            Actor::Group(group) => self.link_group(group, repo, permission).await,
        }
    }

    async fn link_group(
        &self,
        group: &Group,
        repo: &RemoteRepository,
        permission: Permission,
    ) -> LinkReport {
        let mut report = LinkReport::default();

        if let Some(team_id) = group.team_id {
            let account = format!("team:{}", team_id);
            match self
                .remote
                .add_team_to_repo(team_id, &repo.full_name, permission)
                .await
            {
                Ok(()) => {
                    debug!(team_id, repo = %repo.full_name, "Added team to repository");
                    report.granted.push(account);
                }
                Err(error) => {
                    warn!(team_id, repo = %repo.full_name, %error, "Failed to add team to repository");
                    report.failures.push(AccountFailure { account, error });
                }
            }
            return report;
        }

        for access in &group.repo_accesses {
            self.invite(&mut report, repo, &access.login, permission)
                .await;
        }
        report
    }

    async fn invite(
        &self,
        report: &mut LinkReport,
        repo: &RemoteRepository,
        login: &str,
        permission: Permission,
    ) {
        match self
            .remote
            .add_collaborator(&repo.full_name, login, permission)
            .await
        {
            Ok(()) => {
                debug!(login, repo = %repo.full_name, "Invited collaborator");
                report.granted.push(login.to_string());
            }
            Err(error) => {
                warn!(login, repo = %repo.full_name, %error, "Failed to invite collaborator");
                report.failures.push(AccountFailure {
                    account: login.to_string(),
                    error,
                });
            }
        }
    }
}
