//! Roster commands - register assignments, students and groups

use clap::{Args, Subcommand};
use classroom_core::model::{
    ActorRef, Assignment, AssignmentId, Group, GroupId, Organization, RepoAccess, Student,
    StudentId, Visibility,
};
use classroom_core::Config;

use crate::app::App;

/// Manage the local roster
#[derive(Args, Debug)]
pub struct RosterArgs {
    #[command(subcommand)]
    pub command: RosterCommand,
}

#[derive(Subcommand, Debug)]
pub enum RosterCommand {
    /// Add or update an assignment
    Assignment {
        /// Assignment id
        id: i64,

        /// Slug used as the repository name prefix
        slug: String,

        /// Human-readable title (defaults to the slug)
        #[arg(long)]
        title: Option<String>,

        /// Organization login (defaults to github.organization)
        #[arg(long)]
        org: Option<String>,

        /// Organization id (defaults to github.organization_id)
        #[arg(long)]
        org_id: Option<u64>,

        /// Repository id to import starter code from
        #[arg(long)]
        starter: Option<u64>,

        /// Create public repositories
        #[arg(long)]
        public: bool,

        /// Grant admin instead of push
        #[arg(long)]
        admins: bool,
    },

    /// Add or update a student
    Student {
        /// Student id
        id: i64,

        /// GitHub login
        login: String,
    },

    /// Add or replace a group and its members
    Group {
        /// Group id
        id: i64,

        /// Slug used as the repository name suffix
        slug: String,

        /// Human-readable title (defaults to the slug)
        #[arg(long)]
        title: Option<String>,

        /// GitHub team id mirroring the group
        #[arg(long)]
        team_id: Option<u64>,

        /// Members as `<student-id>:<login>`
        #[arg(short, long = "member", value_parser = parse_member)]
        members: Vec<RepoAccess>,
    },

    /// Destroy the repositories of a student or group, then remove it
    /// (`student:<id>` or `group:<id>`)
    Remove { actor: ActorRef },

    /// List assignments
    List,
}

impl RosterArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let roster = app.db.roster();

        match &self.command {
            RosterCommand::Assignment {
                id,
                slug,
                title,
                org,
                org_id,
                starter,
                public,
                admins,
            } => {
                let login = org
                    .clone()
                    .or_else(|| config.github.organization.clone())
                    .ok_or_else(|| {
                        anyhow::anyhow!("No organization: pass --org or set github.organization")
                    })?;
                let org_id = org_id.or(config.github.organization_id).ok_or_else(|| {
                    anyhow::anyhow!("No organization id: pass --org-id or set github.organization_id")
                })?;

                let assignment = Assignment {
                    id: AssignmentId(*id),
                    slug: slug.clone(),
                    title: title.clone().unwrap_or_else(|| slug.clone()),
                    organization: Organization { id: org_id, login },
                    starter_code_repo_id: *starter,
                    visibility: Visibility::from_public_flag(*public),
                    students_are_repo_admins: *admins,
                };
                roster.add_assignment(&assignment).await?;
                println!("Assignment {} saved", assignment.id);
            }
            RosterCommand::Student { id, login } => {
                roster
                    .add_student(&Student {
                        id: StudentId(*id),
                        login: login.clone(),
                    })
                    .await?;
                println!("Student {} saved", login);
            }
            RosterCommand::Group {
                id,
                slug,
                title,
                team_id,
                members,
            } => {
                let group = Group {
                    id: GroupId(*id),
                    slug: slug.clone(),
                    title: title.clone().unwrap_or_else(|| slug.clone()),
                    team_id: *team_id,
                    repo_accesses: members.clone(),
                };
                roster.add_group(&group).await?;
                println!("Group {} saved with {} member(s)", slug, members.len());
            }
            RosterCommand::Remove { actor } => {
                // repositories go first; deferred ones are torn down when their job settles
                let teardown = app.lifecycle()?.destroy_actor(*actor).await?;
                println!(
                    "Destroyed {}, deferred {}, failed {}",
                    teardown.destroyed.len(),
                    teardown.deferred.len(),
                    teardown.failed.len()
                );
                for (id, err) in &teardown.failed {
                    println!("  binding {}: {}", id, err);
                }
                if !teardown.failed.is_empty() {
                    anyhow::bail!(
                        "{} kept: {} repository binding(s) could not be destroyed",
                        actor,
                        teardown.failed.len()
                    );
                }

                if roster.remove_actor(*actor).await? {
                    println!("Removed {}", actor);
                } else {
                    println!("{} not found", actor);
                }
            }
            RosterCommand::List => {
                for assignment in roster.list_assignments().await? {
                    println!(
                        "  [{}] {} ({}/{}-*){}",
                        assignment.id,
                        assignment.title,
                        assignment.organization.login,
                        assignment.slug,
                        if assignment.visibility.is_private() { "" } else { " public" }
                    );
                }
            }
        }
        Ok(())
    }
}

/// Parse `<student-id>:<login>`
fn parse_member(s: &str) -> Result<RepoAccess, String> {
    let (id, login) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <student-id>:<login>, got {}", s))?;
    let student_id = id
        .parse::<i64>()
        .map_err(|_| format!("invalid student id: {}", id))?;
    if login.is_empty() {
        return Err(format!("missing login in {}", s));
    }
    Ok(RepoAccess {
        student_id: StudentId(student_id),
        login: login.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member() {
        let member = parse_member("12:octocat").unwrap();
        assert_eq!(member.student_id, StudentId(12));
        assert_eq!(member.login, "octocat");

        assert!(parse_member("octocat").is_err());
        assert!(parse_member("x:octocat").is_err());
        assert!(parse_member("12:").is_err());
    }
}
