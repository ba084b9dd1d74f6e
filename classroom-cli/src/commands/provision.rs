//! Provision command - create one repository without the queue

use clap::Args;
use classroom_core::lifecycle::CreateOutcome;
use classroom_core::model::{ActorRef, AssignmentId};
use classroom_core::{Config, Roster};

use crate::app::App;

/// Create a repository in the foreground
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Assignment id
    assignment: i64,

    /// Actor to provision (`student:<id>` or `group:<id>`)
    actor: ActorRef,

    /// Claim token; reuse one from a failed run to resume it
    #[arg(long)]
    claim: Option<String>,
}

impl ProvisionArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let roster = app.db.roster();

        let assignment = roster
            .assignment(AssignmentId(self.assignment))
            .await?
            .ok_or_else(|| anyhow::anyhow!("Assignment {} not found", self.assignment))?;
        let actor = roster
            .actor(self.actor)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{} not found", self.actor))?;

        let claim = self
            .claim
            .clone()
            .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
        tracing::debug!(%claim, "Provisioning in the foreground");

        let lifecycle = app.lifecycle()?;
        match lifecycle.create(&assignment, &actor, &claim).await {
            Ok(CreateOutcome::Ready(provisioned)) => {
                let binding = &provisioned.binding;
                println!(
                    "Binding {} ready: {}",
                    binding.id,
                    binding.remote.as_ref().map_or("-", |r| r.full_name.as_str())
                );
                if !provisioned.access.granted.is_empty() {
                    println!("  access: {}", provisioned.access.granted.join(", "));
                }
                for failure in &provisioned.access.failures {
                    println!("  access failed: {}", failure);
                }
                if let Some(err) = provisioned.starter_seed {
                    println!("  starter code not imported: {}", err);
                }
            }
            Ok(CreateOutcome::AlreadyReady(binding)) => {
                println!("Binding {} already ready", binding.id);
            }
            Ok(CreateOutcome::Cancelled(key)) => {
                println!("{} was destroyed during provisioning", key);
            }
            Err(err) => {
                if err.is_retryable() {
                    println!("Retry with: --claim {}", claim);
                }
                return Err(err.into());
            }
        }
        Ok(())
    }
}
