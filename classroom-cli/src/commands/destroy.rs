//! Destroy commands - remove provisioned repositories

use clap::Args;
use classroom_core::lifecycle::DestroyOutcome;
use classroom_core::model::{AssignmentId, BindingId};
use classroom_core::Config;

use crate::app::App;

/// Destroy one binding and its remote repository
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Binding id (see `classroom status`)
    binding: i64,

    /// Tear down even if provisioning looks in flight (e.g. after a crash)
    #[arg(long)]
    force: bool,
}

impl DestroyArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let lifecycle = app.lifecycle()?;
        let id = BindingId(self.binding);

        let outcome = if self.force {
            lifecycle.force_destroy(id).await?
        } else {
            lifecycle.destroy(id).await?
        };

        match outcome {
            DestroyOutcome::Destroyed => println!("Binding {} destroyed", id),
            DestroyOutcome::Deferred => println!(
                "Binding {} is being provisioned; it will be destroyed when provisioning settles",
                id
            ),
            DestroyOutcome::AlreadyGone => println!("Binding {} does not exist", id),
        }
        Ok(())
    }
}

/// Destroy every binding of an assignment
#[derive(Args, Debug)]
pub struct DestroyAssignmentArgs {
    /// Assignment id
    assignment: i64,
}

impl DestroyAssignmentArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let teardown = app
            .lifecycle()?
            .destroy_assignment(AssignmentId(self.assignment))
            .await?;

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
            anyhow::bail!("{} binding(s) could not be destroyed", teardown.failed.len());
        }
        Ok(())
    }
}
