//! Enqueue command - schedule repository creation

use clap::Args;
use classroom_core::jobs::{ProvisionRequest, ProvisioningJob};
use classroom_core::model::{ActorRef, AssignmentId};
use classroom_core::{Config, Roster};

use crate::app::App;

/// Queue repository creation for one or more actors
#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Assignment id
    assignment: i64,

    /// Actors to provision (`student:<id>` or `group:<id>`)
    #[arg(required = true)]
    actors: Vec<ActorRef>,
}

impl EnqueueArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let assignment_id = AssignmentId(self.assignment);

        if app.db.roster().assignment(assignment_id).await?.is_none() {
            tracing::warn!(assignment = %assignment_id, "Assignment not in roster; jobs will fail validation");
        }

        let queue = app.db.jobs();
        for actor in &self.actors {
            let request = ProvisionRequest::new(assignment_id, *actor);
            let id = ProvisioningJob::enqueue(&queue, &request).await?;
            println!("Enqueued job {} for {}", id, actor);
        }
        Ok(())
    }
}
