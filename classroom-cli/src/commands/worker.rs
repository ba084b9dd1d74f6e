//! Worker command - consume the provisioning queue

use std::sync::Arc;

use clap::Args;
use classroom_core::jobs::{JobOutcome, WorkerPool};
use classroom_core::Config;

use crate::app::App;
use crate::shutdown::install_shutdown_handler;

/// Run provisioning workers
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Run every job that is due now, then exit
    #[arg(long)]
    once: bool,
}

impl WorkerArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let job = Arc::new(app.provisioning_job()?);
        let pool = Arc::new(WorkerPool::new(
            job,
            Arc::new(app.db.jobs()),
            config.worker.clone(),
            config.queue.lease,
        ));

        if self.once {
            let outcomes = pool.drain().await?;
            print_summary(&outcomes);
            return Ok(());
        }

        let shutdown = install_shutdown_handler();
        pool.run(shutdown).await;
        Ok(())
    }
}

fn print_summary(outcomes: &[JobOutcome]) {
    if outcomes.is_empty() {
        println!("No jobs due.");
        return;
    }

    let mut completed = 0;
    let mut duplicate = 0;
    let mut retrying = 0;
    for outcome in outcomes {
        match outcome {
            JobOutcome::Completed(_) => completed += 1,
            JobOutcome::Duplicate => duplicate += 1,
            JobOutcome::Retrying(_) => retrying += 1,
            JobOutcome::Failed(error) => println!("  failed: {}", error),
            JobOutcome::Dead(error) => println!("  dead: {}", error),
        }
    }
    println!(
        "Ran {} job(s): {} completed, {} duplicate, {} retrying",
        outcomes.len(),
        completed,
        duplicate,
        retrying
    );
}
