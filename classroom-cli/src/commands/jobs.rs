//! Job inspection and remediation

use chrono::Utc;
use clap::{Args, Subcommand};
use classroom_core::jobs::{JobId, JobQueue, JobRecord, JobState, CREATE_REPOSITORY_QUEUE};
use classroom_core::Config;

use crate::app::App;

/// Inspect and requeue provisioning jobs
#[derive(Args, Debug)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List jobs; failed and dead jobs by default
    List {
        /// Only jobs in this state (queued, running, done, failed, dead)
        #[arg(short, long)]
        state: Option<JobState>,

        /// Include every state
        #[arg(short, long, conflicts_with = "state")]
        all: bool,
    },

    /// Show one job
    Show {
        /// Job id
        id: i64,
    },

    /// Put a failed or dead job back on the queue
    Requeue {
        /// Job id
        id: i64,
    },
}

impl JobsArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let queue = app.db.jobs();

        match &self.command {
            JobsCommand::List { state, all } => {
                let jobs = queue.list(Some(CREATE_REPOSITORY_QUEUE), *state).await?;
                let jobs: Vec<_> = jobs
                    .into_iter()
                    .filter(|job| *all || state.is_some() || job.state.needs_attention())
                    .collect();

                if jobs.is_empty() {
                    println!("No jobs.");
                }
                for job in &jobs {
                    print_job_line(job);
                }
            }
            JobsCommand::Show { id } => {
                let job = queue
                    .get(JobId(*id))
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Job {} not found", id))?;
                print_job(&job);
            }
            JobsCommand::Requeue { id } => {
                let job = queue.requeue(JobId(*id)).await?;
                println!("Job {} requeued", job.id);
            }
        }
        Ok(())
    }
}

fn print_job_line(job: &JobRecord) {
    println!(
        "  #{:<6} {:<8} attempts={:<3} {}",
        job.id.0,
        job.state.as_str(),
        job.attempts,
        job.last_error.as_deref().unwrap_or("")
    );
}

fn print_job(job: &JobRecord) {
    println!("Job {}", job.id);
    println!("  queue:    {}", job.queue);
    println!("  state:    {}", job.state);
    println!("  attempts: {}", job.attempts);
    println!("  payload:  {}", job.payload);
    if job.state == JobState::Queued && job.run_at > Utc::now() {
        println!("  next run: {}", job.run_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(until) = job.leased_until {
        println!("  leased until: {}", until.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &job.last_error {
        println!("  last error: {}", error);
    }
    println!("  created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
}
