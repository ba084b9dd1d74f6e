//! Status command - show the bindings of an assignment

use chrono::Utc;
use clap::Args;
use classroom_core::model::AssignmentId;
use classroom_core::{BindingStore, Config};

use crate::app::App;

/// Show repository bindings of an assignment
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Assignment id
    assignment: i64,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let app = App::open(config).await?;
        let bindings = app
            .db
            .bindings()
            .list_for_assignment(AssignmentId(self.assignment))
            .await?;

        if bindings.is_empty() {
            println!("No repositories for assignment {}.", self.assignment);
            return Ok(());
        }

        let now = Utc::now();
        for binding in &bindings {
            let repo = binding
                .remote
                .as_ref()
                .map_or("-", |r| r.full_name.as_str());
            let mut flags = String::new();
            if binding.destroy_requested {
                flags.push_str(" (destroy pending)");
            }
            println!(
                "  [{}] {:<14} {:<8} {}{}  updated {} ago",
                binding.id,
                binding.key.actor.to_string(),
                binding.state.as_str(),
                repo,
                flags,
                format_duration((now - binding.updated_at).num_seconds())
            );
            if let Some(error) = &binding.last_error {
                println!("      error: {}", error);
            }
        }
        Ok(())
    }
}

/// Format seconds into a short human-readable string
fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{}s", seconds.max(0))
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(-3), "0s");
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m");
        assert_eq!(format_duration(7200), "2h");
        assert_eq!(format_duration(172_800), "2d");
    }
}
