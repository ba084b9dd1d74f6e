//! CLI command implementations

pub mod destroy;
pub mod enqueue;
pub mod jobs;
pub mod provision;
pub mod roster;
pub mod status;
pub mod worker;

pub use destroy::{DestroyArgs, DestroyAssignmentArgs};
pub use enqueue::EnqueueArgs;
pub use jobs::JobsArgs;
pub use provision::ProvisionArgs;
pub use roster::RosterArgs;
pub use status::StatusArgs;
pub use worker::WorkerArgs;
