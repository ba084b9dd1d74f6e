//! Store implementations over the shared pool

pub mod bindings;
pub mod jobs;
pub mod roster;
