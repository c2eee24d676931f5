//! Outbound call jobs: model, registry, and provider SID index.

pub mod model;
pub mod registry;
pub mod sid_index;

pub use model::*;
pub use registry::{AttemptRef, JobRegistry};
pub use sid_index::{Rebind, SidIndex};
