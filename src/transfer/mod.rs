//! Warm transfers: bridging the requester and a shelter through a conference.

pub mod model;
pub mod registry;

pub use model::*;
pub use registry::{LegRef, TransferRegistry};
