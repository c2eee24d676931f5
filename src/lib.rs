//! Shelter outreach: concurrent intake calls, warm transfers, and the
//! safety gate in front of every live action.

pub mod api;
pub mod calls;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod safety;
pub mod scripting;
pub mod store;
pub mod telephony;
pub mod transfer;
