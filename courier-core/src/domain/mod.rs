//! Core domain types
//!
//! These types are shared between the dispatching side (client, CLI) and
//! the worker side (runner). They carry no broker-specific details.

pub mod job;
pub mod outcome;
pub mod reply;
