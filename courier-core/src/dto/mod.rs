//! Data Transfer Objects for broker messages
//!
//! This module contains the wire payloads exchanged between the dispatcher
//! and workers. Payloads are serialized as compact JSON.

pub mod job;
pub mod reply;
