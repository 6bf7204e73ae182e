//! Courier Core
//!
//! Core types for the Courier job dispatch protocol.
//!
//! This crate contains:
//! - Domain types: jobs, reply destinations, reply messages and dispatch outcomes
//! - DTOs: the JSON payloads exchanged with workers over the broker

pub mod domain;
pub mod dto;
