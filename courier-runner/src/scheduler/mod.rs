//! Scheduler module
//!
//! Takes job requests off the work queue and runs them.

mod consumer;

pub use consumer::JobConsumer;
