//! Background sampling of CPU, memory and process telemetry with
//! race-free snapshot handoff to a single consumer.

pub mod config;
pub mod format;
pub mod report;
pub mod system;
