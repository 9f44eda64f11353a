//! Testing utilities for burstflow orchestration.
//!
//! This module provides:
//! - Scripted remote callers and job clients
//! - A concurrency probe for asserting admission ceilings

mod mocks;
mod probe;

pub use mocks::{ScriptedCaller, ScriptedJobClient};
pub use probe::{ConcurrencyProbe, ProbeGuard};
