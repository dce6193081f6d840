//! Glint Dispatch - Serial Background Job Execution
//!
//! Background work (ping uploads, data directory cleanup) never runs on the
//! caller's thread. It is submitted to a [`JobDispatcher`], which executes at
//! most one job at a time, strictly in submission order, and hands back a
//! [`JobHandle`] that can be waited on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;

pub use dispatcher::{job, Job, JobDispatcher, JobHandle, JobId, SerialDispatcher};
pub use error::{Error, Result};
