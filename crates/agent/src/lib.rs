//! Sandbox analysis submission agent.
//!
//! Local clients drop files, directories or URLs onto a Unix socket; the
//! agent walks each submission through a staged pipeline (prefilter,
//! upload, poll, result, report) against a remote sandbox analysis
//! service and records the verdict on a shared task list.

pub mod cli;
pub mod digest;
pub mod ignore;
pub mod listener;
pub mod pipeline;
pub mod sandbox;
pub mod storage;
pub mod task_list;
pub mod types;
