//! Exam proctoring session service.
//!
//! Tracks proctored exam sessions from start to teardown: capture streams,
//! browser lockdown, violations and monitoring processes, and the persisted
//! record written when the session ends.

pub mod api;
pub mod config;
pub mod error;
pub mod proctoring;
pub mod storage;

pub use error::{ProctorError, Result};
