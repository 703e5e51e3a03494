//! Session orchestration.
//!
//! A [`SessionRunner`] owns nothing mutable itself: it borrows the shared
//! tool catalog and agent registry, drives exactly one query per `run`
//! call, and keeps all per-session state (the transcript, the active
//! agent, the step count) on the stack of that call. Concurrent sessions
//! are just concurrent `run` futures.

pub mod runner;
pub mod transcript;

pub use runner::{SessionLimits, SessionRunner};
pub use transcript::Transcript;
