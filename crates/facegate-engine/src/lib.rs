//! facegate-engine — Timed capture sessions over a camera, a detection
//! adapter and a face store.
//!
//! [`spawn_session`] acquires the camera, drives the auto-capture state
//! machine on a 500 ms sampling clock, and on capture checks for duplicate
//! identities before persisting the new record.

pub mod config;
pub mod engine;
pub mod store;

pub use config::EngineConfig;
pub use engine::{spawn_session, EngineError, EnrollRequest, SessionHandle, SessionOutcome, SessionSnapshot};
pub use store::{FaceStore, RecordFilter, SqliteStore, StoreError};
