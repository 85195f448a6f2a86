//! fieldsync-core - Offline-first sync and audit engine
//!
//! Evaluation records are written to a durable local store first and
//! replicated to a remote authority when connectivity allows. Every change
//! leaves an immutable version entry and an audit entry behind.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;
pub mod versions;

pub use error::{Error, Result};
pub use models::{EntityId, EntitySnapshot};
pub use services::FieldSync;
