//! Offline checkout/edit/upload client for remote feature catalogs.
//!
//! The sync model is optimistic: a checkout grants a time-limited edit
//! lease and materializes a snapshot into a local container, edits are
//! tagged against that snapshot, and an upload submits only the
//! pending rows as a batch that the server processes asynchronously.
//! Version conflicts surface as conflict sets that must be resolved
//! completely before the batch can promote.

pub mod api;
pub mod config;
pub mod error;
pub mod flows;
pub mod models;
pub mod store;
pub mod tagger;
mod util;

pub use config::{ClientConfig, ConflictStrategy};
pub use error::{Error, Result};
