//! Core data models for the replicator.
//!
//! Locations and metadata describe objects in either store, `transfer` holds
//! requests and their outcomes, and `multipart` holds the session state used
//! by chunked transfers. `journal` is the stored row shape of an outcome.

pub mod event;
pub mod journal;
pub mod multipart;
pub mod object;
pub mod transfer;
