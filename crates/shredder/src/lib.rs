//! Cooperative XML document shredding.
//!
//! Converts documents into streams of structural events and routes them to
//! pluggable per-document-type processors, one event per step, so many
//! documents interleave fairly on one execution context and no slow
//! consumer can stall the dispatch loop.

pub mod actor;
pub mod config;
pub mod processor;
pub mod provider;
pub mod reader;
pub mod sink;
pub mod tagname;

pub use actor::{JobEvent, JobId, ShredderActor, ShredderHandle, SubmitError};
