//! Actor-based shredding engine
//!
//! Instead of iterating a document in one blocking pass, the engine breaks
//! each job into single-event steps driven by self-addressed `Advance`
//! messages on its own mailbox. Components communicate via `mpsc` channels;
//! state is owned, not shared.
//!
//! # Step cycle
//!
//! ```text
//! submit ─▶ advance ─▶ pull one event ─▶ processor reaction ─▶ advance …
//!                                           │
//!                                           └─ completion / error ─▶ cleanup
//! ```
//!
//! A processor may hold its advance back (handshake pending, downstream
//! backpressure); the job simply sits idle until the processor signals,
//! while other jobs keep stepping.

pub mod handle;
pub mod message;
mod shredder;

pub use handle::{SendError, ShredderHandle};
pub use message::{JobEvent, JobId, ShredderMessage, SubmitError, SubmitRequest};
pub use shredder::ShredderActor;
