//! Messages exchanged between workers, the coordinator and the entry
//! service.
//!
//! # Architecture
//!
//! ```text
//!   generator / evaluator ──Request──► Coordinator
//!            ▲                              │
//!            └─────────Response─────────────┘
//!
//!   remote host ──EntryRequest──► Entry service ──EntryResponse──► remote host
//! ```
//!
//! Every request carries a [`Payload`]: a single item or a list. The response
//! mirrors that shape.

mod entry;
mod payload;
mod request;


pub use entry::{EntryRequest, EntryResponse};
pub use payload::Payload;
pub use request::{EvalReport, EvaluationArgs, Envelope, GenerationArgs, Request, Response};
