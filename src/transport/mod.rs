//! Request transport between workers and the coordinator.
//!
//! In-process workers hand [`Envelope`](crate::messages::Envelope)s straight
//! to the coordinator channel through a [`LocalClient`]. Remote workers speak
//! length-prefixed bincode frames over TCP; the [`RequestServer`] gives every
//! connection a reader thread that forwards envelopes and writes the replies.
//!
//! ```text
//!  LocalClient ───────────── Envelope ─────────────┐
//!                                                  ▼
//!  TcpClient ══frame══► RequestServer conn thread ──► coordinator channel
//!            ◄══frame══                          ◄── reply channel
//! ```

pub mod client;
pub mod frame;
pub mod server;

use thiserror::Error;

pub use client::{Client, LocalClient, TcpClient};
pub use frame::{read_frame, recv_message, send_message, write_frame, MAX_FRAME_LEN};
pub use server::RequestServer;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: u32, max: u32 },
    #[error("unexpected EOF while reading frame")]
    UnexpectedEof,
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("peer disconnected")]
    Disconnected,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}
