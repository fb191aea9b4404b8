//! Transport collaborators and framing for the ZKP client.
//!
//! Two transports are consumed: a reliable, WebSocket-shaped message channel
//! used by the protocol engine, and an unreliable, MTU-limited chunk stream
//! used by device-binding pairing. This crate owns the chunk framing for the
//! latter and the trait seams for the former, plus in-memory doubles of both.

pub mod traits;
pub mod framing;
pub mod send_plan;
pub mod testing;

pub use traits::*;
pub use framing::*;
pub use send_plan::*;
