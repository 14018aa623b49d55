//! mega-api: the request pipeline.
//!
//! Commands are JSON bodies (single-element arrays of objects) POSTed to
//! `<origin>/cs?id=<sn>[&sid=<session>]`. The transport owns the sequence
//! counter, the retry/backoff policy, service-code mapping, and the
//! proof-of-work dance the service demands on 402 responses. The event
//! stream rides a sibling `/sc` endpoint plus a server-issued wait URL.

pub mod hashcash;
pub mod messages;
pub mod transport;

pub use transport::Transport;
