//! mega-client: the session core.
//!
//! [`Mega`] ties the pieces together: it authenticates (classic, MFA, or a
//! resumed session dump), loads the node tree into a [`mega_fs::NodeGraph`],
//! keeps the graph current through the long-poll event pump, and moves file
//! bytes with the chunked parallel transfer engine: CTR encryption and
//! CBC-MAC integrity end to end. The service never sees a plaintext byte,
//! name, or key.

mod client;
mod events;
mod session;
pub mod transfer;

pub use client::{Mega, QuotaInfo, UserInfo};
pub use events::EventWaiters;
pub use transfer::{chunk_plan, Chunk, ProgressFn, TransferOptions};

pub use mega_core::{ClientConfig, Error, Result};
pub use mega_fs::{Node, NodeKind};
