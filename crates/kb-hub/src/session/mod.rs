//! Per-identity session tracking

mod directory;
mod handle;

pub use directory::{Session, SessionDirectory, SessionInfo};
pub use handle::{ConnectionId, SessionHandle};
