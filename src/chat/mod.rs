//! Chat synchronization core
//!
//! `ChatSession` owns one active conversation at a time and wires together
//! the pieces below.

pub mod bucket;
pub mod directory;
pub mod key;
pub mod pagination;
pub mod presence;
pub mod session;
pub mod store;

pub use session::{ChatSession, SessionContext, SessionSettings, SessionUpdate};
