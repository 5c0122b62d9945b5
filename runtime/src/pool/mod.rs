//! Bounded pool of isolated rendering sessions.

pub mod manager;

pub use manager::{PoolManager, SessionLease, Slot};
