//! Unit-of-work layer: session lifecycle and end-of-transaction hooks

pub mod session;

pub use session::{Session, TxnEvent};
