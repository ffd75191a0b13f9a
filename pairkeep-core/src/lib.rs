//! Keeps two copies of every file consistent and repairs block-level damage
//! from per-file ledgers.

pub mod block;
pub mod config;
pub mod context;
pub mod create;
pub mod direction;
pub mod dispatch;
pub mod error;
pub mod filetime;
pub mod fsio;
pub mod ledger;
pub mod memfs;
pub mod progress;
pub mod repair;
pub mod report;
pub mod restore;
pub mod rs_codec;
mod scan;
pub mod sidecar;
pub mod verify;

pub use config::{Direction, SyncSettings};
pub use context::{CancelToken, SharedState, SyncContext};
pub use dispatch::process_pair;
pub use error::{Result, SyncError};
pub use report::{Action, Outcome, PairReport, Report, Side};
