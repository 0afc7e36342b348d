pub mod participant;
pub mod status;
pub mod transaction;

pub use participant::*;
pub use status::*;
pub use transaction::*;

/// Current Unix time in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
