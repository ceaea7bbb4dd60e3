use chrono::{
    DateTime,
    Utc,
};

/// The timestamp type used throughout the crate: peer registration time, task
/// history entries, envelope timestamps.
pub type Timestamp = DateTime<Utc>;

/// The current time.
///
/// Centralized so tests can see a single seam if they ever need to stub time;
/// today it is a thin wrapper over `Utc::now()`.
pub fn now() -> Timestamp {
    Utc::now()
}
