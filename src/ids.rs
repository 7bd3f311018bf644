//! Locally generated identifiers.
//!
//! Ids are time-prefixed so they sort by creation order, with a random suffix
//! for uniqueness across rapid calls and devices.

use chrono::Utc;
use uuid::Uuid;

/// Generate a new local id: `{unix_millis}-{random}`.
pub fn local_id() -> String {
  format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}
