//! Identifier and clock helpers

use uuid::Uuid;

/// Fresh random identifier (UUID v4, hyphenated)
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
