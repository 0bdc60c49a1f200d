//! Key layout shared by every backend
//!
//! - `credential:<user>` - the JSON credential record, never expires
//! - `expired:<user>` - sentinel trigger, TTL = access token lifetime
//! - `refreshing:<user>` - advisory refresh claim, short TTL

pub const RECORD_PREFIX: &str = "credential:";
pub const TRIGGER_PREFIX: &str = "expired:";
pub const CLAIM_PREFIX: &str = "refreshing:";

pub fn record_key(user_id: &str) -> String {
    format!("{RECORD_PREFIX}{user_id}")
}

pub fn trigger_key(user_id: &str) -> String {
    format!("{TRIGGER_PREFIX}{user_id}")
}

pub fn claim_key(user_id: &str) -> String {
    format!("{CLAIM_PREFIX}{user_id}")
}

/// User id carried by a trigger key, or `None` for any other key.
pub fn user_from_trigger(key: &str) -> Option<&str> {
    key.strip_prefix(TRIGGER_PREFIX).filter(|id| !id.is_empty())
}
