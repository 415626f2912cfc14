//! Storage hygiene pass run on the cleanup timer.

use session_storage::{KeyValueStore, StorageKeys, StorageResult};
use tracing::debug;

/// Placeholder that leaks into keys when a client formats a missing id.
const ORPHAN_MARKER: &str = "undefined";

/// Delete legacy keys older than `max_age_ms` (or unreadable, or stamped in
/// the future) and any key containing the orphan marker. Returns the number of keys removed.
pub fn sweep(store: &dyn KeyValueStore, now_ms: i64, max_age_ms: u64) -> StorageResult<usize> {
    let mut removed = 0;
    for key in store.keys()? {
        let stale = if key.contains(ORPHAN_MARKER) {
            true
        } else if StorageKeys::is_legacy(&key) {
            match store.get(&key)? {
                Some(raw) => match legacy_timestamp(&raw) {
                    Ok(Some(ts)) => now_ms
                        .checked_sub(ts)
                        .filter(|age| *age >= 0)
                        .map_or(true, |age| age > max_age_ms as i64),
                    Ok(None) => false,
                    Err(()) => true,
                },
                None => false,
            }
        } else {
            false
        };

        if stale && store.delete(&key)? {
            debug!(key = %key, "Removed stale storage key");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Write time recorded in a legacy value: a bare millis number or an object
/// with a `timestamp` field. `Err` means the value is not JSON at all.
fn legacy_timestamp(raw: &str) -> Result<Option<i64>, ()> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| ())?;
    Ok(match &value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::Object(map) => map.get("timestamp").and_then(|t| t.as_i64()),
        _ => None,
    })
}
