use crate::entry::{AuxiliaryData, AuxiliaryRecord, CachedEntry};
use auth_engine::{AuthUser, Session};
use parking_lot::Mutex;
use session_config_and_utils::{Clock, SessionTimings};
use session_storage::{KeyValueStore, StorageError, StorageKeys};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
enum CacheError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("corrupt cache: {0}")]
    Corrupt(String),
}

type CacheResult<T> = Result<T, CacheError>;

/// Shadow slot: the entry plus the instant it was placed in memory.
#[derive(Debug, Clone)]
struct Shadow {
    entry: CachedEntry,
    cached_at: i64,
}

/// Two-tier session cache over a durable key-value store.
pub struct PersistentSessionCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    shadow: Mutex<Option<Shadow>>,
}

impl PersistentSessionCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            store,
            clock,
            timings,
            shadow: Mutex::new(None),
        }
    }

    /// Write session, user and timestamp (plus optional auxiliary payloads)
    /// through to durable storage, then mirror into memory.
    ///
    /// A failed write restores the previous durable values and leaves the
    /// shadow untouched.
    pub fn save_session(&self, session: &Session, user: &AuthUser, aux: Option<&AuxiliaryData>) {
        let now = self.clock.now_millis();
        match self.write_entry(session, user, aux, now) {
            Ok(()) => {
                let mut shadow = self.shadow.lock();
                let carried = shadow
                    .as_ref()
                    .filter(|s| s.entry.user.id == user.id)
                    .map(|s| (s.entry.dashboard.clone(), s.entry.profile.clone()))
                    .unwrap_or((None, None));
                let (dashboard, profile) = match aux {
                    Some(aux) => (
                        aux.dashboard.clone().or(carried.0),
                        aux.profile.clone().or(carried.1),
                    ),
                    None => carried,
                };
                *shadow = Some(Shadow {
                    entry: CachedEntry {
                        session: session.clone(),
                        user: user.clone(),
                        timestamp: now,
                        dashboard,
                        profile,
                    },
                    cached_at: now,
                });
                debug!(user_id = %user.id, expires_at = session.expires_at, "Session cached");
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Failed to cache session, keeping previous state");
            }
        }
    }

    fn write_entry(
        &self,
        session: &Session,
        user: &AuthUser,
        aux: Option<&AuxiliaryData>,
        now: i64,
    ) -> CacheResult<()> {
        let mut writes: Vec<(&'static str, String)> = vec![
            (StorageKeys::SESSION, serde_json::to_string(session)?),
            (StorageKeys::USER, serde_json::to_string(user)?),
            (StorageKeys::TIMESTAMP, now.to_string()),
        ];
        if let Some(aux) = aux {
            if let Some(data) = &aux.dashboard {
                writes.push((StorageKeys::DASHBOARD, aux_record(&user.id, data, now)?));
            }
            if let Some(data) = &aux.profile {
                writes.push((StorageKeys::PROFILE, aux_record(&user.id, data, now)?));
            }
        }
        self.write_all_or_restore(&writes)
    }

    /// Apply every write, or put every touched key back the way it was.
    fn write_all_or_restore(&self, writes: &[(&'static str, String)]) -> CacheResult<()> {
        let mut previous: Vec<(&'static str, Option<String>)> = Vec::with_capacity(writes.len());
        for (key, _) in writes {
            previous.push((*key, self.store.get(key)?));
        }

        for (key, value) in writes {
            if let Err(e) = self.store.set(key, value) {
                for (key, old) in &previous {
                    let restored = match old {
                        Some(old) => self.store.set(key, old),
                        None => self.store.delete(key).map(|_| ()),
                    };
                    if let Err(restore_err) = restored {
                        warn!(key, error = %restore_err, "Failed to restore cache key");
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Look up the cached session.
    ///
    /// Serves the shadow while it is younger than the quick-access TTL.
    /// Otherwise reads durable storage: a partial or unparsable record, or
    /// one older than the session TTL, is cleared and reported as a miss.
    pub fn get_session(&self) -> Option<CachedEntry> {
        let now = self.clock.now_millis();

        {
            let shadow = self.shadow.lock();
            if let Some(shadow) = shadow.as_ref() {
                let fresh = age_ms(now, shadow.cached_at)
                    .is_some_and(|age| age < self.timings.quick_access_ttl_ms as i64);
                let live = age_ms(now, shadow.entry.timestamp)
                    .is_some_and(|age| age < self.timings.session_ttl_ms as i64);
                if fresh && live {
                    return Some(shadow.entry.clone());
                }
            }
        }

        match self.read_durable(now) {
            Ok(Some(entry)) => {
                *self.shadow.lock() = Some(Shadow {
                    entry: entry.clone(),
                    cached_at: now,
                });
                Some(entry)
            }
            Ok(None) => {
                *self.shadow.lock() = None;
                None
            }
            Err(CacheError::Storage(e)) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache record unusable, clearing");
                self.clear_session();
                None
            }
        }
    }

    fn read_durable(&self, now: i64) -> CacheResult<Option<CachedEntry>> {
        let session_raw = self.store.get(StorageKeys::SESSION)?;
        let user_raw = self.store.get(StorageKeys::USER)?;
        let timestamp_raw = self.store.get(StorageKeys::TIMESTAMP)?;

        let (session_raw, user_raw, timestamp_raw) = match (session_raw, user_raw, timestamp_raw) {
            (None, None, None) => return Ok(None),
            (Some(s), Some(u), Some(t)) => (s, u, t),
            _ => return Err(CacheError::Corrupt("partial session record".to_string())),
        };

        let timestamp: i64 = timestamp_raw
            .trim()
            .parse()
            .map_err(|_| CacheError::Corrupt(format!("bad timestamp {:?}", timestamp_raw)))?;

        let Some(age) = age_ms(now, timestamp) else {
            return Err(CacheError::Corrupt(format!("timestamp {} out of range", timestamp)));
        };
        if age >= self.timings.session_ttl_ms as i64 {
            info!(age_ms = age, "Cached session expired");
            self.clear_session();
            return Ok(None);
        }

        let session: Session = serde_json::from_str(&session_raw)
            .map_err(|e| CacheError::Corrupt(format!("session: {}", e)))?;
        let user: AuthUser = serde_json::from_str(&user_raw)
            .map_err(|e| CacheError::Corrupt(format!("user: {}", e)))?;

        let dashboard = self.read_aux(
            StorageKeys::DASHBOARD,
            self.timings.dashboard_ttl_ms,
            &user.id,
            now,
        );
        let profile = self.read_aux(
            StorageKeys::PROFILE,
            self.timings.profile_ttl_ms,
            &user.id,
            now,
        );

        Ok(Some(CachedEntry {
            session,
            user,
            timestamp,
            dashboard,
            profile,
        }))
    }

    /// Read an auxiliary payload for `user_id`. Stale or unparsable records
    /// are deleted on sight; another user's record is ignored.
    fn read_aux(&self, key: &str, ttl_ms: u64, user_id: &str, now: i64) -> Option<serde_json::Value> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read auxiliary record");
                return None;
            }
        };

        let record = match serde_json::from_str::<AuxiliaryRecord>(&raw) {
            Ok(record)
                if age_ms(now, record.timestamp).is_some_and(|age| age < ttl_ms as i64) =>
            {
                record
            }
            Ok(_) => {
                debug!(key, "Auxiliary record stale, removing");
                self.delete_quietly(key);
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Auxiliary record unreadable, removing");
                self.delete_quietly(key);
                return None;
            }
        };

        match record.user_id.as_deref() {
            Some(owner) if owner != user_id => None,
            _ => Some(record.data),
        }
    }

    pub fn save_dashboard_data(&self, user_id: &str, data: serde_json::Value) {
        self.save_aux(StorageKeys::DASHBOARD, user_id, data, |entry, data| {
            entry.dashboard = Some(data)
        });
    }

    pub fn get_dashboard_data(&self, user_id: &str) -> Option<serde_json::Value> {
        self.read_aux(
            StorageKeys::DASHBOARD,
            self.timings.dashboard_ttl_ms,
            user_id,
            self.clock.now_millis(),
        )
    }

    pub fn save_profile_data(&self, user_id: &str, data: serde_json::Value) {
        self.save_aux(StorageKeys::PROFILE, user_id, data, |entry, data| {
            entry.profile = Some(data)
        });
    }

    pub fn get_profile_data(&self, user_id: &str) -> Option<serde_json::Value> {
        self.read_aux(
            StorageKeys::PROFILE,
            self.timings.profile_ttl_ms,
            user_id,
            self.clock.now_millis(),
        )
    }

    fn save_aux(
        &self,
        key: &'static str,
        user_id: &str,
        data: serde_json::Value,
        mirror: impl FnOnce(&mut CachedEntry, serde_json::Value),
    ) {
        let now = self.clock.now_millis();
        let written = aux_record(user_id, &data, now)
            .and_then(|raw| self.store.set(key, &raw).map_err(CacheError::from));
        match written {
            Ok(()) => {
                if let Some(shadow) = self.shadow.lock().as_mut() {
                    if shadow.entry.user.id == user_id {
                        mirror(&mut shadow.entry, data);
                    }
                }
            }
            Err(e) => warn!(key, user_id, error = %e, "Failed to cache auxiliary data"),
        }
    }

    /// Refresh the durable write timestamp of the current record.
    pub fn touch(&self) {
        let now = self.clock.now_millis();
        match self.store.has(StorageKeys::SESSION) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "Failed to check cached session");
                return;
            }
        }
        if let Err(e) = self.store.set(StorageKeys::TIMESTAMP, &now.to_string()) {
            warn!(error = %e, "Failed to touch cached session");
            return;
        }
        if let Some(shadow) = self.shadow.lock().as_mut() {
            shadow.entry.timestamp = now;
            shadow.cached_at = now;
        }
    }

    /// Remove every owned and legacy key and empty the shadow. Idempotent.
    pub fn clear_session(&self) {
        *self.shadow.lock() = None;
        let mut removed = 0usize;
        for key in StorageKeys::OWNED.iter().chain(StorageKeys::LEGACY.iter()) {
            match self.store.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(key, error = %e, "Failed to delete cache key"),
            }
        }
        if removed > 0 {
            info!(removed, "Session cache cleared");
        }
    }

    /// Whether a shadow entry is currently held in memory.
    pub fn has_shadow(&self) -> bool {
        self.shadow.lock().is_some()
    }

    fn delete_quietly(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            warn!(key, error = %e, "Failed to delete cache key");
        }
    }
}

fn aux_record(user_id: &str, data: &serde_json::Value, now: i64) -> CacheResult<String> {
    Ok(serde_json::to_string(&AuxiliaryRecord {
        user_id: Some(user_id.to_string()),
        data: data.clone(),
        timestamp: now,
    })?)
}

/// Milliseconds since `stamp`. `None` for a stamp in the future or one too
/// far back to subtract.
fn age_ms(now: i64, stamp: i64) -> Option<i64> {
    now.checked_sub(stamp).filter(|age| *age >= 0)
}
