//! One shard's keyspace and the lifecycle hooks that bind vector records to it.
//!
//! The host owns keys; the vector type owns only the payload bound to each.
//! `Shard` models the host side just far enough to drive those hooks: keys
//! may hold a vector record or a foreign (other-typed) value, may carry an
//! expiry, and can be deleted, overwritten, flushed, dumped and restored.
//! Commands against one shard are assumed to be serialized by the caller.

use crate::config::StoreConfig;
use crate::error::{Result, VecSimError};
use crate::persistence::codec::{self, RecordCodec};
use crate::persistence::snapshot::{self, SaveStats, SnapshotImage, SnapshotManager};
use crate::search::{KeyFilter, SearchResponse, SimilarityEngine};
use crate::storage::{StoreView, VectorStore};
use crate::vector::VectorRecord;
use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// A single shard: vector records, foreign values and key expiries.
#[derive(Debug)]
pub struct Shard {
    config: StoreConfig,
    store: VectorStore,
    engine: SimilarityEngine,
    /// Values of other types living in the same keyspace.
    foreign: HashMap<String, Vec<u8>>,
    expires: HashMap<String, Instant>,
}

impl Shard {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: VectorStore::new(config.dimension),
            engine: SimilarityEngine::new(&config),
            config,
            foreign: HashMap::new(),
            expires: HashMap::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// ADD: validate `payload` and bind it to `key`, replacing whatever the key held.
    pub fn add(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        let record = VectorRecord::from_bytes(payload, self.config.dimension)?;
        self.add_record(key, record)
    }

    /// Bind an already built record to `key`.
    ///
    /// Fails without touching the keyspace if the record has the wrong dimension.
    pub fn add_record(&mut self, key: &str, record: VectorRecord) -> Result<()> {
        let replaced = self.store.upsert(key, record)?;
        if self.foreign.remove(key).is_some() {
            debug!(key, "vector overwrote foreign value");
        }
        self.expires.remove(key);
        debug!(key, replaced, "vector bound");
        Ok(())
    }

    /// Host SET of a value of another type. Releases any vector under `key`.
    pub fn set_foreign(&mut self, key: &str, value: Vec<u8>) {
        if self.store.remove(key) {
            debug!(key, "vector released by foreign overwrite");
        }
        self.expires.remove(key);
        self.foreign.insert(key.to_string(), value);
    }

    /// Host DEL. Returns how many of `keys` existed.
    pub fn del<S: AsRef<str>>(&mut self, keys: &[S]) -> usize {
        let mut removed = 0;
        for key in keys {
            let key: &str = key.as_ref();
            if !self.expire_if_due(key) && self.release(key) {
                removed += 1;
            }
        }
        removed
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.expire_if_due(key);
        self.store.contains(key) || self.foreign.contains_key(key)
    }

    /// Host EXPIRE. A zero TTL deletes the key immediately.
    /// Returns `false` when the key does not exist.
    pub fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        if !self.exists(key) {
            return Ok(false);
        }
        if ttl.is_zero() {
            self.release(key);
        } else {
            let deadline = deadline_after(ttl)?;
            self.expires.insert(key.to_string(), deadline);
        }
        Ok(true)
    }

    /// Remaining time to live, if the key carries an expiry.
    pub fn ttl(&mut self, key: &str) -> Option<Duration> {
        self.expire_if_due(key);
        self.expires
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Release every key whose deadline has passed. Returns how many were released.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let due: Vec<String> = self
            .expires
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.release(key);
        }
        if !due.is_empty() {
            debug!(count = due.len(), "expired keys released");
        }
        due.len()
    }

    /// Host FLUSHALL/FLUSHDB. Returns how many vector records were released.
    pub fn flush(&mut self) -> usize {
        let released = self.store.clear();
        self.foreign.clear();
        self.expires.clear();
        info!(released, "shard flushed");
        released
    }

    /// Number of live vector records.
    pub fn local_count(&self) -> usize {
        self.store.len() - self.due_where(|key| self.store.contains(key))
    }

    /// Number of live keys of any type.
    pub fn dbsize(&self) -> usize {
        self.store.len() + self.foreign.len() - self.due_where(|_| true)
    }

    /// SIM: exact top-k cosine search over the live records.
    pub fn sim(&mut self, k: i64, filter: Option<&str>, query: &[u8]) -> Result<SearchResponse> {
        let filter = match filter {
            Some(pattern) => KeyFilter::parse(pattern)?,
            None => KeyFilter::All,
        };
        self.purge_expired();
        self.engine.search(&self.store.view(), k, query, &filter)
    }

    /// Point-in-time view of the vector records.
    pub fn view(&self) -> StoreView {
        self.store.view()
    }

    pub fn get(&mut self, key: &str) -> Option<VectorRecord> {
        self.expire_if_due(key);
        self.store.get(key)
    }

    /// Vector keys, in no particular order.
    pub fn list_keys(&self) -> Vec<String> {
        self.store.list_keys()
    }

    /// Host DUMP. `None` when the key does not exist.
    pub fn dump(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.expire_if_due(key);
        match self.store.get(key) {
            Some(record) => record.encode().map(Some),
            None if self.foreign.contains_key(key) => Err(VecSimError::WrongType),
            None => Ok(None),
        }
    }

    /// Host RESTORE. The payload is fully validated before the keyspace changes.
    pub fn restore(&mut self, key: &str, ttl: Option<Duration>, payload: &[u8], replace: bool) -> Result<()> {
        if !replace && self.exists(key) {
            return Err(VecSimError::BusyKey);
        }
        let deadline = ttl.filter(|t| !t.is_zero()).map(deadline_after).transpose()?;
        let record = VectorRecord::decode(payload, self.config.dimension).map_err(|e| {
            warn!(key, error = %e, "rejected restore payload");
            e
        })?;
        self.add_record(key, record)?;
        if let Some(deadline) = deadline {
            self.expires.insert(key.to_string(), deadline);
        }
        Ok(())
    }

    /// Capture the live records for a snapshot save.
    pub fn snapshot_image(&mut self) -> SnapshotImage {
        self.purge_expired();
        let now = Instant::now();
        let wall = SystemTime::now();
        let expires_at_ms = self
            .expires
            .iter()
            .filter(|(key, _)| self.store.contains(key.as_str()))
            .map(|(key, deadline)| {
                let at = wall
                    .checked_add(deadline.saturating_duration_since(now))
                    .map_or(u64::MAX, snapshot::unix_millis);
                (key.clone(), at)
            })
            .collect();
        SnapshotImage::new(self.store.view(), expires_at_ms)
    }

    /// Foreground save.
    pub fn save(&mut self, manager: &SnapshotManager) -> Result<SaveStats> {
        let image = self.snapshot_image();
        manager.save(&image)
    }

    /// Background save: the image is captured now and written on another thread
    /// while the shard keeps serving commands.
    pub fn bgsave(&mut self, manager: SnapshotManager) -> JoinHandle<Result<SaveStats>> {
        let image = self.snapshot_image();
        debug!(records = image.len(), "background save started");
        std::thread::spawn(move || {
            let saved = manager.save(&image);
            if let Err(e) = &saved {
                warn!(error = %e, "background save failed");
            }
            saved
        })
    }

    /// Build a shard from the snapshot in `manager`, or an empty one if none exists.
    ///
    /// Each entry goes through the point-decode path and the ADD path; the first
    /// bad entry aborts the load.
    pub fn load(config: StoreConfig, manager: &SnapshotManager) -> Result<Self> {
        let mut shard = Shard::new(config)?;
        let dimension = shard.config.dimension;
        let now_ms = snapshot::unix_millis(SystemTime::now());
        let mut skipped = 0usize;

        let loaded = manager.load(dimension, |entry| {
            if entry.expires_at_ms.is_some_and(|at| at <= now_ms) {
                skipped += 1;
                return Ok(());
            }
            let record = codec::decode_raw(entry.dimension, &entry.data, dimension)
                .map_err(|e| VecSimError::CorruptPayload(format!("key '{}': {}", entry.key, e)))?;
            shard.add_record(&entry.key, record)?;
            // A deadline past what `Instant` can hold never fires.
            if let Some(deadline) = entry
                .expires_at_ms
                .and_then(|at| Instant::now().checked_add(Duration::from_millis(at - now_ms)))
            {
                shard.expires.insert(entry.key, deadline);
            }
            Ok(())
        });

        match loaded {
            Ok(Some(count)) => debug!(count, skipped, "shard rebuilt from snapshot"),
            Ok(None) => debug!("no snapshot found, starting empty"),
            Err(e) => {
                warn!(error = %e, "snapshot load aborted");
                return Err(e);
            }
        }
        Ok(shard)
    }

    /// Replace this shard's contents with the snapshot on disk.
    ///
    /// On failure the shard is left untouched.
    pub fn reload(&mut self, manager: &SnapshotManager) -> Result<usize> {
        let fresh = Shard::load(self.config.clone(), manager)?;
        *self = fresh;
        Ok(self.store.len())
    }

    /// Release whatever `key` holds. Returns `true` if it held anything.
    fn release(&mut self, key: &str) -> bool {
        self.expires.remove(key);
        let vector = self.store.remove(key);
        let foreign = self.foreign.remove(key).is_some();
        if vector {
            debug!(key, "vector released");
        }
        vector || foreign
    }

    /// Lazily expire `key`. Returns `true` if it was due and has been released.
    fn expire_if_due(&mut self, key: &str) -> bool {
        match self.expires.get(key) {
            Some(&deadline) if deadline <= Instant::now() => {
                self.release(key);
                debug!(key, "key expired");
                true
            }
            _ => false,
        }
    }

    /// Count keys that are past their deadline and satisfy `pred`.
    fn due_where<P: Fn(&str) -> bool>(&self, pred: P) -> usize {
        let now = Instant::now();
        self.expires
            .iter()
            .filter(|(key, &deadline)| deadline <= now && pred(key.as_str()))
            .count()
    }
}

fn deadline_after(ttl: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(ttl)
        .ok_or(VecSimError::InvalidExpireTime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::encode_floats;
    use tempfile::TempDir;

    fn shard() -> Shard {
        Shard::new(StoreConfig::with_dimension(2)).unwrap()
    }

    fn v(x: f32, y: f32) -> Vec<u8> {
        encode_floats(&[x, y])
    }

    #[test]
    fn test_add_and_count() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.add("b", &v(0.0, 1.0)).unwrap();
        shard.add("a", &v(2.0, 0.0)).unwrap();
        assert_eq!(shard.local_count(), 2);
        assert_eq!(shard.get("a").unwrap().as_slice(), &[2.0, 0.0]);
    }

    #[test]
    fn test_add_wrong_size_leaves_state() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        let err = shard.add("a", &encode_floats(&[1.0, 2.0, 3.0])).unwrap_err();
        assert!(err.to_string().contains("not a float vector of size 2"));
        assert_eq!(shard.get("a").unwrap().as_slice(), &[1.0, 0.0]);
        assert_eq!(shard.local_count(), 1);
    }

    #[test]
    fn test_example_scenario() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.add("b", &v(0.0, 1.0)).unwrap();

        let one = shard.sim(1, None, &v(1.0, 0.0)).unwrap();
        assert_eq!(one.keys(), vec!["a"]);

        let two = shard.sim(2, None, &v(1.0, 0.0)).unwrap();
        assert_eq!(two.keys(), vec!["a", "b"]);
        assert!((two.results[0].score - 1.0).abs() < 1e-9);
        assert!(two.results[1].score.abs() < 1e-9);
    }

    #[test]
    fn test_del() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.add("b", &v(0.0, 1.0)).unwrap();
        assert_eq!(shard.del(&["a", "missing", "a"]), 1);
        assert_eq!(shard.local_count(), 1);
        let resp = shard.sim(10, None, &v(1.0, 0.0)).unwrap();
        assert_eq!(resp.keys(), vec!["b"]);
    }

    #[test]
    fn test_foreign_overwrite_releases_vector() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.set_foreign("a", b"plain string".to_vec());
        assert_eq!(shard.local_count(), 0);
        assert_eq!(shard.dbsize(), 1);
        assert!(matches!(shard.dump("a"), Err(VecSimError::WrongType)));

        shard.add("a", &v(0.0, 1.0)).unwrap();
        assert_eq!(shard.local_count(), 1);
        assert_eq!(shard.dbsize(), 1);
    }

    #[test]
    fn test_flush_idempotent() {
        let mut shard = shard();
        assert_eq!(shard.flush(), 0);
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.set_foreign("s", b"x".to_vec());
        assert_eq!(shard.flush(), 1);
        assert_eq!(shard.local_count(), 0);
        assert_eq!(shard.dbsize(), 0);
        assert!(shard.sim(5, None, &v(1.0, 0.0)).unwrap().results.is_empty());
    }

    #[test]
    fn test_expire() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.add("b", &v(0.0, 1.0)).unwrap();
        assert!(shard.expire("a", Duration::from_millis(1)).unwrap());
        assert!(!shard.expire("missing", Duration::from_secs(1)).unwrap());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(shard.local_count(), 1);
        let resp = shard.sim(10, None, &v(1.0, 0.0)).unwrap();
        assert_eq!(resp.keys(), vec!["b"]);
        assert!(!shard.exists("a"));
    }

    #[test]
    fn test_zero_ttl_deletes() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        assert!(shard.expire("a", Duration::ZERO).unwrap());
        assert_eq!(shard.local_count(), 0);
    }

    #[test]
    fn test_unrepresentable_ttl_rejected() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        assert!(matches!(
            shard.expire("a", Duration::MAX),
            Err(VecSimError::InvalidExpireTime)
        ));
        assert!(shard.ttl("a").is_none());

        let payload = shard.dump("a").unwrap().unwrap();
        assert!(matches!(
            shard.restore("b", Some(Duration::MAX), &payload, false),
            Err(VecSimError::InvalidExpireTime)
        ));
        assert!(!shard.exists("b"));
    }

    #[test]
    fn test_add_clears_ttl() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.expire("a", Duration::from_secs(100)).unwrap();
        assert!(shard.ttl("a").is_some());
        shard.add("a", &v(0.0, 1.0)).unwrap();
        assert!(shard.ttl("a").is_none());
    }

    #[test]
    fn test_dump_restore() {
        let mut shard = shard();
        shard.add("a", &v(3.0, 4.0)).unwrap();
        let payload = shard.dump("a").unwrap().unwrap();
        assert!(shard.dump("missing").unwrap().is_none());

        assert!(matches!(
            shard.restore("a", None, &payload, false),
            Err(VecSimError::BusyKey)
        ));
        shard.restore("a", None, &payload, true).unwrap();
        shard.restore("copy", Some(Duration::from_secs(60)), &payload, false).unwrap();

        assert_eq!(shard.get("copy").unwrap().as_slice(), &[3.0, 4.0]);
        assert!(shard.ttl("copy").is_some());
        let resp = shard.sim(1, Some("a"), &v(3.0, 4.0)).unwrap();
        assert!(1.0 - resp.results[0].score <= 1e-5);
    }

    #[test]
    fn test_restore_bad_payload_leaves_state() {
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        let err = shard.restore("a", None, b"garbage!", true).unwrap_err();
        assert!(matches!(err, VecSimError::CorruptPayload(_)));
        assert_eq!(shard.get("a").unwrap().as_slice(), &[1.0, 0.0]);
    }

    #[test]
    fn test_snapshot_reload() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.add("b", &v(0.5, 0.5)).unwrap();
        shard.expire("b", Duration::from_secs(3600)).unwrap();
        shard.save(&mgr).unwrap();

        shard.add("c", &v(0.0, 1.0)).unwrap();
        assert_eq!(shard.reload(&mgr).unwrap(), 2);

        let mut keys = shard.list_keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(shard.ttl("b").is_some());
        assert!(shard.ttl("a").is_none());
    }

    #[test]
    fn test_reload_failure_keeps_shard() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        shard.save(&mgr).unwrap();

        let path = mgr.snapshot_path();
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        shard.add("b", &v(0.0, 1.0)).unwrap();
        assert!(shard.reload(&mgr).is_err());
        assert_eq!(shard.local_count(), 2);
    }

    #[test]
    fn test_bgsave_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path().join("db")).unwrap();
        std::fs::remove_dir_all(dir.path().join("db")).unwrap();

        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();
        let result = shard.bgsave(mgr).join().unwrap();
        assert!(matches!(result, Err(VecSimError::IoError(_))));
        assert_eq!(shard.local_count(), 1);
    }

    #[test]
    fn test_bgsave_sees_point_in_time() {
        let dir = TempDir::new().unwrap();
        let mgr = SnapshotManager::new(dir.path()).unwrap();
        let mut shard = shard();
        shard.add("a", &v(1.0, 0.0)).unwrap();

        let handle = shard.bgsave(mgr.clone());
        shard.add("a", &v(0.0, 1.0)).unwrap();
        shard.add("b", &v(1.0, 1.0)).unwrap();
        handle.join().unwrap().unwrap();

        let restored = Shard::load(StoreConfig::with_dimension(2), &mgr).unwrap();
        assert_eq!(restored.list_keys(), vec!["a"]);
        assert_eq!(restored.view().vector(0), &[1.0, 0.0]);
    }
}
