//! Tracking Store
//!
//! The file store commits all three records together as one generation
//! directory and then flips the `CURRENT` pointer with a rename. A crash at
//! any point leaves either the previous or the new generation current.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::TrackingState;
use crate::error::StorageError;
use crate::persistence::format;

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const TMP_SUFFIX: &str = ".tmp";

const TRACKED_FILE: &str = "tracked.json";
const NOTIFIED_FILE: &str = "notified.json";
const DEADLIST_FILE: &str = "deadlist.json";

// Flat layout used before generations
const LEGACY_TRACKED_FILE: &str = "tracked_matches.json";
const LEGACY_NOTIFIED_FILE: &str = "notified_matches.json";
const LEGACY_SENT_FILE: &str = "sent_matches.json";
const LEGACY_DEADLIST_FILE: &str = "deadlist.json";

/// Durable home of the tracking state.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Never fails: missing or unreadable records load as empty.
    async fn load(&self) -> TrackingState;

    /// All-or-nothing commit of the three records.
    async fn save(&self, state: &TrackingState) -> Result<(), StorageError>;
}

/// Generational JSON store rooted at `state_dir`.
pub struct FileTrackingStore {
    dir: PathBuf,
}

impl FileTrackingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generation_name(generation: u64) -> String {
        format!("{}{:020}", GENERATION_PREFIX, generation)
    }

    fn parse_generation(name: &str) -> Option<u64> {
        let digits = name.strip_prefix(GENERATION_PREFIX)?;
        let digits = digits.strip_suffix(TMP_SUFFIX).unwrap_or(digits);
        digits.parse().ok()
    }

    /// Directory named by `CURRENT`, if any
    async fn current_generation(&self) -> Result<Option<PathBuf>, StorageError> {
        let pointer = self.dir.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer).await {
            Ok(name) => name,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&pointer, e)),
        };
        let name = name.trim();
        if Self::parse_generation(name).is_none() || name.ends_with(TMP_SUFFIX) {
            return Err(StorageError::InvalidLayout(format!(
                "CURRENT names '{}', not a generation",
                name
            )));
        }
        Ok(Some(self.dir.join(name)))
    }

    /// Highest generation number on disk, committed or not
    async fn highest_generation(&self) -> Result<u64, StorageError> {
        let mut highest = 0;
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            if let Some(generation) = entry.file_name().to_str().and_then(Self::parse_generation) {
                highest = highest.max(generation);
            }
        }
        Ok(highest)
    }

    async fn read_record(path: &Path) -> Option<Value> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read state record, starting empty");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt state record, starting empty");
                None
            }
        }
    }

    async fn load_from(&self, base: &Path, legacy: bool, now: DateTime<Utc>) -> TrackingState {
        let (tracked_file, notified_file, deadlist_file) = if legacy {
            (LEGACY_TRACKED_FILE, LEGACY_NOTIFIED_FILE, LEGACY_DEADLIST_FILE)
        } else {
            (TRACKED_FILE, NOTIFIED_FILE, DEADLIST_FILE)
        };

        let mut state = TrackingState::default();

        let path = base.join(tracked_file);
        if let Some(value) = Self::read_record(&path).await {
            match format::decode_tracked(value) {
                Ok(tracked) => state.tracked = tracked,
                Err(e) => warn!(path = %path.display(), error = %e, "Discarding tracked record"),
            }
        }

        let mut notified_paths = vec![base.join(notified_file)];
        if legacy {
            notified_paths.push(base.join(LEGACY_SENT_FILE));
        }
        for path in notified_paths {
            if let Some(value) = Self::read_record(&path).await {
                match format::decode_notified(value) {
                    Ok(notified) => {
                        for (key, record) in notified {
                            state.notified.entry(key).or_insert(record);
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Discarding notified record"),
                }
            }
        }

        let path = base.join(deadlist_file);
        if let Some(value) = Self::read_record(&path).await {
            match format::decode_deadlist(value, now) {
                Ok(deadlist) => state.deadlist = deadlist,
                Err(e) => warn!(path = %path.display(), error = %e, "Discarding deadlist record"),
            }
        }

        state
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.sync_all().await.map_err(|e| StorageError::io(path, e))
    }

    /// Flush directory metadata so renames survive power loss. Not every
    /// platform allows opening a directory, so failures are ignored.
    async fn sync_dir(path: &Path) {
        if let Ok(dir) = fs::File::open(path).await {
            let _ = dir.sync_all().await;
        }
    }

    /// Drop every generation except `keep`, including abandoned temp dirs
    async fn remove_old_generations(&self, keep: &str) {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not list state dir for cleanup");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == keep || Self::parse_generation(name).is_none() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()).await {
                warn!(generation = name, error = %e, "Could not remove old generation");
            }
        }
    }
}

#[async_trait]
impl TrackingStore for FileTrackingStore {
    async fn load(&self) -> TrackingState {
        let now = Utc::now();

        let mut state = match self.current_generation().await {
            Ok(Some(generation)) => {
                debug!(generation = %generation.display(), "Loading committed generation");
                self.load_from(&generation, false, now).await
            }
            Ok(None) => self.load_from(&self.dir, true, now).await,
            Err(e) => {
                warn!(error = %e, "State pointer unreadable, trying flat layout");
                self.load_from(&self.dir, true, now).await
            }
        };

        let repaired = state.repair_deadlist(now);
        if repaired > 0 {
            warn!(repaired, "Notified matches were missing from the deadlist");
        }

        let counts = state.counts();
        info!(
            tracked = counts.tracked,
            notified = counts.notified,
            deadlisted = counts.deadlisted,
            "Loaded tracking state"
        );
        state
    }

    async fn save(&self, state: &TrackingState) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let generation = self.highest_generation().await? + 1;
        let name = Self::generation_name(generation);
        let final_dir = self.dir.join(&name);
        let tmp_dir = self.dir.join(format!("{}{}", name, TMP_SUFFIX));

        fs::create_dir(&tmp_dir)
            .await
            .map_err(|e| StorageError::io(&tmp_dir, e))?;

        let records = [
            (TRACKED_FILE, format::encode(&state.tracked)?),
            (NOTIFIED_FILE, format::encode(&state.notified)?),
            (DEADLIST_FILE, format::encode(&state.deadlist)?),
        ];
        for (file, bytes) in &records {
            Self::write_synced(&tmp_dir.join(file), bytes).await?;
        }
        Self::sync_dir(&tmp_dir).await;

        fs::rename(&tmp_dir, &final_dir)
            .await
            .map_err(|e| StorageError::io(&final_dir, e))?;

        let pointer = self.dir.join(CURRENT_FILE);
        let pointer_tmp = self.dir.join(format!("{}{}", CURRENT_FILE, TMP_SUFFIX));
        Self::write_synced(&pointer_tmp, format!("{}\n", name).as_bytes()).await?;
        fs::rename(&pointer_tmp, &pointer)
            .await
            .map_err(|e| StorageError::io(&pointer, e))?;
        Self::sync_dir(&self.dir).await;

        debug!(generation, "Committed tracking state");
        self.remove_old_generations(&name).await;
        Ok(())
    }
}

/// In-process store for tests and ephemeral runs.
pub struct MemoryTrackingStore {
    state: Mutex<TrackingState>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryTrackingStore {
    pub fn new(initial: TrackingState) -> Self {
        Self {
            state: Mutex::new(initial),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Make every following `save` fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful commits so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> TrackingState {
        self.state.lock().await.clone()
    }
}

impl Default for MemoryTrackingStore {
    fn default() -> Self {
        Self::new(TrackingState::default())
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn load(&self) -> TrackingState {
        let mut state = self.state.lock().await.clone();
        state.repair_deadlist(Utc::now());
        state
    }

    async fn save(&self, state: &TrackingState) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidLayout("memory store set to fail".into()));
        }
        *self.state.lock().await = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        derive_key, DeadlistEntry, DeadlistReason, LeadingSide, NotificationRecord, Period,
        Reliability, TrackedMatch,
    };

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("goalwatch_store_test_{}", uuid::Uuid::new_v4()))
    }

    fn sample_state() -> TrackingState {
        let now = Utc::now();
        let mut state = TrackingState::default();
        state.tracked.insert(
            derive_key("A", "B", "L"),
            TrackedMatch::Leading {
                leading_side: LeadingSide::Home,
                first_goal_minute: Some(22),
                first_goal_period: Period::FirstHalf,
                first_goal_reliability: Reliability::EXACT,
                first_goal_time: now,
            },
        );
        let notified = derive_key("C", "D", "L");
        state.notified.insert(
            notified.clone(),
            NotificationRecord {
                home: "C".into(),
                away: "D".into(),
                first_score: "0-1".into(),
                notified_at: Some(now),
                ..Default::default()
            },
        );
        state
            .deadlist
            .insert(notified, DeadlistEntry::new(DeadlistReason::Notified, now));
        state
    }

    #[tokio::test]
    async fn test_empty_dir_loads_empty() {
        let store = FileTrackingStore::new(temp_dir());
        assert_eq!(store.load().await, TrackingState::default());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = temp_dir();
        let store = FileTrackingStore::new(&dir);
        let state = sample_state();

        store.save(&state).await.unwrap();
        assert_eq!(store.load().await, state);

        let pointer = std::fs::read_to_string(dir.join(CURRENT_FILE)).unwrap();
        assert_eq!(pointer.trim(), "gen-00000000000000000001");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_old_generations_are_removed() {
        let dir = temp_dir();
        let store = FileTrackingStore::new(&dir);
        store.save(&TrackingState::default()).await.unwrap();
        store.save(&sample_state()).await.unwrap();
        // Leftover from an interrupted commit
        std::fs::create_dir(dir.join("gen-00000000000000000007.tmp")).unwrap();
        store.save(&sample_state()).await.unwrap();

        let generations: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n.starts_with(GENERATION_PREFIX))
            .collect();
        assert_eq!(generations, vec!["gen-00000000000000000008".to_string()]);
        assert_eq!(store.load().await.tracked.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_uncommitted_generation_is_ignored() {
        let dir = temp_dir();
        let store = FileTrackingStore::new(&dir);
        let committed = sample_state();
        store.save(&committed).await.unwrap();

        // A crash after writing the next generation but before flipping CURRENT
        let orphan = dir.join("gen-00000000000000000002");
        std::fs::create_dir(&orphan).unwrap();
        std::fs::write(orphan.join(TRACKED_FILE), b"{\"version\":2,\"entries\":{}}").unwrap();

        assert_eq!(store.load().await, committed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_corrupt_record_loads_empty_others_survive() {
        let dir = temp_dir();
        let store = FileTrackingStore::new(&dir);
        let state = sample_state();
        store.save(&state).await.unwrap();

        let generation = store.current_generation().await.unwrap().unwrap();
        std::fs::write(generation.join(TRACKED_FILE), b"{not json").unwrap();

        let loaded = store.load().await;
        assert!(loaded.tracked.is_empty());
        assert_eq!(loaded.notified, state.notified);
        assert_eq!(loaded.deadlist, state.deadlist);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_legacy_sent_file_is_imported() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(LEGACY_SENT_FILE), b"[1035, 2048]").unwrap();

        let store = FileTrackingStore::new(&dir);
        let loaded = store.load().await;
        assert_eq!(loaded.notified.len(), 2);
        assert!(loaded.notified.values().all(NotificationRecord::is_empty));
        // Repaired on load
        assert_eq!(loaded.deadlist.len(), 2);

        // The first save moves the store to the generational layout
        store.save(&loaded).await.unwrap();
        assert!(dir.join(CURRENT_FILE).exists());
        assert_eq!(store.load().await, loaded);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryTrackingStore::default();
        store.set_fail_saves(true);
        assert!(store.save(&sample_state()).await.is_err());
        assert_eq!(store.save_count(), 0);

        store.set_fail_saves(false);
        store.save(&sample_state()).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().await.tracked.len(), 1);
    }
}
