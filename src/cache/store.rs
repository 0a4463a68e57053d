//! Filesystem store for cache entries
//!
//! The cache directory is the only index. Every lookup lists it, parses each
//! `.cache` filename and evicts what it finds expired or malformed along the
//! way, so entries added or removed by other processes are always observed.

use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn};

use super::codec::{
    decode_filename, decode_payload, encode_filename, encode_payload, EntryName, CACHE_SUFFIX,
};
use super::config::CacheConfig;
use super::error::{CacheError, ReadError};
use super::key::Fingerprint;

/// Temporary files hold a payload until it is renamed into place
const PARTIAL_PREFIX: &str = ".diskmemo-";
const PARTIAL_SUFFIX: &str = ".partial";

/// A partial file untouched for this long was abandoned by a crashed writer
pub const STALE_PARTIAL_AFTER: Duration = Duration::from_secs(10 * 60);

/// Source of "now" for entry timestamps and expiry checks
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to
///
/// Lets expiry be exercised without sleeping through a real TTL.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An entry as seen by [`Store::entries`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub file_name: String,
    pub entry: EntryName,
    pub expired: bool,
}

/// Reads, writes and evicts cache entries in one flat directory
#[derive(Debug, Clone)]
pub struct Store {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Opens the store, creating the directory and sweeping editor junk
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the store with a custom time source
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let store = Self { config, clock };
        store.ensure_directory()?;
        store.sweep_junk()?;
        Ok(store)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.config.cache_dir.join(file_name)
    }

    /// Ensures the cache directory exists
    pub fn ensure_directory(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.config.cache_dir)
            .map_err(|e| CacheError::io(&self.config.cache_dir, e))
    }

    /// Names of the regular files in the cache directory
    ///
    /// A directory that disappeared since the store was opened is recreated
    /// and reported as empty.
    fn file_names(&self) -> Result<Vec<String>, CacheError> {
        let dir = &self.config.cache_dir;
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.ensure_directory()?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(CacheError::io(dir, e)),
        };

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::io(dir, e))?;
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }
            // Nothing this crate writes has a non-UTF-8 name
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Deletes an entry file, returning whether it was still there
    pub fn remove(&self, file_name: &str) -> Result<bool, CacheError> {
        let path = self.path_of(file_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Removes editor backups, swap and lock files (`#*#`, `*~`, `.#*`)
    ///
    /// Temporary files left behind by a writer that died before renaming
    /// them go too, once they are older than [`STALE_PARTIAL_AFTER`].
    pub fn sweep_junk(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for name in self.file_names()? {
            if is_junk(&name) && self.remove(&name)? {
                removed += 1;
            }
        }
        removed += self.sweep_partials()?;
        if removed > 0 {
            info!(
                dir = %self.cache_dir().display(),
                removed,
                "Swept junk files from cache directory"
            );
        }
        Ok(removed)
    }

    /// Removes abandoned temporary files, leaving in-flight writes alone
    fn sweep_partials(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for name in self.file_names()? {
            if !is_partial(&name) {
                continue;
            }
            let modified = match fs::metadata(self.path_of(&name)).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                // Renamed into place since the scan
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io(self.path_of(&name), e)),
            };
            let abandoned = SystemTime::now()
                .duration_since(modified)
                .is_ok_and(|age| age >= STALE_PARTIAL_AFTER);
            if abandoned && self.remove(&name)? {
                debug!(file = %name, "Removed abandoned temporary file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_expired(&self, created_at: &DateTime<Local>, now: &DateTime<Local>) -> bool {
        // An entry stamped in the future has a negative age and stays live
        match now.signed_duration_since(*created_at).to_std() {
            Ok(age) => age >= self.config.max_age,
            Err(_) => false,
        }
    }

    /// Finds a live entry for `fingerprint`
    ///
    /// Malformed and expired `.cache` files met during the scan are deleted.
    /// When several live entries share the fingerprint, the first one in
    /// directory order wins.
    pub fn find_live(&self, fingerprint: &Fingerprint) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        for name in self.file_names()? {
            if !name.ends_with(CACHE_SUFFIX) {
                continue;
            }
            let entry = match decode_filename(&name) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(file = %name, error = %e, "Removing malformed cache entry");
                    self.remove(&name)?;
                    continue;
                }
            };
            if self.is_expired(&entry.created_at, &now) {
                debug!(file = %name, "Removing expired cache entry");
                self.remove(&name)?;
                continue;
            }
            if entry.fingerprint == *fingerprint {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Persists `value` under `fingerprint`, stamped with the current time
    ///
    /// The payload is written to a temporary file in the cache directory and
    /// renamed into place, so readers never see a partial entry.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        fingerprint: &Fingerprint,
        value: &T,
    ) -> Result<String, CacheError> {
        let bytes = encode_payload(value).map_err(CacheError::Encode)?;
        let name = encode_filename(fingerprint, &self.clock.now());
        let dir = &self.config.cache_dir;

        let mut tmp = match partial_file(dir) {
            Ok(tmp) => tmp,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.ensure_directory()?;
                partial_file(dir).map_err(|e| CacheError::io(dir, e))?
            }
            Err(e) => return Err(CacheError::io(dir, e)),
        };
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| CacheError::io(tmp.path(), e))?;

        let path = self.path_of(&name);
        tmp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;
        debug!(file = %name, bytes = bytes.len(), "Wrote cache entry");
        Ok(name)
    }

    /// Reads and decodes an entry
    pub fn read<T: DeserializeOwned>(&self, file_name: &str) -> Result<T, ReadError> {
        let path = self.path_of(file_name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadError::Vanished),
            Err(e) => return Err(CacheError::io(path, e).into()),
        };
        Ok(decode_payload(&bytes)?)
    }

    /// Lists every parseable entry without deleting anything
    pub fn entries(&self) -> Result<Vec<ListedEntry>, CacheError> {
        let now = self.clock.now();
        let mut entries: Vec<ListedEntry> = self
            .file_names()?
            .into_iter()
            .filter_map(|file_name| {
                let entry = decode_filename(&file_name).ok()?;
                let expired = self.is_expired(&entry.created_at, &now);
                Some(ListedEntry {
                    file_name,
                    entry,
                    expired,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.entry.created_at.cmp(&b.entry.created_at));
        Ok(entries)
    }

    /// Deletes every expired or malformed entry in one pass
    ///
    /// Abandoned temporary files are removed as well but not counted.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        self.sweep_partials()?;
        let now = self.clock.now();
        let mut removed = 0;
        for name in self.file_names()? {
            if !name.ends_with(CACHE_SUFFIX) {
                continue;
            }
            let stale = match decode_filename(&name) {
                Ok(entry) => self.is_expired(&entry.created_at, &now),
                Err(_) => true,
            };
            if stale && self.remove(&name)? {
                removed += 1;
            }
        }
        info!(removed, "Purged stale cache entries");
        Ok(removed)
    }

    /// Deletes every `.cache` file, live or not
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for name in self.file_names()? {
            if name.ends_with(CACHE_SUFFIX) && self.remove(&name)? {
                removed += 1;
            }
        }
        info!(removed, "Cleared cache directory");
        Ok(removed)
    }
}

/// Matches `#*#`, `*~` and `.#*`
fn is_junk(name: &str) -> bool {
    (name.len() >= 2 && name.starts_with('#') && name.ends_with('#'))
        || name.ends_with('~')
        || name.starts_with(".#")
}

fn is_partial(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

fn partial_file(dir: &Path) -> io::Result<NamedTempFile> {
    Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{derive_key, CallArgs};
    use chrono::TimeZone;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn start_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn create_test_store(max_age_secs: u64) -> (Store, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(start_time()));
        let config = CacheConfig::new(temp_dir.path())
            .with_max_age(Duration::from_secs(max_age_secs));
        let store = Store::with_clock(config, clock.clone()).expect("Store should open");
        (store, clock, temp_dir)
    }

    fn fingerprint(arg: &str) -> Fingerprint {
        derive_key("test", &CallArgs::new().arg(arg).unwrap())
    }

    fn sample() -> TestData {
        TestData {
            name: "test".to_string(),
            value: 42,
        }
    }

    #[test]
    fn test_open_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache").join("dir");

        Store::open(CacheConfig::new(&nested_path)).expect("Store should open");

        assert!(nested_path.is_dir(), "Nested directory should be created");
    }

    #[test]
    fn test_write_creates_named_file_in_cache_directory() {
        let (store, _clock, temp_dir) = create_test_store(60);
        let fp = fingerprint("a");

        let name = store.write(&fp, &sample()).expect("Write should succeed");

        assert_eq!(name, encode_filename(&fp, &start_time()));
        assert!(temp_dir.path().join(&name).exists(), "Cache file should exist");
        // No temporary files are left behind
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_find_live_then_read_returns_written_value() {
        let (store, _clock, _temp_dir) = create_test_store(60);
        let fp = fingerprint("a");
        let written = store.write(&fp, &sample()).unwrap();

        let found = store.find_live(&fp).unwrap();
        assert_eq!(found.as_deref(), Some(written.as_str()));

        let data: TestData = store.read(&written).expect("Should read cache");
        assert_eq!(data, sample());
    }

    #[test]
    fn test_find_live_returns_none_for_unknown_fingerprint() {
        let (store, _clock, _temp_dir) = create_test_store(60);
        store.write(&fingerprint("a"), &sample()).unwrap();

        assert!(store.find_live(&fingerprint("b")).unwrap().is_none());
    }

    #[test]
    fn test_entry_is_live_until_max_age_is_reached() {
        let (store, clock, temp_dir) = create_test_store(10);
        let fp = fingerprint("a");
        let name = store.write(&fp, &sample()).unwrap();

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(store.find_live(&fp).unwrap().as_deref(), Some(name.as_str()));

        clock.advance(Duration::from_millis(1));
        assert!(store.find_live(&fp).unwrap().is_none());
        assert!(!temp_dir.path().join(&name).exists(), "Expired entry should be deleted");
    }

    #[test]
    fn test_scan_evicts_expired_entries_of_other_fingerprints() {
        let (store, clock, temp_dir) = create_test_store(10);
        let old = store.write(&fingerprint("old"), &sample()).unwrap();
        clock.advance(Duration::from_secs(8));
        let fresh = store.write(&fingerprint("fresh"), &sample()).unwrap();
        clock.advance(Duration::from_secs(3));

        assert!(store.find_live(&fingerprint("missing")).unwrap().is_none());
        assert!(!temp_dir.path().join(old).exists());
        assert!(temp_dir.path().join(fresh).exists());
    }

    #[test]
    fn test_malformed_cache_files_are_deleted_during_lookup() {
        let (store, _clock, temp_dir) = create_test_store(60);
        let bad_names = [
            "nounderscore.cache",
            "a_b_c.cache",
            "0123456789abcdef_not-a-date.cache",
        ];
        for name in bad_names {
            fs::write(temp_dir.path().join(name), b"junk").unwrap();
        }
        fs::write(temp_dir.path().join("notes.txt"), b"keep me").unwrap();

        assert!(store.find_live(&fingerprint("a")).unwrap().is_none());

        for name in bad_names {
            assert!(!temp_dir.path().join(name).exists(), "{} should be deleted", name);
        }
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_read_reports_corrupt_payload() {
        let (store, _clock, temp_dir) = create_test_store(60);
        let name = store.write(&fingerprint("a"), &sample()).unwrap();
        fs::write(temp_dir.path().join(&name), b"DMC1 but not really").unwrap();

        let result: Result<TestData, _> = store.read(&name);
        assert!(matches!(result, Err(ReadError::Decode(_))));
    }

    #[test]
    fn test_read_reports_vanished_file() {
        let (store, _clock, _temp_dir) = create_test_store(60);
        let name = store.write(&fingerprint("a"), &sample()).unwrap();
        assert!(store.remove(&name).unwrap());

        let result: Result<TestData, _> = store.read(&name);
        assert!(matches!(result, Err(ReadError::Vanished)));
        assert!(!store.remove(&name).unwrap());
    }

    #[test]
    fn test_open_sweeps_junk_and_keeps_other_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        for name in ["#tmp#", "backup~", ".#lock", "README", "data.json"] {
            fs::write(temp_dir.path().join(name), b"x").unwrap();
        }

        Store::open(CacheConfig::new(temp_dir.path())).expect("Store should open");

        for name in ["#tmp#", "backup~", ".#lock"] {
            assert!(!temp_dir.path().join(name).exists(), "{} should be swept", name);
        }
        for name in ["README", "data.json"] {
            assert!(temp_dir.path().join(name).exists(), "{} should be kept", name);
        }
    }

    #[test]
    fn test_is_junk_patterns() {
        assert!(is_junk("#draft#"));
        assert!(is_junk("##"));
        assert!(is_junk("notes~"));
        assert!(is_junk(".#lockfile"));
        assert!(!is_junk("#"));
        assert!(!is_junk("#draft"));
        assert!(!is_junk(".hidden"));
        assert!(!is_junk("entry.cache"));
    }

    fn write_partial(dir: &Path, name: &str, age: Duration) {
        let path = dir.join(name);
        fs::write(&path, b"half a payload").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_open_sweeps_abandoned_temporary_files_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let hour = Duration::from_secs(3600);
        write_partial(temp_dir.path(), ".diskmemo-abc123.partial", hour);
        write_partial(temp_dir.path(), ".diskmemo-def456.partial", Duration::ZERO);
        write_partial(temp_dir.path(), ".tmpXYZ789", hour);

        Store::open(CacheConfig::new(temp_dir.path())).expect("Store should open");

        assert!(!temp_dir.path().join(".diskmemo-abc123.partial").exists());
        assert!(
            temp_dir.path().join(".diskmemo-def456.partial").exists(),
            "A write still in progress should be kept"
        );
        assert!(temp_dir.path().join(".tmpXYZ789").exists());
    }

    #[test]
    fn test_purge_removes_abandoned_temporary_files() {
        let (store, _clock, temp_dir) = create_test_store(60);
        write_partial(temp_dir.path(), ".diskmemo-crash1.partial", STALE_PARTIAL_AFTER);
        store.write(&fingerprint("a"), &sample()).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 0);
        assert!(!temp_dir.path().join(".diskmemo-crash1.partial").exists());
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_partial_names_are_recognized() {
        let dir = TempDir::new().unwrap();
        let tmp = partial_file(dir.path()).unwrap();
        let name = tmp.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(is_partial(&name), "{} should look like a partial", name);
        assert!(!is_partial("entry.cache"));
        assert!(!is_partial(".tmp1234"));
    }

    #[test]
    fn test_lookup_recreates_vanished_directory() {
        let (store, _clock, temp_dir) = create_test_store(60);
        fs::remove_dir_all(temp_dir.path()).unwrap();

        assert!(store.find_live(&fingerprint("a")).unwrap().is_none());
        assert!(temp_dir.path().is_dir());
    }

    #[test]
    fn test_entries_lists_without_deleting() {
        let (store, clock, _temp_dir) = create_test_store(10);
        store.write(&fingerprint("old"), &sample()).unwrap();
        clock.advance(Duration::from_secs(20));
        store.write(&fingerprint("new"), &sample()).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry.fingerprint, fingerprint("old"));
        assert!(entries[0].expired);
        assert!(!entries[1].expired);
    }

    #[test]
    fn test_purge_expired_and_clear() {
        let (store, clock, temp_dir) = create_test_store(10);
        store.write(&fingerprint("old"), &sample()).unwrap();
        clock.advance(Duration::from_secs(20));
        store.write(&fingerprint("new"), &sample()).unwrap();
        fs::write(temp_dir.path().join("broken.cache"), b"x").unwrap();
        fs::write(temp_dir.path().join("keep.txt"), b"x").unwrap();

        assert_eq!(store.purge_expired().unwrap(), 2);
        assert_eq!(store.entries().unwrap().len(), 1);

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.entries().unwrap().is_empty());
        assert!(temp_dir.path().join("keep.txt").exists());
    }
}
