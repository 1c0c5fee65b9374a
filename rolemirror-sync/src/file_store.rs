//! File-backed role store.
//!
//! State lives in two files under `state_dir`:
//!
//! ```text
//! roles.json     snapshot: a versioned `RoleStoreFile` document
//! roles.journal  one JSON `JournalEntry` per line, applied on top of the snapshot
//! ```
//!
//! A mutation appends one journal line and is acknowledged once that line is
//! flushed, so each write costs the size of one row. The journal is folded
//! into the snapshot on open and whenever it grows past the compaction
//! threshold; the snapshot itself is always replaced with the `.tmp` + rename
//! pattern. Replaying a journal over a snapshot that already contains it is
//! harmless because every entry is an idempotent upsert or delete.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use rolemirror_core::{GroupId, MemberId, RoleKey, RoleRecord, RoleSet};

use crate::error::{io_err, StoreError};
use crate::store::RoleStore;

pub const STORE_FILE: &str = "roles.json";
pub const JOURNAL_FILE: &str = "roles.journal";
pub const STORE_VERSION: u32 = 1;

/// Journal length that always triggers compaction, however small the store.
pub const DEFAULT_COMPACT_ENTRIES: usize = 4096;

/// On-disk store payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleStoreFile {
    pub version: u32,
    #[serde(default)]
    pub rows: Vec<RoleRecord>,
}

/// One journaled mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalEntry {
    Upsert(RoleRecord),
    Delete { group_id: GroupId, member_id: MemberId },
}

impl JournalEntry {
    fn apply(self, rows: &mut BTreeMap<RoleKey, RoleSet>) {
        match self {
            JournalEntry::Upsert(record) => {
                rows.insert(record.key(), record.roles);
            }
            JournalEntry::Delete {
                group_id,
                member_id,
            } => {
                rows.remove(&RoleKey::new(group_id, member_id));
            }
        }
    }
}

/// Path to the snapshot document, rooted at `state_dir`.
pub fn store_path_at(state_dir: &Path) -> PathBuf {
    state_dir.join(STORE_FILE)
}

/// Path to the journal, rooted at `state_dir`.
pub fn journal_path_at(state_dir: &Path) -> PathBuf {
    state_dir.join(JOURNAL_FILE)
}

/// Load the snapshot document alone. Returns an empty store if the file does
/// not yet exist.
pub fn load_at(state_dir: &Path) -> Result<RoleStoreFile, StoreError> {
    let path = store_path_at(state_dir);
    if !path.exists() {
        return Ok(RoleStoreFile {
            version: STORE_VERSION,
            rows: Vec::new(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the snapshot document atomically.
pub fn save_at(state_dir: &Path, store: &RoleStoreFile) -> Result<(), StoreError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;

    let path = store_path_at(state_dir);
    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Read the journal entries. A torn final line (no trailing newline, left by
/// an interrupted append) is dropped; any other malformed line is an error.
pub fn read_journal_at(state_dir: &Path) -> Result<Vec<JournalEntry>, StoreError> {
    let path = journal_path_at(state_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(&path, err)),
    };

    let complete = contents.ends_with('\n');
    let lines: Vec<&str> = contents.lines().collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) if !complete && index + 1 == lines.len() => {
                tracing::warn!(path = %path.display(), error = %err, "dropping torn journal tail");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(entries)
}

/// Current rows: the snapshot with the journal replayed on top, sorted by key.
pub fn read_at(state_dir: &Path) -> Result<RoleStoreFile, StoreError> {
    let rows = replay_at(state_dir)?.0;
    Ok(RoleStoreFile {
        version: STORE_VERSION,
        rows: to_records(&rows),
    })
}

fn replay_at(state_dir: &Path) -> Result<(BTreeMap<RoleKey, RoleSet>, usize), StoreError> {
    let mut rows: BTreeMap<RoleKey, RoleSet> = load_at(state_dir)?
        .rows
        .into_iter()
        .map(|row| (row.key(), row.roles))
        .collect();
    let entries = read_journal_at(state_dir)?;
    let replayed = entries.len();
    for entry in entries {
        entry.apply(&mut rows);
    }
    Ok((rows, replayed))
}

fn to_records(rows: &BTreeMap<RoleKey, RoleSet>) -> Vec<RoleRecord> {
    rows.iter()
        .map(|(key, roles)| RoleRecord::new(key.group.clone(), key.member.clone(), roles.clone()))
        .collect()
}

fn remove_journal(state_dir: &Path) -> Result<(), StoreError> {
    let path = journal_path_at(state_dir);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&path, err)),
    }
}

#[derive(Debug)]
struct StoreState {
    rows: BTreeMap<RoleKey, RoleSet>,
    journal: Option<tokio::fs::File>,
    journal_entries: usize,
}

/// [`RoleStore`] over a snapshot document plus an append-only journal.
///
/// The composite-key map is the uniqueness authority; one mutex serializes all
/// writers.
#[derive(Debug)]
pub struct FileRoleStore {
    state_dir: PathBuf,
    compact_entries: usize,
    state: Mutex<StoreState>,
}

impl FileRoleStore {
    /// Open the store under `state_dir`, replaying and compacting any journal
    /// left by a previous run.
    ///
    /// Duplicate rows for a key in a hand-edited file collapse to the last one.
    pub fn open_at(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_dir = state_dir.into();
        let (rows, replayed) = replay_at(&state_dir)?;
        if replayed > 0 {
            save_at(
                &state_dir,
                &RoleStoreFile {
                    version: STORE_VERSION,
                    rows: to_records(&rows),
                },
            )?;
            remove_journal(&state_dir)?;
            tracing::debug!(entries = replayed, "compacted role journal on open");
        }
        Ok(Self {
            state_dir,
            compact_entries: DEFAULT_COMPACT_ENTRIES,
            state: Mutex::new(StoreState {
                rows,
                journal: None,
                journal_entries: 0,
            }),
        })
    }

    /// Compact once the journal holds `entries` lines, or as many lines as the
    /// store has rows if that is larger.
    pub fn with_compaction_after(mut self, entries: usize) -> Self {
        self.compact_entries = entries.max(1);
        self
    }

    pub fn path(&self) -> PathBuf {
        store_path_at(&self.state_dir)
    }

    pub fn journal_path(&self) -> PathBuf {
        journal_path_at(&self.state_dir)
    }

    /// Append `entry` and flush it. Only a flushed entry is applied in memory.
    async fn append(&self, state: &mut StoreState, entry: JournalEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let path = self.journal_path();
        if state.journal.is_none() {
            tokio::fs::create_dir_all(&self.state_dir)
                .await
                .map_err(|e| io_err(&self.state_dir, e))?;
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_err(&path, e))?;
            state.journal = Some(file);
        }
        if let Some(journal) = state.journal.as_mut() {
            journal
                .write_all(&line)
                .await
                .map_err(|e| io_err(&path, e))?;
            journal.flush().await.map_err(|e| io_err(&path, e))?;
        }

        entry.apply(&mut state.rows);
        state.journal_entries += 1;

        if state.journal_entries >= self.compact_entries.max(state.rows.len()) {
            // The entry is already durable; a failed compaction is retried on
            // the next threshold crossing or on open.
            if let Err(err) = self.compact(state).await {
                tracing::warn!(error = %err, "role journal compaction failed");
            }
        }
        Ok(())
    }

    async fn compact(&self, state: &mut StoreState) -> Result<(), StoreError> {
        let document = RoleStoreFile {
            version: STORE_VERSION,
            rows: to_records(&state.rows),
        };
        let state_dir = self.state_dir.clone();
        tokio::task::spawn_blocking(move || {
            save_at(&state_dir, &document)?;
            remove_journal(&state_dir)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("store compaction join error: {err}")))??;

        state.journal = None;
        tracing::debug!(
            entries = state.journal_entries,
            rows = state.rows.len(),
            "compacted role journal",
        );
        state.journal_entries = 0;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for FileRoleStore {
    async fn load_all(&self, groups: &[GroupId]) -> Result<Vec<RoleRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|(key, _)| groups.contains(&key.group))
            .map(|(key, roles)| {
                RoleRecord::new(key.group.clone(), key.member.clone(), roles.clone())
            })
            .collect())
    }

    async fn upsert(&self, record: &RoleRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.append(&mut state, JournalEntry::Upsert(record.clone()))
            .await
    }

    async fn delete(&self, group: &GroupId, member: &MemberId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state
            .rows
            .contains_key(&RoleKey::new(group.clone(), member.clone()))
        {
            return Ok(());
        }
        self.append(
            &mut state,
            JournalEntry::Delete {
                group_id: group.clone(),
                member_id: member.clone(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(group: &str, member: &str, roles: &[&str]) -> RoleRecord {
        RoleRecord::new(
            GroupId::from(group),
            MemberId::from(member),
            roles.iter().copied().collect(),
        )
    }

    #[test]
    fn empty_store_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = load_at(tmp.path()).unwrap();
        assert!(store.rows.is_empty());
        assert_eq!(store.version, STORE_VERSION);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let store = RoleStoreFile {
            version: STORE_VERSION,
            rows: vec![record("g", "1", &["a"])],
        };
        save_at(tmp.path(), &store).unwrap();
        let tmp_path = store_path_at(tmp.path()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after rename");
        assert_eq!(load_at(tmp.path()).unwrap(), store);
    }

    #[tokio::test]
    async fn upsert_and_delete_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = FileRoleStore::open_at(tmp.path()).unwrap();
        store.upsert(&record("g", "1", &["a"])).await.unwrap();
        store.upsert(&record("g", "2", &["b"])).await.unwrap();
        store.upsert(&record("g", "1", &["c"])).await.unwrap();
        store
            .delete(&GroupId::from("g"), &MemberId::from("2"))
            .await
            .unwrap();

        let reopened = FileRoleStore::open_at(tmp.path()).unwrap();
        let rows = reopened.load_all(&[GroupId::from("g")]).await.unwrap();
        assert_eq!(rows, vec![record("g", "1", &["c"])]);
    }

    #[tokio::test]
    async fn load_all_filters_by_group() {
        let tmp = TempDir::new().unwrap();
        let store = FileRoleStore::open_at(tmp.path()).unwrap();
        store.upsert(&record("g", "1", &[])).await.unwrap();
        store.upsert(&record("h", "1", &[])).await.unwrap();

        let rows = store.load_all(&[GroupId::from("h")]).await.unwrap();
        assert_eq!(rows, vec![record("h", "1", &[])]);
    }

    #[tokio::test]
    async fn deleting_missing_row_is_ok_and_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = FileRoleStore::open_at(tmp.path()).unwrap();
        store
            .delete(&GroupId::from("g"), &MemberId::from("404"))
            .await
            .unwrap();
        assert!(!store.path().exists());
        assert!(!store.journal_path().exists());
    }

    #[tokio::test]
    async fn writes_append_to_journal_without_rewriting_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = FileRoleStore::open_at(tmp.path()).unwrap();
        for member in 0..50 {
            store
                .upsert(&record("g", &member.to_string(), &["a"]))
                .await
                .unwrap();
        }

        assert!(!store.path().exists(), "snapshot rewritten per write");
        let journal = std::fs::read_to_string(store.journal_path()).unwrap();
        assert_eq!(journal.lines().count(), 50);
        assert_eq!(read_at(tmp.path()).unwrap().rows.len(), 50);
    }

    #[tokio::test]
    async fn journal_compacts_into_snapshot_at_threshold() {
        let tmp = TempDir::new().unwrap();
        let store = FileRoleStore::open_at(tmp.path())
            .unwrap()
            .with_compaction_after(3);
        store.upsert(&record("g", "1", &["a"])).await.unwrap();
        store.upsert(&record("g", "2", &["b"])).await.unwrap();
        assert!(!store.path().exists());

        store.upsert(&record("g", "3", &["c"])).await.unwrap();
        assert!(!store.journal_path().exists());
        assert_eq!(load_at(tmp.path()).unwrap().rows.len(), 3);

        // Writing after a compaction starts a fresh journal.
        store
            .delete(&GroupId::from("g"), &MemberId::from("1"))
            .await
            .unwrap();
        assert_eq!(read_journal_at(tmp.path()).unwrap().len(), 1);
        assert_eq!(
            read_at(tmp.path()).unwrap().rows,
            vec![record("g", "2", &["b"]), record("g", "3", &["c"])]
        );
    }

    #[tokio::test]
    async fn reopen_folds_journal_into_snapshot() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileRoleStore::open_at(tmp.path()).unwrap();
            store.upsert(&record("g", "1", &["a"])).await.unwrap();
            store.upsert(&record("g", "1", &["b"])).await.unwrap();
        }

        let reopened = FileRoleStore::open_at(tmp.path()).unwrap();
        assert!(!reopened.journal_path().exists());
        assert_eq!(
            load_at(tmp.path()).unwrap().rows,
            vec![record("g", "1", &["b"])]
        );
    }

    #[test]
    fn torn_journal_tail_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let full = serde_json::to_string(&JournalEntry::Upsert(record("g", "1", &["a"]))).unwrap();
        std::fs::write(
            journal_path_at(tmp.path()),
            format!("{full}\n{{\"op\":\"upsert\",\"group_"),
        )
        .unwrap();

        let entries = read_journal_at(tmp.path()).unwrap();
        assert_eq!(entries, vec![JournalEntry::Upsert(record("g", "1", &["a"]))]);
    }

    #[test]
    fn malformed_journal_line_in_the_middle_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(journal_path_at(tmp.path()), "garbage\n{}\n").unwrap();
        let err = read_journal_at(tmp.path()).expect_err("malformed");
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn malformed_document_is_json_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(store_path_at(tmp.path()), "{ not json").unwrap();
        let err = FileRoleStore::open_at(tmp.path()).expect_err("malformed");
        assert!(matches!(err, StoreError::Json(_)));
    }
}
