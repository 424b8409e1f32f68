//! Directory-backed storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! records/<id>.json      one file per recipe record
//! media/<ref>.bin        blob bytes
//! media/<ref>.json       blob metadata
//! changes.jsonl          header line, then one change entry per line
//! conflicts.json         open conflicts
//! state.json             device id, clock, pull cursor
//! ```
//!
//! Whole-file writes go through a temporary file, `sync_all` and a rename,
//! so a crash leaves either the old or the new content. Appends to the
//! change log are synced before returning; a torn final line left by a crash
//! mid-append is dropped on load.

use super::Backend;
use crate::change_log::{ChangeEntry, StoredChanges};
use crate::reconcile::ConflictRecord;
use crate::state::EngineState;
use crate::{error::Result, Error, MediaBlob, RecipeRecord, Sequence};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const RECORDS_DIR: &str = "records";
const MEDIA_DIR: &str = "media";
const CHANGES_FILE: &str = "changes.jsonl";
const CONFLICTS_FILE: &str = "conflicts.json";
const STATE_FILE: &str = "state.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesHeader {
    high_water: Sequence,
}

/// Stores a recipe book in a directory on the local filesystem.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    /// Serializes appends and rewrites of `changes.jsonl`
    changes_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (creating if needed) a book directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RECORDS_DIR))?;
        fs::create_dir_all(root.join(MEDIA_DIR))?;
        tracing::debug!(root = %root.display(), "file backend opened");
        Ok(Self {
            root,
            changes_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        check_name(id)?;
        Ok(self.root.join(RECORDS_DIR).join(format!("{}.json", id)))
    }

    fn blob_paths(&self, blob_ref: &str) -> Result<(PathBuf, PathBuf)> {
        check_name(blob_ref)?;
        let dir = self.root.join(MEDIA_DIR);
        Ok((
            dir.join(format!("{}.bin", blob_ref)),
            dir.join(format!("{}.json", blob_ref)),
        ))
    }

    fn changes_path(&self) -> PathBuf {
        self.root.join(CHANGES_FILE)
    }
}

impl Backend for FileBackend {
    fn load_records(&self) -> Result<Vec<RecipeRecord>> {
        let mut records = Vec::new();
        for path in json_files(&self.root.join(RECORDS_DIR))? {
            let text = fs::read_to_string(&path)?;
            let record: RecipeRecord = serde_json::from_str(&text).map_err(|e| {
                Error::Storage(format!("corrupt record {}: {}", path.display(), e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn write_record(&self, record: &RecipeRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)
    }

    fn remove_record(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.record_path(id)?)
    }

    fn load_blobs(&self) -> Result<Vec<MediaBlob>> {
        let mut blobs = Vec::new();
        for path in json_files(&self.root.join(MEDIA_DIR))? {
            let text = fs::read_to_string(&path)?;
            let blob: MediaBlob = serde_json::from_str(&text).map_err(|e| {
                Error::Storage(format!("corrupt blob metadata {}: {}", path.display(), e))
            })?;
            if !path.with_extension("bin").exists() {
                tracing::warn!(blob_ref = %blob.blob_ref, "blob metadata without bytes, skipping");
                continue;
            }
            blobs.push(blob);
        }
        Ok(blobs)
    }

    fn write_blob(&self, blob: &MediaBlob, bytes: &[u8]) -> Result<()> {
        let (bin, meta) = self.blob_paths(&blob.blob_ref)?;
        // Bytes first: metadata without bytes is skipped on load.
        write_atomic(&bin, bytes)?;
        write_atomic(&meta, &serde_json::to_vec_pretty(blob)?)
    }

    fn write_blob_meta(&self, blob: &MediaBlob) -> Result<()> {
        let (bin, meta) = self.blob_paths(&blob.blob_ref)?;
        if !bin.exists() {
            return Err(Error::BlobNotFound(blob.blob_ref.clone()));
        }
        write_atomic(&meta, &serde_json::to_vec_pretty(blob)?)
    }

    fn read_blob(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let (bin, _) = self.blob_paths(blob_ref)?;
        match fs::read(&bin) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(blob_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove_blob(&self, blob_ref: &str) -> Result<()> {
        let (bin, meta) = self.blob_paths(blob_ref)?;
        remove_if_exists(&meta)?;
        remove_if_exists(&bin)
    }

    fn load_changes(&self) -> Result<StoredChanges> {
        let _guard = self.changes_lock.lock();
        let text = match fs::read_to_string(self.changes_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoredChanges::default()),
            Err(e) => return Err(e.into()),
        };
        let (stored, torn) = parse_changes(&text)?;
        if torn {
            // Later appends must start on a fresh line.
            write_atomic(&self.changes_path(), &encode_changes(stored.high_water, &stored.entries)?)?;
        }
        Ok(stored)
    }

    fn append_change(&self, entry: &ChangeEntry) -> Result<()> {
        let _guard = self.changes_lock.lock();
        let path = self.changes_path();
        let mut line = Vec::new();
        if !path.exists() {
            serde_json::to_writer(&mut line, &ChangesHeader { high_water: 0 })?;
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn rewrite_changes(&self, high_water: Sequence, entries: &[ChangeEntry]) -> Result<()> {
        let _guard = self.changes_lock.lock();
        write_atomic(&self.changes_path(), &encode_changes(high_water, entries)?)
    }

    fn load_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        match fs::read_to_string(self.root.join(CONFLICTS_FILE)) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::Storage(format!("corrupt conflicts file: {}", e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_conflicts(&self, conflicts: &[ConflictRecord]) -> Result<()> {
        write_atomic(
            &self.root.join(CONFLICTS_FILE),
            &serde_json::to_vec_pretty(conflicts)?,
        )
    }

    fn load_state(&self) -> Result<Option<EngineState>> {
        match fs::read_to_string(self.root.join(STATE_FILE)) {
            Ok(text) => EngineState::from_json(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_state(&self, state: &EngineState) -> Result<()> {
        write_atomic(&self.root.join(STATE_FILE), state.to_json()?.as_bytes())
    }
}

fn encode_changes(high_water: Sequence, entries: &[ChangeEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    serde_json::to_writer(&mut buf, &ChangesHeader { high_water })?;
    buf.push(b'\n');
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Parse `changes.jsonl`, also reporting whether a torn line was dropped.
fn parse_changes(text: &str) -> Result<(StoredChanges, bool)> {
    let mut lines = text.split_inclusive('\n').peekable();
    let mut stored = StoredChanges::default();
    let mut torn = false;

    if let Some(first) = lines.next() {
        match serde_json::from_str::<ChangesHeader>(first.trim_end()) {
            Ok(header) => stored.high_water = header.high_water,
            // crash during the very first append
            Err(_) if !first.ends_with('\n') => return Ok((stored, true)),
            Err(e) => {
                return Err(Error::Storage(format!("corrupt change log header: {}", e)));
            }
        }
    }

    while let Some(line) = lines.next() {
        let is_last = lines.peek().is_none();
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangeEntry>(trimmed) {
            Ok(entry) => {
                stored.high_water = stored.high_water.max(entry.seq);
                stored.entries.push(entry);
            }
            Err(e) if is_last && !line.ends_with('\n') => {
                tracing::warn!(error = %e, "dropping torn trailing change log line");
                torn = true;
            }
            Err(e) => {
                return Err(Error::Storage(format!("corrupt change log entry: {}", e)));
            }
        }
    }
    Ok((stored, torn))
}

/// Only plain identifiers may become file names.
fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::validation("id", format!("'{}' is not a valid identifier", name)))
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
