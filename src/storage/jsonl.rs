//! JSONL-journaled metadata store with in-memory state.
//!
//! Documents and sets live in memory. When opened with a journal path, every
//! committed batch of mutating operations is appended to the journal as a single
//! JSON line before it is applied. `connect` replays the journal and rewrites it
//! as a snapshot of the current documents and sets. Publishes are delivered
//! through tokio broadcast channels and never journaled.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::traits::{Batch, MetadataStore, Op};
use crate::error::{Result, VizregError};

/// Default broadcast capacity per channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct StoreState {
    docs: HashMap<String, Value>,
    sets: HashMap<String, BTreeSet<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
    replayed: bool,
}

/// Journal line as written
#[derive(Serialize)]
struct JournalEntry<'a> {
    ops: Vec<&'a Op>,
}

/// Journal line as read back
#[derive(Deserialize)]
struct JournalLine {
    ops: Vec<Op>,
}

/// Metadata store holding state in memory, optionally journaled to a JSONL file.
pub struct JsonlStore {
    journal: Option<PathBuf>,
    capacity: usize,
    connected: AtomicBool,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for JsonlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStore")
            .field("journal", &self.journal)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl JsonlStore {
    /// Create a store that keeps everything in memory.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            journal: None,
            capacity: capacity.max(1),
            connected: AtomicBool::new(false),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Create a store journaled to `path`. Nothing is read until `connect`.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            journal: Some(path.as_ref().to_path_buf()),
            ..Self::in_memory(capacity)
        }
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(VizregError::StorageUnavailable("metadata store is not connected".to_string()))
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|e| VizregError::Storage(e.to_string()))
    }

    /// Load the journal into `state`.
    ///
    /// A final line that does not parse is the remnant of an interrupted append
    /// and is skipped. Any other bad line fails the replay.
    fn replay(path: &Path, state: &mut StoreState) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }

        let content = fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();
        let mut applied = 0;
        for (index, line) in lines.iter().enumerate() {
            let entry: JournalLine = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) if index + 1 == lines.len() => {
                    log::warn!("Skipping truncated last entry of {}: {}", path.display(), e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let (staged, _) = stage(state, &entry.ops)?;
            apply(state, staged, &entry.ops);
            applied += 1;
        }
        Ok(applied)
    }

    /// Rewrite the journal as one entry per document and per set.
    fn compact(path: &Path, state: &StoreState) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".compact");
        let tmp = PathBuf::from(tmp);

        let mut docs: Vec<_> = state.docs.iter().collect();
        docs.sort_by(|a, b| a.0.cmp(b.0));
        let mut sets: Vec<_> = state.sets.iter().collect();
        sets.sort_by(|a, b| a.0.cmp(b.0));

        let mut file = File::create(&tmp)?;
        for (key, value) in docs {
            let op = Op::Set {
                key: key.clone(),
                value: value.clone(),
            };
            writeln!(file, "{}", serde_json::to_string(&JournalEntry { ops: vec![&op] })?)?;
        }
        for (key, members) in sets {
            let ops: Vec<Op> = members
                .iter()
                .map(|member| Op::SetAdd {
                    key: key.clone(),
                    member: member.clone(),
                })
                .collect();
            writeln!(
                file,
                "{}",
                serde_json::to_string(&JournalEntry {
                    ops: ops.iter().collect()
                })?
            )?;
        }
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append the mutating ops of a batch to the journal.
    fn append(&self, ops: &[Op]) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };

        let entry = JournalEntry {
            ops: ops.iter().filter(|op| op.is_mutation()).collect(),
        };
        if entry.ops.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Validate, journal and apply `ops` as one unit. Returns increment results in order.
    fn commit(&self, ops: &[Op]) -> Result<Vec<i64>> {
        self.ensure_connected()?;
        let mut state = self.lock()?;

        let (staged, counters) = stage(&state, ops)?;

        // Journal first (source of truth), then apply
        self.append(ops)?;
        apply(&mut state, staged, ops);

        for op in ops {
            if let Op::Publish { channel, message } = op {
                if let Some(tx) = state.channels.get(channel) {
                    // No subscribers is fine
                    let _ = tx.send(message.clone());
                }
            }
        }

        Ok(counters)
    }
}

/// Compute the documents a batch produces without touching `state`.
fn stage<'a>(state: &StoreState, ops: &'a [Op]) -> Result<(HashMap<&'a str, Value>, Vec<i64>)> {
    let mut staged: HashMap<&'a str, Value> = HashMap::new();
    let mut counters = Vec::new();

    for op in ops {
        match op {
            Op::Set { key, value } => {
                if state.sets.contains_key(key) {
                    return Err(wrong_type(key, "set"));
                }
                staged.insert(key.as_str(), value.clone());
            }
            Op::SetIfAbsent { key, value } => {
                if state.sets.contains_key(key) {
                    return Err(wrong_type(key, "set"));
                }
                if !staged.contains_key(key.as_str()) && !state.docs.contains_key(key) {
                    staged.insert(key.as_str(), value.clone());
                }
            }
            Op::SetField { key, field, value } => {
                if state.sets.contains_key(key) {
                    return Err(wrong_type(key, "set"));
                }
                let doc = staged_doc(&mut staged, state, key);
                *field_slot(doc, key, field)? = value.clone();
            }
            Op::SetAdd { key, .. } => {
                if state.docs.contains_key(key) || staged.contains_key(key.as_str()) {
                    return Err(wrong_type(key, "document"));
                }
            }
            Op::Increment { key, field, by } => {
                if state.sets.contains_key(key) {
                    return Err(wrong_type(key, "set"));
                }
                let doc = staged_doc(&mut staged, state, key);
                counters.push(increment_field(doc, key, field, *by)?);
            }
            Op::Publish { .. } => {}
        }
    }

    Ok((staged, counters))
}

/// Commit staged documents and set additions.
fn apply(state: &mut StoreState, staged: HashMap<&str, Value>, ops: &[Op]) {
    for (key, value) in staged {
        state.docs.insert(key.to_string(), value);
    }
    for op in ops {
        if let Op::SetAdd { key, member } = op {
            state.sets.entry(key.clone()).or_default().insert(member.clone());
        }
    }
}

fn wrong_type(key: &str, holds: &str) -> VizregError {
    VizregError::Storage(format!("key {} already holds a {}", key, holds))
}

/// The staged copy of the document at `key`, starting from the stored one or an empty object.
fn staged_doc<'s, 'a>(staged: &'s mut HashMap<&'a str, Value>, state: &StoreState, key: &'a str) -> &'s mut Value {
    match staged.entry(key) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => e.insert(
            state
                .docs
                .get(key)
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
        ),
    }
}

/// The value at dotted path `field`, creating missing objects along the way and a null leaf.
fn field_slot<'v>(doc: &'v mut Value, key: &str, field: &str) -> Result<&'v mut Value> {
    let (parents, leaf) = match field.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, field),
    };

    let mut cursor = doc;
    if let Some(parents) = parents {
        for part in parents.split('.') {
            cursor = cursor
                .as_object_mut()
                .ok_or_else(|| VizregError::Storage(format!("{}: '{}' is not inside an object", key, part)))?
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
    }

    Ok(cursor
        .as_object_mut()
        .ok_or_else(|| VizregError::Storage(format!("{}: '{}' is not inside an object", key, field)))?
        .entry(leaf.to_string())
        .or_insert(Value::Null))
}

/// Add `by` to the integer at dotted path `field`, starting a missing counter at zero.
fn increment_field(doc: &mut Value, key: &str, field: &str, by: i64) -> Result<i64> {
    let slot = field_slot(doc, key, field)?;
    if slot.is_null() {
        *slot = Value::from(0);
    }
    let current = slot
        .as_i64()
        .ok_or_else(|| VizregError::Storage(format!("{}: '{}' is not an integer", key, field)))?;
    let next = current
        .checked_add(by)
        .ok_or_else(|| VizregError::Storage(format!("{}: '{}' overflowed", key, field)))?;
    *slot = Value::from(next);
    Ok(next)
}

#[async_trait]
impl MetadataStore for JsonlStore {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut state = self.lock()?;
        match &self.journal {
            Some(path) if !state.replayed => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                // Replay into fresh state so a failed replay leaves nothing half-applied
                let mut restored = StoreState::default();
                let applied = Self::replay(path, &mut restored)?;
                if path.exists() {
                    Self::compact(path, &restored)?;
                }
                state.docs = restored.docs;
                state.sets = restored.sets;
                log::info!("Replayed {} journal entries from {}", applied, path.display());
            }
            _ => {}
        }
        state.replayed = true;
        self.connected.store(true, Ordering::SeqCst);
        log::debug!("Metadata store connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the senders closes every subscription
        self.lock()?.channels.clear();
        log::debug!("Metadata store disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_connected()?;
        Ok(self.lock()?.docs.get(key).cloned())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let batch = Batch::new().increment(key, field, by);
        self.commit(batch.ops())?
            .pop()
            .ok_or_else(|| VizregError::Storage("increment produced no value".to_string()))
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        self.commit(batch.ops())?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        self.ensure_connected()?;
        let mut state = self.lock()?;
        let capacity = self.capacity;
        let tx = state
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0);
        Ok(tx.subscribe())
    }
}
