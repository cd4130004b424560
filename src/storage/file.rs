//! File-backed store.
//!
//! Layout under the configured directory:
//!
//! - `modules.json`, `rules.json`: snapshots keyed by id, replaced atomically
//! - `sync_log.jsonl`, `abandonments.jsonl`: append-only JSON lines
//! - `envelopes.jsonl`: envelope journal, one line per state change; folded to
//!   the latest record per envelope and compacted on load
//!
//! Appends are synced to disk before they return.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::BusStore;
use crate::error::Result;
use crate::models::{
    AbandonmentRecord, EnvelopeId, EventEnvelope, IntegrationRule, Module, SyncLogEntry,
};

const MODULES_FILE: &str = "modules.json";
const RULES_FILE: &str = "rules.json";
const SYNC_LOG_FILE: &str = "sync_log.jsonl";
const ABANDONMENTS_FILE: &str = "abandonments.jsonl";
const JOURNAL_FILE: &str = "envelopes.jsonl";

#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
    /// Serializes every write so snapshots and appends never interleave
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `directory`
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        debug!(directory = %directory.display(), "Opened file store");
        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    async fn read_snapshot<T: DeserializeOwned>(&self, name: &str) -> Result<BTreeMap<String, T>> {
        match fs::read(self.path(name)).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomically(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path(name);
        let staging = self.path(&format!("{name}.tmp"));
        let mut file = fs::File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }

    async fn upsert_snapshot<T: Serialize + DeserializeOwned>(
        &self,
        name: &str,
        id: &str,
        value: &T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot: BTreeMap<String, serde_json::Value> = self.read_snapshot(name).await?;
        snapshot.insert(id.to_string(), serde_json::to_value(value)?);
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.write_atomically(name, &bytes).await
    }

    async fn append_line<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read a JSON-lines file. A torn final line (crash mid-append) is skipped.
    async fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let contents = match fs::read_to_string(self.path(name)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let last = lines.len().saturating_sub(1);
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) if index == last => {
                    warn!(file = name, error = %e, "Skipping torn trailing record");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BusStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        self.upsert_snapshot(MODULES_FILE, &module.id, module).await
    }

    async fn load_modules(&self) -> Result<Vec<Module>> {
        let snapshot: BTreeMap<String, Module> = self.read_snapshot(MODULES_FILE).await?;
        Ok(snapshot.into_values().collect())
    }

    async fn save_rule(&self, rule: &IntegrationRule) -> Result<()> {
        self.upsert_snapshot(RULES_FILE, &rule.id, rule).await
    }

    async fn load_rules(&self) -> Result<Vec<IntegrationRule>> {
        let snapshot: BTreeMap<String, IntegrationRule> = self.read_snapshot(RULES_FILE).await?;
        Ok(snapshot.into_values().collect())
    }

    async fn append_sync_entry(&self, entry: &SyncLogEntry) -> Result<()> {
        self.append_line(SYNC_LOG_FILE, entry).await
    }

    async fn load_sync_entries(&self) -> Result<Vec<SyncLogEntry>> {
        self.read_lines(SYNC_LOG_FILE).await
    }

    async fn append_abandonment(&self, record: &AbandonmentRecord) -> Result<()> {
        self.append_line(ABANDONMENTS_FILE, record).await
    }

    async fn load_abandonments(&self) -> Result<Vec<AbandonmentRecord>> {
        self.read_lines(ABANDONMENTS_FILE).await
    }

    async fn journal_envelope(&self, envelope: &EventEnvelope) -> Result<()> {
        self.append_line(JOURNAL_FILE, envelope).await
    }

    async fn load_unfinished_envelopes(&self) -> Result<Vec<EventEnvelope>> {
        let records: Vec<EventEnvelope> = self.read_lines(JOURNAL_FILE).await?;
        let total = records.len();

        let mut order: Vec<EnvelopeId> = Vec::new();
        let mut latest: HashMap<EnvelopeId, EventEnvelope> = HashMap::new();
        for envelope in records {
            if !latest.contains_key(&envelope.id) {
                order.push(envelope.id);
            }
            latest.insert(envelope.id, envelope);
        }

        let mut unfinished: Vec<EventEnvelope> = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .filter(|envelope| !envelope.is_terminal())
            .collect();
        unfinished.sort_by_key(|envelope| envelope.created_at);

        // Compact: keep only the live tail of the journal
        let mut compacted = Vec::new();
        for envelope in &unfinished {
            compacted.extend(serde_json::to_vec(envelope)?);
            compacted.push(b'\n');
        }
        {
            let _guard = self.write_lock.lock().await;
            self.write_atomically(JOURNAL_FILE, &compacted).await?;
        }

        debug!(
            journal_records = total,
            unfinished = unfinished.len(),
            "Compacted envelope journal"
        );
        Ok(unfinished)
    }
}
