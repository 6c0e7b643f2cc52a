use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

use crate::readme::GeneratedReadme;
use crate::scanner::RepoSnapshot;

// ---------------------------------------------------------------------------
// Flat-file history of analysed repositories.
//
// Storage layout:  ~/.gitme/history.json
//   { "version": 1, "entries": { "<owner/repo>": RepoHistoryEntry } }
//
// Every mutation rewrites the whole file through a temp file + rename. A missing or unreadable file is an
// empty history, never an error.
// ---------------------------------------------------------------------------

const STORE_VERSION: u32 = 1;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A snapshot as kept in history: the fetch result plus when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    #[serde(flatten)]
    pub snapshot: RepoSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub fetched_at: u64,
}

/// One README generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sample_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub readme: String,
}

impl GenerationRecord {
    pub fn from_generated(generated: &GeneratedReadme, created_at: u64) -> Self {
        Self {
            id: generation_id(created_at, &generated.readme),
            created_at,
            model: Some(generated.model.clone()),
            used_chars: Some(generated.used_chars),
            file_sample_count: Some(generated.file_sample_count),
            included_files: Some(generated.included_files.clone()),
            prompt: generated.prompt.clone(),
            readme: generated.readme.clone(),
        }
    }
}

/// `<millis>-<6 hex>`; the suffix hashes the timestamp with the README text.
pub fn generation_id(created_at: u64, readme: &str) -> String {
    let mut buf = Vec::with_capacity(8 + readme.len());
    buf.extend_from_slice(&created_at.to_le_bytes());
    buf.extend_from_slice(readme.as_bytes());
    let h = xxhash_rust::xxh3::xxh3_64(&buf);
    format!("{created_at}-{:06x}", h & 0xff_ffff)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoHistoryEntry {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub snapshot: StoredSnapshot,
    /// Newest first.
    #[serde(default)]
    pub generations: Vec<GenerationRecord>,
    /// Latest user-edited README text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_readme: Option<String>,
    pub updated_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, RepoHistoryEntry>,
}

pub struct HistoryStore {
    path: PathBuf,
    entries: BTreeMap<String, RepoHistoryEntry>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<StoreFile>(&text) {
                Ok(file) => file.entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "history unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(), // file doesn't exist yet
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, then rename over the store, so a crash
    /// mid-write never leaves a truncated history behind.
    fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let text = serde_json::to_string_pretty(&file)?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write history {}", self.path.display()))?;
        Ok(())
    }

    /// Record a fresh snapshot. Existing generations are kept; the edited
    /// README is dropped since it belonged to the old snapshot.
    pub fn upsert_snapshot(&mut self, snapshot: RepoSnapshot, url: Option<String>) -> Result<&RepoHistoryEntry> {
        let now = now_millis();
        let repo = snapshot.repo.clone();
        let generations = self
            .entries
            .remove(&repo)
            .map(|e| e.generations)
            .unwrap_or_default();

        let entry = RepoHistoryEntry {
            repo: repo.clone(),
            url: url.clone(),
            snapshot: StoredSnapshot {
                snapshot,
                url,
                fetched_at: now,
            },
            generations,
            edited_readme: None,
            updated_at: now,
        };
        self.entries.insert(repo.clone(), entry);
        self.save()?;
        self.entries
            .get(&repo)
            .context("history entry vanished after insert")
    }

    /// Prepend a generation. Returns `false` (and stores nothing) for unknown repos.
    pub fn add_generation(&mut self, repo: &str, record: GenerationRecord) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(repo) else {
            return Ok(false);
        };
        entry.generations.insert(0, record);
        entry.updated_at = now_millis();
        self.save()?;
        Ok(true)
    }

    pub fn get_entry(&self, repo: &str) -> Option<&RepoHistoryEntry> {
        self.entries.get(repo)
    }

    /// Most recently updated first.
    pub fn list_entries(&self) -> Vec<&RepoHistoryEntry> {
        let mut out: Vec<&RepoHistoryEntry> = self.entries.values().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.repo.cmp(&b.repo)));
        out
    }

    pub fn remove_entry(&mut self, repo: &str) -> Result<bool> {
        let removed = self.entries.remove(repo).is_some();
        self.save()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    /// Store the user's edited README. Returns `false` for unknown repos.
    pub fn save_edited_readme(&mut self, repo: &str, readme: &str) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(repo) else {
            return Ok(false);
        };
        entry.edited_readme = Some(readme.to_string());
        entry.updated_at = now_millis();
        self.save()?;
        Ok(true)
    }

    pub fn edited_readme(&self, repo: &str) -> Option<&str> {
        self.entries.get(repo)?.edited_readme.as_deref()
    }
}
