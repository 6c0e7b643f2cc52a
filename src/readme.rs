//! The two request-level operations: fetch a repository snapshot, and turn a
//! snapshot into a generated README.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::{Config, MAX_CHARS_LIMIT};
use crate::gemini::TextGenerator;
use crate::github::{download_archive, parse_repo_url, ArchiveFetcher};
use crate::packer::{pack_files, PriorityTable};
use crate::prompt::assemble_prompt;
use crate::scanner::{snapshot_archive, FileEntry, RepoSnapshot, SelectionConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub include_patterns: Option<Vec<String>>,
    /// `None` selects the default exclude set; `Some(vec![])` disables excludes.
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
}

impl FetchRequest {
    pub fn selection(&self, cfg: &Config) -> SelectionConfig {
        let defaults = SelectionConfig::from_defaults(&cfg.selection);
        SelectionConfig {
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            max_files: self.max_files.unwrap_or(defaults.max_files),
            include_patterns: self.include_patterns.clone().unwrap_or_default(),
            exclude_patterns: self.exclude_patterns.clone().unwrap_or(defaults.exclude_patterns),
        }
    }
}

/// Download `req.url`'s archive and select its files.
pub fn fetch_repo(req: &FetchRequest, cfg: &Config, fetcher: &dyn ArchiveFetcher) -> Result<RepoSnapshot> {
    let selection = req.selection(cfg);
    selection.validate()?;
    let repo = parse_repo_url(&req.url)?;

    let (branch, bytes) = download_archive(fetcher, &repo, &cfg.archive.branches)?;
    let snapshot = snapshot_archive(&repo.identifier(), &bytes, &selection)
        .with_context(|| format!("processing {repo}@{branch}"))?;

    tracing::info!(
        repo = %snapshot.repo,
        files = snapshot.file_count,
        total_size = snapshot.total_size,
        "snapshot ready"
    );
    Ok(snapshot)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub repo: String,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub include_prompt: bool,
}

impl GenerateRequest {
    pub fn from_snapshot(snapshot: &RepoSnapshot) -> Self {
        Self {
            repo: snapshot.repo.clone(),
            files: snapshot.files.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedReadme {
    pub repo: String,
    pub readme: String,
    pub used_chars: usize,
    pub file_sample_count: usize,
    pub included_files: Vec<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Pack the files, build the prompt and ask the generator for a README.
pub fn generate_readme(req: &GenerateRequest, cfg: &Config, generator: &dyn TextGenerator) -> Result<GeneratedReadme> {
    if req.files.is_empty() {
        bail!("at least one file is required");
    }
    let max_chars = req.max_chars.unwrap_or(cfg.pack.max_chars);
    if max_chars == 0 || max_chars > MAX_CHARS_LIMIT {
        bail!("maxChars must be between 1 and {MAX_CHARS_LIMIT} (got {max_chars})");
    }
    let model = req.model.clone().unwrap_or_else(|| cfg.generation.model.clone());

    let packed = pack_files(&req.files, max_chars, &PriorityTable::default());
    let prompt = assemble_prompt(&req.repo, &packed.text, max_chars);

    tracing::info!(
        repo = %req.repo,
        model = %model,
        used_chars = packed.used_chars,
        included_files = packed.included_files.len(),
        "sending to model"
    );

    let readme = match generator.generate(&model, &prompt) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(repo = %req.repo, error = %e, "generation request failed");
            bail!("generation request failed: {e:#}");
        }
    };

    Ok(GeneratedReadme {
        repo: req.repo.clone(),
        readme,
        used_chars: packed.used_chars,
        file_sample_count: packed.included_files.len(),
        included_files: packed.included_files,
        model,
        prompt: req.include_prompt.then_some(prompt),
    })
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^```(?:markdown|md|mdx)?\s*\n(.*?)\n```\s*$").expect("static regex"))
}

/// Models often wrap the whole README in one ```markdown fence; drop it.
pub fn unwrap_top_level_fence(md: &str) -> &str {
    match fence_regex().captures(md.trim()) {
        Some(caps) => caps.get(1).map_or(md, |m| m.as_str()),
        None => md,
    }
}
