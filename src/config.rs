use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Exclude patterns applied when the caller supplies none.
///
/// These are regular expressions searched anywhere in the repo-relative path.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["node_modules", "dist", "build", r"\.git/", r"\.cache"];

/// Hard ceilings accepted from callers, regardless of config.
pub const MAX_FILE_SIZE_LIMIT: u64 = 500_000;
pub const MAX_FILES_LIMIT: usize = 3_000;
pub const MAX_CHARS_LIMIT: usize = 200_000;

/// Defaults for the archive filter stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionDefaults {
    /// Per-file ceiling in bytes (inclusive).
    pub max_file_size: u64,
    /// Stop selecting once this many files were accepted.
    pub max_files: usize,
    /// Used when a request carries no exclude list at all.
    pub exclude_patterns: Vec<String>,
}

impl Default for SelectionDefaults {
    fn default() -> Self {
        Self {
            max_file_size: 120_000,
            max_files: 600,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Character budget for the packed file excerpts.
    pub max_chars: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self { max_chars: 120_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    /// Environment variable holding the Generative Language API key.
    pub api_key_env: String,
    /// REST base, `models/{model}:generateContent` is appended.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Where and how repository archives are downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub codeload_base: String,
    /// Branches tried in order; the first one that downloads wins.
    pub branches: Vec<String>,
    pub timeout_secs: u64,
    /// Downloads larger than this are refused.
    pub max_archive_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            codeload_base: "https://codeload.github.com".to_string(),
            branches: vec!["main".to_string(), "master".to_string()],
            timeout_secs: 60,
            max_archive_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Override for the history file. Defaults to `~/.gitme/history.json`.
    pub path: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gitme")
                .join("history.json")
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub selection: SelectionDefaults,
    pub pack: PackConfig,
    pub generation: GenerationConfig,
    pub archive: ArchiveConfig,
    pub history: HistoryConfig,
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".gitme.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    match serde_json::from_str::<Config>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(path = %primary.display(), error = %e, "ignoring malformed config");
            Config::default()
        }
    }
}
