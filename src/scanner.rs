use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::archive::{decode_text, RepoArchive};
use crate::config::{SelectionDefaults, MAX_FILES_LIMIT, MAX_FILE_SIZE_LIMIT};
use crate::patterns::PatternSet;

/// One file taken from a repository archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Repo-relative, `/`-separated.
    pub path: String,
    /// Raw byte length.
    pub size: u64,
    /// Decoded text; absent for binary or non-UTF-8 files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileEntry {
    /// An entry whose bytes could not be read: no size, no content.
    pub fn unreadable(path: String) -> Self {
        Self { path, size: 0, content: None }
    }
}

/// Filter settings for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    pub max_file_size: u64,
    pub max_files: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::from_defaults(&SelectionDefaults::default())
    }
}

impl SelectionConfig {
    pub fn from_defaults(defaults: &SelectionDefaults) -> Self {
        Self {
            max_file_size: defaults.max_file_size,
            max_files: defaults.max_files,
            include_patterns: vec![],
            exclude_patterns: defaults.exclude_patterns.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 || self.max_file_size > MAX_FILE_SIZE_LIMIT {
            bail!("maxFileSize must be between 1 and {MAX_FILE_SIZE_LIMIT} (got {})", self.max_file_size);
        }
        if self.max_files == 0 || self.max_files > MAX_FILES_LIMIT {
            bail!("maxFiles must be between 1 and {MAX_FILES_LIMIT} (got {})", self.max_files);
        }
        Ok(())
    }
}

/// Result of one fetch: the selected files plus totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSnapshot {
    pub repo: String,
    pub file_count: usize,
    pub total_size: u64,
    pub files: Vec<FileEntry>,
}

impl RepoSnapshot {
    pub fn new(repo: impl Into<String>, files: Vec<FileEntry>) -> Self {
        Self {
            repo: repo.into(),
            file_count: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            files,
        }
    }
}

/// Walk the archive in order and keep the files that pass the filters.
///
/// Per candidate: exclude patterns, include patterns, size ceiling, then the
/// file-count cap. Hitting the cap ends the walk; later entries are never
/// looked at.
pub fn select_files(archive: &mut RepoArchive<'_>, cfg: &SelectionConfig) -> Result<Vec<FileEntry>> {
    let excludes = PatternSet::compile(&cfg.exclude_patterns)?;
    let includes = PatternSet::compile(&cfg.include_patterns)?;

    let candidates = archive.entries().to_vec();
    let mut files: Vec<FileEntry> = Vec::new();

    for entry in candidates {
        if let Some(p) = excludes.first_match(&entry.path) {
            tracing::trace!(path = %entry.path, pattern = p.as_str(), "excluded");
            continue;
        }
        if !includes.is_empty() && !includes.matches(&entry.path) {
            continue;
        }

        let bytes = archive.read_capped(&entry, cfg.max_file_size);
        if bytes.as_ref().is_some_and(|b| b.len() as u64 > cfg.max_file_size) {
            tracing::debug!(path = %entry.path, "over size ceiling");
            continue;
        }
        if files.len() >= cfg.max_files {
            tracing::debug!(max_files = cfg.max_files, "file cap reached, stopping");
            break;
        }

        files.push(match bytes {
            Some(bytes) => FileEntry {
                size: bytes.len() as u64,
                content: decode_text(&bytes),
                path: entry.path,
            },
            None => FileEntry::unreadable(entry.path),
        });
    }

    Ok(files)
}

/// Open, filter and summarize an archive in one step.
pub fn snapshot_archive(repo: &str, bytes: &[u8], cfg: &SelectionConfig) -> Result<RepoSnapshot> {
    let mut archive = RepoArchive::open(bytes)?;
    let files = select_files(&mut archive, cfg)?;
    Ok(RepoSnapshot::new(repo, files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::{build_corrupt_zip, build_zip};
    use crate::packer::{pack_files, PriorityTable};

    fn paths(snapshot: &RepoSnapshot) -> Vec<&str> {
        snapshot.files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn default_excludes_drop_node_modules() {
        let readme = vec![b'r'; 500];
        let index = vec![b'i'; 2000];
        let bytes = build_zip(&[
            ("demo-main/README.md", &readme),
            ("demo-main/src/index.ts", &index),
            ("demo-main/node_modules/x.js", &[b'x'; 100]),
        ]);
        let snap = snapshot_archive("me/demo", &bytes, &SelectionConfig::default()).unwrap();
        assert_eq!(paths(&snap), vec!["README.md", "src/index.ts"]);
        assert_eq!(snap.file_count, 2);
        assert_eq!(snap.total_size, 2500);
    }

    #[test]
    fn file_cap_keeps_archive_order() {
        let bytes = build_zip(&[("r/a.txt", b"a"), ("r/b.txt", b"b")]);
        let cfg = SelectionConfig {
            max_files: 1,
            ..SelectionConfig::default()
        };
        let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
        assert_eq!(paths(&snap), vec!["a.txt"]);
    }

    #[test]
    fn cap_counts_only_accepted_files() {
        let big = vec![b'z'; 50];
        let bytes = build_zip(&[
            ("r/dist/skip.js", b"s"),
            ("r/huge.txt", &big),
            ("r/one.txt", b"1"),
            ("r/two.txt", b"2"),
            ("r/three.txt", b"3"),
        ]);
        let cfg = SelectionConfig {
            max_files: 2,
            max_file_size: 10,
            ..SelectionConfig::default()
        };
        let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
        assert_eq!(paths(&snap), vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn size_ceiling_is_inclusive() {
        let at = vec![b'a'; 120_000];
        let over = vec![b'b'; 120_001];
        let bytes = build_zip(&[("r/at.txt", &at), ("r/over.txt", &over)]);
        let snap = snapshot_archive("me/r", &bytes, &SelectionConfig::default()).unwrap();
        assert_eq!(paths(&snap), vec!["at.txt"]);
        assert!(snap.files.iter().all(|f| f.size <= 120_000));
    }

    #[test]
    fn include_patterns_restrict_selection() {
        let bytes = build_zip(&[("r/src/a.ts", b"a"), ("r/lib/b.ts", b"b")]);
        let cfg = SelectionConfig {
            include_patterns: vec!["^src/".to_string()],
            ..SelectionConfig::default()
        };
        let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
        assert_eq!(paths(&snap), vec!["src/a.ts"]);
    }

    #[test]
    fn exclude_wins_over_include() {
        let bytes = build_zip(&[("r/src/build/gen.ts", b"g"), ("r/src/app.ts", b"a")]);
        let cfg = SelectionConfig {
            include_patterns: vec!["^src/".to_string()],
            ..SelectionConfig::default()
        };
        let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
        assert_eq!(paths(&snap), vec!["src/app.ts"]);
    }

    #[test]
    fn empty_exclude_list_keeps_everything() {
        let bytes = build_zip(&[("r/node_modules/x.js", b"x"), ("r/dist/y.js", b"y")]);
        let cfg = SelectionConfig {
            exclude_patterns: vec![],
            ..SelectionConfig::default()
        };
        let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
        assert_eq!(snap.file_count, 2);
    }

    #[test]
    fn binary_file_is_kept_without_content() {
        let bytes = build_zip(&[("r/img.png", &[0x89, 0x50, 0x00, 0xff])]);
        let snap = snapshot_archive("me/r", &bytes, &SelectionConfig::default()).unwrap();
        assert_eq!(snap.files.len(), 1);
        assert_eq!(snap.files[0].size, 4);
        assert!(snap.files[0].content.is_none());
    }

    #[test]
    fn unreadable_entry_is_kept_without_content_and_never_packed() {
        let bytes = build_corrupt_zip(
            &[("r/a.txt", b"FLIPPED-BYTES-HERE"), ("r/b.txt", b"fine")],
            b"FLIPPED-BYTES-HERE",
        );
        let snap = snapshot_archive("me/r", &bytes, &SelectionConfig::default()).unwrap();
        assert_eq!(paths(&snap), vec!["a.txt", "b.txt"]);
        assert_eq!(snap.files[0].size, 0);
        assert!(snap.files[0].content.is_none());

        let packed = pack_files(&snap.files, 10_000, &PriorityTable::default());
        assert_eq!(packed.included_files, vec!["b.txt"]);
    }

    #[test]
    fn bad_pattern_fails_the_request() {
        let bytes = build_zip(&[("r/a.txt", b"a")]);
        let cfg = SelectionConfig {
            include_patterns: vec!["[".to_string()],
            ..SelectionConfig::default()
        };
        assert!(snapshot_archive("me/r", &bytes, &cfg).is_err());
    }

    #[test]
    fn output_never_exceeds_cap() {
        let names: Vec<String> = (0..25).map(|i| format!("r/f{i:02}.txt")).collect();
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        let bytes = build_zip(&entries);
        for cap in [1usize, 7, 25, 40] {
            let cfg = SelectionConfig {
                max_files: cap,
                ..SelectionConfig::default()
            };
            let snap = snapshot_archive("me/r", &bytes, &cfg).unwrap();
            assert_eq!(snap.file_count, cap.min(25));
            assert_eq!(snap.files[0].path, "f00.txt");
        }
    }

    #[test]
    fn validate_rejects_out_of_range_limits() {
        let mut cfg = SelectionConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.max_files = 0;
        assert!(cfg.validate().is_err());
        cfg.max_files = 10;
        cfg.max_file_size = MAX_FILE_SIZE_LIMIT + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = RepoSnapshot::new("a/b", vec![FileEntry { path: "x".into(), size: 3, content: None }]);
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["fileCount"], 1);
        assert_eq!(v["totalSize"], 3);
        assert!(v["files"][0].get("content").is_none());
    }
}
