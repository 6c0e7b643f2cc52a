use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::scanner::FileEntry;

/// Paths that tell the model the most about a repository, case-insensitive.
const HIGH_VALUE_PATTERNS: &[&str] = &[
    r"readme",
    r"package\.json$",
    r"tsconfig\.json$",
    r"biome\.json$",
    r"(^|/)cargo\.toml$",
    r"(^|/)pyproject\.toml$",
    r"(^|/)go\.mod$",
    r"src/index\.(t|j)sx?$",
    r"src/main\.(t|j)sx?$",
    r"src/(main|lib)\.rs$",
    r"dockerfile",
];

/// Ordering rule for packing: high-value files first, then by path.
#[derive(Debug, Clone)]
pub struct PriorityTable {
    patterns: Vec<Regex>,
}

impl PriorityTable {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// 0 for high-value paths, 1 for the rest.
    pub fn rank(&self, path: &str) -> u8 {
        if self.patterns.iter().any(|re| re.is_match(path)) {
            0
        } else {
            1
        }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.rank(a).cmp(&self.rank(b)).then_with(|| a.cmp(b))
    }

    /// Files in packing order. Ranks are computed once per file.
    pub fn order<'f>(&self, files: &'f [FileEntry]) -> Vec<&'f FileEntry> {
        let mut ranked: Vec<(u8, &FileEntry)> = files.iter().map(|f| (self.rank(&f.path), f)).collect();
        ranked.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.path.cmp(&b.path)));
        ranked.into_iter().map(|(_, f)| f).collect()
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        static RE: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = RE.get_or_init(|| {
            HIGH_VALUE_PATTERNS
                .iter()
                .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
                .collect()
        });
        Self::new(patterns.clone())
    }
}

/// Packed file excerpts, bounded by a character budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedPayload {
    pub text: String,
    /// Paths whose block made it in, in append order.
    pub included_files: Vec<String>,
    /// `text` length in chars.
    pub used_chars: usize,
}

/// Header line plus fenced content for one file.
pub fn format_file_block(path: &str, size: u64, content: &str) -> String {
    format!("\n\n[FILE] {path} ({size} bytes)\n\n\n```\n{content}\n```\n")
}

/// Greedy packing in priority order.
///
/// A block that would overflow `max_chars` is skipped and the walk goes on,
/// so smaller files further down can still fit. Files without decoded
/// content, or with empty content, are never packed.
pub fn pack_files(files: &[FileEntry], max_chars: usize, table: &PriorityTable) -> PackedPayload {
    let mut out = PackedPayload::default();

    for file in table.order(files) {
        let Some(content) = file.content.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        let block = format_file_block(&file.path, file.size, content);
        let block_chars = block.chars().count();
        if out.used_chars + block_chars > max_chars {
            tracing::trace!(path = %file.path, block_chars, "block does not fit, skipping");
            continue;
        }
        out.text.push_str(&block);
        out.used_chars += block_chars;
        out.included_files.push(file.path.clone());
    }

    out
}
