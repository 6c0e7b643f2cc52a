//! Zip archive access for repository snapshots.
//!
//! Source-hosting exports wrap everything in one directory (`repo-main/...`).
//! When every entry shares that top-level segment it is stripped, so paths
//! come out repo-relative. Entry bytes are read lazily; the filter stage only
//! pays for entries that survive the pattern checks.

use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::scanner::FileEntry;

/// Upper bound for preallocation; declared sizes in the archive are untrusted.
const READ_HINT_LIMIT: u64 = 1 << 20;

/// One non-directory archive entry with its repo-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    index: usize,
}

pub struct RepoArchive<'a> {
    zip: ZipArchive<Cursor<&'a [u8]>>,
    entries: Vec<ArchiveEntry>,
    root: Option<String>,
}

impl<'a> RepoArchive<'a> {
    /// Open `bytes` as a zip archive and index its file entries in archive order.
    ///
    /// Fails only when the bytes are not a readable archive.
    pub fn open(bytes: &'a [u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).context("not a readable zip archive")?;

        let mut names: Vec<(String, bool)> = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let file = zip
                .by_index_raw(i)
                .with_context(|| format!("corrupt zip entry #{i}"))?;
            names.push((file.name().to_string(), file.is_dir()));
        }

        let root = common_root(names.iter().map(|(n, _)| n.as_str()));
        let entries = names
            .into_iter()
            .enumerate()
            .filter_map(|(index, (name, is_dir))| {
                if is_dir {
                    return None;
                }
                let path = strip_root(&name, root.as_deref());
                if path.is_empty() {
                    return None;
                }
                Some(ArchiveEntry {
                    path: path.to_string(),
                    index,
                })
            })
            .collect();

        Ok(Self { zip, entries, root })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// The shared top-level directory that was stripped, if any.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Raw bytes of one entry. `None` when the entry stream cannot be read
    /// (unsupported compression, bad CRC).
    pub fn read(&mut self, entry: &ArchiveEntry) -> Option<Vec<u8>> {
        self.read_capped(entry, u64::MAX)
    }

    /// Like `read`, but stops after `cap + 1` bytes. A result longer than
    /// `cap` means the entry is over the cap; its exact size is not needed.
    pub fn read_capped(&mut self, entry: &ArchiveEntry, cap: u64) -> Option<Vec<u8>> {
        let file = match self.zip.by_index(entry.index) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(path = %entry.path, error = %e, "cannot open archive entry");
                return None;
            }
        };
        let hint = file.size().min(cap).min(READ_HINT_LIMIT) as usize;
        let mut buf = Vec::with_capacity(hint);
        match file.take(cap.saturating_add(1)).read_to_end(&mut buf) {
            Ok(_) => Some(buf),
            Err(e) => {
                tracing::debug!(path = %entry.path, error = %e, "cannot read archive entry");
                None
            }
        }
    }

    /// Read and decode every entry, with no filtering.
    pub fn into_file_entries(mut self) -> Vec<FileEntry> {
        let entries = std::mem::take(&mut self.entries);
        entries
            .into_iter()
            .map(|entry| match self.read(&entry) {
                Some(bytes) => FileEntry {
                    size: bytes.len() as u64,
                    content: decode_text(&bytes),
                    path: entry.path,
                },
                None => FileEntry::unreadable(entry.path),
            })
            .collect()
    }
}

/// Convenience for callers holding raw bytes.
pub fn extract_all(bytes: &[u8]) -> Result<Vec<FileEntry>> {
    Ok(RepoArchive::open(bytes)?.into_file_entries())
}

/// Decode file bytes as UTF-8 text.
///
/// Invalid UTF-8 and NUL-bearing (binary) content both yield `None`.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    if text.contains('\0') {
        return None;
    }
    Some(text.to_string())
}

fn common_root<'n>(mut names: impl Iterator<Item = &'n str>) -> Option<String> {
    let first = names.next()?;
    let (root, _) = first.split_once('/')?;
    if root.is_empty() {
        return None;
    }
    names
        .all(|n| n.split_once('/').is_some_and(|(r, _)| r == root))
        .then(|| root.to_string())
}

fn strip_root<'n>(name: &'n str, root: Option<&str>) -> &'n str {
    let Some(root) = root else { return name };
    name.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Build an in-memory zip. Names ending in `/` become directory entries.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        build_zip_with(entries, FileOptions::default())
    }

    /// Stored (uncompressed) zip whose entry data holding `needle` has its
    /// first byte flipped, so reading that entry fails the CRC check.
    pub(crate) fn build_corrupt_zip(entries: &[(&str, &[u8])], needle: &[u8]) -> Vec<u8> {
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        let mut bytes = build_zip_with(entries, options);
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .expect("needle present in stored data");
        bytes[at] ^= 0xff;
        bytes
    }

    fn build_zip_with(entries: &[(&str, &[u8])], options: FileOptions) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }
}
