//! Gzip-compressed tar output for export batches.
//!
//! Entries are regular files with fixed ownership and mode and a single
//! timestamp taken when the archive is created, so two exports of the same
//! batch differ only in that timestamp.

use crate::ArchiveError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path};
use tempfile::NamedTempFile;
use tracing::debug;

/// Name of the per-batch summary entry at the archive root.
pub const REPORT_ENTRY: &str = "export-report.json";

const ENTRY_MODE: u32 = 0o644;

pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
    mtime: u64,
    entries: BTreeSet<String>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        let mtime = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        Self::with_mtime(sink, mtime)
    }

    pub fn with_mtime(sink: W, mtime: u64) -> Self {
        Self {
            builder: tar::Builder::new(GzEncoder::new(sink, Compression::default())),
            mtime,
            entries: BTreeSet::new(),
        }
    }

    /// Append one file. `path` is a relative, `/`-separated entry name.
    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        check_entry_path(path)?;
        if !self.entries.insert(path.to_owned()) {
            return Err(ArchiveError::Duplicate(path.to_owned()));
        }
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.mtime);
        header.set_cksum();
        self.builder.append_data(&mut header, path, data)?;
        debug!("archived {path} ({} bytes)", data.len());
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains(path)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Write the tar trailer and gzip footer and hand back the sink.
    pub fn finish(self) -> Result<W, ArchiveError> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

fn check_entry_path(path: &str) -> Result<(), ArchiveError> {
    let invalid = || ArchiveError::InvalidPath(path.to_owned());
    if path.is_empty() || path.contains('\\') || path.ends_with('/') {
        return Err(invalid());
    }
    if Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(invalid());
    }
    Ok(())
}

/// An archive staged in a temporary file next to its destination and moved
/// into place only once complete. Dropping it unpersisted removes the file.
pub struct StagedArchive {
    writer: ArchiveWriter<NamedTempFile>,
}

impl StagedArchive {
    pub fn create(destination: &Path) -> Result<Self, ArchiveError> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(".adcraft-export-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        Ok(Self {
            writer: ArchiveWriter::new(file),
        })
    }

    pub fn writer(&mut self) -> &mut ArchiveWriter<NamedTempFile> {
        &mut self.writer
    }

    pub fn persist(self, destination: &Path) -> Result<(), ArchiveError> {
        let mut file = self.writer.finish()?;
        file.as_file_mut().sync_all()?;
        file.persist(destination).map_err(|e| ArchiveError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>, u64, u32)> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let mtime = e.header().mtime().unwrap();
                let mode = e.header().mode().unwrap();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, data, mtime, mode)
            })
            .collect()
    }

    #[test]
    fn writes_readable_gzip_tar() {
        let mut writer = ArchiveWriter::with_mtime(Vec::new(), 1_700_000_000);
        writer.append("sku-1/300x250.png", b"png-1").unwrap();
        writer.append(REPORT_ENTRY, b"{}").unwrap();
        assert_eq!(writer.entry_count(), 2);
        let bytes = writer.finish().unwrap();

        let entries = read_entries(&bytes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "sku-1/300x250.png");
        assert_eq!(entries[0].1, b"png-1");
        assert_eq!(entries[0].2, 1_700_000_000);
        assert_eq!(entries[0].3, 0o644);
        assert_eq!(entries[1].0, REPORT_ENTRY);
    }

    #[test]
    fn same_content_same_bytes() {
        let build = || {
            let mut w = ArchiveWriter::with_mtime(Vec::new(), 42);
            w.append("a/b.txt", b"hello").unwrap();
            w.finish().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn rejects_escaping_and_duplicate_paths() {
        let mut writer = ArchiveWriter::new(Vec::new());
        for bad in ["", "/abs", "../up", "a/../b", "dir/", "a\\b"] {
            assert!(
                matches!(writer.append(bad, b""), Err(ArchiveError::InvalidPath(_))),
                "{bad:?} accepted"
            );
        }
        writer.append("x.png", b"1").unwrap();
        assert!(matches!(
            writer.append("x.png", b"2"),
            Err(ArchiveError::Duplicate(_))
        ));
        assert!(writer.contains("x.png"));
    }

    #[test]
    fn staged_archive_appears_only_on_persist() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out").join("batch.tar.gz");

        let mut staged = StagedArchive::create(&dest).unwrap();
        staged.writer().append("one.txt", b"1").unwrap();
        drop(staged);
        assert!(!dest.exists());
        let leftovers = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 0);

        let mut staged = StagedArchive::create(&dest).unwrap();
        staged.writer().append("one.txt", b"1").unwrap();
        staged.persist(&dest).unwrap();
        let entries = read_entries(&std::fs::read(&dest).unwrap());
        assert_eq!(entries[0].1, b"1");
    }
}
