//! Trace archive access: a ZIP treated as a keyed blob store.

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{TracedownError, TracedownResult};

/// Read side of a recorded trace archive. Opened once per export and closed
/// on drop, including failure paths.
pub struct TraceArchive {
    zip: ZipArchive<File>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
}

impl TraceArchive {
    pub fn open(path: &Path) -> TracedownResult<Self> {
        let file = File::open(path).map_err(|err| {
            TracedownError::Archive(format!("cannot open {}: {err}", path.display()))
        })?;
        let zip = ZipArchive::new(file)?;
        if zip.is_empty() {
            return Err(TracedownError::Archive(format!(
                "{} has no entries",
                path.display()
            )));
        }
        Ok(Self { zip })
    }

    pub fn has(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Entry names in archive order.
    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(|n| n.to_string()).collect()
    }

    pub fn entries(&mut self) -> TracedownResult<Vec<ArchiveEntry>> {
        let mut out = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let entry = self.zip.by_index(i)?;
            out.push(ArchiveEntry {
                name: entry.name().to_string(),
                size_bytes: entry.size(),
            });
        }
        Ok(out)
    }

    pub fn read(&mut self, name: &str) -> TracedownResult<Vec<u8>> {
        let mut entry = self.zip.by_name(name)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn read_string(&mut self, name: &str) -> TracedownResult<String> {
        let bytes = self.read(name)?;
        String::from_utf8(bytes)
            .map_err(|_| TracedownError::Archive(format!("entry {name} is not valid UTF-8")))
    }
}
