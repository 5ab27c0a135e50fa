//! Append-only catalogue of granules that already have a sidecar.
//!
//! One `source,sidecar` line per published sidecar. Appends hold an
//! exclusive advisory lock on the file so that concurrent batch workers
//! (threads or processes) never interleave partial lines.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SidecarError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
    pub source: PathBuf,
    pub sidecar: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Catalogue {
    path: PathBuf,
}

impl Catalogue {
    /// Uses the catalogue at `path`, creating an empty one if absent.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<CatalogueEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let (source, sidecar) = line.split_once(',').ok_or_else(|| {
                    SidecarError::parse(format!("catalogue {:?}: malformed line {:?}", self.path, line))
                })?;
                Ok(CatalogueEntry {
                    source: PathBuf::from(source.trim()),
                    sidecar: PathBuf::from(sidecar.trim()),
                })
            })
            .collect()
    }

    /// Whether `source` already has a sidecar on record.
    pub fn contains(&self, source: &Path) -> Result<bool> {
        Ok(self.entries()?.iter().any(|entry| entry.source == source))
    }

    pub fn append(&self, source: &Path, sidecar: &Path) -> Result<()> {
        let line = format!("{},{}\n", source.display(), sidecar.display());
        if line.matches(',').count() != 1 {
            return Err(SidecarError::validation(format!(
                "cannot catalogue paths containing commas: {}",
                line.trim_end()
            )));
        }
        let mut file: File = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock()?;
        let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        file.unlock()?;
        written?;
        debug!("Catalogued {:?} -> {:?}", source, sidecar);
        Ok(())
    }
}
