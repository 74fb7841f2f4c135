//! On-disk cache of converted GTFS archives, one `<version>.zip` per
//! planned validity interval.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::convert::DocumentConverter;
use crate::plan::PlannedFeed;

pub struct FeedCache {
    dir: PathBuf,
    force: bool,
    regenerated: usize,
}

impl FeedCache {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache dir {}", dir.display()))?;
        Ok(Self {
            dir,
            force: false,
            regenerated: 0,
        })
    }

    /// Regenerate every archive regardless of staleness.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn archive_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{version}.zip"))
    }

    /// How many archives `ensure` actually (re)converted so far. A re-run
    /// over unchanged sources keeps this at zero.
    pub fn regenerated(&self) -> usize {
        self.regenerated
    }

    /// Guarantees a fresh archive for the planned feed, converting only when
    /// the archive is missing or older than the source document.
    ///
    /// A conversion failure is fatal to the whole sync; the merge must never
    /// run against an incomplete cache.
    pub fn ensure<D: DocumentConverter>(
        &mut self,
        planned: &PlannedFeed,
        converter: &D,
    ) -> Result<PathBuf> {
        let version = &planned.interval.version;
        let path = self.archive_path(version);

        if !self.force && path.exists() && !is_stale(&path, planned)? {
            debug!(version = %version, "Cached archive is fresh");
            return Ok(path);
        }

        info!(version = %version, url = %planned.document.url, "Converting source document");
        let tables = converter.convert(&planned.document)?;
        tables.write_zip(&path)?;
        self.regenerated += 1;
        Ok(path)
    }

    /// Deletes every cached archive whose version is not retained. Files not
    /// matching the `<ISO date>.zip` naming pattern are left alone.
    pub fn prune(&self, retained: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(version) = cached_version(&path) else {
                continue;
            };
            if !retained.contains(&version) {
                info!(version = %version, "Evicting archive outside the planned set");
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Stale when the archive predates the source's last modification.
/// With no modification timestamp from the catalog, the archive is trusted.
fn is_stale(path: &Path, planned: &PlannedFeed) -> Result<bool> {
    let Some(last_modified) = planned.document.last_modified else {
        return Ok(false);
    };
    let archive_mtime = std::fs::metadata(path)?.modified()?;
    Ok(archive_mtime < SystemTime::from(last_modified))
}

fn cached_version(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("zip") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.parse::<NaiveDate>().ok()?;
    Some(stem.to_string())
}
