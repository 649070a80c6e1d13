//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! JSON snapshots on disk. A snapshot is written to a sibling temp file and
//! renamed over the previous one, so readers never see a partial write.
//!
//! Owners take a generation with [`JsonSnapshot::next_generation`] while
//! still holding the lock over the state they copy. Saves then land in
//! generation order: a save older than the one already on disk, or than
//! one already issued, is skipped.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub struct JsonSnapshot<T> {
    path: PathBuf,
    issued: AtomicU64,
    /// Generation of the snapshot on disk.
    written: Mutex<u64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonSnapshot<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            issued: AtomicU64::new(0),
            written: Mutex::new(0),
            _marker: PhantomData,
        }
    }

    /// `file_name` inside `dir`.
    pub fn in_dir(dir: &Path, file_name: &str) -> Self {
        Self::new(dir.join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no snapshot has been written yet.
    pub async fn load(&self) -> Result<Option<T>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Read {}", self.path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Decode {}", self.path.display()))?;
        Ok(Some(value))
    }

    pub fn next_generation(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Save unconditionally as the newest generation.
    pub async fn save(&self, value: &T) -> Result<()> {
        self.save_generation(self.next_generation(), value).await.map(|_| ())
    }

    /// Save `value` taken at `generation`. Returns false when a newer
    /// generation is already on disk or on its way there.
    pub async fn save_generation(&self, generation: u64, value: &T) -> Result<bool> {
        let mut written = self.written.lock().await;
        if generation <= *written || generation < self.issued.load(Ordering::SeqCst) {
            tracing::trace!(generation, on_disk = *written, "Superseded snapshot skipped");
            return Ok(false);
        }

        let json = serde_json::to_vec_pretty(value).context("Encode snapshot")?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Rename {} to {}", tmp.display(), self.path.display()))?;
        *written = generation;
        tracing::trace!(path = %self.path.display(), generation, bytes = json.len(), "Snapshot saved");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("farewatch-snap-{}", uuid::Uuid::new_v4()));
        let snap: JsonSnapshot<Vec<String>> = JsonSnapshot::in_dir(&dir, "items.json");

        assert!(snap.load().await?.is_none());
        snap.save(&vec!["a".into(), "b".into()]).await?;
        snap.save(&vec!["c".into()]).await?;
        assert_eq!(snap.load().await?, Some(vec!["c".to_string()]));
        assert!(!snap.path().with_extension("json.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_older_generation_never_overwrites_newer() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("farewatch-snap-{}", uuid::Uuid::new_v4()));
        let snap: JsonSnapshot<Vec<String>> = JsonSnapshot::in_dir(&dir, "items.json");

        // Two writers copy state in this order but reach the disk reversed.
        let first = snap.next_generation();
        let second = snap.next_generation();
        assert!(snap.save_generation(second, &vec!["deactivated".into()]).await?);
        assert!(!snap.save_generation(first, &vec!["active".into()]).await?);
        assert_eq!(snap.load().await?, Some(vec!["deactivated".to_string()]));

        // A pending newer generation also supersedes an older save.
        let older = snap.next_generation();
        let _newer = snap.next_generation();
        assert!(!snap.save_generation(older, &vec!["stale".into()]).await?);
        assert_eq!(snap.load().await?, Some(vec!["deactivated".to_string()]));

        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}
