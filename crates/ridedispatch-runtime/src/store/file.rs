//! File-backed ride store
//!
//! Layout under the data directory:
//! - `active/<hex identity>.json`: one file per active ride, replaced
//!   atomically through a temp file and rename
//! - `archive.jsonl`: append-only archive, one JSON record per line
//!
//! The active set is mirrored in memory and only updated after the disk
//! write has succeeded.

use alloc::vec::Vec;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ridedispatch_core::{PersistenceResult, RetryConfig, Ride, RiderId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{sort_pending, with_retry, RideStore};

const ACTIVE_DIR: &str = "active";
const ARCHIVE_FILE: &str = "archive.jsonl";
const TEMP_SUFFIX: &str = ".tmp";

fn archive_key(ride: &Ride) -> Uuid {
    ride.instance_id
}

/// Ride store persisted as plain files in a data directory
#[derive(Debug)]
pub struct FileRideStore {
    active_dir: PathBuf,
    archive_path: PathBuf,
    retry: RetryConfig,
    index: DashMap<RiderId, Ride>,
    archived_keys: DashSet<Uuid>,
    append_lock: Mutex<()>,
}

impl FileRideStore {
    /// Open (or create) a store rooted at `dir` and load the active set.
    ///
    /// Leftover temp files are removed, and any active ride that already has
    /// an archive record is dropped: that is a terminal transition whose
    /// archive append landed but whose removal did not.
    pub async fn open(dir: impl AsRef<Path>, retry: RetryConfig) -> PersistenceResult<Self> {
        let root = dir.as_ref().to_path_buf();
        let active_dir = root.join(ACTIVE_DIR);
        let archive_path = root.join(ARCHIVE_FILE);
        fs::create_dir_all(&active_dir).await?;

        let store = Self {
            active_dir,
            archive_path,
            retry,
            index: DashMap::new(),
            archived_keys: DashSet::new(),
            append_lock: Mutex::new(()),
        };

        store.repair_archive_tail().await?;
        let archived = read_archive(&store.archive_path).await?;
        for record in &archived {
            store.archived_keys.insert(archive_key(record));
        }
        store.load_active().await?;

        info!(
            path = %root.display(),
            active = store.index.len(),
            archived = archived.len(),
            "Opened ride store"
        );
        Ok(store)
    }

    fn active_path(&self, identity: &RiderId) -> PathBuf {
        self.active_dir
            .join(format!("{}.json", hex::encode(identity.as_str().as_bytes())))
    }

    /// Terminate a torn final line so later appends start on a fresh line
    async fn repair_archive_tail(&self) -> PersistenceResult<()> {
        let contents = match fs::read(&self.archive_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if contents.last().is_some_and(|b| *b != b'\n') {
            warn!(path = %self.archive_path.display(), "Archive ends with a partial record");
            let mut file = OpenOptions::new().append(true).open(&self.archive_path).await?;
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }
        Ok(())
    }

    /// Pending rides stored under `dir`, oldest first, read without
    /// touching any file. Safe to call while another process owns the store.
    pub async fn read_pending(dir: impl AsRef<Path>) -> PersistenceResult<Vec<Ride>> {
        let root = dir.as_ref();
        let archived: DashSet<Uuid> = read_archive(&root.join(ARCHIVE_FILE))
            .await?
            .iter()
            .map(archive_key)
            .collect();

        let mut entries = match fs::read_dir(root.join(ACTIVE_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rides = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            let bytes = match fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                // Replaced or removed by the owning process since the listing
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Ride>(&bytes) {
                Ok(ride) if ride.is_pending() && !archived.contains(&archive_key(&ride)) => {
                    rides.push(ride)
                }
                Ok(_) => {}
                Err(e) => warn!(file = %name, "Skipping unreadable active ride: {}", e),
            }
        }
        sort_pending(&mut rides);
        Ok(rides)
    }

    async fn load_active(&self) -> PersistenceResult<()> {
        let mut entries = fs::read_dir(&self.active_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.ends_with(TEMP_SUFFIX) {
                debug!(file = %name, "Removing leftover temp file");
                fs::remove_file(&path).await?;
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let ride: Ride = match serde_json::from_slice(&bytes) {
                Ok(ride) => ride,
                Err(e) => {
                    warn!(file = %name, "Skipping unreadable active ride: {}", e);
                    continue;
                }
            };

            if self.archived_keys.contains(&archive_key(&ride)) {
                info!(identity = %ride.id, "Dropping active ride that was already archived");
                fs::remove_file(&path).await?;
                continue;
            }

            self.index.insert(ride.id.clone(), ride);
        }
        Ok(())
    }

    async fn write_active(&self, identity: &RiderId, ride: &Ride) -> PersistenceResult<()> {
        let bytes = serde_json::to_vec_pretty(ride)?;
        let temp_path = self
            .active_dir
            .join(format!(".{}{}", uuid::Uuid::new_v4(), TEMP_SUFFIX));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, self.active_path(identity)).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_active(&self, identity: &RiderId) -> PersistenceResult<()> {
        match fs::remove_file(self.active_path(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one record; a failed write is truncated away so the archive
    /// never keeps a partial line
    async fn append_archive(&self, line: &[u8]) -> PersistenceResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.archive_path)
            .await?;
        let start = file.metadata().await?.len();

        let result = async {
            file.write_all(line).await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = result {
            let _ = file.set_len(start).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_archive(path: &Path) -> PersistenceResult<Vec<Ride>> {
    let contents = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rides = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Ride>(line) {
            Ok(ride) => rides.push(ride),
            Err(e) => warn!(line = line_no + 1, "Skipping unreadable archive record: {}", e),
        }
    }
    Ok(rides)
}

#[async_trait]
impl RideStore for FileRideStore {
    async fn upsert(&self, identity: &RiderId, ride: Ride) -> PersistenceResult<()> {
        with_retry(&self.retry, "upsert", || self.write_active(identity, &ride)).await?;
        self.index.insert(identity.clone(), ride);
        Ok(())
    }

    async fn get(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>> {
        Ok(self.index.get(identity).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>> {
        if !self.index.contains_key(identity) {
            return Ok(None);
        }
        with_retry(&self.retry, "remove", || self.delete_active(identity)).await?;
        Ok(self.index.remove(identity).map(|(_, ride)| ride))
    }

    async fn list_pending(&self) -> PersistenceResult<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .index
            .iter()
            .filter(|entry| entry.value().is_pending())
            .map(|entry| entry.value().clone())
            .collect();
        sort_pending(&mut rides);
        Ok(rides)
    }

    async fn archive(&self, ride: Ride) -> PersistenceResult<()> {
        let mut line = serde_json::to_vec(&ride)?;
        line.push(b'\n');

        let key = archive_key(&ride);
        let _guard = self.append_lock.lock().await;
        if self.archived_keys.contains(&key) {
            debug!(identity = %ride.id, "Ride instance already archived");
            return Ok(());
        }
        with_retry(&self.retry, "archive", || self.append_archive(&line)).await?;
        self.archived_keys.insert(key);
        Ok(())
    }

    async fn archived(&self) -> PersistenceResult<Vec<Ride>> {
        let _guard = self.append_lock.lock().await;
        read_archive(&self.archive_path).await
    }

    async fn active_count(&self) -> PersistenceResult<usize> {
        Ok(self.index.len())
    }
}
