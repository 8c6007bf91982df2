//! The process-wide volume registry.
//!
//! The store owns every active volume, keyed by volume id, and is the
//! entry point for all engine operations: it resolves an id to a volume
//! and delegates. Structural changes (provisioning, restore) take the
//! registry write lock; lookups share the read lock. The registry lock is
//! never held across volume I/O on the operation paths, so unrelated
//! volumes never serialize on each other.
//!
//! Registered volumes are recorded in a `locations` file (one
//! tab-separated `vid block_path index_path` line each) next to the index
//! files, and are reopened from it on startup.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::StoreConfig;
use crate::needle::{Needle, NeedlePool, PooledNeedle};
use crate::observability::Logger;
use crate::volume::Volume;

use super::errors::{StoreError, StoreResult};
use super::free_pool::{self, FreeVolume};

/// Name of the volume location registry file, kept in the index dir.
const LOCATIONS_FILE: &str = "locations";

/// The process-wide collection of volumes.
pub struct Store {
    config: StoreConfig,
    volumes: RwLock<HashMap<u32, Arc<Volume>>>,
    free_pool: Mutex<VecDeque<FreeVolume>>,
    next_free_seq: AtomicU64,
    pool: Arc<NeedlePool>,
    locations_path: PathBuf,
}

impl Store {
    /// Open the store: create the configured directories, reopen every
    /// volume recorded in the locations file, and rediscover free volumes
    /// left by a previous process.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.block_dir)?;
        fs::create_dir_all(&config.index_dir)?;
        let locations_path = config.index_dir.join(LOCATIONS_FILE);

        let mut volumes = HashMap::new();
        for (id, block_path, index_path) in load_locations(&locations_path)? {
            let volume = Volume::open(id, &block_path, &index_path, config.volume_capacity)?;
            Logger::info(
                "VOLUME_RESTORED",
                &[
                    ("volume", &id.to_string()),
                    ("block", &block_path.display().to_string()),
                ],
            );
            volumes.insert(id, Arc::new(volume));
        }

        let free = free_pool::scan_free_volumes(&config.block_dir, &config.index_dir)?;
        let next_free_seq = free
            .iter()
            .filter_map(|f| free_seq(&f.block_path))
            .max()
            .map_or(0, |s| s + 1);

        Ok(Self {
            config,
            volumes: RwLock::new(volumes),
            free_pool: Mutex::new(free.into()),
            next_free_seq: AtomicU64::new(next_free_seq),
            pool: NeedlePool::new(),
            locations_path,
        })
    }

    /// Resolve a volume id.
    pub fn volume(&self, id: u32) -> Option<Arc<Volume>> {
        self.volumes
            .read()
            .expect("volume registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Ids of all registered volumes, unordered.
    pub fn volume_ids(&self) -> Vec<u32> {
        self.volumes
            .read()
            .expect("volume registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Number of unassigned volumes waiting in the free pool.
    pub fn free_volume_count(&self) -> usize {
        self.free_pool.lock().expect("free pool lock poisoned").len()
    }

    /// Register a new empty volume under `id`.
    ///
    /// Takes a pre-created volume from the free pool when one is
    /// available (two renames), otherwise creates the file pair on
    /// demand in the configured directories.
    pub fn add_volume(&self, id: u32) -> StoreResult<Arc<Volume>> {
        let mut volumes = self.volumes.write().expect("volume registry lock poisoned");
        if volumes.contains_key(&id) {
            return Err(StoreError::VolumeExists(id));
        }

        let pooled = self
            .free_pool
            .lock()
            .expect("free pool lock poisoned")
            .pop_front();
        let (block_path, index_path, from_pool) = match pooled {
            Some(free) => {
                let (block_path, index_path) = free_pool::assign(&free, id)?;
                (block_path, index_path, true)
            }
            None => {
                let block_path = self.config.block_dir.join(free_pool::block_name(id));
                let index_path = self
                    .config
                    .index_dir
                    .join(format!("{}.idx", free_pool::block_name(id)));
                crate::volume::init_volume_files(&block_path, &index_path)?;
                (block_path, index_path, false)
            }
        };

        let volume = Arc::new(Volume::open(
            id,
            &block_path,
            &index_path,
            self.config.volume_capacity,
        )?);
        volumes.insert(id, Arc::clone(&volume));
        save_locations(&self.locations_path, &volumes)?;
        Logger::info(
            "VOLUME_ADDED",
            &[
                ("volume", &id.to_string()),
                ("from_pool", if from_pool { "true" } else { "false" }),
            ],
        );
        Ok(volume)
    }

    /// Pre-create `n` free volumes with container files in `block_dir`
    /// and index files in `index_dir`.
    ///
    /// Returns the number actually created: if creation fails partway the
    /// volumes already created stay in the pool and the partial count is
    /// returned, with the failure logged. Only a failure on the very
    /// first volume surfaces as an error.
    pub fn add_free_volume(
        &self,
        n: usize,
        block_dir: &std::path::Path,
        index_dir: &std::path::Path,
    ) -> StoreResult<usize> {
        fs::create_dir_all(block_dir)?;
        fs::create_dir_all(index_dir)?;

        let mut created = 0;
        for _ in 0..n {
            let seq = self.next_free_seq.fetch_add(1, Ordering::SeqCst);
            match free_pool::create_free_volume(block_dir, index_dir, seq) {
                Ok(free) => {
                    self.free_pool
                        .lock()
                        .expect("free pool lock poisoned")
                        .push_back(free);
                    created += 1;
                }
                Err(err) if created == 0 => return Err(err.into()),
                Err(err) => {
                    Logger::warn(
                        "FREE_VOLUME_PARTIAL",
                        &[
                            ("created", &created.to_string()),
                            ("requested", &n.to_string()),
                            ("reason", &err.to_string()),
                        ],
                    );
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Attach an existing, already-populated container + index file pair
    /// as volume `id`, read-only.
    ///
    /// The superblocks are validated and the index is loaded straight
    /// from the index file; the container is not rescanned.
    pub fn bulk_volume(
        &self,
        id: u32,
        block_file: &std::path::Path,
        index_file: &std::path::Path,
    ) -> StoreResult<()> {
        let mut volumes = self.volumes.write().expect("volume registry lock poisoned");
        if volumes.contains_key(&id) {
            return Err(StoreError::VolumeExists(id));
        }

        let volume = Volume::attach(id, block_file, index_file, self.config.volume_capacity)?;
        volumes.insert(id, Arc::new(volume));
        save_locations(&self.locations_path, &volumes)?;
        Logger::info(
            "VOLUME_BULK_ATTACHED",
            &[
                ("volume", &id.to_string()),
                ("block", &block_file.display().to_string()),
            ],
        );
        Ok(())
    }

    /// Compact volume `id` in the calling thread.
    ///
    /// Expected to run long; the admin layer dispatches it to a blocking
    /// task and reports only "accepted". At most one compaction runs per
    /// volume, enforced by the volume's Compacting state.
    pub fn compact_volume(&self, id: u32) -> StoreResult<()> {
        let volume = self.volume(id).ok_or(StoreError::VolumeNotExist(id))?;
        volume.compact()?;
        Ok(())
    }

    /// Read the needle for `key` from volume `id` into `needle`.
    pub fn probe(&self, id: u32, key: u64, needle: &mut Needle) -> StoreResult<()> {
        let volume = self.volume(id).ok_or(StoreError::VolumeNotExist(id))?;
        volume.probe(key, needle)?;
        Ok(())
    }

    /// Borrow a reset needle record from the shared pool.
    pub fn needle(&self) -> PooledNeedle {
        self.pool.acquire()
    }

    /// Return a borrowed needle record to the pool.
    pub fn free_needle(&self, needle: PooledNeedle) {
        drop(needle);
    }
}

fn free_seq(path: &std::path::Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("free_block_")?
        .parse()
        .ok()
}

fn load_locations(path: &std::path::Path) -> StoreResult<Vec<(u32, PathBuf, PathBuf)>> {
    let mut entries = Vec::new();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(err) => return Err(err.into()),
    };
    for line in content.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(id), Some(block), Some(index)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(id) = id.parse::<u32>() else { continue };
        entries.push((id, PathBuf::from(block), PathBuf::from(index)));
    }
    Ok(entries)
}

/// Rewrite the locations file; written to a temp file first, then
/// renamed, so a crash never leaves a half-written registry.
fn save_locations(
    path: &std::path::Path,
    volumes: &HashMap<u32, Arc<Volume>>,
) -> StoreResult<()> {
    let mut ids: Vec<_> = volumes.keys().copied().collect();
    ids.sort_unstable();

    let mut content = String::new();
    for id in ids {
        let volume = &volumes[&id];
        content.push_str(&format!(
            "{}\t{}\t{}\n",
            id,
            volume.block_path().display(),
            volume.index_path().display()
        ));
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
