//! File-backed sample store.
//!
//! Each stored sample is written once to its own uniquely named file inside
//! the store's directory (JSON Lines, one statement per line). The store
//! owns only the files it created: `remove_all` deletes those and leaves
//! the directory itself alone.
//!
//! Recently loaded and freshly stored samples are kept in a small LRU read
//! cache. Samples placed with `store_at` (tier demotion, checkpoint restore)
//! go to disk only.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::Sample;
use super::{ReferenceCounts, SampleGroup, SampleRef, SampleStore, StoreError};

/// Default number of samples kept in the read cache.
pub const DEFAULT_READ_CACHE_ENTRIES: usize = 16;

/// File-backed sample store.
pub struct FileSampleStore {
    directory: PathBuf,
    /// Files by handle.
    files: RwLock<BTreeMap<SampleRef, PathBuf>>,
    next_id: AtomicU64,
    cache: Option<Mutex<LruCache<SampleRef, Arc<Sample>>>>,
    refs: ReferenceCounts,
}

impl FileSampleStore {
    /// Create a store writing into `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_cache_entries(directory, DEFAULT_READ_CACHE_ENTRIES)
    }

    /// Create a store with a read cache of `entries` samples (0 disables it).
    pub fn with_cache_entries(
        directory: impl Into<PathBuf>,
        entries: usize,
    ) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        let cache = NonZeroUsize::new(entries).map(|n| Mutex::new(LruCache::new(n)));
        Ok(Self {
            directory,
            files: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            cache,
            refs: ReferenceCounts::new(),
        })
    }

    /// Directory holding the sample files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file backing `handle`, if stored.
    pub fn path_of(&self, handle: &SampleRef) -> Option<PathBuf> {
        self.files.read().get(handle).cloned()
    }

    fn write_file(&self, sample: &Sample, handle: SampleRef) -> Result<PathBuf, StoreError> {
        let prefix = format!("{}-{}-", handle.group(), handle.id());
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".jsonl")
            .tempfile_in(&self.directory)?;
        sample.write_jsonl(BufWriter::new(file.as_file_mut()))?;
        let (_, path) = file.keep().map_err(|e| StoreError::Io(e.error))?;
        Ok(path)
    }

    fn insert(&self, sample: Arc<Sample>, handle: SampleRef, cached: bool) -> Result<(), StoreError> {
        let path = self.write_file(&sample, handle)?;
        let previous = self.files.write().insert(handle, path);
        if let Some(old) = previous {
            fs::remove_file(old)?;
        }
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            if cached {
                cache.put(handle, sample);
            } else {
                cache.pop(&handle);
            }
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Sample, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Sample::read_jsonl(reader)?)
    }
}

impl std::fmt::Debug for FileSampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSampleStore")
            .field("directory", &self.directory)
            .field("files", &self.files.read().len())
            .finish()
    }
}

impl SampleStore for FileSampleStore {
    fn store(&self, sample: Arc<Sample>, group: SampleGroup) -> Result<SampleRef, StoreError> {
        let handle = SampleRef::new(self.next_id.fetch_add(1, Ordering::Relaxed), group);
        self.insert(sample, handle, true)?;
        self.refs.register(handle);
        Ok(handle)
    }

    fn store_at(&self, sample: Arc<Sample>, handle: SampleRef) -> Result<(), StoreError> {
        self.insert(sample, handle, false)?;
        self.next_id.fetch_max(handle.id() + 1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, handle: &SampleRef) -> Result<Option<Arc<Sample>>, StoreError> {
        if let Some(cache) = &self.cache {
            if let Some(sample) = cache.lock().get(handle) {
                return Ok(Some(Arc::clone(sample)));
            }
        }

        let Some(path) = self.path_of(handle) else {
            return Ok(None);
        };
        let sample = Arc::new(Self::read_file(&path)?);

        if let Some(cache) = &self.cache {
            cache.lock().put(*handle, Arc::clone(&sample));
        }
        Ok(Some(sample))
    }

    fn contains(&self, handle: &SampleRef) -> bool {
        self.files.read().contains_key(handle)
    }

    fn remove(&self, handle: &SampleRef) -> Result<(), StoreError> {
        if let Some(cache) = &self.cache {
            cache.lock().pop(handle);
        }
        self.refs.forget(handle);
        if let Some(path) = self.files.write().remove(handle) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
        self.refs.clear();
        let files = std::mem::take(&mut *self.files.write());
        for path in files.into_values() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn handles(&self) -> Vec<SampleRef> {
        self.files.read().keys().copied().collect()
    }

    fn add_reference_user(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        if !self.contains(handle) {
            return Err(StoreError::NotFound(*handle));
        }
        Ok(self.refs.acquire(*handle))
    }

    fn release_from_memory(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        let remaining = self.refs.release(*handle)?;
        if remaining == 0 {
            if let Some(cache) = &self.cache {
                cache.lock().pop(handle);
            }
        }
        Ok(remaining)
    }

    fn reference_count(&self, handle: &SampleRef) -> usize {
        self.refs.get(handle)
    }

    fn stored_bytes(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| {
            cache.lock().iter().map(|(_, s)| s.estimated_bytes()).sum()
        })
    }

    fn len(&self) -> usize {
        self.files.read().len()
    }
}
