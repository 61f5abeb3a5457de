//! Saved camera frames and their bounded index.
//!
//! Image bytes are persisted by an [`ImagePersistence`] backend; the
//! [`ImageIndex`] only remembers *references* to them.  Because the index is
//! bounded, evicting an entry must also release the backing resource.  That
//! cleanup is best effort: the backing resource is deleted synchronously
//! before the index entry is dropped, a failed deletion is logged, and the
//! entry is dropped regardless.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carbrain_types::ImageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::history::HistoryStore;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by image persistence backends.
#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid image reference: {0:?}")]
    InvalidReference(String),
    #[error("Image carries no payload")]
    EmptyPayload,
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence seam
// ─────────────────────────────────────────────────────────────────────────────

/// Stores image payloads and hands back a stable reference for later
/// retrieval or deletion.
pub trait ImagePersistence: Send + Sync {
    /// Persist `image`'s payload and return its reference.
    fn save(&self, session_id: u64, step: u64, image: &ImageRef) -> Result<String, ImageStoreError>;

    /// Release the resource behind `reference`.
    fn delete(&self, reference: &str) -> Result<(), ImageStoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// DirectoryImageStore
// ─────────────────────────────────────────────────────────────────────────────

/// Writes each frame as one file under a directory.
///
/// References are bare file names (`session_1_step_12.gray`); anything that
/// could escape the directory is rejected.  A file is never overwritten: when
/// the name is taken (a repeated step) a `_N` suffix is added, so every save
/// yields a reference of its own.
#[derive(Debug, Clone)]
pub struct DirectoryImageStore {
    dir: PathBuf,
}

impl DirectoryImageStore {
    /// Open (creating if necessary) the directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ImageStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read back the bytes stored under `reference`.
    pub fn load(&self, reference: &str) -> Result<Vec<u8>, ImageStoreError> {
        Ok(fs::read(self.resolve(reference)?)?)
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, ImageStoreError> {
        let unsafe_name = reference.is_empty()
            || reference.contains(['/', '\\'])
            || reference.contains("..");
        if unsafe_name {
            return Err(ImageStoreError::InvalidReference(reference.to_string()));
        }
        Ok(self.dir.join(reference))
    }

    fn extension_for(format: &str) -> &'static str {
        match format.to_ascii_uppercase().as_str() {
            "GRAY8" => "gray",
            "JPEG" | "JPG" => "jpg",
            "PNG" => "png",
            _ => "bin",
        }
    }
}

impl ImagePersistence for DirectoryImageStore {
    fn save(&self, session_id: u64, step: u64, image: &ImageRef) -> Result<String, ImageStoreError> {
        let payload = image
            .payload
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ImageStoreError::EmptyPayload)?;
        let ext = Self::extension_for(&image.format);
        let mut attempt = 0u32;
        loop {
            let reference = match attempt {
                0 => format!("session_{session_id}_step_{step}.{ext}"),
                n => format!("session_{session_id}_step_{step}_{n}.{ext}"),
            };
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&reference));
            match opened {
                Ok(mut file) => {
                    file.write_all(payload)?;
                    return Ok(reference);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn delete(&self, reference: &str) -> Result<(), ImageStoreError> {
        fs::remove_file(self.resolve(reference)?)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImageIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata for one persisted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageIndexEntry {
    pub reference: String,
    pub session_id: u64,
    pub step: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub saved_at: DateTime<Utc>,
}

/// Bounded index of persisted frames.
pub struct ImageIndex {
    entries: HistoryStore<ImageIndexEntry>,
    backend: Arc<dyn ImagePersistence>,
}

impl ImageIndex {
    pub fn new(capacity: usize, backend: Arc<dyn ImagePersistence>) -> Self {
        Self {
            entries: HistoryStore::new(capacity),
            backend,
        }
    }

    /// Persist `image` through the backend and index it, evicting (and
    /// deleting) the oldest frames beyond capacity.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the frame itself cannot be saved; in
    /// that case nothing is indexed.
    pub fn persist(
        &self,
        session_id: u64,
        step: u64,
        image: &ImageRef,
    ) -> Result<ImageIndexEntry, ImageStoreError> {
        let reference = self.backend.save(session_id, step, image)?;
        let entry = ImageIndexEntry {
            reference,
            session_id,
            step,
            width: image.width,
            height: image.height,
            format: image.format.clone(),
            saved_at: Utc::now(),
        };
        debug!(reference = %entry.reference, "image persisted");
        self.entries
            .append_with(entry.clone(), |evicted| self.release(evicted));
        Ok(entry)
    }

    pub fn recent(&self, n: usize) -> Vec<ImageIndexEntry> {
        self.entries.recent(n)
    }

    pub fn all(&self) -> Vec<ImageIndexEntry> {
        self.entries.all()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every index entry, deleting each backing resource best effort.
    pub fn clear(&self) -> usize {
        self.entries.clear_with(|entry| self.release(entry))
    }

    fn release(&self, entry: &ImageIndexEntry) {
        if let Err(e) = self.backend.delete(&entry.reference) {
            warn!(
                reference = %entry.reference,
                error = %e,
                "failed to delete evicted image; dropping index entry anyway"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn gray_image(bytes: &[u8]) -> ImageRef {
        ImageRef {
            available: true,
            width: 2,
            height: 2,
            format: "GRAY8".to_string(),
            payload: Some(bytes.to_vec()),
        }
    }

    /// Records deletions and fails on a configured reference.
    #[derive(Default)]
    struct RecordingBackend {
        deleted: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl ImagePersistence for RecordingBackend {
        fn save(&self, session_id: u64, step: u64, _image: &ImageRef) -> Result<String, ImageStoreError> {
            Ok(format!("{session_id}-{step}"))
        }

        fn delete(&self, reference: &str) -> Result<(), ImageStoreError> {
            if self.fail_on.as_deref() == Some(reference) {
                return Err(ImageStoreError::InvalidReference(reference.to_string()));
            }
            self.deleted.lock().unwrap().push(reference.to_string());
            Ok(())
        }
    }

    #[test]
    fn directory_store_saves_and_loads() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = DirectoryImageStore::open(dir.path()).unwrap();
        let reference = store.save(1, 12, &gray_image(&[1, 2, 3, 4])).unwrap();
        assert_eq!(reference, "session_1_step_12.gray");
        assert_eq!(store.load(&reference).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn directory_store_rejects_empty_payload() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = DirectoryImageStore::open(dir.path()).unwrap();
        let err = store.save(1, 1, &gray_image(&[])).unwrap_err();
        assert!(matches!(err, ImageStoreError::EmptyPayload));
    }

    #[test]
    fn directory_store_rejects_escaping_reference() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = DirectoryImageStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.delete("../etc/passwd"),
            Err(ImageStoreError::InvalidReference(_))
        ));
        assert!(matches!(
            store.load("a/b"),
            Err(ImageStoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn eviction_deletes_backing_files() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let backend = Arc::new(DirectoryImageStore::open(dir.path()).unwrap());
        let index = ImageIndex::new(2, backend.clone());
        for step in 0..3 {
            index.persist(1, step, &gray_image(&[9; 4])).unwrap();
        }
        assert_eq!(index.len(), 2);
        assert!(!dir.path().join("session_1_step_0.gray").exists());
        assert!(dir.path().join("session_1_step_1.gray").exists());
        assert!(dir.path().join("session_1_step_2.gray").exists());
    }

    #[test]
    fn repeated_step_never_aliases_a_live_frame() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let backend = Arc::new(DirectoryImageStore::open(dir.path()).unwrap());
        let index = ImageIndex::new(2, backend.clone());
        index.persist(1, 5, &gray_image(&[1; 4])).unwrap();
        index.persist(1, 6, &gray_image(&[2; 4])).unwrap();
        let newest = index.persist(1, 5, &gray_image(&[3; 4])).unwrap();

        let refs: Vec<String> = index.all().into_iter().map(|e| e.reference).collect();
        assert_eq!(refs, vec!["session_1_step_6.gray", "session_1_step_5_1.gray"]);
        assert!(!dir.path().join("session_1_step_5.gray").exists());
        assert_eq!(backend.load(&newest.reference).unwrap(), vec![3; 4]);
        assert_eq!(backend.load("session_1_step_6.gray").unwrap(), vec![2; 4]);
    }

    #[test]
    fn failed_deletion_still_evicts_index_entry() {
        let backend = Arc::new(RecordingBackend {
            fail_on: Some("1-0".to_string()),
            ..Default::default()
        });
        let index = ImageIndex::new(1, backend.clone());
        index.persist(1, 0, &gray_image(&[1])).unwrap();
        index.persist(1, 1, &gray_image(&[1])).unwrap();
        index.persist(1, 2, &gray_image(&[1])).unwrap();

        let refs: Vec<String> = index.all().into_iter().map(|e| e.reference).collect();
        assert_eq!(refs, vec!["1-2".to_string()]);
        assert_eq!(*backend.deleted.lock().unwrap(), vec!["1-1".to_string()]);
    }

    #[test]
    fn clear_deletes_every_backing_resource() {
        let backend = Arc::new(RecordingBackend::default());
        let index = ImageIndex::new(5, backend.clone());
        index.persist(2, 1, &gray_image(&[1])).unwrap();
        index.persist(2, 2, &gray_image(&[1])).unwrap();
        assert_eq!(index.clear(), 2);
        assert!(index.is_empty());
        assert_eq!(backend.deleted.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_save_indexes_nothing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let backend = Arc::new(DirectoryImageStore::open(dir.path()).unwrap());
        let index = ImageIndex::new(2, backend);
        assert!(index.persist(1, 1, &gray_image(&[])).is_err());
        assert!(index.is_empty());
    }
}
