//! Artifact Store
//!
//! Content-addressed holder for build outputs. Content is stored once per
//! SHA-256 digest; `(run id, stage, logical name)` keys point at digests.

use archway_core::domain::artifact::{ArtifactKey, ArtifactRef};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct ArtifactIndex {
    /// digest -> content
    blobs: HashMap<String, Arc<[u8]>>,
    /// key -> reference (ordered so listings are deterministic)
    keys: BTreeMap<ArtifactKey, ArtifactRef>,
    /// key -> write sequence number
    written: HashMap<ArtifactKey, u64>,
    next_seq: u64,
}

/// In-memory, content-addressed artifact store
///
/// Writers are serialized; readers share access.
#[derive(Default)]
pub struct ArtifactStore {
    index: RwLock<ArtifactIndex>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores content under `(run_id, stage, name)` and returns its handle
    ///
    /// Writing an existing key replaces what it points at (a retried job
    /// re-publishing its outputs); identical content is stored only once.
    pub fn put(
        &self,
        run_id: Uuid,
        stage: &str,
        name: &str,
        content: impl AsRef<[u8]>,
    ) -> ArtifactRef {
        let content = content.as_ref();
        let digest = digest_of(content);
        let reference = ArtifactRef {
            run_id,
            stage: stage.to_string(),
            name: name.to_string(),
            digest: digest.clone(),
        };

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index
            .blobs
            .entry(digest)
            .or_insert_with(|| Arc::from(content));
        let previous = index.keys.insert(reference.key(), reference.clone());
        let seq = index.next_seq;
        index.next_seq += 1;
        index.written.insert(reference.key(), seq);

        if let Some(previous) = previous {
            if previous.digest != reference.digest {
                tracing::debug!("Artifact {} replaced", reference);
                release_unreferenced(&mut index, &previous.digest);
            }
        }

        reference
    }

    /// Resolves a handle to its content
    ///
    /// Returns `None` if the key is unknown or now points at different content.
    pub fn get(&self, reference: &ArtifactRef) -> Option<Arc<[u8]>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let current = index.keys.get(&reference.key())?;
        if current.digest != reference.digest {
            return None;
        }
        index.blobs.get(&current.digest).cloned()
    }

    /// Resolves a handle to its content as text (lossy UTF-8)
    pub fn get_string(&self, reference: &ArtifactRef) -> Option<String> {
        self.get(reference)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Looks up the current handle for a key
    pub fn lookup(&self, key: &ArtifactKey) -> Option<ArtifactRef> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.keys.get(key).cloned()
    }

    /// Most recently written artifact of a run with the given logical name
    pub fn find(&self, run_id: Uuid, name: &str) -> Option<ArtifactRef> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .keys
            .iter()
            .filter(|(_, r)| r.run_id == run_id && r.name == name)
            .max_by_key(|(key, _)| index.written.get(*key).copied().unwrap_or_default())
            .map(|(_, r)| r.clone())
    }

    /// All artifacts a stage of a run produced
    pub fn list_stage(&self, run_id: Uuid, stage: &str) -> Vec<ArtifactRef> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .keys
            .values()
            .filter(|r| r.run_id == run_id && r.stage == stage)
            .cloned()
            .collect()
    }

    /// All artifacts of a run
    pub fn list_run(&self, run_id: Uuid) -> Vec<ArtifactRef> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .keys
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Drops every artifact of a run, returning how many keys were removed
    pub fn remove_run(&self, run_id: Uuid) -> usize {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);

        let removed: Vec<ArtifactRef> = index
            .keys
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();

        for reference in &removed {
            index.keys.remove(&reference.key());
            index.written.remove(&reference.key());
            release_unreferenced(&mut index, &reference.digest);
        }

        removed.len()
    }

    /// Number of distinct stored contents
    pub fn blob_count(&self) -> usize {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.blobs.len()
    }
}

fn release_unreferenced(index: &mut ArtifactIndex, digest: &str) {
    if !index.keys.values().any(|r| r.digest == digest) {
        index.blobs.remove(digest);
    }
}

fn digest_of(content: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();

        let reference = store.put(run_id, "build-arm", "image@arm", "repo:arm64");
        assert_eq!(reference.stage, "build-arm");
        assert!(reference.digest.starts_with("sha256:"));

        assert_eq!(
            store.get_string(&reference),
            Some("repo:arm64".to_string())
        );
        assert_eq!(store.lookup(&reference.key()), Some(reference));
    }

    #[test]
    fn test_identical_content_stored_once() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();

        let a = store.put(run_id, "build-arm", "manifest", "same");
        let b = store.put(run_id, "build-amd", "manifest", "same");

        assert_eq!(a.digest, b.digest);
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.list_run(run_id).len(), 2);
    }

    #[test]
    fn test_overwrite_invalidates_old_handle() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();

        let first = store.put(run_id, "build", "image", "attempt-1");
        let second = store.put(run_id, "build", "image", "attempt-2");

        assert_eq!(store.get(&first), None);
        assert_eq!(store.get_string(&second), Some("attempt-2".to_string()));
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_list_stage_is_scoped() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();
        let other_run = Uuid::new_v4();

        store.put(run_id, "build", "image@arm", "a");
        store.put(run_id, "build", "image@amd", "b");
        store.put(run_id, "publish", "manifest", "c");
        store.put(other_run, "build", "image@arm", "d");

        let names: Vec<String> = store
            .list_stage(run_id, "build")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["image@amd", "image@arm"]);
        assert!(store.list_stage(run_id, "missing").is_empty());
    }

    #[test]
    fn test_find_prefers_latest_write() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();

        store.put(run_id, "@input", "source", "repo@main");
        let rebuilt = store.put(run_id, "build", "source", "repo@patched");

        assert_eq!(store.find(run_id, "source"), Some(rebuilt));
        assert_eq!(store.find(run_id, "missing"), None);
        assert_eq!(store.find(Uuid::new_v4(), "source"), None);
    }

    #[test]
    fn test_remove_run() {
        let store = ArtifactStore::new();
        let run_id = Uuid::new_v4();
        let kept = Uuid::new_v4();

        store.put(run_id, "build", "image", "gone");
        store.put(run_id, "build", "shared", "shared");
        let survivor = store.put(kept, "build", "shared", "shared");

        assert_eq!(store.remove_run(run_id), 2);
        assert!(store.list_run(run_id).is_empty());
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.get_string(&survivor), Some("shared".to_string()));
    }
}
