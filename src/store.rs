//! The narrow persistence interface the core relies on (§6): a
//! content-addressed blob store keyed by job id. Real storage backends are
//! out of scope; this crate only needs put/get/list/delete.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// A canonically-serialized job or optimizing-job record, opaque to the
/// store itself.
pub type Blob = Vec<u8>;

pub trait JobStore: Send + Sync {
    fn put(&self, job_id: &str, blob: Blob);
    fn get(&self, job_id: &str) -> Option<Blob>;
    fn list(&self) -> Vec<String>;
    fn delete(&self, job_id: &str) -> bool;
}

/// An in-memory store used by tests and the demo binaries in place of a real
/// backing store.
#[derive(Default)]
pub struct InMemoryJobStore {
    blobs: Mutex<BTreeMap<String, Blob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job_id: &str, blob: Blob) {
        self.blobs.lock().unwrap().insert(job_id.to_owned(), blob);
    }

    fn get(&self, job_id: &str) -> Option<Blob> {
        self.blobs.lock().unwrap().get(job_id).cloned()
    }

    fn list(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    fn delete(&self, job_id: &str) -> bool {
        self.blobs.lock().unwrap().remove(job_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_list_delete_round_trip() {
        let store = InMemoryJobStore::new();
        store.put("job-1", vec![1, 2, 3]);
        assert_eq!(store.get("job-1"), Some(vec![1, 2, 3]));
        assert_eq!(store.list(), vec!["job-1".to_owned()]);
        assert!(store.delete("job-1"));
        assert_eq!(store.get("job-1"), None);
    }
}
