//! In-process vector index.
//!
//! Each namespace is an immutable snapshot behind an `Arc`. Writers build the
//! replacement snapshot off to the side and swap the pointer under a short
//! write lock; readers clone the pointer and score without holding the lock.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::embedder::l2_normalize;

use super::{
    ChunkPayload, IndexEntry, IndexError, IndexStats, METRIC, SearchHit, VectorIndex,
    check_query, check_vector, dedup_last, dot, rank,
};

#[derive(Debug, Clone)]
struct StoredEntry {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

type Snapshot = HashMap<String, StoredEntry>;

/// Exhaustive (flat) cosine index held in memory.
pub struct MemoryIndex {
    dimensions: usize,
    namespaces: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and normalize a write batch before any lock is taken.
    fn prepare(&self, entries: Vec<IndexEntry>) -> Result<Vec<(String, StoredEntry)>, IndexError> {
        for entry in &entries {
            check_vector(&entry.vector, self.dimensions)?;
        }
        Ok(dedup_last(entries)
            .into_iter()
            .map(|e| {
                let stored = StoredEntry {
                    vector: l2_normalize(&e.vector),
                    payload: e.payload,
                };
                (e.id, stored)
            })
            .collect())
    }

    fn snapshot(&self, namespace: &str) -> Result<Option<Arc<Snapshot>>, IndexError> {
        let guard = self
            .namespaces
            .read()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))?;
        Ok(guard.get(namespace).cloned())
    }
}

impl VectorIndex for MemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let prepared = self.prepare(entries)?;
        if prepared.is_empty() {
            return Ok(());
        }

        let mut guard = self
            .namespaces
            .write()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))?;
        let mut next: Snapshot = guard
            .get(namespace)
            .map(|current| current.as_ref().clone())
            .unwrap_or_default();
        let count = prepared.len();
        next.extend(prepared);
        guard.insert(namespace.to_string(), Arc::new(next));

        debug!("Upserted {count} entries into namespace {namespace}");
        Ok(())
    }

    fn replace_namespace(
        &self,
        namespace: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), IndexError> {
        let next: Snapshot = self.prepare(entries)?.into_iter().collect();
        let count = next.len();

        let mut guard = self
            .namespaces
            .write()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))?;
        if next.is_empty() {
            guard.remove(namespace);
        } else {
            guard.insert(namespace.to_string(), Arc::new(next));
        }

        debug!("Replaced namespace {namespace} with {count} entries");
        Ok(())
    }

    fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        check_query(query, top_k, self.dimensions)?;

        let Some(snapshot) = self.snapshot(namespace)? else {
            return Ok(Vec::new());
        };

        let query = l2_normalize(query);
        let mut hits: Vec<SearchHit> = snapshot
            .iter()
            .map(|(id, entry)| SearchHit {
                id: id.clone(),
                payload: entry.payload.clone(),
                score: dot(&query, &entry.vector),
            })
            .collect();

        rank(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    fn delete_namespace(&self, namespace: &str) -> Result<bool, IndexError> {
        let mut guard = self
            .namespaces
            .write()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))?;
        Ok(guard
            .remove(namespace)
            .is_some_and(|snapshot| !snapshot.is_empty()))
    }

    fn stats(&self) -> Result<IndexStats, IndexError> {
        let guard = self
            .namespaces
            .read()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))?;

        let namespaces: BTreeMap<String, usize> = guard
            .iter()
            .filter(|(_, snapshot)| !snapshot.is_empty())
            .map(|(name, snapshot)| (name.clone(), snapshot.len()))
            .collect();

        Ok(IndexStats {
            backend: self.backend(),
            metric: METRIC,
            dimensions: self.dimensions,
            total_entries: namespaces.values().sum(),
            namespaces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::{entry, exercise_contract};
    use std::thread;

    #[test]
    fn test_memory_contract() {
        exercise_contract(&MemoryIndex::new(3));
    }

    #[test]
    fn test_stores_normalized_vectors() {
        let index = MemoryIndex::new(3);
        index
            .upsert("ns", vec![entry("ns#0", 0, [10.0, 0.0, 0.0])])
            .unwrap();
        let hits = index.search("ns", &[2.0, 0.0, 0.0], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_failed_write_leaves_namespace_untouched() {
        let index = MemoryIndex::new(3);
        index
            .replace_namespace("ns", vec![entry("ns#0", 0, [1.0, 0.0, 0.0])])
            .unwrap();

        let bad = IndexEntry {
            vector: vec![1.0],
            ..entry("ns#10", 10, [0.0, 1.0, 0.0])
        };
        let result =
            index.replace_namespace("ns", vec![entry("ns#20", 20, [0.0, 1.0, 0.0]), bad]);
        assert!(result.is_err());

        let hits = index.search("ns", &[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "ns#0");
    }

    #[test]
    fn test_concurrent_replace_is_never_partial() {
        let index = Arc::new(MemoryIndex::new(3));
        let old: Vec<IndexEntry> = (0..50)
            .map(|i| entry(&format!("old#{i}"), i * 10, [1.0, 0.0, 0.0]))
            .collect();
        let new: Vec<IndexEntry> = (0..80)
            .map(|i| entry(&format!("new#{i}"), i * 10, [0.0, 1.0, 0.0]))
            .collect();
        index.replace_namespace("page", old.clone()).unwrap();

        let writer = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for round in 0..200 {
                    let set = if round % 2 == 0 { new.clone() } else { old.clone() };
                    index.replace_namespace("page", set).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let hits = index.search("page", &[1.0, 1.0, 0.0], 1000).unwrap();
            let olds = hits.iter().filter(|h| h.id.starts_with("old#")).count();
            let news = hits.iter().filter(|h| h.id.starts_with("new#")).count();
            assert!(
                (olds == 50 && news == 0) || (olds == 0 && news == 80),
                "observed a mixed namespace: {olds} old / {news} new"
            );
        }

        writer.join().unwrap();
    }
}
