use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::storage::{ListPage, ObjectStore, StorageError};
use crate::utils::constants::DEFAULT_LIST_PAGE_SIZE;

/// How many more times an operation on a key should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Times(usize),
    Always,
}

impl Fault {
    /// Consume one failure, returning whether the call should fail
    fn trip(&mut self) -> bool {
        match self {
            Fault::Always => true,
            Fault::Times(0) => false,
            Fault::Times(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    get_faults: HashMap<String, Fault>,
    delete_faults: HashMap<String, Fault>,
}

/// In-memory object store with small pages and injectable transient faults.
///
/// Clones share the same contents.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
    page_size: usize,
    list_calls: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            page_size: DEFAULT_LIST_PAGE_SIZE,
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        self.lock().objects.insert(key.to_string(), body.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn read(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    /// Number of `list_page` calls served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `times` gets of `key` with a transient error
    pub fn fail_get(&self, key: &str, times: usize) {
        self.lock()
            .get_faults
            .insert(key.to_string(), Fault::Times(times));
    }

    pub fn fail_get_always(&self, key: &str) {
        self.lock().get_faults.insert(key.to_string(), Fault::Always);
    }

    /// Fail the next `times` deletes of `key` with a transient error
    pub fn fail_delete(&self, key: &str, times: usize) {
        self.lock()
            .delete_faults
            .insert(key.to_string(), Fault::Times(times));
    }

    pub fn fail_delete_always(&self, key: &str) {
        self.lock()
            .delete_faults
            .insert(key.to_string(), Fault::Always);
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn describe(&self, key: &str) -> String {
        format!("memory://{}", key)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();

        let mut matching = inner
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.as_deref().map_or(true, |after| k.as_str() > after));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next = if matching.next().is_some() {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, next })
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let mut inner = self.lock();
        if let Some(fault) = inner.get_faults.get_mut(key) {
            if fault.trip() {
                return Err(StorageError::Transient(format!("injected get failure: {}", key)));
            }
        }
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.lock().objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(fault) = inner.delete_faults.get_mut(key) {
            if fault.trip() {
                return Err(StorageError::Transient(format!(
                    "injected delete failure: {}",
                    key
                )));
            }
        }
        inner.objects.remove(key);
        Ok(())
    }
}
