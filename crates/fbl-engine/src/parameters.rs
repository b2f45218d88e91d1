//! Delegated parameters: scoped state threaded down the execution tree.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Handle to a parameter bag.
///
/// Control-flow handlers decide per child whether to [`fork`](Self::fork) an
/// isolated copy or [`share`](Self::share) the same bag. Two handles obtained
/// through `share` observe each other's writes; forked handles never do.
#[derive(Debug, Default)]
pub struct DelegatedParameters {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl DelegatedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(values)),
        }
    }

    /// Independent copy of this bag with `overrides` applied on top.
    pub fn fork(&self, overrides: Map<String, Value>) -> Self {
        let mut values = self.inner.lock().clone();
        values.extend(overrides);
        Self::from_map(values)
    }

    /// Apply `overrides` to this bag in place and return another handle to it.
    pub fn share(&self, overrides: Map<String, Value>) -> Self {
        self.inner.lock().extend(overrides);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// [`share`](Self::share) when `share` is true, [`fork`](Self::fork) otherwise.
    pub fn derive(&self, share: bool, overrides: Map<String, Value>) -> Self {
        if share {
            self.share(overrides)
        } else {
            self.fork(overrides)
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().insert(key.into(), value);
    }

    /// Run `f` with exclusive access to the underlying map.
    pub fn with_values<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Current contents as a plain map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.lock().clone()
    }

    /// Whether both handles point at the same bag.
    pub fn is_shared_with(&self, other: &DelegatedParameters) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
