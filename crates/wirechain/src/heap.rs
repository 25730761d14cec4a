//! Capability heap - live objects handed out by reference.
//!
//! When a server returns a stub, the target is registered here under a fresh
//! id and only the id crosses the wire. Later chains name the id as their
//! starting point. Entries live until released; there is no eviction.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::protocol::CapabilityId;
use crate::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    #[error("unknown capability {0}")]
    Unknown(CapabilityId),
}

/// Concurrent id -> value registry.
#[derive(Default)]
pub struct CapabilityHeap {
    entries: DashMap<CapabilityId, Value>,
}

static GLOBAL_HEAP: OnceLock<Arc<CapabilityHeap>> = OnceLock::new();

impl CapabilityHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Process-wide heap shared by servers that don't bring their own.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_HEAP.get_or_init(CapabilityHeap::new))
    }

    /// Register `target` and return its id. Minting the same value twice
    /// yields two ids.
    pub fn mint(&self, target: Value) -> CapabilityId {
        let id = CapabilityId::new();
        tracing::debug!(%id, kind = target.type_name(), "Minted capability");
        self.entries.insert(id, target);
        id
    }

    pub fn resolve(&self, id: &CapabilityId) -> Result<Value, HeapError> {
        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(HeapError::Unknown(*id))
    }

    /// Drop an entry. Returns whether it existed.
    pub fn release(&self, id: &CapabilityId) -> bool {
        let existed = self.entries.remove(id).is_some();
        if existed {
            tracing::debug!(%id, "Released capability");
        }
        existed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns a capability id received from the peer into a local handle.
///
/// The client side implements this so revived stubs come back as callable
/// chain handles rooted at the id.
pub trait StubFactory: Send + Sync {
    fn stub(&self, id: CapabilityId) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_resolve() {
        let heap = CapabilityHeap::new();
        let target = Value::object([("n", Value::from(1))]);
        let id = heap.mint(target.clone());

        let resolved = heap.resolve(&id).unwrap();
        assert!(resolved.same_value(&target));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let heap = CapabilityHeap::new();
        let id = CapabilityId::new();
        let err = heap.resolve(&id).unwrap_err();
        assert_eq!(err.to_string(), format!("unknown capability {id}"));
    }

    #[test]
    fn minting_twice_gives_distinct_ids() {
        let heap = CapabilityHeap::new();
        let target = Value::empty_object();
        assert_ne!(heap.mint(target.clone()), heap.mint(target));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn release_removes_entry() {
        let heap = CapabilityHeap::new();
        let id = heap.mint(Value::from("x"));
        assert!(heap.release(&id));
        assert!(!heap.release(&id));
        assert!(heap.is_empty());
        assert!(heap.resolve(&id).is_err());
    }

    #[test]
    fn global_heap_is_shared() {
        let a = CapabilityHeap::global();
        let b = CapabilityHeap::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
