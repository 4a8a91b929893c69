//! Named, reference-counted cache of shared GPU objects.
//!
//! Nodes that share resources (a compiled shader, a pipeline, a sampler) look
//! them up by name through the [`AssetCache`] handed to
//! [`RenderNode::create`](crate::RenderNode::create) instead of building a
//! private copy. The cache is owned by the pipeline; unreferenced entries stay
//! alive until the owner calls [`AssetCache::collect_garbage`].

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};

struct Entry {
    value: Rc<dyn Any>,
    refs: usize,
}

/// Reference-counted cache keyed by asset name.
#[derive(Default)]
pub struct AssetCache {
    entries: IndexMap<String, Entry>,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, entry)| (name, entry.refs)))
            .finish()
    }
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the asset cached under `name`, building it with `factory` on a miss.
    ///
    /// Each successful call takes one reference that must be handed back with
    /// [`release`](Self::release).
    pub fn acquire<T, F>(&mut self, name: &str, factory: F) -> Result<Rc<T>>
    where
        T: 'static,
        F: FnOnce() -> T,
    {
        if let Some(entry) = self.entries.get_mut(name) {
            let value = Rc::clone(&entry.value)
                .downcast::<T>()
                .map_err(|_| Error::AssetTypeMismatch(name.to_string()))?;
            entry.refs += 1;
            return Ok(value);
        }

        log::debug!("AssetCache: building {name:?}");
        let value = Rc::new(factory());
        self.entries.insert(
            name.to_string(),
            Entry {
                value: value.clone(),
                refs: 1,
            },
        );
        Ok(value)
    }

    /// Hands back one reference. Returns `false` for names that are not cached
    /// or hold no references.
    pub fn release(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) if entry.refs > 0 => {
                entry.refs -= 1;
                true
            }
            _ => {
                log::warn!("AssetCache: release of unreferenced asset {name:?}");
                false
            }
        }
    }

    /// Drops every entry with no outstanding references. Returns how many were dropped.
    pub fn collect_garbage(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.refs > 0);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            log::debug!("AssetCache: collected {dropped} unused assets");
        }
        dropped
    }

    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|e| e.refs)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn factory_runs_once_per_name() {
        let mut cache = AssetCache::new();
        let builds = Cell::new(0);
        let build = || {
            builds.set(builds.get() + 1);
            String::from("blur.wgsl")
        };

        let a = cache.acquire("blur", build).unwrap();
        let b = cache
            .acquire("blur", || unreachable!("cached"))
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(builds.get(), 1);
        assert_eq!(cache.ref_count("blur"), Some(2));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let mut cache = AssetCache::new();
        cache.acquire("shared", || 7_u32).unwrap();
        let err = cache.acquire("shared", || String::new()).unwrap_err();
        assert!(matches!(err, Error::AssetTypeMismatch(name) if name == "shared"));
        assert_eq!(cache.ref_count("shared"), Some(1));
    }

    #[test]
    fn garbage_collection_is_explicit() {
        let mut cache = AssetCache::new();
        cache.acquire("a", || 1_i32).unwrap();
        cache.acquire("b", || 2_i32).unwrap();

        assert!(cache.release("a"));
        assert!(cache.contains("a"), "released entries survive until GC");

        assert_eq!(cache.collect_garbage(), 1);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn release_of_unknown_name() {
        let mut cache = AssetCache::new();
        assert!(!cache.release("missing"));
        cache.acquire("x", || ()).unwrap();
        assert!(cache.release("x"));
        assert!(!cache.release("x"));
    }
}
