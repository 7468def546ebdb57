use std::{
    any::Any,
    sync::{Arc, Weak},
};

/// Out-of-band payload storage keyed by object identity.
///
/// Keys are `Arc` allocations, compared by address rather than value. The
/// table only holds a `Weak` to each owner: it never keeps a configuration
/// alive, and the weak reference pins the allocation so its address cannot be
/// handed to another object while the entry exists. Entries of dropped owners
/// read as absent and are evicted by [`IdentityTable::prune`] or by the next
/// `put` on the same address.
pub struct IdentityTable<V> {
    entries: scc::HashMap<usize, Entry<V>>,
}

struct Entry<V> {
    owner: Weak<dyn Any + Send + Sync>,
    payload: V,
}

impl<V> Entry<V> {
    #[inline]
    fn is_live(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

#[inline]
fn identity<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl<V: Clone> IdentityTable<V> {
    pub fn new() -> Self {
        Self {
            entries: scc::HashMap::new(),
        }
    }

    pub fn put<T: Any + Send + Sync>(&self, object: &Arc<T>, payload: V) {
        let erased: Arc<dyn Any + Send + Sync> = object.clone();
        let entry = Entry {
            owner: Arc::downgrade(&erased),
            payload,
        };
        self.entries.upsert(identity(object), entry);
    }

    pub fn get<T: ?Sized>(&self, object: &Arc<T>) -> Option<V> {
        self.entries
            .read(&identity(object), |_, entry| {
                entry.is_live().then(|| entry.payload.clone())
            })
            .flatten()
    }

    pub fn get_or<T: ?Sized>(&self, object: &Arc<T>, default: V) -> V {
        self.get(object).unwrap_or(default)
    }

    /// Number of entries, including ones whose owner is gone.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts entries whose owner has been dropped.
    pub fn prune(&self) {
        self.entries.retain(|_, entry| entry.is_live());
    }
}

impl<V: Clone> Default for IdentityTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Frozen {
        y: u32,
    }

    #[test]
    fn test_identity_not_equality() {
        let table = IdentityTable::new();
        let a = Arc::new(Frozen { y: 7 });
        let b = Arc::new(Frozen { y: 7 });
        table.put(&a, "a");
        assert_eq!(a, b);
        assert_eq!(table.get(&a), Some("a"));
        assert_eq!(table.get(&b), None);
        assert_eq!(table.get_or(&b, "default"), "default");
        assert_eq!(table.get(&a.clone()), Some("a"));
    }

    #[test]
    fn test_put_replaces() {
        let table = IdentityTable::new();
        let a = Arc::new(Frozen { y: 1 });
        table.put(&a, 1);
        table.put(&a, 2);
        assert_eq!(table.get(&a), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_non_owning() {
        let table = IdentityTable::new();
        let a = Arc::new(Frozen { y: 1 });
        let weak = Arc::downgrade(&a);
        table.put(&a, 1);
        drop(a);
        assert!(weak.upgrade().is_none());
        assert_eq!(table.len(), 1);
        table.prune();
        assert!(table.is_empty());
    }
}
