//! Handle Cache (C7, `spec.md` §4.7): caches `"record.field"` -> network
//! handle lookups per [`crate::connection::Server`], invalidated in O(1) on
//! reconnect by bumping a generation counter rather than walking every
//! entry.

use hashbrown::HashMap;

/// Opaque server-assigned handle for a record.field pair, cached across
/// RPCs until the connection it was issued on is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHandle {
    pub record_handle: u32,
    pub field_handle: u32,
}

struct Entry {
    handle: NetworkHandle,
    generation: u64,
}

/// A generation-tagged cache: entries stamped with a generation older than
/// the cache's current one are treated as absent without being removed
/// (`spec.md` §4.7 "reconnect invalidation"). Removed lazily in bulk via
/// `bump_generation`, not swept eagerly.
#[derive(Default)]
pub struct HandleCache {
    entries: HashMap<String, Entry>,
    generation: u64,
}

impl HandleCache {
    pub fn new() -> HandleCache {
        HandleCache {
            entries: HashMap::new(),
            generation: 0,
        }
    }

    /// Invalidates every cached handle (`spec.md` §4.7, §4.9 - called once
    /// per successful reconnect).
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub fn get(&self, name: &str) -> Option<NetworkHandle> {
        self.entries.get(name).and_then(|entry| {
            if entry.generation == self.generation {
                Some(entry.handle)
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, name: String, handle: NetworkHandle) {
        self.entries.insert(
            name,
            Entry {
                handle,
                generation: self.generation,
            },
        );
    }

    /// Drops one entry outright, used when the server reports
    /// `BAD_HANDLE` for a name that should otherwise still be valid
    /// (`spec.md` §4.7 "invalidate_one").
    pub fn invalidate_one(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut cache = HandleCache::new();
        cache.insert("theta.position".to_string(), NetworkHandle { record_handle: 1, field_handle: 2 });
        assert_eq!(
            cache.get("theta.position"),
            Some(NetworkHandle { record_handle: 1, field_handle: 2 })
        );
    }

    #[test]
    fn bump_generation_invalidates_without_removing() {
        let mut cache = HandleCache::new();
        cache.insert("theta.position".to_string(), NetworkHandle { record_handle: 1, field_handle: 2 });
        cache.bump_generation();
        assert_eq!(cache.get("theta.position"), None);
        cache.insert("theta.position".to_string(), NetworkHandle { record_handle: 5, field_handle: 6 });
        assert_eq!(
            cache.get("theta.position"),
            Some(NetworkHandle { record_handle: 5, field_handle: 6 })
        );
    }

    #[test]
    fn invalidate_one_only_drops_the_named_entry() {
        let mut cache = HandleCache::new();
        cache.insert("a.x".to_string(), NetworkHandle { record_handle: 1, field_handle: 1 });
        cache.insert("b.y".to_string(), NetworkHandle { record_handle: 2, field_handle: 2 });
        cache.invalidate_one("a.x");
        assert_eq!(cache.get("a.x"), None);
        assert!(cache.get("b.y").is_some());
    }
}
