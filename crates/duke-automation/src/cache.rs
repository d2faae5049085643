//! Registry of resolved sub-object handles.
//!
//! Entries are keyed by `(parent, member)` where the member is the canonical
//! segment text (`Range("A1")`, `Font`). The member name before any argument
//! list is matched case-insensitively.
//!
//! There are two tiers. Volatile entries describe context-dependent objects
//! (`ActiveSheet`) and are dropped whenever the caller says the context
//! changed. Constant entries are identities fixed for the session (the root
//! application object) and stay until released explicitly.
//!
//! Dropping a volatile entry never releases its handle on the spot: a request
//! may still be using it. The handle is moved to the garbage list instead and
//! released later by whoever drains it.
//!
//! Handles returned to callers that are not cached under any name are kept as
//! "adopted" so they are still released at teardown.

use ahash::{AHashMap, AHashSet};
use dispatch_protocol::Handle;

/// Cache tier of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Volatile,
    Constant,
}

type CacheKey = (Handle, String);

/// Canonical form of a member key: name lowercased, arguments untouched.
fn cache_key(parent: Handle, name: &str) -> CacheKey {
    let name = name.trim();
    let key = match name.find('(') {
        Some(open) => {
            let (head, args) = name.split_at(open);
            let mut key = head.trim_end().to_lowercase();
            key.push_str(args);
            key
        }
        None => name.to_lowercase(),
    };
    (parent, key)
}

/// Two-tier handle cache with a deferred release list.
#[derive(Debug, Default)]
pub struct ObjectCache {
    volatile: AHashMap<CacheKey, Handle>,
    constant: AHashMap<CacheKey, Handle>,
    adopted: AHashSet<Handle>,
    garbage: Vec<Handle>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, parent: Handle, name: &str) -> Option<Handle> {
        let key = cache_key(parent, name);
        self.constant
            .get(&key)
            .or_else(|| self.volatile.get(&key))
            .copied()
    }

    /// Cache `handle` as `name` under `parent`.
    ///
    /// Returns false, and changes nothing, when a constant entry already
    /// holds the key. A volatile entry that gets replaced sends its old
    /// handle to the garbage list.
    pub fn remember(&mut self, parent: Handle, name: &str, handle: Handle, tier: Tier) -> bool {
        let key = cache_key(parent, name);
        if self.constant.contains_key(&key) {
            return false;
        }
        self.adopted.remove(&handle);
        self.garbage.retain(|h| *h != handle);
        let replaced = match tier {
            Tier::Constant => {
                self.constant.insert(key.clone(), handle);
                self.volatile.remove(&key)
            }
            Tier::Volatile => self.volatile.insert(key, handle),
        };
        if let Some(old) = replaced {
            self.discard(old);
        }
        true
    }

    /// Keep track of a handle that was handed to a caller without a name.
    pub fn adopt(&mut self, handle: Handle) {
        if !handle.is_valid() || self.is_referenced(handle) {
            return;
        }
        self.garbage.retain(|h| *h != handle);
        self.adopted.insert(handle);
    }

    /// Drop every volatile entry. Each distinct handle that nothing else
    /// references is appended to the garbage list exactly once.
    pub fn forget_volatile(&mut self) -> usize {
        let dropped: Vec<Handle> = self.volatile.drain().map(|(_, h)| h).collect();
        let before = self.garbage.len();
        for handle in dropped {
            self.discard(handle);
        }
        self.garbage.len() - before
    }

    /// Forget every entry pointing at `handle`, in both tiers. Returns whether
    /// the cache knew the handle; the caller releases it.
    pub fn release(&mut self, handle: Handle) -> bool {
        let before = self.volatile.len() + self.constant.len();
        self.volatile.retain(|_, h| *h != handle);
        self.constant.retain(|_, h| *h != handle);
        let mut known = self.volatile.len() + self.constant.len() != before;
        known |= self.adopted.remove(&handle);
        let garbage_len = self.garbage.len();
        self.garbage.retain(|h| *h != handle);
        known | (self.garbage.len() != garbage_len)
    }

    /// Remove the entry for `name` under `parent`, from whichever tier holds
    /// it, and return its handle.
    pub fn remove(&mut self, parent: Handle, name: &str) -> Option<Handle> {
        let key = cache_key(parent, name);
        self.constant
            .remove(&key)
            .or_else(|| self.volatile.remove(&key))
    }

    /// Hand back the garbage list, leaving it empty.
    pub fn drain_garbage(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.garbage)
    }

    pub fn garbage(&self) -> &[Handle] {
        &self.garbage
    }

    pub fn is_constant(&self, handle: Handle) -> bool {
        self.constant.values().any(|h| *h == handle)
    }

    /// Whether the cache holds `handle` anywhere.
    pub fn is_tracked(&self, handle: Handle) -> bool {
        self.is_referenced(handle) || self.garbage.contains(&handle)
    }

    pub fn volatile_len(&self) -> usize {
        self.volatile.len()
    }

    pub fn constant_len(&self) -> usize {
        self.constant.len()
    }

    /// Every distinct handle the cache is responsible for, sorted.
    pub fn owned_handles(&self) -> Vec<Handle> {
        let mut all: Vec<Handle> = self
            .volatile
            .values()
            .chain(self.constant.values())
            .chain(self.adopted.iter())
            .chain(self.garbage.iter())
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    /// Empty the cache and return every handle in release order: non-constant
    /// handles first, then constants, with `root` (if tracked) last.
    pub fn drain_for_teardown(&mut self, root: Option<Handle>) -> Vec<Handle> {
        let mut seen = AHashSet::new();
        let mut order = Vec::new();

        let mut volatile: Vec<Handle> = self.volatile.drain().map(|(_, h)| h).collect();
        volatile.sort_unstable();
        let mut adopted: Vec<Handle> = self.adopted.drain().collect();
        adopted.sort_unstable();
        let mut constant: Vec<Handle> = self.constant.drain().map(|(_, h)| h).collect();
        constant.sort_unstable();

        let is_root = |h: &Handle| Some(*h) == root;
        let non_constant = volatile
            .into_iter()
            .chain(adopted)
            .chain(self.garbage.drain(..))
            .filter(|h| !constant.contains(h));
        for handle in non_constant.chain(constant.iter().copied()) {
            if !is_root(&handle) && seen.insert(handle) {
                order.push(handle);
            }
        }
        if let Some(root) = root.filter(|r| r.is_valid()) {
            order.push(root);
        }
        order
    }

    fn is_referenced(&self, handle: Handle) -> bool {
        self.adopted.contains(&handle)
            || self.volatile.values().any(|h| *h == handle)
            || self.constant.values().any(|h| *h == handle)
    }

    fn discard(&mut self, handle: Handle) {
        if !self.is_referenced(handle) && !self.garbage.contains(&handle) {
            self.garbage.push(handle);
        }
    }
}
