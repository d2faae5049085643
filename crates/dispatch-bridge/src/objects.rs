//! Handle table for the objects the bridge has handed out.
//!
//! Every object-valued result gets a fresh handle, even when it is the same
//! underlying object, so that each handle can be released independently.

use std::collections::HashMap;

use dispatch_protocol::Handle;

pub struct HandleTable<T> {
    next: u64,
    objects: HashMap<Handle, T>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            objects: HashMap::new(),
        }
    }

    pub fn insert(&mut self, object: T) -> Handle {
        self.next += 1;
        let handle = Handle(self.next);
        self.objects.insert(handle, object);
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.objects.get(&handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.objects.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Drop every object, newest first.
    pub fn clear(&mut self) {
        let mut handles: Vec<Handle> = self.objects.keys().copied().collect();
        handles.sort_unstable_by(|a, b| b.cmp(a));
        for handle in handles {
            self.objects.remove(&handle);
        }
    }
}
