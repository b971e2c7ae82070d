use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

// Owns every value allocated through it. Allocations are never freed
// individually: they live until the arena itself is dropped, so a pointer
// handed out by `alloc` stays valid for as long as the arena is borrowed.
pub struct Arena<T> {
    blocks: Mutex<Vec<NonNull<T>>>,
    memory_usage: AtomicUsize,
}

// The arena only hands out shared access to `T` across threads.
unsafe impl<T: Send> Send for Arena<T> {}
unsafe impl<T: Send + Sync> Sync for Arena<T> {}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            blocks: Mutex::new(Vec::new()),
            memory_usage: AtomicUsize::new(0),
        }
    }

    // `heap_bytes` is whatever `value` owns outside of its inline size, so
    // the usage estimate tracks it too.
    pub fn alloc(&self, value: T, heap_bytes: usize) -> NonNull<T> {
        let ptr = NonNull::from(Box::leak(Box::new(value)));
        self.blocks.lock().push(ptr);
        self.memory_usage
            .fetch_add(std::mem::size_of::<T>() + heap_bytes, Ordering::Relaxed);
        ptr
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        for ptr in self.blocks.get_mut().drain(..) {
            // SAFETY: every pointer came from `Box::leak` in `alloc` and is
            // dropped exactly once, here.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}
