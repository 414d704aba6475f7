//! Pooled scratch buffers
//!
//! A processor checks a buffer out per call; the guard clears it and hands
//! it back to the pool when dropped, on every exit path.

use serde_json::Value;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Buffers kept around for reuse
const MAX_POOLED: usize = 16;

/// A buffer that can be cleared for reuse.
pub trait Reusable: Default {
    fn reset(&mut self);
}

impl Reusable for Vec<Value> {
    fn reset(&mut self) {
        self.clear();
    }
}

#[derive(Debug, Default)]
pub struct ScratchPool<T: Reusable> {
    free: Mutex<Vec<T>>,
}

impl<T: Reusable> ScratchPool<T> {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn checkout(&self) -> ScratchGuard<'_, T> {
        let buffer = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        ScratchGuard {
            pool: self,
            buffer: Some(buffer),
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Checked-out buffer.
pub struct ScratchGuard<'a, T: Reusable> {
    pool: &'a ScratchPool<T>,
    buffer: Option<T>,
}

impl<T: Reusable> Deref for ScratchGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only taken in drop
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> DerefMut for ScratchGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> Drop for ScratchGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.reset();
            let mut free = self.pool.free.lock().unwrap_or_else(|e| e.into_inner());
            if free.len() < MAX_POOLED {
                free.push(buffer);
            }
        }
    }
}
