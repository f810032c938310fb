use core::ops::{Deref, DerefMut};

/// Aligns the wrapped value to the cache prefetch size of the platform.
///
/// Per-thread announcement slots and epoch cells are read by every thread
/// during reclamation scans; padding them keeps a writer on one slot from
/// invalidating its neighbours.
#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::CachePadded;
    use std::mem;

    #[test]
    fn align_verify() {
        let alignment = if cfg!(target_arch = "x86_64") || cfg!(target_arch = "aarch64") {
            128
        } else {
            64
        };

        assert_eq!(mem::align_of::<CachePadded<usize>>(), alignment);
    }
}
