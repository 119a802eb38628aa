//! Content-addressed, capacity-bounded index from text hash to [`StreamBuffer`].

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use md5::{Digest, Md5};

use crate::stream_buffer::StreamBuffer;

/// 128-bit MD5 digest of the UTF-8 text payload. Collisions would let two
/// distinct texts share a stream; swapping in a wider digest here is a
/// drop-in change, see DESIGN.md.
pub type CacheKey = [u8; 16];

pub fn hash_text(text: &str) -> CacheKey {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// Bounded `text-hash -> StreamBuffer` map with LRU eviction and
/// corruption-aware lookup.
pub struct Cache {
    inner: Mutex<LruCache<CacheKey, StreamBuffer>>,
}

impl Cache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Cache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Atomically looks up `key`: a healthy hit touches its LRU position and
    /// returns `(buffer, false)`; a corrupt hit is dropped and treated as a
    /// miss; a miss reserves a fresh `Start`-state buffer under `key`,
    /// evicting the least-recently-used entry if the cache is full, and
    /// returns `(buffer, true)`.
    pub fn get_or_reserve(&self, key: CacheKey) -> (StreamBuffer, bool) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(buf) = guard.get(&key) {
            if !buf.corrupted() {
                return (buf.clone(), false);
            }
            guard.pop(&key);
        }
        let buf = StreamBuffer::new();
        guard.put(key, buf.clone());
        (buf, true)
    }

    pub fn remove(&self, key: &CacheKey) {
        self.inner.lock().unwrap().pop(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn cache(n: usize) -> Cache {
        Cache::new(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn hash_is_stable_and_key_length_is_fixed() {
        assert_eq!(hash_text("hi"), hash_text("hi"));
        assert_ne!(hash_text("hi"), hash_text("bye"));
        assert_eq!(hash_text("hi").len(), 16);
    }

    #[tokio::test]
    async fn second_lookup_of_same_key_is_a_hit_on_the_same_buffer() {
        let cache = cache(4);
        let key = hash_text("hello");
        let (buf1, created1) = cache.get_or_reserve(key);
        assert!(created1);
        let (buf2, created2) = cache.get_or_reserve(key);
        assert!(!created2);

        let writer = buf1.make_writer().unwrap();
        writer.write(Bytes::from_static(b"x")).unwrap();
        writer.close(false).unwrap();

        let mut reader = buf2.make_reader();
        assert_eq!(reader.read().await, Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn bound_is_respected_under_eviction() {
        let cache = cache(2);
        let (_, _) = cache.get_or_reserve(hash_text("a"));
        let (_, _) = cache.get_or_reserve(hash_text("b"));
        let (_, _) = cache.get_or_reserve(hash_text("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn corrupt_entry_is_dropped_on_lookup_and_replaced() {
        let cache = cache(4);
        let key = hash_text("broken");
        let (buf, created) = cache.get_or_reserve(key);
        assert!(created);
        let writer = buf.make_writer().unwrap();
        writer.close(true).unwrap();
        assert!(buf.corrupted());

        let (_fresh, created_again) = cache.get_or_reserve(key);
        assert!(created_again, "a corrupt hit must behave as a miss");
    }

    #[test]
    fn inserting_at_capacity_never_evicts_the_entry_being_inserted() {
        let cache = cache(1);
        let key_a = hash_text("a");
        cache.get_or_reserve(key_a);
        let key_b = hash_text("b");
        let (_, created) = cache.get_or_reserve(key_b);
        assert!(created);
        // The newly reserved entry must itself be retrievable afterwards.
        let (_, created_again) = cache.get_or_reserve(key_b);
        assert!(!created_again);
    }
}
