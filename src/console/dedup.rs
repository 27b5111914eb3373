use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Suppresses identical output chunks seen within a short window.
///
/// Some runtimes write the same text to both stdout and stderr; without this
/// observers would see every such line twice. Chunks are compared by the
/// SHA-256 of their trimmed text.
#[derive(Debug)]
pub struct OutputDeduper {
    window: Duration,
    seen: HashMap<Vec<u8>, Instant>,
}

impl OutputDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Returns `true` if `chunk` should be published now.
    pub fn should_publish(&mut self, chunk: &str) -> bool {
        self.should_publish_at(chunk, Instant::now())
    }

    /// Same as [`should_publish`](Self::should_publish) with an explicit clock.
    pub fn should_publish_at(&mut self, chunk: &str, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);

        let digest = Sha256::digest(chunk.trim().as_bytes()).to_vec();
        if self.seen.contains_key(&digest) {
            return false;
        }

        self.seen.insert(digest, now);
        true
    }

    /// Number of hashes currently remembered.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}
