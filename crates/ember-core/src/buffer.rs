//! Growable output buffers
//!
//! Everything an interpreter writes during one invocation lands in an
//! [`OutputBuffer`]. Buffers grow in whole chunks and never beyond a hard
//! ceiling: an append that would need more room than the ceiling allows is
//! dropped in its entirety and reported through `tracing`, never to the
//! caller.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Default growth increment (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default hard ceiling (16 MiB)
pub const DEFAULT_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Growth policy for an [`OutputBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    /// Fixed growth increment in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Hard capacity ceiling in bytes
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl CapacityPolicy {
    /// Create a policy with explicit chunk size and ceiling
    pub fn new(chunk_size: usize, max_size: usize) -> Self {
        Self {
            chunk_size,
            max_size,
        }
    }

    /// Capacity a freshly reset buffer starts with (one chunk)
    pub fn initial_capacity(&self) -> usize {
        self.chunk_size.min(self.max_size)
    }

    /// Capacity needed to hold `required` bytes when `current` bytes are
    /// allocated, grown in whole chunks.
    ///
    /// Returns `None` when the grown capacity would exceed the ceiling.
    pub fn grow_to(&self, current: usize, required: usize) -> Option<usize> {
        if required <= current {
            return Some(current);
        }
        if self.chunk_size == 0 {
            return None;
        }

        let chunks = (required - current).div_ceil(self.chunk_size);
        let needed = chunks
            .checked_mul(self.chunk_size)
            .and_then(|grow| current.checked_add(grow))?;

        (needed <= self.max_size).then_some(needed)
    }
}

/// Append-only byte sink with chunked growth and a hard ceiling
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    label: &'static str,
    data: Vec<u8>,
    capacity: usize,
    policy: CapacityPolicy,
    truncated_bytes: u64,
}

impl OutputBuffer {
    /// Create a buffer holding one empty chunk
    pub fn new(label: &'static str, policy: CapacityPolicy) -> Self {
        let mut buffer = Self {
            label,
            data: Vec::new(),
            capacity: 0,
            policy,
            truncated_bytes: 0,
        };
        buffer.reset();
        buffer
    }

    /// Discard contents.
    ///
    /// Capacity grown by earlier invocations is kept as the baseline for the
    /// next one; a released buffer gets one chunk again.
    pub fn reset(&mut self) {
        self.data.clear();
        self.truncated_bytes = 0;

        let initial = self.policy.initial_capacity();
        if self.capacity < initial {
            if self.data.try_reserve_exact(initial).is_ok() {
                self.capacity = initial;
            } else {
                warn!(buffer = self.label, bytes = initial, "Failed to allocate output buffer");
            }
        }
    }

    /// Free all memory held by the buffer
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.capacity = 0;
        self.truncated_bytes = 0;
    }

    /// Append bytes at the tail.
    ///
    /// The call is a no-op (logged as truncation) when the grown capacity
    /// would exceed the policy ceiling or the allocator refuses the growth.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let Some(required) = self.data.len().checked_add(bytes.len()) else {
            self.drop_append(bytes.len());
            return;
        };

        if required > self.capacity {
            let Some(grown) = self.policy.grow_to(self.capacity, required) else {
                self.drop_append(bytes.len());
                return;
            };

            if self
                .data
                .try_reserve_exact(grown - self.data.len())
                .is_err()
            {
                warn!(
                    buffer = self.label,
                    bytes = grown,
                    "Failed to reallocate output buffer"
                );
                self.truncated_bytes += bytes.len() as u64;
                return;
            }

            trace!(buffer = self.label, from = self.capacity, to = grown, "Output buffer grown");
            self.capacity = grown;
        }

        self.data.extend_from_slice(bytes);
    }

    fn drop_append(&mut self, len: usize) {
        self.truncated_bytes += len as u64;
        warn!(
            buffer = self.label,
            dropped = len,
            max_mb = self.policy.max_size / (1024 * 1024),
            "Output buffer exceeded maximum size, dropping output"
        );
    }

    /// View of the current contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Owned copy of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Bytes used
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been appended since the last reset
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes allocated according to the capacity policy
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Growth policy
    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Bytes dropped since the last reset
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }

    /// Diagnostic label ("body", "headers", ...)
    pub fn label(&self) -> &'static str {
        self.label
    }
}
