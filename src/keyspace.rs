mod range;

#[cfg(test)]
mod range_test;

use {
    crate::{KeyspaceError, KeyspaceResult},
    rapidhash::v3::rapidhash_v3,
    serde::{Deserialize, Serialize},
};

pub use range::KeyRange;

/// Fixed-size ring of key positions.
///
/// Keys are routed onto the ring by hashing, nodes claim arcs of the ring
/// (see [`KeyRange`]). Position arithmetic is modular: position `length - 1`
/// is immediately followed by position `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct KeySpace {
    length: u32,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            length: Self::DEFAULT_LENGTH,
        }
    }
}

impl TryFrom<u32> for KeySpace {
    type Error = KeyspaceError;

    fn try_from(length: u32) -> Result<Self, Self::Error> {
        Self::new(length)
    }
}

impl From<KeySpace> for u32 {
    fn from(space: KeySpace) -> Self {
        space.length
    }
}

impl KeySpace {
    /// Ring size used when none is configured.
    pub const DEFAULT_LENGTH: u32 = 1024;

    /// Creates a keyspace with the given number of positions.
    pub fn new(length: u32) -> KeyspaceResult<Self> {
        if length == 0 {
            return Err(KeyspaceError::EmptyKeyspace);
        }
        Ok(Self { length })
    }

    /// Number of positions on the ring.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Creates a range of `length` positions starting at `start`.
    ///
    /// The start is reduced modulo the ring size, so any `u32` is accepted.
    pub fn range(&self, start: u32, length: u32) -> KeyspaceResult<KeyRange> {
        if length > self.length {
            return Err(KeyspaceError::LengthOutOfBounds {
                length,
                space: self.length,
            });
        }
        Ok(KeyRange::new(*self, start % self.length, length))
    }

    /// Range covering the whole ring.
    pub fn full_range(&self) -> KeyRange {
        KeyRange::new(*self, 0, self.length)
    }

    /// Empty range anchored at `start`.
    pub fn empty_range(&self, start: u32) -> KeyRange {
        KeyRange::new(*self, start % self.length, 0)
    }

    /// Returns ring position of a given key.
    ///
    /// Uses rapidhash over the raw key bytes, so the position is stable across
    /// platforms and processes.
    pub fn position<K: AsRef<[u8]>>(&self, key: K) -> u32 {
        (rapidhash_v3(key.as_ref()) % u64::from(self.length)) as u32
    }

    /// Range assigned to node `index` (0-based) of `count` nodes, each node
    /// holding `copies` consecutive segments of the ring.
    ///
    /// Segment boundaries are `i * length / count`, so uneven divisions spread
    /// the remainder across nodes instead of piling it on the last one.
    pub fn linear_range(
        &self,
        index: usize,
        count: usize,
        copies: usize,
    ) -> KeyspaceResult<KeyRange> {
        if index >= count {
            return Err(KeyspaceError::IndexOutOfBounds { index, count });
        }
        if copies >= count {
            return Ok(self.full_range());
        }
        let space = u64::from(self.length);
        let start = index as u64 * space / count as u64;
        let end = (index + copies) as u64 * space / count as u64;
        self.range(start as u32, (end - start) as u32)
    }
}
