use {
    super::KeySpace,
    crate::{KeyspaceError, KeyspaceResult},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A half-open arc of the ring: `length` positions starting at `start`.
///
/// Arcs may wrap past the end of the ring back to position `0`. A zero length
/// denotes the empty range, a length equal to the ring size the full ring.
/// Full ranges are always anchored at `0`, so two full ranges compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKeyRange", into = "RawKeyRange")]
pub struct KeyRange {
    space: KeySpace,
    start: u32,
    length: u32,
}

#[derive(Serialize, Deserialize)]
struct RawKeyRange {
    space: u32,
    start: u32,
    length: u32,
}

impl TryFrom<RawKeyRange> for KeyRange {
    type Error = KeyspaceError;

    fn try_from(raw: RawKeyRange) -> Result<Self, Self::Error> {
        KeySpace::new(raw.space)?.range(raw.start, raw.length)
    }
}

impl From<KeyRange> for RawKeyRange {
    fn from(range: KeyRange) -> Self {
        Self {
            space: range.space.length(),
            start: range.start,
            length: range.length,
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}+{}]", self.start, self.length)
    }
}

impl KeyRange {
    /// Callers guarantee `start < space` and `length <= space`.
    pub(crate) fn new(space: KeySpace, start: u32, length: u32) -> Self {
        let start = if length == space.length() { 0 } else { start };
        Self {
            space,
            start,
            length,
        }
    }

    /// Ring the range lives on.
    pub fn space(&self) -> KeySpace {
        self.space
    }

    /// First position of the range; always 0 for the full ring.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Number of positions covered.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// First position after the range (wrapped onto the ring).
    pub fn end(&self) -> u32 {
        ((u64::from(self.start) + u64::from(self.length)) % self.ring()) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_full(&self) -> bool {
        self.length == self.space.length()
    }

    /// Same start, different length (clamped to the ring size).
    pub fn with_length(&self, length: u32) -> Self {
        Self::new(self.space, self.start, length.min(self.space.length()))
    }

    /// Checks if the given ring position is in the range.
    pub fn contains_position(&self, position: u32) -> bool {
        !self.is_empty() && self.offset(position) < u64::from(self.length)
    }

    /// Checks if every position of `other` is also in this range.
    ///
    /// The empty range is contained in every range of the same keyspace.
    pub fn contains(&self, other: &KeyRange) -> bool {
        if self.space != other.space {
            return false;
        }
        if other.is_empty() || self.is_full() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        self.offset(other.start) + u64::from(other.length) <= u64::from(self.length)
    }

    /// Checks if the ranges share at least one position.
    pub fn overlaps_with(&self, other: &KeyRange) -> bool {
        self.space == other.space
            && !self.is_empty()
            && !other.is_empty()
            && (self.contains_position(other.start) || other.contains_position(self.start))
    }

    /// Longest arc shared by both ranges.
    ///
    /// Two arcs can meet in two separate pieces (each one wrapping over the
    /// other's end). In that case the longer piece is returned, ties going to
    /// the piece with the lower start so the result does not depend on
    /// argument order. Non-overlapping ranges give an empty range anchored at
    /// this range's start.
    pub fn intersection(&self, other: &KeyRange) -> KeyRange {
        if !self.overlaps_with(other) {
            return self.with_length(0);
        }
        if self.is_full() {
            return *other;
        }
        if other.is_full() {
            return *self;
        }

        let mut pieces = Vec::with_capacity(2);
        if self.contains_position(other.start) {
            let room = u64::from(self.length) - self.offset(other.start);
            pieces.push((other.start, room.min(u64::from(other.length))));
        }
        if other.contains_position(self.start) {
            let room = u64::from(other.length) - other.offset(self.start);
            pieces.push((self.start, room.min(u64::from(self.length))));
        }

        pieces
            .into_iter()
            .max_by(|(start_a, len_a), (start_b, len_b)| {
                len_a.cmp(len_b).then_with(|| start_b.cmp(start_a))
            })
            .map(|(start, length)| Self::new(self.space, start, length as u32))
            .unwrap_or_else(|| self.with_length(0))
    }

    /// Smallest arc covering both ranges.
    ///
    /// Only defined when the ranges overlap or are adjacent; disjoint ranges
    /// have no unique covering arc and yield
    /// [`KeyspaceError::DisjointRanges`].
    pub fn union(&self, other: &KeyRange) -> KeyspaceResult<KeyRange> {
        if self.space != other.space {
            return Err(KeyspaceError::KeyspaceMismatch(
                self.space.length(),
                other.space.length(),
            ));
        }
        if other.is_empty() {
            return Ok(*self);
        }
        if self.is_empty() {
            return Ok(*other);
        }

        let covering = |base: &KeyRange, next: &KeyRange| {
            let offset = base.offset(next.start);
            (offset <= u64::from(base.length)).then(|| {
                let length = u64::from(base.length).max(offset + u64::from(next.length));
                (base.start, length)
            })
        };

        [covering(self, other), covering(other, self)]
            .into_iter()
            .flatten()
            .min_by(|(start_a, len_a), (start_b, len_b)| {
                len_a.cmp(len_b).then_with(|| start_a.cmp(start_b))
            })
            .map(|(start, length)| {
                let length = length.min(u64::from(self.space.length()));
                Self::new(self.space, start, length as u32)
            })
            .ok_or_else(|| KeyspaceError::DisjointRanges(self.to_string(), other.to_string()))
    }

    fn ring(&self) -> u64 {
        u64::from(self.space.length())
    }

    /// Clockwise distance from the range start to `position`.
    fn offset(&self, position: u32) -> u64 {
        let ring = self.ring();
        (u64::from(position) % ring + ring - u64::from(self.start)) % ring
    }
}
