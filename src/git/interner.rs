//! Path segment interning.
//!
//! Tree lookups compare small integers instead of strings: every path segment
//! seen in a tree or a query is stored once and referenced by a `u32` id.
//! Ids are handed out in increasing order and never reused.

use lasso::{Key, Spur, ThreadedRodeo};

/// Interned id of a single path segment.
pub type SegmentId = u32;

/// Thread-safe segment interner shared by every query of one engine.
#[derive(Debug, Default)]
pub struct PathInterner {
    inner: ThreadedRodeo,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a segment, returning the existing id if already present.
    #[inline]
    pub fn intern(&self, segment: &str) -> SegmentId {
        self.inner.get_or_intern(segment).into_usize() as SegmentId
    }

    /// Look up a segment without interning it.
    #[inline]
    pub fn get(&self, segment: &str) -> Option<SegmentId> {
        self.inner.get(segment).map(|key| key.into_usize() as SegmentId)
    }

    pub fn resolve(&self, id: SegmentId) -> Option<&str> {
        let key = Spur::try_from_usize(id as usize)?;
        self.inner.try_resolve(&key)
    }

    /// Split a `/`-separated relative path and intern each segment.
    /// Empty segments (leading, trailing or doubled slashes) are ignored.
    pub fn intern_path(&self, path: &str) -> Vec<SegmentId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| self.intern(segment))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
