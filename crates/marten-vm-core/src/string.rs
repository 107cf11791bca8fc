//! Engine strings
//!
//! Immutable UTF-8 strings with a precomputed content hash, shared by
//! reference counting. Strings never participate in cycles, so `Arc` is the
//! whole memory-management story; the GC does not trace them.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

/// An immutable, hash-caching string.
pub struct JsString {
    text: Box<str>,
    hash: u64,
}

impl JsString {
    /// Create a shared string from text.
    pub fn new(text: impl Into<Box<str>>) -> Arc<Self> {
        let text = text.into();
        let mut hasher = FxHasher::default();
        text.hash(&mut hasher);
        Arc::new(Self {
            hash: hasher.finish(),
            text,
        })
    }

    /// The string contents.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// True for the empty string.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Precomputed content hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        // Hash first: unequal hashes decide without a content scan.
        self.hash == other.hash && self.text == other.text
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.text)
    }
}

impl std::fmt::Display for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// A symbol: identity-keyed, optionally described.
#[derive(Debug)]
pub struct JsSymbol {
    /// Optional description for diagnostics.
    pub description: Option<String>,
    /// Unique id; equality and hashing use only this.
    pub id: u64,
}

impl JsSymbol {
    /// Create a fresh symbol with a unique id taken from `id`.
    pub fn new(id: u64, description: Option<String>) -> Arc<Self> {
        Arc::new(Self { description, id })
    }
}

impl PartialEq for JsSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JsSymbol {}

impl Hash for JsSymbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_content_equal_hash() {
        let a = JsString::new("hello");
        let b = JsString::new("hello");
        let c = JsString::new("world");
        assert_eq!(*a, *b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(*a, *c);
    }

    #[test]
    fn symbols_compare_by_id() {
        let a = JsSymbol::new(1, Some("desc".into()));
        let b = JsSymbol::new(1, None);
        let c = JsSymbol::new(2, Some("desc".into()));
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }
}
