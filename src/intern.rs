//! String interning shared by every pass of a compilation.
//!
//! The lexer interns identifier and string-literal text as it scans; every
//! later pass (parser, semantic analyzer, IR builder, code generator) only
//! ever carries a [`StringId`] around, not an owned `String`. Per §5 of the
//! spec, access is strictly serial within one compilation so no locking is
//! needed: the lexer is the only writer, everyone else reads.

use ahash::AHashMap;

/// Index into the string table.
///
/// `u32`-backed to keep identifiers, AST nodes, and IR values cheap to copy
/// and to keep side tables (`NodeId -> SymbolId` etc.) small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs a `StringId` from a raw bytecode operand.
    #[inline]
    #[must_use]
    pub fn from_index(index: u16) -> Self {
        Self(u32::from(index))
    }
}

/// Append-only string interner.
///
/// Owned by a single [`crate::Compilation`] for its whole lifetime. The
/// lexer interns as it produces tokens; every later pass only reads.
#[derive(Debug, Default)]
pub struct StringTable {
    by_text: AHashMap<Box<str>, StringId>,
    texts: Vec<Box<str>>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text`, returning the existing id if already present.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.by_text.get(text) {
            return id;
        }
        let id = StringId(u32::try_from(self.texts.len()).expect("string table overflow"));
        self.texts.push(text.into());
        self.by_text.insert(text.into(), id);
        id
    }

    /// Looks up the text for an id.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this table — an internal invariant
    /// violation, not a recoverable compile error.
    #[inline]
    #[must_use]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.texts[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_deduplicated() {
        let mut table = StringTable::new();
        let a = table.intern("hello");
        let b = table.intern("hello");
        let c = table.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.resolve(a), "hello");
        assert_eq!(table.resolve(c), "world");
    }
}
