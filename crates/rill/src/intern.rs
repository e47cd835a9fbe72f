//! String interning for identifiers and literals.
//!
//! The interner stores unique strings in a vector and hands out `u32`-backed
//! ids for cheap storage and comparison. It is populated during lexing and
//! compilation; the finished table travels with the bytecode so the VM can
//! resolve ids back to text for error messages and rendering.

use ahash::AHashMap;

/// Index into the string interner's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Reconstructs a StringId from a bytecode operand.
    #[inline]
    #[must_use]
    pub(crate) fn from_index(index: u16) -> Self {
        Self(u32::from(index))
    }

    /// The raw index value.
    #[inline]
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The intern table.
///
/// The reverse lookup map is only needed while interning new strings (during
/// compilation), so it is skipped on serialization and left empty after
/// deserialization; a deserialized table is read-only.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Interns {
    strings: Vec<Box<str>>,
    #[serde(skip)]
    lookup: AHashMap<Box<str>, u32>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the existing id if it was seen before.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return StringId(id);
        }
        let id = u32::try_from(self.strings.len()).expect("intern table exceeds u32 range");
        self.strings.push(s.into());
        self.lookup.insert(s.into(), id);
        StringId(id)
    }

    /// Resolves an id back to its text.
    ///
    /// # Panics
    /// Panics if the id does not belong to this table.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedups() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("world");
        let c = interns.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interns.get(a), "hello");
        assert_eq!(interns.get(b), "world");
    }
}
