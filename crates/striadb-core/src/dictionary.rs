//! Term dictionaries for CATEGORY and TEXT columns.
//!
//! The evaluator only ever sees 32-bit identifiers; the mapping between
//! identifiers and terms is a separate owned artifact persisted in a `.dic`
//! sidecar next to the column. The core treats the blob opaquely beyond
//! this module.

use crate::error::Result;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Interned id ↔ term mapping.
#[derive(Debug, Default)]
pub struct Dictionary {
    terms: Vec<String>,
    lookup: FxHashMap<String, u32>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Returns true when no term is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Interns a term, returning its id. An existing term keeps its id.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, term: &str) -> u32 {
        if let Some(&id) = self.lookup.get(term) {
            return id;
        }
        let id = self.terms.len() as u32;
        self.terms.push(term.to_string());
        self.lookup.insert(term.to_string(), id);
        id
    }

    /// Looks up the id of a term without interning.
    #[must_use]
    pub fn id(&self, term: &str) -> Option<u32> {
        self.lookup.get(term).copied()
    }

    /// Looks up the term of an id.
    #[must_use]
    pub fn term(&self, id: u32) -> Option<&str> {
        self.terms.get(id as usize).map(String::as_str)
    }

    /// Loads a dictionary from a `.dic` sidecar.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a serialization
    /// error for a malformed blob.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let terms: Vec<String> = bincode::deserialize_from(BufReader::new(file))?;
        let lookup = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), u32::try_from(i).unwrap_or(u32::MAX)))
            .collect();
        Ok(Self { terms, lookup })
    }

    /// Writes the dictionary to a `.dic` sidecar.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error on failure.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &self.terms)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut dic = Dictionary::new();
        let a = dic.intern("red");
        let b = dic.intern("green");
        assert_eq!(dic.intern("red"), a);
        assert_ne!(a, b);
        assert_eq!(dic.len(), 2);
        assert_eq!(dic.term(b), Some("green"));
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.dic");
        let mut dic = Dictionary::new();
        dic.intern("x");
        dic.intern("y");
        dic.write(&path).unwrap();

        let back = Dictionary::read(&path).unwrap();
        assert_eq!(back.id("y"), Some(1));
        assert_eq!(back.len(), 2);
    }
}
