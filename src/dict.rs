//! Single-byte substitution table for repeated strings and keys.
//!
//! A [`Dictionary`] maps up to 256 words onto one-byte indices. The encoder
//! swaps any string or key that exactly matches an entry for its index and the
//! decoder swaps it back, so both ends of a connection must hold an identical
//! table. The table is never transmitted; agreeing on it is the job of
//! whatever sets the connection up.
//!
//! # Layout
//!
//! Application words take indices `0..n` in the order supplied. The protocol
//! keywords in [`RESERVED_WORDS`] follow, skipping any the application already
//! listed and any that no longer fit.
//!
//! # Lookup
//!
//! Each entry carries a rank built from its length and its first and last
//! bytes. Lookups binary search a rank-ordered index and then compare only the
//! handful of entries sharing that rank.
use log::trace;

use crate::error::{OpoError, Result};

/// Largest number of entries a table can hold.
pub const MAX_ENTRIES: usize = 256;

/// Longest word an entry may hold, in bytes.
pub const MAX_WORD_LEN: usize = 255;

/// Keywords the protocol itself uses in queries and responses.
pub const RESERVED_WORDS: &[&str] = &[
    "code", "error", "ref", "rid", "where", "select", "insert", "update", "delete", "limit",
    "kind", "results",
];

#[derive(Debug, Clone)]
struct Entry {
    rank: u32,
    word: String,
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: Vec<Entry>,
    /// Entry indices ordered by `(rank, index)`.
    by_rank: Vec<u8>,
}

fn rank(word: &[u8]) -> u32 {
    match word {
        [] => 0,
        [first, .., last] => (word.len() as u32) << 16 | (*first as u32) << 8 | *last as u32,
        [only] => 1 << 16 | (*only as u32) << 8 | *only as u32,
    }
}

impl Dictionary {
    /// Builds a table from application words followed by the reserved
    /// keywords.
    ///
    /// # Errors
    ///
    /// [`OpoError::Overflow`] if a word is longer than [`MAX_WORD_LEN`] bytes
    /// or more than [`MAX_ENTRIES`] words are supplied.
    pub fn new<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<Entry> = Vec::new();

        for word in words {
            let word = word.as_ref();
            if word.len() > MAX_WORD_LEN {
                return Err(OpoError::Overflow(format!(
                    "dictionary entries must be no longer than {MAX_WORD_LEN} bytes, '{word}' is {}",
                    word.len()
                )));
            }
            if entries.len() >= MAX_ENTRIES {
                return Err(OpoError::Overflow(format!(
                    "dictionary is limited to {MAX_ENTRIES} entries"
                )));
            }
            entries.push(Entry {
                rank: rank(word.as_bytes()),
                word: word.to_string(),
            });
        }

        for word in RESERVED_WORDS {
            if entries.len() >= MAX_ENTRIES {
                trace!("dictionary full, reserved word '{word}' dropped");
                continue;
            }
            if entries.iter().any(|e| e.word == *word) {
                continue;
            }
            entries.push(Entry {
                rank: rank(word.as_bytes()),
                word: word.to_string(),
            });
        }

        let mut by_rank: Vec<u8> = (0..entries.len()).map(|i| i as u8).collect();
        by_rank.sort_by_key(|&i| (entries[i as usize].rank, i));

        Ok(Self { entries, by_rank })
    }

    /// Index of the entry matching `word` exactly, lowest index first.
    pub fn index_of(&self, word: &str) -> Option<u8> {
        let r = rank(word.as_bytes());
        let start = self
            .by_rank
            .partition_point(|&i| self.entries[i as usize].rank < r);

        self.by_rank[start..]
            .iter()
            .take_while(|&&i| self.entries[i as usize].rank == r)
            .find(|&&i| self.entries[i as usize].word == word)
            .copied()
    }

    pub fn word_at(&self, index: u8) -> Option<&str> {
        self.entries.get(index as usize).map(|e| e.word.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Words in index order.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.word.as_str())
    }
}
