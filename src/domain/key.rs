//! Match identity across polling cycles.
//!
//! The provider gives no id that is guaranteed stable between calls, so the
//! join key is derived from team names and league. Spelling drift on the
//! provider side produces a different key; that is an accepted limitation.

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// Stable, case-insensitive identity of a match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchKey(String);

impl MatchKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-derived key, e.g. one read back from disk.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the key for `home` vs `away` in `league`.
///
/// Pure and total: lowercases, trims, and collapses inner whitespace runs to a
/// single space. A `|` or `\` inside a name is backslash-escaped so the three
/// parts stay unambiguous.
pub fn derive_key(home: &str, away: &str, league: &str) -> MatchKey {
    let mut key = String::with_capacity(home.len() + away.len() + league.len() + 2);
    push_normalized(&mut key, home);
    key.push(SEPARATOR);
    push_normalized(&mut key, away);
    key.push(SEPARATOR);
    push_normalized(&mut key, league);
    MatchKey(key)
}

fn push_normalized(out: &mut String, part: &str) {
    let mut first = true;
    for word in part.split_whitespace() {
        if !first {
            out.push(' ');
        }
        first = false;
        for ch in word.chars().flat_map(char::to_lowercase) {
            if ch == SEPARATOR || ch == ESCAPE {
                out.push(ESCAPE);
            }
            out.push(ch);
        }
    }
}
