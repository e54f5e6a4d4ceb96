//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, VecDeque};

use crate::address::Address;
use crate::debug::Debug;
use crate::diff::{diff, DiffFlags};
use crate::path::Path;

/// Per-destination alias history: a FIFO of distinct paths observed to
/// that destination, oldest at the front, plus the next alias id to
/// hand out.
struct Entry {
    paths: VecDeque<Path>,
    next_alias: i64,
}

impl Entry {
    fn new() -> Entry {
        Entry {
            paths: VecDeque::new(),
            next_alias: 0,
        }
    }

    /// Removes and returns the first stored path equal to `path` (no
    /// observable diff between them, once stars and length are settled),
    /// if any.
    fn find_remove(&mut self, path: &Path) -> Option<Path> {
        // Each candidate comparison diffs fresh clones of both sides:
        // `diff` mutates its arguments in place while fixing stars, and
        // a failed match against one stored entry must not leave those
        // fixes behind to bias the comparison against the next one.
        let pos = self.paths.iter().position(|stored| {
            let mut stored = stored.clone();
            let mut candidate = path.clone();
            diff(&mut stored, &mut candidate, alias_equality_flags()).is_empty()
        });
        pos.and_then(|idx| self.paths.remove(idx))
    }
}

/// Flags `PathDb` diffs paths with when deciding whether two
/// observations are "the same" route: star fixing and path extension
/// both enabled, matching `path.py`'s `Path.diff` default
/// (`flags=set([DIFF_FIX_STARS, DIFF_EXTEND])`), which `Path.__ne__`
/// relies on implicitly.
fn alias_equality_flags() -> DiffFlags {
    DiffFlags::FIX_STARS | DiffFlags::EXTEND
}

/// Assigns stable alias identifiers to distinct paths observed to the
/// same destination over time, so that repeated observations of the
/// "same" route (modulo star fixing and length differences) keep the
/// same id.
pub struct PathDb {
    entries: HashMap<Address, Entry>,
    capacity: Option<usize>,
}

impl PathDb {
    /// `capacity`: maximum number of distinct paths retained per
    /// destination before the oldest unmatched one is evicted. `None`
    /// means unbounded.
    pub fn new(capacity: Option<usize>) -> PathDb {
        PathDb {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Assigns `path.alias`, mutating `path` in place, and records a
    /// copy of it (or reuses the matching stored copy) in the history
    /// for `path.dst`.
    pub fn alias(&mut self, path: &mut Path) {
        let entry = self.entries.entry(path.dst).or_insert_with(Entry::new);
        match entry.find_remove(path) {
            Some(old) => {
                debug_assert!(old.alias >= 0);
                path.alias = old.alias;
                entry.paths.push_back(old);
            }
            None => {
                path.alias = entry.next_alias;
                entry.next_alias += 1;
                let mut stored = path.clone();
                stored.alias = path.alias;
                entry.paths.push_back(stored);
                if let Some(capacity) = self.capacity {
                    while entry.paths.len() > capacity {
                        entry.paths.pop_front();
                    }
                }
            }
        }
        Debug::PathAliased(path.dst, path.alias).log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    // Mirrors `path.py`'s `PathDBTester.test_1` literally.
    const PSTR1: &str = "1.1.1.1 11.11.11.11 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|3.3.3.3:0:0.00,0.00,0.00,0.00:|255.255.255.255:0:0.00,0.00,0.00,0.00:|5.5.5.5:0:0.00,0.00,0.00,0.00:|6.6.6.6:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:";
    const PSTR2: &str = "1.1.1.1 11.11.11.11 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|3.3.3.3:0:0.00,0.00,0.00,0.00:|4.4.4.4:0:0.00,0.00,0.00,0.00:|5.5.5.5:0:0.00,0.00,0.00,0.00:|6.6.6.6:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:";
    const PSTR3: &str = "1.1.1.1 11.11.11.11 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|13.13.13.13:0:0.00,0.00,0.00,0.00:|4.4.4.4:0:0.00,0.00,0.00,0.00:|5.5.5.5:0:0.00,0.00,0.00,0.00:|6.6.6.6:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:";
    const PSTR4: &str = "1.1.1.1 11.11.11.11 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|3.3.3.3:0:0.00,0.00,0.00,0.00:|14.14.14.14:0:0.00,0.00,0.00,0.00:|5.5.5.5:0:0.00,0.00,0.00,0.00:|6.6.6.6:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:";
    const PSTR5: &str = "1.1.1.1 11.11.11.11 1 2.2.2.2:0:0.00,0.00,0.00,0.00:|3.3.3.3:0:0.00,0.00,0.00,0.00:|4.4.4.4:0:0.00,0.00,0.00,0.00:|5.5.5.5:0:0.00,0.00,0.00,0.00:|255.255.255.255:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:";

    #[test]
    fn star_fixable_observations_keep_the_same_alias() {
        let mut db = PathDb::new(None);
        let mut p1 = p(PSTR1);
        let mut p2 = p(PSTR2);
        let mut p3 = p(PSTR3);
        let mut p5 = p(PSTR5);
        let mut p4 = p(PSTR4);

        db.alias(&mut p1);
        assert_eq!(p1.alias, 0);

        // p2 swaps p1's star (ttl 2) for a real address; star fixing
        // makes them the same route.
        db.alias(&mut p2);
        assert_eq!(p2.alias, 0);
        assert_eq!(p2.to_string(), PSTR2);

        // p3 has a different, non-star hop at ttl 1 - genuinely distinct.
        db.alias(&mut p3);
        assert_eq!(p3.alias, 1);
        assert_eq!(p1.to_string(), PSTR1);

        // p5 swaps p1's hop 4 (6.6.6.6) for a star instead - also
        // star-fixable, so it matches p1's alias.
        db.alias(&mut p5);
        assert_eq!(p5.alias, 0);
        assert_eq!(p1.to_string(), PSTR1);
        assert_eq!(p5.to_string(), PSTR5);

        // p4 has a distinct non-star hop at ttl 2 - a third route.
        db.alias(&mut p4);
        assert_eq!(p4.alias, 2);
    }

    #[test]
    fn capacity_evicts_oldest_unmatched_path() {
        const NALIASES: usize = 10;
        let mut db = PathDb::new(Some(NALIASES));
        for i in 0..NALIASES * 100 {
            let octets = (i as u32).to_be_bytes();
            let addr = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
            let line = format!(
                "1.1.1.1 11.11.11.11 1 {addr}:0:0.00,0.00,0.00,0.00:|11.11.11.11:0:0.00,0.00,0.00,0.00:"
            );
            let mut path = p(&line);
            db.alias(&mut path);
            assert_eq!(path.alias, i as i64);
        }
    }
}
