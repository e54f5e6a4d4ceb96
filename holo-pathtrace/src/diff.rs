//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;

use crate::error::invariant;
use crate::hop::Hop;
use crate::lcz::Lcz;
use crate::path::Path;

bitflags! {
    /// Policies controlling [`diff`]. Passed as a single bitset and
    /// branched on in one place, per design: these are not distinct
    /// strategies worth a trait hierarchy.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DiffFlags: u8 {
        /// Attempt to rewrite star hops into matching non-star hops
        /// before declaring a change.
        const FIX_STARS = 0x01;
        /// If no change was found but the two paths have different
        /// lengths, extend the shorter one with a copy of the longer
        /// one's remaining hops.
        const EXTEND = 0x02;
        /// Treat hops as equal when their interface address sets merely
        /// intersect, instead of requiring an exact match.
        const IGNORE_BALANCERS = 0x04;
        /// Refuse to fix a star hop whose matching source hop is
        /// load-balanced (more than one interface).
        const NO_FIX_BALANCER = 0x08;
    }
}

/// Compares `p1` (older) against `p2` (newer) to the same destination,
/// returning the ordered list of localized change zones between them.
///
/// Preconditions: `p1.dst == p2.dst` and `p1.tstamp <= p2.tstamp`.
///
/// When [`DiffFlags::FIX_STARS`] is set, star hops inside a candidate
/// change window may be rewritten in place on `p1` or `p2` to resolve
/// cosmetic differences; when [`DiffFlags::EXTEND`] is set and no change
/// was otherwise found, the shorter path is extended in place with a
/// copy of the longer path's remaining hops. Both rewrites run through
/// [`Path::check_reachability`], so `p1`/`p2` remain normalized.
pub fn diff(p1: &mut Path, p2: &mut Path, flags: DiffFlags) -> Vec<Lcz> {
    invariant!(p1.dst == p2.dst, "diff: paths target different destinations");
    invariant!(p1.tstamp <= p2.tstamp, "diff: p1 must not be newer than p2");

    let ignore_balancers = flags.contains(DiffFlags::IGNORE_BALANCERS);
    let mut changes = Vec::new();
    let mut i1 = 0usize;
    let mut i2 = 0usize;

    while i1 < p1.len() && i2 < p2.len() {
        if Hop::equal(&p1.hops()[i1], &p2.hops()[i2], ignore_balancers) {
            i1 += 1;
            i2 += 1;
            continue;
        }

        let (j1, j2) = find_join(p1, p2, i1, i2, ignore_balancers);
        let (i1n, i2n, j1n, j2n) = if flags.contains(DiffFlags::FIX_STARS) {
            fix_stars(p1, p2, i1, i2, j1, j2, flags)
        } else {
            (i1, i2, j1, j2)
        };

        if j1n > i1n || j2n > i2n {
            changes.push(Lcz::new(i1n, i2n, j1n, j2n));
        }
        i1 = j1n;
        i2 = j2n;
    }

    if changes.is_empty() && flags.contains(DiffFlags::EXTEND) {
        invariant!(i1 == i2, "diff: extend requires both cursors at the same position");
        extend(p1, p2, i1);
    } else if i1 != p1.len() || i2 != p2.len() {
        changes.push(Lcz::new(i1, i2, p1.len(), p2.len()));
    }
    changes
}

/// Earliest pair `(j1, j2)` such that a non-star hop at `j2` in `p2`
/// equals some non-star hop at `j1 >= i1` in `p1`, under the given
/// equality mode. `(len(p1), len(p2))` if no such join exists.
fn find_join(
    p1: &Path,
    p2: &Path,
    i1: usize,
    i2: usize,
    ignore_balancers: bool,
) -> (usize, usize) {
    for j2 in i2..p2.len() {
        let hop2 = &p2.hops()[j2];
        if hop2.is_star() {
            continue;
        }
        for j1 in i1..p1.len() {
            let hop1 = &p1.hops()[j1];
            if Hop::equal(hop1, hop2, ignore_balancers) {
                return (j1, j2);
            }
        }
    }
    invariant!(
        !ignore_balancers || !p1.is_reachable() || !p2.is_reachable(),
        "diff: no join found between two reachable paths under ignore_balancers"
    );
    (p1.len(), p2.len())
}

/// Attempts to rewrite one star hop, at `(ttl1, ttl2)`, into the
/// matching non-star hop. `j1`/`j2` are the window's far boundary, used
/// to tell whether the would-be fix sits at the last position.
fn fix_one_hop(
    p1: &mut Path,
    p2: &mut Path,
    ttl1: usize,
    ttl2: usize,
    j1: usize,
    j2: usize,
    flags: DiffFlags,
) -> bool {
    let h1_star = p1.hops()[ttl1].is_star();
    let h2_star = p2.hops()[ttl2].is_star();
    if h1_star && h2_star {
        return true;
    }
    if !h1_star && !h2_star {
        return false;
    }

    if h1_star {
        let source = p2.hops()[ttl2].clone();
        try_fix(p1, ttl1, j1, &source, flags)
    } else {
        let source = p1.hops()[ttl1].clone();
        try_fix(p2, ttl2, j2, &source, flags)
    }
}

fn try_fix(
    target: &mut Path,
    star_idx: usize,
    star_j: usize,
    source: &Hop,
    flags: DiffFlags,
) -> bool {
    if flags.contains(DiffFlags::NO_FIX_BALANCER) && source.ifaces().len() > 1 {
        return false;
    }

    let source_addr = source.first_address();
    // Refuse if the source's address already appears somewhere else in
    // the target path - fixing would introduce a fake loop.
    if target.hops().iter().any(|hop| hop.contains(source_addr)) {
        return false;
    }
    // Refuse to fix the destination into a non-terminal position.
    if source_addr == target.dst && star_idx + 1 != star_j {
        return false;
    }

    target.hops_mut()[star_idx] = source.clone();
    true
}

/// Star fixing scans inward from both ends of `[i1, j1) x [i2, j2)`
/// independently, rewriting matched star/non-star pairs until a
/// non-matching, non-fixable pair stops that side's scan.
fn fix_stars(
    p1: &mut Path,
    p2: &mut Path,
    i1: usize,
    i2: usize,
    j1: usize,
    j2: usize,
    flags: DiffFlags,
) -> (usize, usize, usize, usize) {
    let threshold = std::cmp::min(j1 - i1, j2 - i2);

    let mut near = 0;
    while near < threshold {
        if !fix_one_hop(p1, p2, i1 + near, i2 + near, j1, j2, flags) {
            break;
        }
        near += 1;
    }
    let i1 = i1 + near;
    let i2 = i2 + near;
    let remaining = threshold - near;

    let mut far = 0;
    while far < remaining {
        let t1 = j1 - far - 1;
        let t2 = j2 - far - 1;
        if !fix_one_hop(p1, p2, t1, t2, j1, j2, flags) {
            break;
        }
        far += 1;
    }
    let j1 = j1 - far;
    let j2 = j2 - far;

    invariant!(i1 <= j1, "fix_stars: window inverted on p1 side");
    invariant!(i2 <= j2, "fix_stars: window inverted on p2 side");

    p1.check_reachability();
    p2.check_reachability();

    (i1, i2, j1, j2)
}

/// Extends the shorter of the two paths in place with a copy of the
/// longer path's hops from `i` onward.
fn extend(p1: &mut Path, p2: &mut Path, i: usize) {
    invariant!(
        i == p1.len() || i == p2.len(),
        "diff: extend called away from an end of either path"
    );
    if p1.len() < p2.len() {
        let extra: Vec<Hop> = p2.hops()[i..].to_vec();
        p1.hops_mut().extend(extra);
        p1.check_reachability();
    } else if p2.len() < p1.len() {
        let extra: Vec<Hop> = p1.hops()[i..].to_vec();
        p2.hops_mut().extend(extra);
        p2.check_reachability();
    }
}

/// Whether, at `ttl` only, `p1` vs `p2` presents an observable change.
pub fn detects_change(p1: &Path, p2: &Path, ttl: usize, ignore_balancers: bool) -> bool {
    invariant!(ttl <= p1.len(), "detects_change: ttl beyond p1");
    if ttl == p1.len() {
        invariant!(
            !p1.is_reachable(),
            "detects_change: ttl == len(p1) requires p1 to be unreachable"
        );
        if ttl >= p2.len() && !p2.is_reachable() {
            return false;
        } else if ttl < p2.len() && p2.hops()[ttl].is_star() {
            return false;
        }
        return true;
    }

    let hop1 = &p1.hops()[ttl];
    if ttl >= p2.len() {
        if !p2.is_reachable() {
            return true;
        } else if hop1.contains(p2.dst) {
            return false;
        }
        return true;
    }

    let hop2 = &p2.hops()[ttl];
    if hop2.is_star() {
        return false;
    } else if hop1.is_star() && p1.hop_ttl(hop2, ignore_balancers) != -1 {
        return true;
    }

    !Hop::equal(hop1, hop2, ignore_balancers)
}

/// Walks the non-star hops of `p2`; true if any of them appears in `p1`
/// at a strictly decreasing index compared to the last seen one.
pub fn inversion(p1: &Path, p2: &Path, ignore_balancers: bool) -> bool {
    let mut marker: i64 = -1;
    for hop in p2.hops() {
        if hop.is_star() {
            continue;
        }
        let ttl = p1.hop_ttl(hop, ignore_balancers);
        if ttl == -1 {
            continue;
        }
        if ttl < marker {
            return true;
        }
        marker = ttl;
    }
    false
}
