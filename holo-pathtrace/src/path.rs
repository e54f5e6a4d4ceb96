//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;

use crate::address::Address;
use crate::error::ParseError;
use crate::hop::Hop;
use crate::interface::Interface;
use crate::loader::Timestamped;

bitflags! {
    /// Path-level status bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PathFlags: u8 {
        /// The destination is not contained in the last hop (after
        /// trimming any trailing star hops). The path does not reach it.
        const NO_REACHABILITY = 0x01;
    }
}

/// An ordered sequence of hops observed from `src` to `dst` at `tstamp`.
///
/// Paths auto-normalize at construction and after any in-place hop
/// rewrite: trailing star hops are trimmed, and [`PathFlags::NO_REACHABILITY`]
/// is set or cleared depending on whether the (possibly trimmed) last hop
/// contains `dst`.
#[derive(Clone, Debug)]
pub struct Path {
    pub src: Address,
    pub dst: Address,
    pub tstamp: i64,
    hops: Vec<Hop>,
    pub flags: PathFlags,
    pub alias: i64,
}

impl Path {
    pub fn new(src: Address, dst: Address, tstamp: i64, hops: Vec<Hop>) -> Path {
        let mut path = Path {
            src,
            dst,
            tstamp,
            hops,
            flags: PathFlags::empty(),
            alias: -1,
        };
        path.check_reachability();
        path
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn is_reachable(&self) -> bool {
        !self.flags.contains(PathFlags::NO_REACHABILITY)
    }

    /// Re-runs construction-time normalization. Must be called after any
    /// in-place hop rewrite (star fixing is the only such place).
    pub(crate) fn check_reachability(&mut self) {
        self.remove_star_tail();
        if self.hops.is_empty() || !self.hops.last().unwrap().contains(self.dst) {
            self.flags.insert(PathFlags::NO_REACHABILITY);
        } else {
            self.flags.remove(PathFlags::NO_REACHABILITY);
            self.hops.last_mut().unwrap().set_first(self.dst);
        }
    }

    fn remove_star_tail(&mut self) {
        while matches!(self.hops.last(), Some(hop) if hop.is_star()) {
            self.hops.pop();
        }
    }

    pub(crate) fn hops_mut(&mut self) -> &mut Vec<Hop> {
        &mut self.hops
    }

    /// Returns the hop at `ttl`, saturating past the end of the path: if
    /// `ttl >= len` and the path has no reachability, returns `None`;
    /// otherwise returns the last hop.
    pub fn hop_at(&self, ttl: usize) -> Option<&Hop> {
        match self.hops.get(ttl) {
            Some(hop) => Some(hop),
            None if self.flags.contains(PathFlags::NO_REACHABILITY) => None,
            None => self.hops.last(),
        }
    }

    /// Index of the first hop equal to `hop` under the given equality
    /// mode, or `-1` if none matches. Undefined for star hops.
    pub fn hop_ttl(&self, hop: &Hop, ignore_balancers: bool) -> i64 {
        debug_assert!(!hop.is_star());
        for (i, candidate) in self.hops.iter().enumerate() {
            if Hop::equal(candidate, hop, ignore_balancers) {
                return i as i64;
            }
        }
        -1
    }

    pub fn contains_hop(&self, hop: &Hop) -> bool {
        self.hop_ttl(hop, false) != -1
    }

    /// Union of interfaces across non-star hops.
    pub fn interfaces(&self) -> HashSet<Interface> {
        let mut out = HashSet::new();
        for hop in &self.hops {
            if hop.is_star() {
                continue;
            }
            out.extend(hop.ifaces().iter().cloned());
        }
        out
    }

    /// Scans left to right; non-star single-interface hops are committed
    /// to the "confirmed" set only after being seen, while load-balanced
    /// hops (more than one interface) are held back until the next
    /// unbalanced hop, though they are still checked for intersection
    /// against what's already confirmed.
    pub fn has_loop(&self) -> bool {
        let mut confirmed: HashSet<Address> = HashSet::new();
        let mut balancer: HashSet<Address> = HashSet::new();
        for hop in &self.hops {
            if hop.is_star() {
                continue;
            }
            let addrs: HashSet<Address> =
                hop.ifaces().iter().map(|i| i.address).collect();
            if !confirmed.is_disjoint(&addrs) {
                return true;
            }
            if hop.ifaces().len() == 1 {
                confirmed.extend(balancer.drain());
                confirmed.extend(addrs);
            } else {
                balancer.extend(addrs);
            }
        }
        false
    }

    /// Parses `<src> <dst> <tstamp> <hop>|<hop>|...` (the hops list may be
    /// absent, meaning an empty path).
    pub fn parse(line: &str) -> Result<Path, ParseError> {
        let mut fields = line.split_whitespace();
        let src = fields
            .next()
            .ok_or_else(|| ParseError::MalformedPath(line.to_owned()))?;
        let dst = fields
            .next()
            .ok_or_else(|| ParseError::MalformedPath(line.to_owned()))?;
        let tstamp = fields
            .next()
            .ok_or_else(|| ParseError::MalformedPath(line.to_owned()))?;
        let hopstr = fields.next();
        if fields.next().is_some() {
            return Err(ParseError::MalformedPath(line.to_owned()));
        }

        let src = src
            .parse::<Address>()
            .map_err(|_| ParseError::MalformedPath(line.to_owned()))?;
        let dst = dst
            .parse::<Address>()
            .map_err(|_| ParseError::MalformedPath(line.to_owned()))?;
        let tstamp = tstamp
            .parse::<i64>()
            .map_err(|_| ParseError::MalformedPath(line.to_owned()))?;

        let hops = match hopstr {
            None | Some("") => Vec::new(),
            Some(hopstr) => hopstr
                .split('|')
                .enumerate()
                .map(|(ttl, token)| Hop::parse(token, ttl as u8))
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Path::new(src, dst, tstamp, hops))
    }
}

impl Timestamped for Path {
    fn tstamp(&self) -> i64 {
        self.tstamp
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.src, self.dst, self.tstamp)?;
        if !self.hops.is_empty() {
            let hopstr = self
                .hops
                .iter()
                .map(|h| h.to_string())
                .collect::<Vec<_>>()
                .join("|");
            write!(f, " {}", hopstr)?;
        }
        Ok(())
    }
}
