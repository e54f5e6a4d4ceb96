//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

use crate::address::Address;

// pathtrace debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    PathAliased(Address, i64),
    LczFound(Address, &'a crate::lcz::Lcz),
    LczBroken(Address),
    OverlapFound(Address, Address, usize),
}

// ===== impl Debug =====

impl<'a> Debug<'a> {
    pub(crate) fn log(&self) {
        match self {
            Debug::PathAliased(dst, alias) => {
                debug!(%dst, alias, "{}", self);
            }
            Debug::LczFound(dst, lcz) => {
                debug!(%dst, i1 = lcz.i1, j1 = lcz.j1, i2 = lcz.i2, j2 = lcz.j2, "{}", self);
            }
            Debug::LczBroken(dst) => {
                debug!(%dst, "{}", self);
            }
            Debug::OverlapFound(dst, overlap_dst, nshared) => {
                debug!(%dst, %overlap_dst, nshared, "{}", self);
            }
        }
    }
}

impl<'a> std::fmt::Display for Debug<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PathAliased(..) => write!(f, "path assigned alias"),
            Debug::LczFound(..) => write!(f, "path change detected"),
            Debug::LczBroken(..) => write!(f, "change zone rejected: branch or join hop missing"),
            Debug::OverlapFound(..) => write!(f, "overlapping destination found"),
        }
    }
}
