//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::fmt;

use crate::address::Address;
use crate::error::{invariant, ParseError};
use crate::interface::Interface;

/// An ordered collection of [`Interface`]s observed at one TTL.
///
/// A hop is a *star hop* when it contains exactly one interface whose
/// address is [`Address::STAR`]; it holds only non-star interfaces
/// otherwise. Interfaces are kept sorted ascending by address.
///
/// Two notions of equality coexist on purpose (set equality and
/// non-empty-intersection, selected via `ignore_balancers`), so `Hop`
/// deliberately does not implement `PartialEq`/`Eq` — callers must pick a
/// mode through [`Hop::equal`].
#[derive(Clone, Debug)]
pub struct Hop {
    pub ttl: u8,
    ifaces: Vec<Interface>,
}

impl Hop {
    pub fn new(ttl: u8, mut ifaces: Vec<Interface>) -> Hop {
        ifaces.sort();
        Hop { ttl, ifaces }
    }

    pub fn star(ttl: u8) -> Hop {
        Hop::new(ttl, vec![Interface::new(Address::STAR, ttl)])
    }

    pub fn ifaces(&self) -> &[Interface] {
        &self.ifaces
    }

    /// Parses `<iface>;<iface>;...`.
    pub fn parse(token: &str, ttl: u8) -> Result<Hop, ParseError> {
        let ifaces = token
            .split(';')
            .map(|t| Interface::parse(t, ttl))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Hop::new(ttl, ifaces))
    }

    pub fn contains(&self, address: Address) -> bool {
        self.ifaces.iter().any(|iface| iface.address == address)
    }

    pub fn is_star(&self) -> bool {
        self.ifaces.len() == 1 && self.ifaces[0].address == Address::STAR
    }

    /// Moves the interface with the given address to the front.
    ///
    /// # Panics
    ///
    /// Panics if `address` is not present in this hop.
    pub fn set_first(&mut self, address: Address) {
        let pos = self
            .ifaces
            .iter()
            .position(|iface| iface.address == address);
        invariant!(pos.is_some(), "set_first: address not present in hop");
        let pos = pos.unwrap();
        if pos != 0 {
            let iface = self.ifaces.remove(pos);
            self.ifaces.insert(0, iface);
        }
    }

    pub fn first_address(&self) -> Address {
        self.ifaces[0].address
    }

    /// Equality under one of two modes: a strict set equality of
    /// addresses, or (when `ignore_balancers` is set) a non-empty
    /// intersection of addresses - used to coalesce per-flow
    /// load-balancing differences.
    pub fn equal(h1: &Hop, h2: &Hop, ignore_balancers: bool) -> bool {
        let addrs1: HashSet<Address> =
            h1.ifaces.iter().map(|i| i.address).collect();
        let addrs2: HashSet<Address> =
            h2.ifaces.iter().map(|i| i.address).collect();
        if ignore_balancers {
            !addrs1.is_disjoint(&addrs2)
        } else {
            addrs1 == addrs2
        }
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .ifaces
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");
        write!(f, "{}", parts)
    }
}
