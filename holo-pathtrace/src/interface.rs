//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::address::Address;
use crate::error::ParseError;

/// Round-trip time summary attached to an interface reply, as reported by
/// a traceroute-style probe.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rtt {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub var: f64,
}

impl fmt::Display for Rtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2},{:.2},{:.2},{:.2}", self.min, self.avg, self.max, self.var)
    }
}

/// A single responsive reply observed at some TTL.
///
/// Equality and hashing are defined by [`Interface::address`] alone, per
/// the data model: flow identifiers and RTT summaries distinguish
/// *measurements* of the same interface, not the interface's identity.
#[derive(Clone, Debug)]
pub struct Interface {
    pub address: Address,
    pub ttl: u8,
    pub flowids: BTreeSet<u32>,
    pub flags: String,
    pub rtt: Rtt,
}

impl Interface {
    pub fn new(address: Address, ttl: u8) -> Interface {
        Interface {
            address,
            ttl,
            flowids: BTreeSet::new(),
            flags: String::new(),
            rtt: Rtt::default(),
        }
    }

    /// Parses `<ip>:<flowids>:<rttmin,avg,max,var>:<flags>`.
    pub fn parse(token: &str, ttl: u8) -> Result<Interface, ParseError> {
        let mut fields = token.split(':');
        let ip = fields
            .next()
            .ok_or_else(|| ParseError::MalformedToken(token.to_owned()))?;
        let flowids = fields
            .next()
            .ok_or_else(|| ParseError::MalformedToken(token.to_owned()))?;
        let rtts = fields
            .next()
            .ok_or_else(|| ParseError::MalformedToken(token.to_owned()))?;
        let flags = fields
            .next()
            .ok_or_else(|| ParseError::MalformedToken(token.to_owned()))?;
        if fields.next().is_some() {
            return Err(ParseError::MalformedToken(token.to_owned()));
        }

        let address = Address::from_str(ip)
            .map_err(|_| ParseError::MalformedToken(token.to_owned()))?;

        let flowids = if flowids.is_empty() {
            BTreeSet::new()
        } else {
            flowids
                .split(',')
                .map(|f| {
                    f.parse::<u32>()
                        .map_err(|_| ParseError::MalformedToken(token.to_owned()))
                })
                .collect::<Result<BTreeSet<u32>, ParseError>>()?
        };

        let mut rtt_fields = rtts.split(',');
        let mut next_f64 = || -> Result<f64, ParseError> {
            rtt_fields
                .next()
                .ok_or_else(|| ParseError::MalformedToken(token.to_owned()))?
                .parse::<f64>()
                .map_err(|_| ParseError::MalformedToken(token.to_owned()))
        };
        let rtt = Rtt {
            min: next_f64()?,
            avg: next_f64()?,
            max: next_f64()?,
            var: next_f64()?,
        };
        if rtt_fields.next().is_some() {
            return Err(ParseError::MalformedToken(token.to_owned()));
        }

        Ok(Interface {
            address,
            ttl,
            flowids,
            flags: flags.to_owned(),
            rtt,
        })
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Interface {}

impl Hash for Interface {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for Interface {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interface {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flowids = self
            .flowids
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}:{}:{}:{}", self.address, flowids, self.rtt, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interface_token() {
        let iface =
            Interface::parse("2.2.2.2:1,2:1.00,2.00,3.00,0.50:L", 1).unwrap();
        assert_eq!(iface.address, "2.2.2.2".parse().unwrap());
        assert_eq!(iface.flowids.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(iface.flags, "L");
        assert_eq!(iface.rtt.avg, 2.00);
    }

    #[test]
    fn parses_empty_flowids() {
        let iface =
            Interface::parse("2.2.2.2::0.00,0.00,0.00,0.00:", 1).unwrap();
        assert!(iface.flowids.is_empty());
        assert_eq!(iface.flags, "");
    }

    #[test]
    fn equality_ignores_flowids_and_rtt() {
        let a = Interface::parse("2.2.2.2:1:1.0,1.0,1.0,1.0:X", 1).unwrap();
        let b = Interface::parse("2.2.2.2:2:9.0,9.0,9.0,9.0:Y", 5).unwrap();
        assert_eq!(a, b);
    }
}
