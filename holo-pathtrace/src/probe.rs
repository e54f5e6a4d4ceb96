//
// Copyright (c) The holo-pathtrace Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::error::ParseError;
use crate::loader::Timestamped;

/// A single probe reply observed at some TTL toward `dst`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub tstamp: i64,
    pub dst: Address,
    pub ttl: u8,
    pub flowid: u32,
    pub ip: Address,
    pub detection: bool,
}

impl Probe {
    pub fn new(tstamp: i64, dst: Address, ttl: u8, flowid: u32, ip: Address, detection: bool) -> Probe {
        Probe { tstamp, dst, ttl, flowid, ip, detection }
    }

    /// Parses `<tstamp>|<dst>|<ttl>|<flowid>|<ip>|<detection>`.
    pub fn parse(line: &str) -> Result<Probe, ParseError> {
        let line = line.trim_end_matches('\n');
        let mut fields = line.split('|');
        let mut next = || fields.next().ok_or_else(|| ParseError::MalformedProbe(line.to_owned()));

        let tstamp = next()?
            .parse::<i64>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let dst = Address::from_str(next()?)
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let ttl = next()?
            .parse::<u8>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let flowid = next()?
            .parse::<u32>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let ip = Address::from_str(next()?)
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let detection = match next()? {
            "True" => true,
            "False" => false,
            other => return Err(ParseError::MalformedProbe(other.to_owned())),
        };
        if fields.next().is_some() {
            return Err(ParseError::MalformedProbe(line.to_owned()));
        }

        Ok(Probe { tstamp, dst, ttl, flowid, ip, detection })
    }

    /// Parses the legacy TON dataset format: a `#`-prefixed,
    /// whitespace-separated line `# <match|change> <tstamp> <dst> <ttl>
    /// <flowid> <ip>`, as produced by the first DTrack tool written in
    /// Python.
    pub fn parse_legacy_ton(line: &str) -> Result<Probe, ParseError> {
        let line = line.trim_end_matches('\n');
        if !line.starts_with('#') {
            return Err(ParseError::MalformedProbe(line.to_owned()));
        }
        let mut fields = line.split_whitespace();
        fields.next(); // the leading '#' token.
        let mut next = || fields.next().ok_or_else(|| ParseError::MalformedProbe(line.to_owned()));

        let detection = match next()? {
            "change" => true,
            "match" => false,
            _ => return Err(ParseError::MalformedProbe(line.to_owned())),
        };
        let tstamp = next()?
            .parse::<i64>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let dst = Address::from_str(next()?)
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let ttl = next()?
            .parse::<u8>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let flowid = next()?
            .parse::<u32>()
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;
        let ip = Address::from_str(next()?)
            .map_err(|_| ParseError::MalformedProbe(line.to_owned()))?;

        Ok(Probe { tstamp, dst, ttl, flowid, ip, detection })
    }
}

impl Timestamped for Probe {
    fn tstamp(&self) -> i64 {
        self.tstamp
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.tstamp,
            self.dst,
            self.ttl,
            self.flowid,
            self.ip,
            if self.detection { "True" } else { "False" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_probe_line() {
        let probe = Probe::parse("10|11.11.11.11|5|42|2.2.2.2|True").unwrap();
        assert_eq!(probe.tstamp, 10);
        assert_eq!(probe.ttl, 5);
        assert_eq!(probe.flowid, 42);
        assert!(probe.detection);

        let probe = Probe::parse("10|11.11.11.11|5|42|2.2.2.2|False").unwrap();
        assert!(!probe.detection);
    }

    #[test]
    fn rejects_non_boolean_detection_token() {
        assert!(Probe::parse("10|11.11.11.11|5|42|2.2.2.2|0").is_err());
    }

    #[test]
    fn parses_legacy_ton_line() {
        let probe = Probe::parse_legacy_ton("# change 10 11.11.11.11 5 42 2.2.2.2").unwrap();
        assert_eq!(probe.tstamp, 10);
        assert_eq!(probe.dst, "11.11.11.11".parse().unwrap());
        assert!(probe.detection);

        let probe = Probe::parse_legacy_ton("# match 11 11.11.11.11 5 42 2.2.2.2").unwrap();
        assert!(!probe.detection);
    }

    #[test]
    fn rejects_legacy_line_without_hash_prefix() {
        assert!(Probe::parse_legacy_ton("change 10 11.11.11.11 5 42 2.2.2.2").is_err());
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let probe = Probe::new(1, "11.11.11.11".parse().unwrap(), 2, 3, "4.4.4.4".parse().unwrap(), false);
        let reparsed = Probe::parse(&probe.to_string()).unwrap();
        assert_eq!(probe, reparsed);
    }
}
