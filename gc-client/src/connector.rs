//! `module:port` connector addressing.
//!
//! A [`Connector`] identifies a physical I/O on a GC-family device, e.g.
//! `1:1` (module 1, port 1). It appears in `sendir`/`stopir`/`get_IR` and
//! friends, and in `busyIR`/`stopir` device replies.

use std::fmt;
use std::str::FromStr;

/// A `module:port` pair, e.g. `1:2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Connector {
    pub module: u16,
    pub port: u16,
}

impl Connector {
    pub fn new(module: u16, port: u16) -> Self {
        Self { module, port }
    }

    /// Parse a leading `module:port` token from `s`, returning the connector
    /// and the remainder of the string after it (not including a separator).
    pub fn parse_leading(s: &str) -> Option<(Self, &str)> {
        let (token, rest) = match s.find(',') {
            Some(idx) => (&s[..idx], &s[idx..]),
            None => (s, ""),
        };
        let connector = token.parse().ok()?;
        Some((connector, rest))
    }
}

impl FromStr for Connector {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, port) = s.split_once(':').ok_or(())?;
        Ok(Self {
            module: module.parse().map_err(|_| ())?,
            port: port.parse().map_err(|_| ())?,
        })
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let c = Connector::new(1, 2);
        assert_eq!(c.to_string(), "1:2");
        assert_eq!("1:2".parse::<Connector>().unwrap(), c);
    }

    #[test]
    fn invalid() {
        assert!("1".parse::<Connector>().is_err());
        assert!("a:b".parse::<Connector>().is_err());
    }

    #[test]
    fn parse_leading_with_trailer() {
        let (c, rest) = Connector::parse_leading("1:1,7,38000").unwrap();
        assert_eq!(c, Connector::new(1, 1));
        assert_eq!(rest, ",7,38000");
    }

    #[test]
    fn parse_leading_no_trailer() {
        let (c, rest) = Connector::parse_leading("1:1").unwrap();
        assert_eq!(c, Connector::new(1, 1));
        assert_eq!(rest, "");
    }
}
