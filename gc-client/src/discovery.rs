//! UDP device discovery — an external collaborator that does not share
//! the core queue or any [`crate::client::Client`] state.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, trace};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 250, 250);
const MULTICAST_PORT: u16 = 9131;
const BEACON_PREFIX: &str = "AMXB";

/// A parsed discovery beacon: the `<-key=value>` tuples of an `AMXB`
/// frame, keyed without their optional leading dash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub fields: HashMap<String, String>,
}

impl Beacon {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Parse a single beacon datagram. Returns `None` if it does not begin
/// with the `AMXB` prefix.
pub fn parse_beacon(data: &[u8]) -> Option<Beacon> {
    let text = String::from_utf8_lossy(data);
    let rest = text.strip_prefix(BEACON_PREFIX)?;

    let mut fields = HashMap::new();
    let mut remaining = rest;
    while let Some(open) = remaining.find('<') {
        let Some(close) = remaining[open..].find('>') else {
            break;
        };
        let tuple = &remaining[open + 1..open + close];
        remaining = &remaining[open + close + 1..];

        let tuple = tuple.strip_prefix('-').unwrap_or(tuple);
        let Some((key, value)) = tuple.split_once('=') else {
            continue;
        };
        fields.insert(key.to_string(), value.to_string());
    }

    Some(Beacon { fields })
}

/// Join the discovery multicast group and collect beacons until
/// `timeout` elapses.
pub fn discover(timeout: Duration) -> std::io::Result<Vec<Beacon>> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT))?;
    socket.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;

    let deadline = Instant::now() + timeout;
    let mut beacons = Vec::new();
    let mut buf = [0u8; 1024];

    while Instant::now() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                trace!("beacon datagram from {from}");
                if let Some(beacon) = parse_beacon(&buf[..n]) {
                    debug!("discovered device: {:?}", beacon.get("UUID"));
                    beacons.push(beacon);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(beacons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dashed_keys() {
        let beacon = parse_beacon(b"AMXB<-UUID=GlobalCache_000C1E012345><-SDKClass=Utility>").unwrap();
        assert_eq!(beacon.get("UUID"), Some("GlobalCache_000C1E012345"));
        assert_eq!(beacon.get("SDKClass"), Some("Utility"));
    }

    #[test]
    fn parses_undashed_keys_gc100_quirk() {
        let beacon = parse_beacon(b"AMXB<UUID=GlobalCache_000C1E012345>").unwrap();
        assert_eq!(beacon.get("UUID"), Some("GlobalCache_000C1E012345"));
    }

    #[test]
    fn values_may_contain_spaces() {
        let beacon = parse_beacon(b"AMXB<-Make=Global Cache><-Model=iTach IP2IR>").unwrap();
        assert_eq!(beacon.get("Make"), Some("Global Cache"));
        assert_eq!(beacon.get("Model"), Some("iTach IP2IR"));
    }

    #[test]
    fn rejects_frame_without_amxb_prefix() {
        assert_eq!(parse_beacon(b"<-UUID=x>"), None);
    }

    #[test]
    fn empty_frame_after_prefix_yields_no_fields() {
        let beacon = parse_beacon(b"AMXB").unwrap();
        assert!(beacon.fields.is_empty());
    }
}
