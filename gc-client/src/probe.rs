//! One-shot device-info probe — an external collaborator: a short
//! blocking dialogue on its own TCP connection, independent of
//! [`crate::client::Client`], the transfer queue and the connection
//! supervisor. Reuses [`crate::frame::FrameSplitter`] for delimiter
//! splitting, since the wire format is shared.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::connector::Connector;
use crate::frame::FrameSplitter;

/// One module entry from a `getdevices` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub module: u16,
    pub port_count: u16,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub version: String,
    pub devices: Vec<DeviceEntry>,
    /// `get_IR,<module>:<port>` replies, keyed by connector, for every
    /// port on every IR-capable module in `devices`.
    pub ir_modes: Vec<(Connector, String)>,
}

/// Run the probe dialogue against `addr` (`host:port`), allowing up to
/// `timeout` for the TCP connect and for each exchange.
pub fn query(addr: &str, timeout: Duration) -> io::Result<ProbeResult> {
    let socket_addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;
    let mut stream = TcpStream::connect_timeout(&socket_addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let version = exchange(&mut stream, "getversion\r")?;

    let listing = exchange(&mut stream, "getdevices\r")?;
    let devices: Vec<DeviceEntry> = listing.lines().filter_map(parse_device_line).collect();

    let mut ir_modes = Vec::new();
    for device in devices.iter().filter(|d| d.kind.eq_ignore_ascii_case("IR")) {
        for port in 1..=device.port_count.max(1) {
            let connector = Connector::new(device.module, port);
            let request = format!("get_IR,{connector}\r");
            let response = exchange(&mut stream, &request)?;
            ir_modes.push((connector, response));
        }
    }

    Ok(ProbeResult {
        version,
        devices,
        ir_modes,
    })
}

fn exchange(stream: &mut TcpStream, request: &str) -> io::Result<String> {
    stream.write_all(request.as_bytes())?;
    let mut framer = FrameSplitter::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-probe"));
        }
        let responses = framer.feed(&buf[..n]);
        if let Some(first) = responses.into_iter().next() {
            return Ok(first);
        }
    }
}

fn parse_device_line(line: &str) -> Option<DeviceEntry> {
    let rest = line.strip_prefix("device,")?;
    let mut parts = rest.splitn(2, ',');
    let module: u16 = parts.next()?.parse().ok()?;
    let tail = parts.next()?;
    let mut tail_parts = tail.splitn(2, ' ');
    let port_count: u16 = tail_parts.next()?.parse().ok()?;
    let kind = tail_parts.next()?.trim().to_string();
    Some(DeviceEntry { module, port_count, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_line() {
        let entry = parse_device_line("device,3,3 RELAY").unwrap();
        assert_eq!(entry, DeviceEntry { module: 3, port_count: 3, kind: "RELAY".to_string() });
    }

    #[test]
    fn ignores_endlistdevices_line() {
        assert_eq!(parse_device_line("endlistdevices"), None);
    }

    #[test]
    fn full_dialogue_against_a_test_double() {
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 128];

            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"getversion\r");
            stream.write_all(b"710-1005-05\r").unwrap();

            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"getdevices\r");
            stream
                .write_all(b"device,1,1 SERIAL\rdevice,4,1 IR\rendlistdevices\r")
                .unwrap();

            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"get_IR,4:1\r");
            stream.write_all(b"IR,4:1,1\r").unwrap();
        });

        let result = query(&format!("127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
        assert_eq!(result.version, "710-1005-05");
        assert_eq!(result.devices.len(), 2);
        assert_eq!(result.ir_modes, vec![(Connector::new(4, 1), "IR,4:1,1".to_string())]);
        handle.join().unwrap();
    }
}
