//! Response classifier: a pure function recognising device error,
//! busy and stop-acknowledgement lines by prefix.

use crate::connector::Connector;
use crate::error_codes::HumanReadable;

/// The classification of a single complete protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// An ordinary, non-error response line.
    Ok,
    /// A device-reported error, with its code and human-readable message.
    DeviceError { code: String, message: String },
    /// A `busyIR`/`busyir` line; `connector` is present when the device
    /// included the `,module:port,id` tail.
    Busy {
        connector: Option<Connector>,
        id: Option<u32>,
    },
    /// A `stopir,<connector>` acknowledgement.
    StopAck { connector: Connector },
}

/// Classify `line` (already trimmed of its terminator) using `codes` for
/// human-readable error messages. Total: every non-empty line yields
/// exactly one variant.
pub fn classify(line: &str, codes: &dyn HumanReadable) -> Classification {
    if let Some(rest) = line.strip_prefix("ERR_") {
        // iTach: code is the final three characters.
        let code = tail_chars(rest, 3);
        return Classification::DeviceError {
            message: codes.describe(&code),
            code,
        };
    }
    if let Some(rest) = line.strip_prefix("ERR ") {
        // Flex / Global Connect: code is the whole trimmed line (sans the
        // "ERR " prefix is still part of the human-facing code per spec).
        let code = format!("ERR {}", rest.trim());
        return Classification::DeviceError {
            message: codes.describe(&code),
            code,
        };
    }
    if line.starts_with("unknowncommand") {
        let code = line.rsplit(',').next().unwrap_or(line).to_string();
        return Classification::DeviceError {
            message: codes.describe(&code),
            code,
        };
    }
    if line.starts_with("busyIR") || line.starts_with("busyir") {
        let rest = &line[6..];
        let mut parts = rest.trim_start_matches(',').splitn(2, ',');
        let connector = parts.next().and_then(|s| s.parse().ok());
        let id = parts.next().and_then(|s| s.parse().ok());
        return Classification::Busy { connector, id };
    }
    if let Some(rest) = line.strip_prefix("stopir,") {
        if let Some((connector, _)) = Connector::parse_leading(rest) {
            return Classification::StopAck { connector };
        }
        // Malformed connector: not recognisable as a stop ack, fall through.
    }
    Classification::Ok
}

fn tail_chars(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if len <= n {
        s.to_string()
    } else {
        s.chars().skip(len - n).collect()
    }
}
