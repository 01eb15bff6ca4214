//! Device error-code → human message dictionary.
//!
//! Injected into [`crate::classify::classify`] so the classifier stays a
//! pure function of its input line and its table. Unknown codes surface
//! verbatim rather than erroring.

use std::collections::HashMap;

/// A lookup from device-emitted error code to a human-readable message.
pub trait HumanReadable: Send + Sync {
    fn describe(&self, code: &str) -> String;
}

/// Built-in table covering the codes this protocol's documentation names.
pub struct BuiltinCodes {
    table: HashMap<&'static str, &'static str>,
}

impl BuiltinCodes {
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert("001", "Invalid command. Command not found.");
        table.insert("002", "Invalid module address (does not exist).");
        table.insert("003", "Invalid connector address (does not exist).");
        table.insert("004", "Invalid ID value.");
        table.insert(
            "005",
            "Invalid frequency value.",
        );
        table.insert(
            "006",
            "Bad number of repeats (must be in the range 1-65535).",
        );
        table.insert("007", "Bad number of bursts in database.");
        table.insert("008", "Bad number of bursts in database pair.");
        table.insert("009", "Bad burst value.");
        table.insert("010", "Bad number of bursts (too many, max 65535).");
        table.insert(
            "011",
            "Command sent to input connector (module is not configured for IR output).",
        );
        table.insert(
            "012",
            "Command sent to non-existing connector.",
        );
        table.insert(
            "013",
            "Bad command syntax.",
        );
        table.insert(
            "014",
            "Blaster command sent to non-blaster connector.",
        );
        table.insert(
            "015",
            "Sensor command sent to non-sensor input connector.",
        );
        table.insert(
            "016",
            "Repeat count exceeded maximum (20) for sendir command with a repeat of zero (0).",
        );
        table.insert("017", "Bad escape sequence detected.");
        table.insert("018", "Command not found.");
        table.insert("019", "Variable not found.");
        table.insert("020", "Parameter invalid.");
        table.insert("021", "Parameter not found.");
        table.insert("022", "Connector address invalid.");
        table.insert("023", "Connector does not exist.");
        table.insert("024", "Connector does not support this setting.");
        table.insert("025", "Bad number of IDs (must be 0-65535).");
        table.insert(
            "026",
            "Device is not configured and cannot complete the command.",
        );
        table.insert("027", "Command sent to lockout connector.");
        table.insert("028", "Bad parameter given to setNET command.");
        table.insert(
            "029",
            "Command sent to a connector configured for a different network protocol.",
        );
        table.insert("030", "Invalid baud rate setting.");
        table.insert("031", "Invalid flow control setting.");
        table.insert("032", "Invalid parity setting.");
        table.insert("033", "Settings are not valid for the connector type.");
        Self { table }
    }
}

impl Default for BuiltinCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanReadable for BuiltinCodes {
    fn describe(&self, code: &str) -> String {
        match self.table.get(code) {
            Some(message) => message.to_string(),
            None => code.to_string(),
        }
    }
}
