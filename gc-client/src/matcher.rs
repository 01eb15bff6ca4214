//! Request matcher: computes the expected-response prefix for a
//! request, used by the transfer queue to correlate inbound lines back to
//! the request that produced them.

/// Compute the expected-response prefix for `request` (without its
/// trailing record separator). `None` means the request is still sendable
/// but can only be resolved by the queue's ordinary-resolution fallback
/// (matching against the oldest still-pending request of the right kind).
pub fn expected_prefix(request: &str) -> Option<String> {
    let request = request.trim_end_matches('\r');
    let mut parts = request.splitn(2, ',');
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    match command {
        "getversion" => Some("version".to_string()),
        "getdevices" => Some("device".to_string()),
        "get_IRL" => Some("IR Learner Enabled".to_string()),
        "stop_IRL" => Some("IR Learner Disabled".to_string()),
        "getstate" | "setstate" => match rest.split(',').next().filter(|s| !s.is_empty()) {
            Some(connector) => Some(format!("state,{connector}")),
            None => Some("state".to_string()),
        },
        "sendir" => {
            // sendir,<connector>,<id>,<freq>,<repeat>,<offset>,<on>,<off>,...
            let mut fields = rest.splitn(3, ',');
            let connector = fields.next()?;
            let id = fields.next()?;
            Some(format!("completeir,{connector},{id}"))
        }
        "stopir" => {
            let connector = rest.split(',').next().filter(|s| !s.is_empty())?;
            Some(format!("stopir,{connector}"))
        }
        _ => family_prefix(command).map(|family| match rest.split(',').next() {
            Some(connector) if !connector.is_empty() => format!("{family},{connector}"),
            _ => family.to_string(),
        }),
    }
}

/// Map `get_NET`/`set_NET`/... to their uppercase family name.
fn family_prefix(command: &str) -> Option<&'static str> {
    match command {
        "get_NET" | "set_NET" => Some("NET"),
        "get_IR" | "set_IR" => Some("IR"),
        "get_SERIAL" | "set_SERIAL" => Some("SERIAL"),
        "get_RELAY" | "set_RELAY" => Some("RELAY"),
        _ => None,
    }
}
