//! Stream framer: accumulates bytes into complete protocol
//! responses, delimited by `\r`, with special handling for the
//! `device,...endlistdevices` multiline listing block.

const DELIMITER: u8 = b'\r';
const LISTING_PREFIX: &str = "device,";
const LISTING_TERMINATOR: &str = "endlistdevices\r";

/// Splits an inbound byte stream into complete protocol responses.
/// Buffers partial data across calls, so it can be fed arbitrary TCP
/// segment boundaries.
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Feed newly-received bytes and extract any complete responses.
    ///
    /// A response is emitted when the buffer ends in `\r`, unless the
    /// buffer is a device-listing block (`device,...`) that has not yet
    /// seen the literal `endlistdevices\r` terminator, in which case
    /// buffering continues across intermediate `\r`s.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut responses = Vec::new();

        loop {
            let Some(end) = self.buf.iter().position(|&b| b == DELIMITER) else {
                break;
            };
            // Only a full accumulated frame (ends in \r) is a candidate;
            // decide here whether the candidate boundary is final.
            if self.is_listing_in_progress(end) {
                // Interior line of a device listing, not a frame boundary.
                // Mark it consumed (as \n, per the delivered-text rule below)
                // so the next scan finds the following \r instead of this one.
                if end + 1 >= self.buf.len() {
                    break;
                }
                self.buf[end] = b'\n';
                continue;
            }

            let frame: Vec<u8> = self.buf.drain(..=end).collect();
            responses.push(decode_frame(&frame));
        }

        responses
    }

    /// Whether the bytes up to and including `end` form a device-listing
    /// block that has not yet reached its terminator.
    fn is_listing_in_progress(&self, end: usize) -> bool {
        if !self.buf.starts_with(LISTING_PREFIX.as_bytes()) {
            return false;
        }
        let candidate = &self.buf[..=end];
        !candidate.ends_with(LISTING_TERMINATOR.as_bytes())
    }
}

fn decode_frame(frame: &[u8]) -> String {
    let body = &frame[..frame.len() - 1]; // strip trailing \r
    let text = String::from_utf8_lossy(body);
    let normalised: String = text.chars().map(|c| if c == '\r' { '\n' } else { c }).collect();
    normalised.trim().to_string()
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}
