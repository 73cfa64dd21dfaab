/*!
 * Reads frames from candump logs, for replaying recorded traffic through a
 * parser.
 */

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};

use anyhow::{anyhow, bail, Context};

use crate::frame::CanFrame;
use crate::registry::MAX_PAYLOAD_LEN;

/*
(1436509052.249713) vcan0 044#2A366C2BBA
(1436509052.449847) vcan0 0F6#7ADFE07BD2
(1436509052.650004) vcan0 236#C3406B09F4C88036
(1436509053.850870) vcan0 1A0#9C20407F96EA167B
(1769227442.503764) vcan1 1F334455##41122334455667788
*/

/// Turn hex data from a candump log into payload bytes.
pub fn candump_hex_to_bytes(hex_str: &str) -> anyhow::Result<Vec<u8>> {
    if hex_str.len() % 2 != 0 {
        bail!("odd number of hex digits in {hex_str:?}");
    }
    if hex_str.len() / 2 > MAX_PAYLOAD_LEN {
        bail!("payload longer than {MAX_PAYLOAD_LEN} bytes");
    }
    (0..hex_str.len())
        .step_by(2)
        .map(|i| {
            let pair = hex_str
                .get(i..i + 2)
                .ok_or_else(|| anyhow!("invalid hex data {hex_str:?}"))?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

/// Parse a `(seconds.fraction)` candump timestamp into nanoseconds without
/// going through floating point.
fn parse_timestamp_ns(timestamp: &str) -> anyhow::Result<u64> {
    let (secs, frac) = timestamp.split_once('.').unwrap_or((timestamp, ""));
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        bail!("invalid timestamp fraction {frac:?}");
    }
    let secs: u64 = secs.parse()?;
    let frac_ns: u64 = if frac.is_empty() {
        0
    } else {
        frac.parse::<u64>()? * 10u64.pow(9 - frac.len() as u32)
    };
    secs.checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(frac_ns))
        .ok_or_else(|| anyhow!("timestamp {timestamp} out of range"))
}

/// Bus index from an interface name: the trailing number (`vcan1` -> 1).
fn bus_from_interface(name: &str) -> anyhow::Result<u8> {
    let digits_at = name
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let digits = &name[digits_at..];
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .with_context(|| format!("bus index out of range in {name:?}"))
}

/// Parse a line in candump format
/// (1436509053.850870) vcan0 1A0#9C20407F96EA167B
/// ```
/// let frame = canguard::canlog_reader::parse_candump_line("(1436509053.850870) vcan0 1A0#9C20407F96EA167B").unwrap();
/// assert_eq!(frame.address, 0x1A0);
/// ```
pub fn parse_candump_line(line: &str) -> anyhow::Result<CanFrame> {
    let mut line_splits = line.split_whitespace();

    let timestamp = line_splits
        .next()
        .ok_or_else(|| anyhow!("missing timestamp in {line:?}"))?;
    let timestamp = timestamp
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| anyhow!("timestamp not in parentheses in {line:?}"))?;
    let timestamp_ns = parse_timestamp_ns(timestamp)?;

    let interface_name = line_splits
        .next()
        .ok_or_else(|| anyhow!("missing interface in {line:?}"))?;
    let bus = bus_from_interface(interface_name)?;

    let id_and_data = line_splits
        .next()
        .ok_or_else(|| anyhow!("missing id#data in {line:?}"))?;
    // "##" means CAN FD, followed by one hex digit of flags we skip.
    let (id, payload_hex) = match id_and_data.split_once("##") {
        Some((id, rest)) => (id, rest.get(1..).unwrap_or("")),
        None => id_and_data
            .split_once('#')
            .ok_or_else(|| anyhow!("missing '#' in {line:?}"))?,
    };

    let address = u32::from_str_radix(id, 16).with_context(|| format!("invalid CAN id {id:?}"))?;
    let payload = candump_hex_to_bytes(payload_hex)?;
    CanFrame::new(timestamp_ns, bus, address, &payload)
        .ok_or_else(|| anyhow!("payload too long in {line:?}"))
}

/// Iterator over the frames of a candump log. Lines that do not parse are
/// skipped.
pub struct CanLogParser {
    reader: Box<dyn BufRead>,
    buf: String, // local buf to re-use so we don't keep allocating
}

impl CanLogParser {
    /// Create CanLogParser from a file path
    pub fn from_file(path: &std::path::Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(CanLogParser {
            reader: Box::new(BufReader::new(file)),
            buf: String::new(),
        })
    }

    /// Create CanLogParser from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        CanLogParser {
            reader: Box::new(Cursor::new(bytes)),
            buf: String::new(),
        }
    }

    /// Create CanLogParser from any type that implements the BufRead trait
    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            buf: String::new(),
        }
    }
}

impl Iterator for CanLogParser {
    type Item = CanFrame;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    let line = self.buf.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_candump_line(line) {
                        Ok(frame) => return Some(frame),
                        Err(e) => tracing::trace!("skipping candump line: {e:#}"),
                    }
                }
            }
        }
    }
}
