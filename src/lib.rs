/*!
 * Vehicle CAN signal codec with per-message integrity checking.
 *
 * A [`Registry`] describes the messages of one vehicle. A [`CanParser`]
 * decodes incoming frames for one bus into the latest physical values and
 * tracks freshness, rolling counters and checksums to decide whether the bus
 * can be trusted. A [`CanPacker`] goes the other way, producing payloads
 * with the counter and checksum filled in.
 *
 * ```
 * use canguard::{CanPacker, CanParser, MessageSpec, ParserConfig, Registry, SignalRole, SignalSpec};
 *
 * let registry = Registry::new(
 *     "example",
 *     vec![MessageSpec::new(
 *         "STEERING",
 *         0x1A6,
 *         8,
 *         vec![
 *             SignalSpec::big_endian("ANGLE", 7, 16).signed().scaled(0.1, 0.0),
 *             SignalSpec::big_endian("COUNTER", 61, 2).with_role(SignalRole::Counter),
 *             SignalSpec::big_endian("CHECKSUM", 59, 4).with_role(SignalRole::NibbleSum),
 *         ],
 *     )],
 * )?;
 *
 * let packer = CanPacker::new(&registry);
 * let frame = packer.pack_frame(0x1A6, &[("ANGLE", -12.5)], 0, 0, 1_000)?;
 *
 * let config = ParserConfig::new(0).message(0x1A6, 100.0);
 * let mut parser = CanParser::new(&registry, &config)?;
 * parser.update(1_000, &[frame]);
 * assert!(parser.bus_valid());
 * assert_eq!(parser.value(0x1A6, "ANGLE"), Some(-12.5));
 * # Ok::<(), canguard::Error>(())
 * ```
 */

pub mod can_packer;
pub mod can_parser;
pub mod canlog_reader;
pub mod checksum;
pub mod config;
pub mod dbc;
pub mod error;
pub mod frame;
pub mod message_state;
pub mod registry;
pub mod signal_layout;

#[cfg(test)]
pub(crate) mod fixtures;

pub use can_packer::{CanPacker, FrameBuilder};
pub use can_parser::CanParser;
pub use checksum::{init_lookup_tables, ChecksumEngine, ChecksumOutcome, CrcTables};
pub use config::{MessageCheck, ParserConfig, SignalRequest};
pub use error::{Error, Result};
pub use frame::CanFrame;
pub use message_state::{Freshness, MessageState, MAX_BAD_COUNTER};
pub use registry::{MessageSpec, Registry, SignalRole, SignalSpec};
pub use signal_layout::SignalLayout;
