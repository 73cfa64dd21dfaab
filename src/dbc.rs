/*!
 * Registry import from DBC files.
 *
 * DBC text is parsed by `can-dbc`; this module only maps its messages and
 * signals onto [`Registry`] entries and assigns integrity roles by signal name.
 */

use std::path::Path;

use can_dbc::DBC;

use crate::error::{Error, Result};
use crate::registry::{MessageSpec, Registry, SignalRole, SignalSpec};

/// Name of the signal carrying a message checksum.
pub const CHECKSUM_SIGNAL: &str = "CHECKSUM";
/// Name of the signal carrying a rolling counter.
pub const COUNTER_SIGNAL: &str = "COUNTER";

/// Manufacturer checksum scheme shared by every message of one DBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumFamily {
    Honda,
    Toyota,
    Subaru,
    Chrysler,
    VolkswagenMqb,
    VolkswagenPq,
    HyundaiCanfd,
    Tesla,
    Body,
}

impl ChecksumFamily {
    /// Detect the family from a DBC file name such as `honda_civic_2016.dbc`.
    pub fn from_dbc_name(name: &str) -> Option<Self> {
        const PREFIXES: &[(&str, ChecksumFamily)] = &[
            ("honda_", ChecksumFamily::Honda),
            ("acura_", ChecksumFamily::Honda),
            ("toyota_", ChecksumFamily::Toyota),
            ("lexus_", ChecksumFamily::Toyota),
            ("subaru_", ChecksumFamily::Subaru),
            ("chrysler_", ChecksumFamily::Chrysler),
            ("stellantis_", ChecksumFamily::Chrysler),
            ("vw_mqb", ChecksumFamily::VolkswagenMqb),
            ("vw_meb", ChecksumFamily::VolkswagenMqb),
            ("vw_pq", ChecksumFamily::VolkswagenPq),
            ("vw_golf_mk4", ChecksumFamily::VolkswagenPq),
            ("hyundai_canfd", ChecksumFamily::HyundaiCanfd),
            ("tesla_", ChecksumFamily::Tesla),
            ("comma_body", ChecksumFamily::Body),
        ];
        let file_name = Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(name);
        PREFIXES
            .iter()
            .find(|(prefix, _)| file_name.starts_with(prefix))
            .map(|&(_, family)| family)
    }

    /// Role given to `CHECKSUM` signals of this family.
    pub fn checksum_role(self) -> SignalRole {
        match self {
            ChecksumFamily::Honda => SignalRole::NibbleSum,
            ChecksumFamily::Toyota => SignalRole::ByteSum,
            ChecksumFamily::Subaru => SignalRole::SkipFirstByteSum,
            ChecksumFamily::Chrysler => SignalRole::BitSerialXor,
            ChecksumFamily::VolkswagenMqb => SignalRole::Crc8Autosar,
            ChecksumFamily::VolkswagenPq => SignalRole::XorChecksum,
            ChecksumFamily::HyundaiCanfd => SignalRole::Crc16Xmodem,
            ChecksumFamily::Tesla => SignalRole::AddressSum,
            ChecksumFamily::Body => SignalRole::Crc8Reverse,
        }
    }
}

/// Read and parse a DBC file.
pub fn load_dbc(path: impl AsRef<Path>) -> Result<DBC> {
    let buffer = std::fs::read(path)?;
    DBC::from_slice(&buffer).map_err(|e| Error::Dbc(format!("{e:?}")))
}

/// Parse DBC text.
pub fn parse_dbc(text: &str) -> Result<DBC> {
    DBC::from_slice(text.as_bytes()).map_err(|e| Error::Dbc(format!("{e:?}")))
}

/// Load a DBC file into a registry named after the file, detecting the
/// checksum family from the file name.
pub fn load_registry(path: impl AsRef<Path>) -> Result<Registry> {
    let path = path.as_ref();
    let dbc = load_dbc(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    registry_from_dbc(name, &dbc, ChecksumFamily::from_dbc_name(name))
}

/// Convert a parsed DBC into a validated registry.
///
/// `CHECKSUM` signals get the family's checksum role (and keep the default
/// role when `family` is `None`); `COUNTER` signals get the counter role.
/// Value descriptions become value labels. Multiplexing is ignored: every
/// signal of a message is decoded.
pub fn registry_from_dbc(
    name: &str,
    dbc: &DBC,
    family: Option<ChecksumFamily>,
) -> Result<Registry> {
    let mut messages = Vec::with_capacity(dbc.messages().len());

    for message in dbc.messages() {
        let address = message_address(message.message_id());
        let message_name = message.message_name();
        let byte_length =
            usize::try_from(*message.message_size()).map_err(|_| Error::InvalidMessage {
                address,
                reason: format!("byte length {} out of range", message.message_size()),
            })?;

        let signals = message
            .signals()
            .iter()
            .map(|signal| convert_signal(message_name, signal, family))
            .collect::<Result<Vec<_>>>()?;
        messages.push(MessageSpec::new(message_name.as_str(), address, byte_length, signals));
    }

    let mut registry = Registry::new(name, messages)?;

    for message in dbc.messages() {
        let address = message_address(message.message_id());
        for signal in message.signals() {
            let Some(descriptions) =
                dbc.value_descriptions_for_signal(*message.message_id(), signal.name())
            else {
                continue;
            };
            let labels = descriptions
                .iter()
                .map(|d| (*d.a() as i64, d.b().clone()));
            registry.add_value_labels(address, signal.name(), labels)?;
        }
    }

    Ok(registry)
}

fn message_address(id: &can_dbc::MessageId) -> u32 {
    match *id {
        can_dbc::MessageId::Standard(id) => u32::from(id),
        can_dbc::MessageId::Extended(id) => id,
    }
}

fn convert_signal(
    message_name: &str,
    signal: &can_dbc::Signal,
    family: Option<ChecksumFamily>,
) -> Result<SignalSpec> {
    let invalid = |reason: String| Error::InvalidSignal {
        message: message_name.to_string(),
        signal: signal.name().clone(),
        reason,
    };
    let start_bit = u32::try_from(signal.start_bit)
        .map_err(|_| invalid(format!("start bit {} out of range", signal.start_bit)))?;
    let bit_length = u32::try_from(signal.signal_size)
        .map_err(|_| invalid(format!("size {} out of range", signal.signal_size)))?;

    let role = match signal.name().as_str() {
        CHECKSUM_SIGNAL => family.map_or(SignalRole::Default, ChecksumFamily::checksum_role),
        COUNTER_SIGNAL => SignalRole::Counter,
        _ => SignalRole::Default,
    };
    if let Some(expected) = role.checksum_bits() {
        if bit_length != expected {
            return Err(Error::ChecksumSize {
                message: message_name.to_string(),
                signal: signal.name().clone(),
                actual: bit_length,
                expected,
            });
        }
    }

    Ok(SignalSpec {
        name: signal.name().clone(),
        start_bit,
        bit_length,
        is_little_endian: matches!(signal.byte_order(), can_dbc::ByteOrder::LittleEndian),
        is_signed: matches!(signal.value_type(), can_dbc::ValueType::Signed),
        factor: *signal.factor(),
        offset: *signal.offset(),
        role,
    })
}
