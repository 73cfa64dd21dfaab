/*!
 * Immutable message and signal layout definitions for one vehicle.
 *
 * The registry is loaded once (by hand or from a DBC file, see [`crate::dbc`])
 * and then only borrowed by parsers and packers.
 */

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::signal_layout::SignalLayout;

/// Largest CAN-FD payload.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Addresses above this value use the 29-bit extended identifier space.
pub const MAX_STANDARD_ADDRESS: u32 = 0x7FF;

/// What a signal is for inside its message.
///
/// Every checksum variant names one manufacturer scheme; see
/// [`crate::checksum::ChecksumEngine`] for the algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalRole {
    /// Ordinary data.
    #[default]
    Default,
    /// Rolling counter, incremented modulo its width on every transmission.
    Counter,
    /// Honda: 4-bit nibble sum over address and payload.
    NibbleSum,
    /// Toyota: 8-bit sum of length, address bytes and payload.
    ByteSum,
    /// Subaru: 8-bit sum of address bytes and payload, checksum in byte 0.
    SkipFirstByteSum,
    /// Chrysler: bit-serial scrambler over all but the last byte.
    BitSerialXor,
    /// Volkswagen MQB: CRC-8/AUTOSAR with an address and counter dependent pad.
    Crc8Autosar,
    /// Volkswagen PQ: XOR of every byte except the checksum byte.
    XorChecksum,
    /// Comma pedal/body: CRC-8 poly 0xD5 over the payload in reverse.
    Crc8Reverse,
    /// Hyundai CAN-FD: CRC-16/XMODEM with a length dependent final XOR.
    Crc16Xmodem,
    /// Tesla: 8-bit sum of address bytes and every non-checksum byte.
    AddressSum,
}

impl SignalRole {
    pub fn is_checksum(self) -> bool {
        !matches!(self, SignalRole::Default | SignalRole::Counter)
    }

    /// Width in bits of the value a checksum role produces.
    pub fn checksum_bits(self) -> Option<u32> {
        match self {
            SignalRole::Default | SignalRole::Counter => None,
            SignalRole::NibbleSum => Some(4),
            SignalRole::Crc16Xmodem => Some(16),
            SignalRole::ByteSum
            | SignalRole::SkipFirstByteSum
            | SignalRole::BitSerialXor
            | SignalRole::Crc8Autosar
            | SignalRole::XorChecksum
            | SignalRole::Crc8Reverse
            | SignalRole::AddressSum => Some(8),
        }
    }
}

/// Layout and scaling of one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub name: String,
    /// LSB position for little-endian signals, MSB position for big-endian
    /// signals (DBC bit numbering).
    pub start_bit: u32,
    pub bit_length: u32,
    pub is_little_endian: bool,
    pub is_signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub role: SignalRole,
}

impl SignalSpec {
    /// An unsigned, unscaled Intel signal.
    pub fn little_endian(name: impl Into<String>, start_bit: u32, bit_length: u32) -> Self {
        Self {
            name: name.into(),
            start_bit,
            bit_length,
            is_little_endian: true,
            is_signed: false,
            factor: 1.0,
            offset: 0.0,
            role: SignalRole::Default,
        }
    }

    /// An unsigned, unscaled Motorola signal.
    pub fn big_endian(name: impl Into<String>, start_bit: u32, bit_length: u32) -> Self {
        Self {
            is_little_endian: false,
            ..Self::little_endian(name, start_bit, bit_length)
        }
    }

    pub fn signed(mut self) -> Self {
        self.is_signed = true;
        self
    }

    pub fn scaled(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_role(mut self, role: SignalRole) -> Self {
        self.role = role;
        self
    }
}

/// Layout of one CAN message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSpec {
    pub name: String,
    pub address: u32,
    pub byte_length: usize,
    pub signals: Vec<SignalSpec>,
}

impl MessageSpec {
    pub fn new(
        name: impl Into<String>,
        address: u32,
        byte_length: usize,
        signals: Vec<SignalSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            byte_length,
            signals,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.address > MAX_STANDARD_ADDRESS
    }

    pub fn signal(&self, name: &str) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// The signal carrying this message's checksum, if it has one.
    pub fn checksum_signal(&self) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.role.is_checksum())
    }

    /// The signal carrying this message's rolling counter, if it has one.
    pub fn counter_signal(&self) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.role == SignalRole::Counter)
    }

    fn validate(&self) -> Result<()> {
        if self.byte_length > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidMessage {
                address: self.address,
                reason: format!(
                    "byte length {} exceeds {MAX_PAYLOAD_LEN}",
                    self.byte_length
                ),
            });
        }

        let invalid = |signal: &SignalSpec, reason: String| Error::InvalidSignal {
            message: self.name.clone(),
            signal: signal.name.clone(),
            reason,
        };

        for (i, signal) in self.signals.iter().enumerate() {
            if self.signals[..i].iter().any(|s| s.name == signal.name) {
                return Err(Error::InvalidMessage {
                    address: self.address,
                    reason: format!("duplicate signal name {:?}", signal.name),
                });
            }
            if !(1..=64).contains(&signal.bit_length) {
                return Err(invalid(
                    signal,
                    format!("bit length {} outside 1..=64", signal.bit_length),
                ));
            }
            if signal.factor == 0.0 || !signal.factor.is_finite() || !signal.offset.is_finite() {
                return Err(invalid(
                    signal,
                    format!("unusable scaling ({}, {})", signal.factor, signal.offset),
                ));
            }
            let layout = SignalLayout::from_spec(signal);
            if !layout.fits(self.byte_length) {
                return Err(invalid(
                    signal,
                    format!(
                        "needs {} bytes but the message has {}",
                        layout.byte_span(),
                        self.byte_length
                    ),
                ));
            }
        }

        if self.signals.iter().filter(|s| s.role.is_checksum()).count() > 1 {
            return Err(Error::InvalidMessage {
                address: self.address,
                reason: "more than one checksum signal".to_string(),
            });
        }
        if self
            .signals
            .iter()
            .filter(|s| s.role == SignalRole::Counter)
            .count()
            > 1
        {
            return Err(Error::InvalidMessage {
                address: self.address,
                reason: "more than one counter signal".to_string(),
            });
        }
        Ok(())
    }
}

/// Human readable name for one raw value of a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueLabel {
    pub raw: i64,
    pub label: String,
}

/// A named, validated collection of message layouts.
#[derive(Debug, Clone)]
pub struct Registry {
    name: String,
    messages: Vec<MessageSpec>,
    by_address: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
    value_labels: HashMap<(u32, String), Vec<ValueLabel>>,
}

impl Registry {
    /// Validate `messages` and index them by address and name.
    pub fn new(name: impl Into<String>, messages: Vec<MessageSpec>) -> Result<Self> {
        let mut by_address = HashMap::with_capacity(messages.len());
        let mut by_name = HashMap::with_capacity(messages.len());

        for (index, message) in messages.iter().enumerate() {
            message.validate()?;
            if by_address.insert(message.address, index).is_some() {
                return Err(Error::DuplicateAddress(message.address));
            }
            if by_name.insert(message.name.clone(), index).is_some() {
                return Err(Error::DuplicateName(message.name.clone()));
            }
        }

        Ok(Self {
            name: name.into(),
            messages,
            by_address,
            by_name,
            value_labels: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All messages, in the order they were supplied.
    pub fn messages(&self) -> &[MessageSpec] {
        &self.messages
    }

    pub fn message(&self, address: u32) -> Option<&MessageSpec> {
        self.by_address.get(&address).map(|&i| &self.messages[i])
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageSpec> {
        self.by_name.get(name).map(|&i| &self.messages[i])
    }

    /// Attach enumerated value labels to a signal.
    ///
    /// Labels are for display and debugging; the codec never reads them.
    pub fn add_value_labels(
        &mut self,
        address: u32,
        signal: &str,
        labels: impl IntoIterator<Item = (i64, String)>,
    ) -> Result<()> {
        let message = self
            .message(address)
            .ok_or(Error::UnknownAddress { address })?;
        if message.signal(signal).is_none() {
            return Err(Error::UnknownSignal {
                address,
                name: signal.to_string(),
            });
        }
        self.value_labels
            .entry((address, signal.to_string()))
            .or_default()
            .extend(labels.into_iter().map(|(raw, label)| ValueLabel { raw, label }));
        Ok(())
    }

    pub fn value_labels(&self, address: u32, signal: &str) -> Option<&[ValueLabel]> {
        self.value_labels
            .get(&(address, signal.to_string()))
            .map(Vec::as_slice)
    }

    /// Label for one raw value, e.g. `3 -> "REVERSE"`.
    pub fn value_label(&self, address: u32, signal: &str, raw: i64) -> Option<&str> {
        self.value_labels(address, signal)?
            .iter()
            .find(|l| l.raw == raw)
            .map(|l| l.label.as_str())
    }
}
