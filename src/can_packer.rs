/*!
 * Builds outgoing payloads: encodes named signal values, stamps the rolling
 * counter and finishes with the message checksum.
 */

use std::collections::HashMap;

use tracing::debug;

use crate::checksum::ChecksumEngine;
use crate::error::{Error, Result};
use crate::frame::CanFrame;
use crate::registry::{MessageSpec, Registry, SignalSpec};
use crate::signal_layout::{raw_mask, SignalLayout};

#[derive(Debug, Clone)]
struct PackedSignal<'a> {
    spec: &'a SignalSpec,
    layout: SignalLayout,
}

#[derive(Debug, Clone)]
struct PackedMessage<'a> {
    spec: &'a MessageSpec,
    signals: HashMap<&'a str, PackedSignal<'a>>,
    counter: Option<PackedSignal<'a>>,
    checksum: Option<PackedSignal<'a>>,
}

/// Encoder for every message of a registry.
#[derive(Debug, Clone)]
pub struct CanPacker<'a> {
    registry: &'a Registry,
    messages: HashMap<u32, PackedMessage<'a>>,
    engine: ChecksumEngine<'static>,
}

impl<'a> CanPacker<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        let messages = registry
            .messages()
            .iter()
            .map(|spec| {
                let signals: HashMap<&'a str, PackedSignal<'a>> = spec
                    .signals
                    .iter()
                    .map(|s| {
                        let packed = PackedSignal {
                            spec: s,
                            layout: SignalLayout::from_spec(s),
                        };
                        (s.name.as_str(), packed)
                    })
                    .collect();
                let find = |signal: Option<&'a SignalSpec>| {
                    signal.and_then(|s| signals.get(s.name.as_str()).cloned())
                };
                let counter = find(spec.counter_signal());
                let checksum = find(spec.checksum_signal());
                let message = PackedMessage {
                    spec,
                    signals,
                    counter,
                    checksum,
                };
                (spec.address, message)
            })
            .collect();

        Self {
            registry,
            messages,
            engine: ChecksumEngine::new(),
        }
    }

    /// Message layout for `address`, e.g. to size a transport frame.
    pub fn lookup_message(&self, address: u32) -> Option<&'a MessageSpec> {
        self.messages.get(&address).map(|m| m.spec)
    }

    /// Encode `values` into a payload for `address`.
    ///
    /// Signals not listed are zero. `counter` is written modulo the counter
    /// width, overriding any value given for the counter signal, and the
    /// checksum is computed over the finished payload.
    pub fn pack(&self, address: u32, values: &[(&str, f64)], counter: u64) -> Result<Vec<u8>> {
        let message = self
            .messages
            .get(&address)
            .ok_or(Error::UnknownAddress { address })?;
        let mut data = vec![0u8; message.spec.byte_length];

        for &(name, value) in values {
            let signal = message.signals.get(name).ok_or_else(|| Error::UnknownSignal {
                address,
                name: name.to_string(),
            })?;
            signal.layout.encode(&mut data, signal.spec, value);
        }

        if let Some(signal) = &message.counter {
            signal
                .layout
                .pack(&mut data, counter & raw_mask(signal.spec.bit_length));
        }

        if let Some(signal) = &message.checksum {
            if let Some(outcome) = self.engine.compute(address, signal.spec, &data) {
                if outcome.is_placeholder() {
                    debug!("0x{address:X}: packing placeholder checksum");
                }
                signal.layout.pack(&mut data, outcome.value());
            }
        }

        Ok(data)
    }

    /// [`CanPacker::pack`] by message name.
    pub fn pack_by_name(&self, name: &str, values: &[(&str, f64)], counter: u64) -> Result<Vec<u8>> {
        let message = self
            .registry
            .message_by_name(name)
            .ok_or_else(|| Error::UnknownMessage(name.to_string()))?;
        self.pack(message.address, values, counter)
    }

    /// [`CanPacker::pack`] into a frame ready for a transport.
    pub fn pack_frame(
        &self,
        address: u32,
        values: &[(&str, f64)],
        counter: u64,
        bus: u8,
        timestamp_ns: u64,
    ) -> Result<CanFrame> {
        let data = self.pack(address, values, counter)?;
        CanFrame::new(timestamp_ns, bus, address, &data).ok_or_else(|| Error::InvalidMessage {
            address,
            reason: format!("{} byte payload does not fit a frame", data.len()),
        })
    }

    /// Start a frame for `address`, set signal by signal.
    pub fn builder(&self, address: u32) -> Result<FrameBuilder<'_, 'a>> {
        if !self.messages.contains_key(&address) {
            return Err(Error::UnknownAddress { address });
        }
        Ok(FrameBuilder {
            packer: self,
            address,
            values: Vec::new(),
            counter: 0,
            bus: 0,
            timestamp_ns: 0,
        })
    }
}

/// Builder for one outgoing frame.
///
/// Uses the consuming-self pattern so that each `.set()` call moves
/// the builder, preventing accidental reuse of a half-built frame.
pub struct FrameBuilder<'p, 'a> {
    packer: &'p CanPacker<'a>,
    address: u32,
    values: Vec<(&'a str, f64)>,
    counter: u64,
    bus: u8,
    timestamp_ns: u64,
}

impl<'p, 'a> FrameBuilder<'p, 'a> {
    /// Set a signal by name. Returns Err if the signal name is not found.
    pub fn set(mut self, signal_name: &str, physical_value: f64) -> Result<Self> {
        let name = self
            .packer
            .messages
            .get(&self.address)
            .and_then(|m| m.signals.get_key_value(signal_name))
            .map(|(&name, _)| name)
            .ok_or_else(|| Error::UnknownSignal {
                address: self.address,
                name: signal_name.to_string(),
            })?;
        self.values.push((name, physical_value));
        Ok(self)
    }

    pub fn counter(mut self, counter: u64) -> Self {
        self.counter = counter;
        self
    }

    pub fn bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    pub fn timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Consume the builder and produce the finished frame.
    pub fn build(self) -> Result<CanFrame> {
        self.packer.pack_frame(
            self.address,
            &self.values,
            self.counter,
            self.bus,
            self.timestamp_ns,
        )
    }
}
