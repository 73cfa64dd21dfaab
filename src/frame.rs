/*!
 * Raw CAN frame as handed over by the transport layer.
 */

use crate::registry::MAX_PAYLOAD_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// Monotonic receive time in nanoseconds.
    pub timestamp_ns: u64,
    /// Index of the bus the frame was seen on.
    pub bus: u8,
    /// CAN ID: 11-bit standard or 29-bit extended.
    pub address: u32,
    /// Data length, 0 to 8 for CAN, 0 to 64 for CAN FD.
    pub len: u8,
    /// Payload storage; only the first `len` bytes are meaningful.
    /// A fixed array keeps frames off the heap on the receive path.
    pub data: [u8; MAX_PAYLOAD_LEN],
}

impl Default for CanFrame {
    fn default() -> Self {
        CanFrame {
            timestamp_ns: 0,
            bus: 0,
            address: 0,
            len: 0,
            data: [0; MAX_PAYLOAD_LEN],
        }
    }
}

impl CanFrame {
    /// Build a frame from a payload slice. Returns `None` for payloads longer
    /// than a CAN-FD frame can carry.
    pub fn new(timestamp_ns: u64, bus: u8, address: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return None;
        }
        let mut frame = CanFrame {
            timestamp_ns,
            bus,
            address,
            len: payload.len() as u8,
            ..Default::default()
        };
        frame.data[..payload.len()].copy_from_slice(payload);
        Some(frame)
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(MAX_PAYLOAD_LEN)]
    }

    pub fn is_extended(&self) -> bool {
        self.address > crate::registry::MAX_STANDARD_ADDRESS
    }
}
