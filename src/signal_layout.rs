/*!
 * Bit layout of a signal inside a CAN payload, reused to decode and encode.
 */

use crate::registry::SignalSpec;

/// One contiguous span of bits within a single byte of the CAN frame data.
///
/// Describes a mapping: "take `num_bits` consecutive bits starting at
/// `bit_offset` in `data[byte_index]`, and place them at `value_shift`
/// in the raw u64 value."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpan {
    pub byte_index: usize,
    /// Lowest bit position within the byte (0..=7).
    pub bit_offset: u8,
    /// How many consecutive bits in this span (1..=8).
    pub num_bits: u8,
    /// Where these bits land in the raw u64, LSB-relative.
    pub value_shift: u8,
}

/// Precomputed mapping from a signal's bit positions to payload bytes.
///
/// Built once per signal via `from_spec()`. The same layout is used by both
/// `extract` (decode) and `pack` (encode), so they are inverses by
/// construction.
#[derive(Debug, Clone)]
pub struct SignalLayout {
    /// A 64-bit signal spanning all 8 bytes produces at most 9 segments.
    pub segments: Vec<BitSpan>,
    pub signal_size: u32,
    byte_span: usize,
}

impl SignalLayout {
    /// Build a layout from a signal definition.
    ///
    /// This is the single source of truth for how `start_bit` plus byte order
    /// maps to physical byte/bit positions in the payload.
    pub fn from_spec(spec: &SignalSpec) -> Self {
        let mut segments = Vec::new();
        let mut byte_index = (spec.start_bit / 8) as usize;
        let mut bit_index = (spec.start_bit % 8) as u8;
        let mut remaining = spec.bit_length.min(64);

        if spec.is_little_endian {
            // Intel: start_bit is the LSB. Walk upward within each byte,
            // then continue at bit 0 of the next byte.
            let mut value_shift: u32 = 0;
            while remaining > 0 {
                let num_bits = std::cmp::min(8 - bit_index as u32, remaining) as u8;
                segments.push(BitSpan {
                    byte_index,
                    bit_offset: bit_index,
                    num_bits,
                    value_shift: value_shift as u8,
                });
                value_shift += num_bits as u32;
                remaining -= num_bits as u32;
                byte_index += 1;
                bit_index = 0;
            }
        } else {
            // Motorola: start_bit is the MSB. Walk downward within each byte,
            // then continue at bit 7 of the next byte.
            while remaining > 0 {
                let num_bits = std::cmp::min(bit_index as u32 + 1, remaining) as u8;
                let bit_offset = bit_index + 1 - num_bits;
                remaining -= num_bits as u32;
                segments.push(BitSpan {
                    byte_index,
                    bit_offset,
                    num_bits,
                    value_shift: remaining as u8,
                });
                byte_index += 1;
                bit_index = 7;
            }
        }

        let byte_span = segments.last().map_or(0, |span| span.byte_index + 1);
        Self {
            segments,
            signal_size: spec.bit_length,
            byte_span,
        }
    }

    /// Number of leading payload bytes the signal needs to be readable.
    pub fn byte_span(&self) -> usize {
        self.byte_span
    }

    /// Whether a payload of `len` bytes contains every bit of the signal.
    pub fn fits(&self, len: usize) -> bool {
        self.byte_span <= len
    }

    /// Extract the raw unsigned value from the payload bytes.
    ///
    /// Returns `None` when the payload is too short to hold the signal.
    pub fn extract(&self, data: &[u8]) -> Option<u64> {
        if !self.fits(data.len()) {
            return None;
        }
        let mut result: u64 = 0;
        for span in &self.segments {
            let mask = ((1u16 << span.num_bits) - 1) as u8;
            let bits = (data[span.byte_index] >> span.bit_offset) & mask;
            result |= (bits as u64) << span.value_shift;
        }
        Some(result)
    }

    /// Pack a raw unsigned value into the payload bytes.
    ///
    /// Clears the target bits before writing so that several signals can share
    /// a byte. Bits outside the signal are left untouched, and so are spans
    /// past the end of `data`.
    pub fn pack(&self, data: &mut [u8], raw: u64) {
        for span in &self.segments {
            let mask = ((1u16 << span.num_bits) - 1) as u8;
            let bits = ((raw >> span.value_shift) as u8) & mask;
            if let Some(byte) = data.get_mut(span.byte_index) {
                *byte &= !(mask << span.bit_offset);
                *byte |= bits << span.bit_offset;
            }
        }
    }

    /// Extract the raw value and sign-extend it if the signal is signed.
    pub fn raw_value(&self, data: &[u8], spec: &SignalSpec) -> Option<i64> {
        let raw = self.extract(data)?;
        Some(if spec.is_signed {
            sign_extend(raw, self.signal_size)
        } else {
            raw as i64
        })
    }

    /// Decode a signal from a payload, returning the physical value.
    ///
    /// physical = raw * factor + offset
    pub fn decode(&self, data: &[u8], spec: &SignalSpec) -> Option<f64> {
        let raw = self.extract(data)?;
        Some(physical_value(raw, spec))
    }

    /// Encode a physical value into the payload, read-modify-write.
    pub fn encode(&self, data: &mut [u8], spec: &SignalSpec, physical: f64) {
        self.pack(data, compute_raw_value(physical, spec));
    }
}

/// Interpret the low `size` bits of `raw` as a two's complement number.
pub fn sign_extend(raw: u64, size: u32) -> i64 {
    let shift_len = 64 - size.clamp(1, 64);
    ((raw as i64) << shift_len) >> shift_len
}

/// Scale a raw extracted value into its physical value.
pub fn physical_value(raw: u64, spec: &SignalSpec) -> f64 {
    let value = if spec.is_signed {
        sign_extend(raw, spec.bit_length) as f64
    } else {
        raw as f64
    };
    value * spec.factor + spec.offset
}

/// Bit mask covering a `size`-bit raw value.
pub fn raw_mask(size: u32) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

/// Convert a physical value to the raw unsigned integer packed into the frame.
///
/// This is the inverse of `physical_value`:
///   raw = round((physical - offset) / factor)
///
/// Values outside the representable range are clamped to the nearest end of
/// it. Signed results are returned as `signal_size`-bit two's complement.
pub fn compute_raw_value(physical: f64, spec: &SignalSpec) -> u64 {
    let raw_f64 = ((physical - spec.offset) / spec.factor).round();
    let size = spec.bit_length.clamp(1, 64);

    if spec.is_signed {
        let max = (raw_mask(size) >> 1) as i64;
        let min = -max - 1;
        // `as` saturates at the i64 bounds and maps NaN to zero.
        let raw_i64 = (raw_f64 as i64).clamp(min, max);
        (raw_i64 as u64) & raw_mask(size)
    } else {
        (raw_f64 as u64).min(raw_mask(size))
    }
}
