/*!
 * Manufacturer checksum algorithms.
 *
 * Each algorithm is a pure function of (address, checksum signal, payload).
 * The table-driven CRCs share lookup tables that are built once, on first use,
 * and are read-only afterwards.
 */

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::registry::{SignalRole, SignalSpec, MAX_STANDARD_ADDRESS};

/// CRC-8 8H2F/AUTOSAR polynomial, used by Volkswagen MQB.
pub const CRC8_AUTOSAR_POLY: u8 = 0x2F;
/// CRC-8 polynomial used by the comma pedal and body.
pub const CRC8_REVERSE_POLY: u8 = 0xD5;
/// CRC-16 XMODEM polynomial, used by Hyundai/Kia/Genesis CAN-FD.
pub const CRC16_XMODEM_POLY: u16 = 0x1021;

/// Lookup tables for the table-driven CRCs.
#[derive(Debug)]
pub struct CrcTables {
    pub crc8_autosar: [u8; 256],
    pub crc16_xmodem: [u16; 256],
}

impl CrcTables {
    pub fn build() -> Self {
        Self {
            crc8_autosar: crc8_table(CRC8_AUTOSAR_POLY),
            crc16_xmodem: crc16_table(CRC16_XMODEM_POLY),
        }
    }
}

static CRC_TABLES: Lazy<CrcTables> = Lazy::new(CrcTables::build);

/// Addresses already reported as lacking checksum constants.
static REPORTED: Lazy<Mutex<HashSet<u32>>> = Lazy::new(Default::default);

/// True the first time `address` is reported in this process.
pub(crate) fn first_report(address: u32) -> bool {
    REPORTED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(address)
}

/// Build the lookup tables now instead of on the first checksum.
///
/// Idempotent; call it during start-up to keep table construction off the
/// frame path.
pub fn init_lookup_tables() -> &'static CrcTables {
    Lazy::force(&CRC_TABLES)
}

fn crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u8;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
        *entry = crc;
    }
    table
}

fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = (i as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
        *entry = crc;
    }
    table
}

/// Expected checksum for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumOutcome {
    /// Computed with every constant the algorithm needs.
    Computed(u64),
    /// The algorithm has no constants for this input (unknown address or
    /// payload length) and substituted zeros. Genuine traffic will not match.
    Placeholder(u64),
}

impl ChecksumOutcome {
    pub fn value(self) -> u64 {
        match self {
            ChecksumOutcome::Computed(v) | ChecksumOutcome::Placeholder(v) => v,
        }
    }

    pub fn is_placeholder(self) -> bool {
        matches!(self, ChecksumOutcome::Placeholder(_))
    }
}

/// Dispatches a checksum signal to its algorithm.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumEngine<'t> {
    tables: &'t CrcTables,
}

impl Default for ChecksumEngine<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumEngine<'static> {
    /// Engine backed by the process-wide tables.
    pub fn new() -> Self {
        Self {
            tables: init_lookup_tables(),
        }
    }
}

impl<'t> ChecksumEngine<'t> {
    pub fn with_tables(tables: &'t CrcTables) -> Self {
        Self { tables }
    }

    /// Expected value of `signal` for `data` sent on `address`.
    ///
    /// Returns `None` when the signal is not a checksum.
    pub fn compute(&self, address: u32, signal: &SignalSpec, data: &[u8]) -> Option<ChecksumOutcome> {
        let outcome = match signal.role {
            SignalRole::Default | SignalRole::Counter => return None,
            SignalRole::NibbleSum => ChecksumOutcome::Computed(nibble_sum(address, data)),
            SignalRole::ByteSum => ChecksumOutcome::Computed(byte_sum(address, data)),
            SignalRole::SkipFirstByteSum => {
                ChecksumOutcome::Computed(skip_first_byte_sum(address, data))
            }
            SignalRole::BitSerialXor => ChecksumOutcome::Computed(bit_serial_xor(data)),
            SignalRole::Crc8Autosar => self.crc8_autosar(address, data),
            SignalRole::XorChecksum => ChecksumOutcome::Computed(xor_checksum(signal, data)),
            SignalRole::Crc8Reverse => ChecksumOutcome::Computed(crc8_reverse(data)),
            SignalRole::Crc16Xmodem => self.crc16_xmodem(address, data),
            SignalRole::AddressSum => ChecksumOutcome::Computed(address_sum(address, signal, data)),
        };
        Some(outcome)
    }

    /// CRC-8/AUTOSAR over everything but byte 0, finished with a magic pad
    /// byte chosen by address and by the counter in the low nibble of byte 1.
    fn crc8_autosar(&self, address: u32, data: &[u8]) -> ChecksumOutcome {
        let lut = &self.tables.crc8_autosar;
        let mut crc: u8 = 0xFF;
        for &byte in data.iter().skip(1) {
            crc = lut[(crc ^ byte) as usize];
        }

        let counter = data.get(1).map_or(0, |b| b & 0x0F) as usize;
        let (pad, known) = match volkswagen_pad(address) {
            Some(pads) => (pads[counter], true),
            None => {
                if first_report(address) {
                    warn!("checksum requested for undefined Volkswagen message 0x{address:X}");
                } else {
                    debug!("0x{address:X}: placeholder Volkswagen checksum");
                }
                (0, false)
            }
        };
        crc = lut[(crc ^ pad) as usize];
        let value = u64::from(crc ^ 0xFF);

        if known {
            ChecksumOutcome::Computed(value)
        } else {
            ChecksumOutcome::Placeholder(value)
        }
    }

    /// CRC-16/XMODEM over bytes 2.., then the two low address bytes, finished
    /// with a constant chosen by payload length.
    fn crc16_xmodem(&self, address: u32, data: &[u8]) -> ChecksumOutcome {
        let lut = &self.tables.crc16_xmodem;
        let step = |crc: u16, byte: u8| (crc << 8) ^ lut[((crc >> 8) as u8 ^ byte) as usize];

        let mut crc = data.iter().skip(2).fold(0u16, |crc, &b| step(crc, b));
        crc = step(crc, (address & 0xFF) as u8);
        crc = step(crc, ((address >> 8) & 0xFF) as u8);

        let final_xor = match data.len() {
            8 => 0x5F29,
            16 => 0x041D,
            24 => 0x819D,
            32 => 0x9F5B,
            len => {
                if first_report(address) {
                    warn!("no CRC-16 final XOR for {len} byte message 0x{address:X}");
                } else {
                    debug!("0x{address:X}: placeholder CRC-16 for {len} bytes");
                }
                return ChecksumOutcome::Placeholder(u64::from(crc));
            }
        };
        ChecksumOutcome::Computed(u64::from(crc ^ final_xor))
    }
}

/// Honda: nibble sum of the address and of every payload nibble except the
/// checksum nibble (low nibble of the last byte).
fn nibble_sum(address: u32, data: &[u8]) -> u64 {
    let extended = address > MAX_STANDARD_ADDRESS;
    let mut sum: i64 = 0;
    let mut addr = address;
    while addr != 0 {
        sum += i64::from(addr & 0xF);
        addr >>= 4;
    }
    for (i, &byte) in data.iter().enumerate() {
        let byte = if i == data.len() - 1 { byte >> 4 } else { byte };
        sum += i64::from(byte & 0xF) + i64::from(byte >> 4);
    }
    let mut checksum = 8 - sum;
    if extended {
        checksum += 3;
    }
    (checksum & 0xF) as u64
}

/// Toyota: payload length plus address bytes plus every payload byte but the
/// last.
fn byte_sum(address: u32, data: &[u8]) -> u64 {
    let mut sum = data.len() as u64;
    let mut addr = address;
    while addr != 0 {
        sum += u64::from(addr & 0xFF);
        addr >>= 8;
    }
    let body = &data[..data.len().saturating_sub(1)];
    sum += body.iter().map(|&b| u64::from(b)).sum::<u64>();
    sum & 0xFF
}

/// Subaru: address bytes plus every payload byte after the first.
fn skip_first_byte_sum(address: u32, data: &[u8]) -> u64 {
    let mut sum: u64 = 0;
    let mut addr = address;
    while addr != 0 {
        sum += u64::from(addr & 0xFF);
        addr >>= 8;
    }
    sum += data.iter().skip(1).map(|&b| u64::from(b)).sum::<u64>();
    sum & 0xFF
}

/// Chrysler: bit-serial scrambler over all but the last byte, MSB first.
///
/// The branch conditions and masks are reverse engineered; keep them as is.
fn bit_serial_xor(data: &[u8]) -> u64 {
    let mut checksum: u8 = 0xFF;
    let body = &data[..data.len().saturating_sub(1)];
    for &current in body {
        let mut shift: u8 = 0x80;
        for _ in 0..8 {
            let mut bit_sum = current & shift;
            let mut temp_chk = checksum & 0x80;
            if bit_sum != 0 {
                bit_sum = 0x1C;
                if temp_chk != 0 {
                    bit_sum = 1;
                }
                checksum <<= 1;
                temp_chk = checksum | 1;
                bit_sum ^= temp_chk;
            } else {
                if temp_chk != 0 {
                    bit_sum = 0x1D;
                }
                checksum <<= 1;
                bit_sum ^= checksum;
            }
            checksum = bit_sum;
            shift >>= 1;
        }
    }
    u64::from(!checksum)
}

/// XOR of every byte except the one the checksum signal lives in.
fn xor_checksum(signal: &SignalSpec, data: &[u8]) -> u64 {
    let checksum_byte = (signal.start_bit / 8) as usize;
    let checksum = data
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != checksum_byte)
        .fold(0u8, |acc, (_, &b)| acc ^ b);
    u64::from(checksum)
}

/// CRC-8 poly 0xD5, seed 0xFF, fed from the second-to-last byte back to the
/// first. No final XOR.
fn crc8_reverse(data: &[u8]) -> u64 {
    let body = &data[..data.len().saturating_sub(1)];
    u64::from(crc8_bitwise(CRC8_REVERSE_POLY, 0xFF, body.iter().rev().copied()))
}

/// Tesla: low and second address bytes plus every non-checksum byte.
fn address_sum(address: u32, signal: &SignalSpec, data: &[u8]) -> u64 {
    let checksum_byte = (signal.start_bit / 8) as usize;
    let mut checksum = ((address & 0xFF) as u8).wrapping_add(((address >> 8) & 0xFF) as u8);
    for (i, &byte) in data.iter().enumerate() {
        if i != checksum_byte {
            checksum = checksum.wrapping_add(byte);
        }
    }
    u64::from(checksum)
}

fn crc8_bitwise(poly: u8, init: u8, bytes: impl Iterator<Item = u8>) -> u8 {
    let mut crc = init;
    for byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Final CRC pad bytes for Volkswagen MQB messages, indexed by counter.
fn volkswagen_pad(address: u32) -> Option<&'static [u8; 16]> {
    const fn flat(byte: u8) -> [u8; 16] {
        [byte; 16]
    }
    static LWI_01: [u8; 16] = flat(0x86);
    static LH_EPS_03: [u8; 16] = flat(0xF5);
    static GETRIEBE_11: [u8; 16] = [
        0x3F, 0x69, 0x39, 0xDC, 0x94, 0xF9, 0x14, 0x64, 0xD8, 0x6A, 0x34, 0xCE, 0xA2, 0x55, 0xB5,
        0x2C,
    ];
    static ESP_21: [u8; 16] = [
        0xB4, 0xEF, 0xF8, 0x49, 0x1E, 0xE5, 0xC2, 0xC0, 0x97, 0x19, 0x3C, 0xC9, 0xF1, 0x98, 0xD6,
        0x61,
    ];
    static ESP_05: [u8; 16] = flat(0x07);
    static ACC_10: [u8; 16] = flat(0x16);
    static TSK_06: [u8; 16] = [
        0xC4, 0xE2, 0x4F, 0xE4, 0xF8, 0x2F, 0x56, 0x81, 0x9F, 0xE5, 0x83, 0x44, 0x05, 0x3F, 0x97,
        0xDF,
    ];
    static MOTOR_20: [u8; 16] = [
        0xE9, 0x65, 0xAE, 0x6B, 0x7B, 0x35, 0xE5, 0x5F, 0x4E, 0xC7, 0x86, 0xA2, 0xBB, 0xDD, 0xEB,
        0xB4,
    ];
    static ACC_06: [u8; 16] = [
        0x37, 0x7D, 0xF3, 0xA9, 0x18, 0x46, 0x6D, 0x4D, 0x3D, 0x71, 0x92, 0x9C, 0xE5, 0x32, 0x10,
        0xB9,
    ];
    static HCA_01: [u8; 16] = flat(0xDA);
    static GRA_ACC_01: [u8; 16] = [
        0x6A, 0x38, 0xB4, 0x27, 0x22, 0xEF, 0xE1, 0xBB, 0xF8, 0x80, 0x84, 0x49, 0xC7, 0x9E, 0x1E,
        0x2B,
    ];
    static ACC_07: [u8; 16] = [
        0xF8, 0xE5, 0x97, 0xC9, 0xD6, 0x07, 0x47, 0x21, 0x66, 0xDD, 0xCF, 0x6F, 0xA1, 0x94, 0x74,
        0x63,
    ];
    static EV_GEARSHIFT: [u8; 16] = [
        0x7F, 0xED, 0x17, 0xC2, 0x7C, 0xEB, 0x44, 0x21, 0x01, 0xFA, 0xDB, 0x15, 0x4A, 0x6B, 0x23,
        0x05,
    ];
    static ACC_02: [u8; 16] = flat(0x0F);
    static SWA_01: [u8; 16] = flat(0x0C);
    static ACC_04: [u8; 16] = flat(0x27);
    static KLEMMEN_STATUS_01: [u8; 16] = flat(0xC3);
    static ESP_20: [u8; 16] = [
        0xAC, 0xB3, 0xAB, 0xEB, 0x7A, 0xE1, 0x3B, 0xF7, 0x73, 0xBA, 0x7C, 0x9E, 0x06, 0x5F, 0x02,
        0xD9,
    ];

    let pads = match address {
        0x86 => &LWI_01,
        0x9F => &LH_EPS_03,
        0xAD => &GETRIEBE_11,
        0xFD => &ESP_21,
        0x106 => &ESP_05,
        0x117 => &ACC_10,
        0x120 => &TSK_06,
        0x121 => &MOTOR_20,
        0x122 => &ACC_06,
        0x126 => &HCA_01,
        0x12B => &GRA_ACC_01,
        0x12E => &ACC_07,
        0x187 => &EV_GEARSHIFT,
        0x30C => &ACC_02,
        0x30F => &SWA_01,
        0x324 => &ACC_04,
        0x3C0 => &KLEMMEN_STATUS_01,
        0x65D => &ESP_20,
        _ => return None,
    };
    Some(pads)
}
