/*!
 * Test registry with one message per checksum family.
 */

use crate::registry::{MessageSpec, Registry, SignalRole, SignalSpec};

pub const HONDA_BUTTONS: u32 = 0x1A6;
pub const HONDA_EXTENDED: u32 = 0x18DA_B0F1;
pub const TOYOTA_STEER: u32 = 0x2E4;
pub const SUBARU_LKAS: u32 = 0x122;
pub const CHRYSLER_LKAS: u32 = 0x292;
pub const VW_HCA: u32 = 0x126;
pub const VW_UNKNOWN: u32 = 0x777;
pub const PQ_HCA: u32 = 0xD0;
pub const PEDAL_GAS: u32 = 0x201;
pub const HKG_LFA: u32 = 0x50;
pub const TESLA_STEER: u32 = 0x488;
pub const PLAIN: u32 = 0x100;

pub fn messages() -> Vec<MessageSpec> {
    vec![
        MessageSpec::new(
            "SCM_BUTTONS",
            HONDA_BUTTONS,
            8,
            vec![
                SignalSpec::big_endian("SPEED", 7, 16).scaled(0.25, 0.0),
                SignalSpec::big_endian("CRUISE_BUTTONS", 23, 3),
                SignalSpec::big_endian("COUNTER", 61, 2).with_role(SignalRole::Counter),
                SignalSpec::big_endian("CHECKSUM", 59, 4).with_role(SignalRole::NibbleSum),
            ],
        ),
        MessageSpec::new(
            "UDS_RESPONSE",
            HONDA_EXTENDED,
            4,
            vec![
                SignalSpec::big_endian("DATA", 7, 8),
                SignalSpec::big_endian("COUNTER", 29, 2).with_role(SignalRole::Counter),
                SignalSpec::big_endian("CHECKSUM", 27, 4).with_role(SignalRole::NibbleSum),
            ],
        ),
        MessageSpec::new(
            "STEERING_LKA",
            TOYOTA_STEER,
            5,
            vec![
                SignalSpec::big_endian("STEER_REQUEST", 0, 1),
                SignalSpec::big_endian("COUNTER", 6, 6).with_role(SignalRole::Counter),
                SignalSpec::big_endian("STEER_TORQUE_CMD", 15, 16).signed(),
                SignalSpec::big_endian("CHECKSUM", 39, 8).with_role(SignalRole::ByteSum),
            ],
        ),
        MessageSpec::new(
            "ES_LKAS",
            SUBARU_LKAS,
            8,
            vec![
                SignalSpec::little_endian("CHECKSUM", 0, 8).with_role(SignalRole::SkipFirstByteSum),
                SignalSpec::little_endian("COUNTER", 8, 4).with_role(SignalRole::Counter),
                SignalSpec::little_endian("LKAS_OUTPUT", 16, 13).signed(),
            ],
        ),
        MessageSpec::new(
            "LKAS_COMMAND",
            CHRYSLER_LKAS,
            6,
            vec![
                SignalSpec::big_endian("STEERING_TORQUE", 7, 11).signed(),
                SignalSpec::big_endian("COUNTER", 35, 4).with_role(SignalRole::Counter),
                SignalSpec::big_endian("CHECKSUM", 47, 8).with_role(SignalRole::BitSerialXor),
            ],
        ),
        MessageSpec::new(
            "HCA_01",
            VW_HCA,
            8,
            vec![
                SignalSpec::little_endian("CHECKSUM", 0, 8).with_role(SignalRole::Crc8Autosar),
                SignalSpec::little_endian("COUNTER", 8, 4).with_role(SignalRole::Counter),
                SignalSpec::little_endian("ASSIST_TORQUE", 16, 14).scaled(0.01, 0.0),
            ],
        ),
        MessageSpec::new(
            "UNLISTED_MQB",
            VW_UNKNOWN,
            8,
            vec![
                SignalSpec::little_endian("CHECKSUM", 0, 8).with_role(SignalRole::Crc8Autosar),
                SignalSpec::little_endian("COUNTER", 8, 4).with_role(SignalRole::Counter),
                SignalSpec::little_endian("DATA", 16, 8),
            ],
        ),
        MessageSpec::new(
            "HCA_1",
            PQ_HCA,
            5,
            vec![
                SignalSpec::little_endian("COUNTER", 0, 4).with_role(SignalRole::Counter),
                SignalSpec::little_endian("DATA", 8, 16),
                SignalSpec::little_endian("DATA2", 24, 8),
                SignalSpec::little_endian("CHECKSUM", 32, 8).with_role(SignalRole::XorChecksum),
            ],
        ),
        MessageSpec::new(
            "GAS_COMMAND",
            PEDAL_GAS,
            6,
            vec![
                SignalSpec::big_endian("GAS_COMMAND", 7, 16).scaled(0.25, -83.3),
                SignalSpec::big_endian("GAS_COMMAND2", 23, 16).scaled(0.5, -83.3),
                SignalSpec::big_endian("ENABLE", 39, 1),
                SignalSpec::big_endian("COUNTER", 35, 4).with_role(SignalRole::Counter),
                SignalSpec::big_endian("CHECKSUM", 47, 8).with_role(SignalRole::Crc8Reverse),
            ],
        ),
        MessageSpec::new(
            "LFA",
            HKG_LFA,
            16,
            vec![
                SignalSpec::little_endian("CHECKSUM", 0, 16).with_role(SignalRole::Crc16Xmodem),
                SignalSpec::little_endian("COUNTER", 16, 8).with_role(SignalRole::Counter),
                SignalSpec::little_endian("TORQUE_REQUEST", 24, 11).signed(),
                SignalSpec::little_endian("LKA_ICON", 120, 2),
            ],
        ),
        MessageSpec::new(
            "DAS_steeringControl",
            TESLA_STEER,
            4,
            vec![
                SignalSpec::big_endian("ANGLE", 6, 15),
                SignalSpec::big_endian("COUNTER", 23, 4).with_role(SignalRole::Counter),
                SignalSpec::big_endian("CHECKSUM", 31, 8).with_role(SignalRole::AddressSum),
            ],
        ),
        MessageSpec::new(
            "PLAIN",
            PLAIN,
            8,
            vec![
                SignalSpec::little_endian("VALUE", 0, 16).signed().scaled(0.5, -10.0),
                SignalSpec::little_endian("FLAG", 16, 1),
            ],
        ),
    ]
}

pub fn registry() -> Registry {
    Registry::new("fixtures", messages()).unwrap()
}
