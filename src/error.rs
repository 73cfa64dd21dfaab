/*!
 * Error types for registry construction, parser configuration and packing.
 *
 * Only configuration mistakes surface here. A frame that fails its checksum,
 * skips a counter value or arrives with the wrong length is not an error: it
 * is dropped by [`crate::MessageState`] and shows up through the failure
 * counters and [`crate::CanParser::bus_valid`].
 */

use thiserror::Error;

/// Errors raised when the calling code and the registry disagree.
#[derive(Debug, Error)]
pub enum Error {
    /// No message with this address exists in the registry.
    #[error("unknown message address 0x{address:X}")]
    UnknownAddress { address: u32 },

    /// No message with this name exists in the registry.
    #[error("unknown message name {0:?}")]
    UnknownMessage(String),

    /// The message exists but has no signal with this name.
    #[error("message 0x{address:X} has no signal named {name:?}")]
    UnknownSignal { address: u32, name: String },

    /// A signal definition is unusable (bad width, bad factor, or its bits
    /// fall outside the message payload).
    #[error("invalid signal {message}.{signal}: {reason}")]
    InvalidSignal {
        message: String,
        signal: String,
        reason: String,
    },

    /// A message definition is unusable.
    #[error("invalid message 0x{address:X}: {reason}")]
    InvalidMessage { address: u32, reason: String },

    /// Two messages in one registry share an address.
    #[error("duplicate message address 0x{0:X}")]
    DuplicateAddress(u32),

    /// Two messages in one registry share a name.
    #[error("duplicate message name {0}")]
    DuplicateName(String),

    /// The integrity signal width does not match what its algorithm produces.
    #[error("checksum signal {message}.{signal} is {actual} bits, expected {expected}")]
    ChecksumSize {
        message: String,
        signal: String,
        actual: u32,
        expected: u32,
    },

    /// The DBC reader rejected the input text.
    #[error("failed to parse DBC: {0}")]
    Dbc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for codec configuration.
pub type Result<T> = std::result::Result<T, Error>;
