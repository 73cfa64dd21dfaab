/*!
 * Parser configuration: which messages to watch on a bus, how often they are
 * expected, and which signals callers read.
 */

use serde::{Deserialize, Serialize};

/// Number of expected periods a message may be missing before it is stale.
pub const CHECK_PERIODS: f64 = 10.0;

/// Check threshold in nanoseconds for a message expected at `frequency_hz`.
///
/// A zero, negative or non-finite frequency means the message is never
/// checked for timeouts and yields 0.
pub fn check_threshold_from_frequency(frequency_hz: f64) -> u64 {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return 0;
    }
    (CHECK_PERIODS * 1e9 / frequency_hz).round() as u64
}

/// Configuration for one [`crate::CanParser`].
///
/// # Example JSON
/// ```json
/// {
///     "bus": 0,
///     "messages": [{ "address": 422, "frequency_hz": 50.0 }],
///     "signals": [{ "address": 422, "name": "SPEED", "default": 0.0 }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Bus index frames must arrive on.
    #[serde(default)]
    pub bus: u8,

    /// Messages to track, with their expected rate.
    #[serde(default)]
    pub messages: Vec<MessageCheck>,

    /// Signals callers want to read. A tracked message without any entry
    /// here has all of its signals decoded.
    #[serde(default)]
    pub signals: Vec<SignalRequest>,

    /// Skip checksum validation on every message.
    #[serde(default)]
    pub ignore_checksum: bool,

    /// Skip counter validation on every message.
    #[serde(default)]
    pub ignore_counter: bool,
}

impl ParserConfig {
    pub fn new(bus: u8) -> Self {
        Self {
            bus,
            ..Default::default()
        }
    }

    /// Track `address`, expected at `frequency_hz` (0 disables timeouts).
    pub fn message(mut self, address: u32, frequency_hz: f64) -> Self {
        self.messages.push(MessageCheck::new(address, frequency_hz));
        self
    }

    /// Track `address` with an explicit timeout.
    pub fn message_with_threshold(mut self, address: u32, threshold_ns: u64) -> Self {
        self.messages.push(MessageCheck {
            threshold_ns: Some(threshold_ns),
            ..MessageCheck::new(address, 0.0)
        });
        self
    }

    /// Request a signal and the value it reads as before the first frame.
    pub fn signal(mut self, address: u32, name: impl Into<String>, default: f64) -> Self {
        self.signals.push(SignalRequest {
            address,
            name: name.into(),
            default,
        });
        self
    }

    pub fn ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    pub fn ignore_counter(mut self, ignore: bool) -> Self {
        self.ignore_counter = ignore;
        self
    }
}

/// Expected rate and integrity options for one message address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCheck {
    pub address: u32,

    /// Expected transmit rate. 0 means the message never times out.
    #[serde(default)]
    pub frequency_hz: f64,

    /// Overrides the threshold derived from `frequency_hz`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_ns: Option<u64>,

    #[serde(default)]
    pub ignore_checksum: bool,

    #[serde(default)]
    pub ignore_counter: bool,
}

impl MessageCheck {
    pub fn new(address: u32, frequency_hz: f64) -> Self {
        Self {
            address,
            frequency_hz,
            threshold_ns: None,
            ignore_checksum: false,
            ignore_counter: false,
        }
    }

    /// Staleness threshold in nanoseconds; 0 disables the check.
    pub fn check_threshold_ns(&self) -> u64 {
        self.threshold_ns
            .unwrap_or_else(|| check_threshold_from_frequency(self.frequency_hz))
    }
}

/// One signal a caller wants to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub address: u32,
    pub name: String,
    #[serde(default)]
    pub default: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_ten_periods() {
        assert_eq!(check_threshold_from_frequency(100.0), 100_000_000);
        assert_eq!(check_threshold_from_frequency(50.0), 200_000_000);
        assert_eq!(check_threshold_from_frequency(1.0), 10_000_000_000);
        assert_eq!(check_threshold_from_frequency(0.0), 0);
        assert_eq!(check_threshold_from_frequency(-5.0), 0);
        assert_eq!(check_threshold_from_frequency(f64::NAN), 0);
    }

    #[test]
    fn test_explicit_threshold_wins() {
        let config = ParserConfig::new(1)
            .message(0x1A6, 100.0)
            .message_with_threshold(0x2E4, 42);
        assert_eq!(config.bus, 1);
        assert_eq!(config.messages[0].check_threshold_ns(), 100_000_000);
        assert_eq!(config.messages[1].check_threshold_ns(), 42);
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "bus": 2,
            "messages": [
                { "address": 422, "frequency_hz": 50.0 },
                { "address": 740, "threshold_ns": 5000, "ignore_counter": true }
            ],
            "signals": [{ "address": 422, "name": "SPEED" }],
            "ignore_checksum": true
        }"#;
        let config: ParserConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.bus, 2);
        assert!(config.ignore_checksum);
        assert!(!config.ignore_counter);
        assert_eq!(config.messages.len(), 2);
        assert_eq!(config.messages[0].check_threshold_ns(), 200_000_000);
        assert_eq!(config.messages[1].frequency_hz, 0.0);
        assert_eq!(config.messages[1].check_threshold_ns(), 5000);
        assert!(config.messages[1].ignore_counter);
        assert_eq!(config.signals[0].default, 0.0);

        let built = ParserConfig::new(2)
            .message(422, 50.0)
            .signal(422, "SPEED", 0.0);
        assert_eq!(built.signals, config.signals);

        let round_trip: ParserConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }

    #[test]
    fn test_empty_json_is_default() {
        let config: ParserConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ParserConfig::default());
    }
}
