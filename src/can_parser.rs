/*!
 * Decodes batches of frames from one bus into per-message state and keeps
 * track of whether the bus as a whole can be trusted.
 */

use std::collections::{BTreeMap, BTreeSet};

use tracing::{trace, warn};

use crate::config::ParserConfig;
use crate::error::{Error, Result};
use crate::frame::CanFrame;
use crate::message_state::{Freshness, MessageState};
use crate::registry::Registry;

/// Time after the first update before missing messages are reported.
const STARTUP_GRACE_NS: u64 = 8_000_000_000;

/// Frame decoder for one bus.
///
/// Owns one [`MessageState`] per configured address; the registry is only
/// borrowed.
#[derive(Debug, Clone)]
pub struct CanParser<'a> {
    registry: &'a Registry,
    bus: u8,
    states: BTreeMap<u32, MessageState<'a>>,
    bus_valid: bool,
    bus_timeout: bool,
    bus_timeout_threshold_ns: u64,
    first_update_ns: Option<u64>,
    last_bus_activity_ns: Option<u64>,
}

impl<'a> CanParser<'a> {
    /// Build a parser for `config.bus` from `registry`.
    ///
    /// Fails when the configuration names an address or signal the registry
    /// does not have, or lists an address twice.
    pub fn new(registry: &'a Registry, config: &ParserConfig) -> Result<Self> {
        let mut states = BTreeMap::new();

        for check in &config.messages {
            let message = registry.message(check.address).ok_or(Error::UnknownAddress {
                address: check.address,
            })?;
            if states.contains_key(&check.address) {
                return Err(Error::InvalidMessage {
                    address: check.address,
                    reason: "configured more than once".to_string(),
                });
            }
            let requested = requested_signals(config, check.address);
            let mut state = MessageState::new(message, &requested, check.check_threshold_ns())?;
            state.ignore_checksum = config.ignore_checksum || check.ignore_checksum;
            state.ignore_counter = config.ignore_counter || check.ignore_counter;
            states.insert(check.address, state);
        }

        // Signals on messages without a rate are tracked but never time out.
        for request in &config.signals {
            if states.contains_key(&request.address) {
                continue;
            }
            let message = registry.message(request.address).ok_or(Error::UnknownAddress {
                address: request.address,
            })?;
            let requested = requested_signals(config, request.address);
            let mut state = MessageState::new(message, &requested, 0)?;
            state.ignore_checksum = config.ignore_checksum;
            state.ignore_counter = config.ignore_counter;
            states.insert(request.address, state);
        }

        let bus_timeout_threshold_ns = states
            .values()
            .map(MessageState::check_threshold_ns)
            .filter(|&t| t > 0)
            .min()
            .unwrap_or(0);

        Ok(Self {
            registry,
            bus: config.bus,
            states,
            bus_valid: false,
            bus_timeout: false,
            bus_timeout_threshold_ns,
            first_update_ns: None,
            last_bus_activity_ns: None,
        })
    }

    /// Feed one batch of frames received up to `now_ns`.
    ///
    /// Returns the addresses that accepted at least one frame. Validity is
    /// recomputed at `now_ns` afterwards. Signal histories only hold values
    /// from this batch.
    pub fn update(&mut self, now_ns: u64, frames: &[CanFrame]) -> BTreeSet<u32> {
        if self.first_update_ns.is_none() {
            self.first_update_ns = Some(now_ns);
        }
        for state in self.states.values_mut() {
            state.clear_history();
        }

        let mut updated = BTreeSet::new();
        for frame in frames {
            if frame.bus != self.bus {
                continue;
            }
            self.last_bus_activity_ns = Some(frame.timestamp_ns);

            let Some(state) = self.states.get_mut(&frame.address) else {
                continue;
            };
            if state.parse(frame.timestamp_ns, frame.payload()) {
                updated.insert(frame.address);
            } else {
                trace!("0x{:X}: frame at {} rejected", frame.address, frame.timestamp_ns);
            }
        }

        self.bus_timeout = match self.last_bus_activity_ns.or(self.first_update_ns) {
            Some(last) => {
                self.bus_timeout_threshold_ns > 0
                    && now_ns.saturating_sub(last) > self.bus_timeout_threshold_ns
            }
            None => false,
        };
        self.update_valid(now_ns);
        updated
    }

    /// Recompute bus validity at `now_ns`: every tracked message with a
    /// check threshold has been seen within it, and no message has hit its
    /// counter or checksum failure ceiling.
    pub fn update_valid(&mut self, now_ns: u64) -> bool {
        let report = self
            .first_update_ns
            .is_some_and(|first| now_ns.saturating_sub(first) >= STARTUP_GRACE_NS);

        let mut valid = true;
        for state in self.states.values() {
            if state.is_valid(now_ns) {
                continue;
            }
            valid = false;
            if self.bus_valid && report {
                match state.freshness(now_ns) {
                    Freshness::Unseen => warn!("0x{:X} MISSING", state.address()),
                    Freshness::Stale => warn!("0x{:X} TIMEOUT", state.address()),
                    Freshness::Fresh => warn!(
                        "0x{:X} INVALID, counter failures {}, checksum failures {}",
                        state.address(),
                        state.counter_fail_count(),
                        state.checksum_fail_count()
                    ),
                }
            }
        }
        self.bus_valid = valid;
        valid
    }

    /// Snapshot of every tracked signal as (address, name, value).
    pub fn query_latest(&self) -> Vec<(u32, &'a str, f64)> {
        self.states
            .iter()
            .flat_map(|(&address, state)| {
                state
                    .signals()
                    .iter()
                    .map(move |s| (address, s.name(), s.value()))
            })
            .collect()
    }

    /// Latest value of one signal.
    pub fn value(&self, address: u32, name: &str) -> Option<f64> {
        self.states.get(&address)?.value(name)
    }

    /// Drain the values every signal accepted during the latest
    /// [`CanParser::update`].
    pub fn take_history(&mut self) -> Vec<(u32, &'a str, Vec<f64>)> {
        let mut history = Vec::new();
        for (&address, state) in self.states.iter_mut() {
            history.extend(
                state
                    .drain_history()
                    .into_iter()
                    .map(|(name, values)| (address, name, values)),
            );
        }
        history
    }

    /// Result of the most recent [`CanParser::update_valid`].
    pub fn bus_valid(&self) -> bool {
        self.bus_valid
    }

    /// No frame on this bus within the shortest configured threshold.
    pub fn bus_timeout(&self) -> bool {
        self.bus_timeout
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn state(&self, address: u32) -> Option<&MessageState<'a>> {
        self.states.get(&address)
    }

    pub fn states(&self) -> impl Iterator<Item = &MessageState<'a>> {
        self.states.values()
    }
}

fn requested_signals(config: &ParserConfig, address: u32) -> Vec<(&str, f64)> {
    config
        .signals
        .iter()
        .filter(|s| s.address == address)
        .map(|s| (s.name.as_str(), s.default))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can_packer::CanPacker;
    use crate::canlog_reader::CanLogParser;
    use crate::fixtures;

    const MS: u64 = 1_000_000;

    fn frame(packer: &CanPacker, address: u32, values: &[(&str, f64)], counter: u64, t: u64) -> CanFrame {
        packer.pack_frame(address, values, counter, 0, t).unwrap()
    }

    #[test]
    fn test_rejects_unknown_configuration() {
        let registry = fixtures::registry();

        let config = ParserConfig::new(0).message(0x7FF, 100.0);
        assert!(matches!(
            CanParser::new(&registry, &config),
            Err(Error::UnknownAddress { address: 0x7FF })
        ));

        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 100.0)
            .signal(fixtures::PLAIN, "MISSING", 0.0);
        assert!(matches!(
            CanParser::new(&registry, &config),
            Err(Error::UnknownSignal { .. })
        ));

        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 100.0)
            .message(fixtures::PLAIN, 50.0);
        assert!(CanParser::new(&registry, &config).is_err());
    }

    #[test]
    fn test_update_decodes_and_reports_addresses() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 100.0)
            .message(fixtures::HONDA_BUTTONS, 100.0)
            .signal(fixtures::HONDA_BUTTONS, "SPEED", 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let frames = [
            frame(&packer, fixtures::PLAIN, &[("VALUE", 12.5), ("FLAG", 1.0)], 0, 10 * MS),
            frame(&packer, fixtures::HONDA_BUTTONS, &[("SPEED", 30.25)], 0, 11 * MS),
            frame(&packer, fixtures::TESLA_STEER, &[], 0, 12 * MS), // not tracked
        ];
        let updated = parser.update(12 * MS, &frames);

        assert_eq!(updated, BTreeSet::from([fixtures::PLAIN, fixtures::HONDA_BUTTONS]));
        assert_eq!(parser.value(fixtures::PLAIN, "VALUE"), Some(12.5));
        assert_eq!(parser.value(fixtures::PLAIN, "FLAG"), Some(1.0));
        assert_eq!(parser.value(fixtures::HONDA_BUTTONS, "SPEED"), Some(30.25));
        assert!(parser.state(fixtures::TESLA_STEER).is_none());
        assert!(parser.bus_valid());
        assert!(!parser.bus_timeout());

        let latest = parser.query_latest();
        assert!(latest.contains(&(fixtures::HONDA_BUTTONS, "SPEED", 30.25)));
        assert!(latest.contains(&(fixtures::PLAIN, "VALUE", 12.5)));
        // SPEED plus the two integrity signals, and both PLAIN signals.
        assert_eq!(latest.len(), 5);
    }

    #[test]
    fn test_frames_on_other_bus_are_ignored() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(1).message(fixtures::PLAIN, 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let on_bus_0 = frame(&packer, fixtures::PLAIN, &[("VALUE", 1.0)], 0, 0);
        let on_bus_1 = packer
            .pack_frame(fixtures::PLAIN, &[("VALUE", 2.0)], 0, 1, 0)
            .unwrap();

        assert!(parser.update(0, &[on_bus_0]).is_empty());
        assert_eq!(parser.value(fixtures::PLAIN, "VALUE"), Some(0.0));
        assert_eq!(parser.update(0, &[on_bus_1]).len(), 1);
        assert_eq!(parser.value(fixtures::PLAIN, "VALUE"), Some(2.0));
    }

    #[test]
    fn test_wrong_length_frame_dropped() {
        let registry = fixtures::registry();
        let config = ParserConfig::new(0).message(fixtures::PLAIN, 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let short = CanFrame::new(0, 0, fixtures::PLAIN, &[0x14, 0x00, 0x01]).unwrap();
        assert!(parser.update(0, &[short]).is_empty());
        assert_eq!(parser.state(fixtures::PLAIN).unwrap().last_seen_ns(), None);
    }

    #[test]
    fn test_bus_valid_tracks_timeouts() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        // 100 Hz: stale after 100 ms.
        let config = ParserConfig::new(0).message(fixtures::HONDA_BUTTONS, 100.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        assert!(!parser.bus_valid());
        parser.update(0, &[]);
        assert!(!parser.bus_valid(), "unseen message with a rate");

        let t0 = 1_000 * MS;
        let frames = [frame(&packer, fixtures::HONDA_BUTTONS, &[], 0, t0)];
        parser.update(t0, &frames);
        assert!(parser.bus_valid());

        assert!(parser.update_valid(t0 + 99 * MS));
        assert!(!parser.update_valid(t0 + 101 * MS));
        assert!(!parser.bus_valid());

        let frames = [frame(&packer, fixtures::HONDA_BUTTONS, &[], 1, t0 + 150 * MS)];
        parser.update(t0 + 150 * MS, &frames);
        assert!(parser.bus_valid());
    }

    #[test]
    fn test_message_without_rate_never_times_out() {
        let registry = fixtures::registry();
        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 0.0)
            .signal(fixtures::TESLA_STEER, "ANGLE", 5.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        parser.update(10_000 * MS, &[]);
        assert!(parser.bus_valid());
        assert!(!parser.bus_timeout());
        assert_eq!(parser.value(fixtures::TESLA_STEER, "ANGLE"), Some(5.0));
        assert_eq!(parser.state(fixtures::TESLA_STEER).unwrap().check_threshold_ns(), 0);
    }

    #[test]
    fn test_checksum_failures_invalidate_bus() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0).message(fixtures::TOYOTA_STEER, 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        for counter in 0..5u64 {
            let mut bad = frame(&packer, fixtures::TOYOTA_STEER, &[], counter, counter);
            bad.data[4] ^= 0xFF;
            assert!(parser.update(counter, &[bad]).is_empty());
        }
        assert!(!parser.bus_valid());
        assert_eq!(
            parser.state(fixtures::TOYOTA_STEER).unwrap().checksum_fail_count(),
            crate::message_state::MAX_BAD_COUNTER
        );

        // Five good frames bring the failure count back down to zero.
        for counter in 5..10u64 {
            let good = frame(&packer, fixtures::TOYOTA_STEER, &[], counter, counter);
            assert_eq!(parser.update(counter, &[good]).len(), 1);
        }
        assert!(parser.bus_valid());
    }

    #[test]
    fn test_counter_skips_invalidate_bus() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0).message(fixtures::SUBARU_LKAS, 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        // Every frame repeats counter 3.
        for t in 0..6u64 {
            let frames = [frame(&packer, fixtures::SUBARU_LKAS, &[("LKAS_OUTPUT", -100.0)], 3, t)];
            parser.update(t, &frames);
        }
        assert!(!parser.bus_valid());
        assert_eq!(parser.value(fixtures::SUBARU_LKAS, "LKAS_OUTPUT"), Some(-100.0));

        let config = config.ignore_counter(true);
        let mut parser = CanParser::new(&registry, &config).unwrap();
        for t in 0..6u64 {
            let frames = [frame(&packer, fixtures::SUBARU_LKAS, &[], 3, t)];
            assert_eq!(parser.update(t, &frames).len(), 1);
        }
        assert!(parser.bus_valid());
    }

    #[test]
    fn test_unlisted_volkswagen_address_never_validates() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0).message(fixtures::VW_UNKNOWN, 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        for counter in 0..6u64 {
            let frames = [frame(&packer, fixtures::VW_UNKNOWN, &[("DATA", 7.0)], counter, counter)];
            assert!(parser.update(counter, &frames).is_empty());
        }
        assert!(!parser.bus_valid());
        assert_eq!(parser.value(fixtures::VW_UNKNOWN, "DATA"), Some(0.0));
    }

    #[test]
    fn test_bus_timeout_uses_shortest_threshold() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 10.0) // 1 s
            .message(fixtures::HONDA_BUTTONS, 100.0); // 100 ms
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let frames = [frame(&packer, fixtures::PLAIN, &[], 0, 0)];
        parser.update(0, &frames);
        assert!(!parser.bus_timeout());
        parser.update(100 * MS, &[]);
        assert!(!parser.bus_timeout());
        parser.update(101 * MS, &[]);
        assert!(parser.bus_timeout());

        let frames = [frame(&packer, fixtures::PLAIN, &[], 0, 120 * MS)];
        parser.update(120 * MS, &frames);
        assert!(!parser.bus_timeout());
    }

    #[test]
    fn test_take_history_drains() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 0.0)
            .signal(fixtures::PLAIN, "VALUE", 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let frames: Vec<CanFrame> = [1.0, 2.5, -3.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| frame(&packer, fixtures::PLAIN, &[("VALUE", v)], 0, i as u64))
            .collect();
        parser.update(3, &frames);

        let history = parser.take_history();
        assert_eq!(history, vec![(fixtures::PLAIN, "VALUE", vec![1.0, 2.5, -3.0])]);
        let history = parser.take_history();
        assert_eq!(history, vec![(fixtures::PLAIN, "VALUE", vec![])]);
    }

    #[test]
    fn test_history_holds_only_latest_batch() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);
        let config = ParserConfig::new(0)
            .message(fixtures::PLAIN, 0.0)
            .signal(fixtures::PLAIN, "VALUE", 0.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        let first = [
            frame(&packer, fixtures::PLAIN, &[("VALUE", 1.0)], 0, 1),
            frame(&packer, fixtures::PLAIN, &[("VALUE", 2.0)], 0, 2),
        ];
        parser.update(2, &first);
        let second = [frame(&packer, fixtures::PLAIN, &[("VALUE", 7.5)], 0, 3)];
        parser.update(3, &second);

        let history = parser.take_history();
        assert_eq!(history, vec![(fixtures::PLAIN, "VALUE", vec![7.5])]);

        // A batch with nothing for the message empties its history too.
        parser.update(4, &second);
        parser.update(5, &[]);
        assert_eq!(parser.take_history(), vec![(fixtures::PLAIN, "VALUE", vec![])]);
        assert_eq!(parser.value(fixtures::PLAIN, "VALUE"), Some(7.5));
    }

    #[test]
    fn test_replay_candump_log() {
        let registry = fixtures::registry();
        let packer = CanPacker::new(&registry);

        let mut log = String::new();
        for counter in 0..10u64 {
            let data = packer
                .pack(fixtures::HONDA_BUTTONS, &[("SPEED", counter as f64)], counter)
                .unwrap();
            let hex: String = data.iter().map(|b| format!("{b:02X}")).collect();
            log.push_str(&format!("(100.{:06}) can0 1A6#{hex}\n", counter * 10_000));
        }

        let config = ParserConfig::new(0)
            .message(fixtures::HONDA_BUTTONS, 100.0)
            .signal(fixtures::HONDA_BUTTONS, "SPEED", -1.0);
        let mut parser = CanParser::new(&registry, &config).unwrap();

        for frame in CanLogParser::from_bytes(log.into_bytes()) {
            let updated = parser.update(frame.timestamp_ns, std::slice::from_ref(&frame));
            assert!(updated.contains(&fixtures::HONDA_BUTTONS));
            assert!(parser.bus_valid());
        }
        assert_eq!(parser.value(fixtures::HONDA_BUTTONS, "SPEED"), Some(9.0));
        let state = parser.state(fixtures::HONDA_BUTTONS).unwrap();
        assert_eq!(state.last_seen_ns(), Some(100_090_000_000));
        assert_eq!(state.counter_fail_count(), 0);
    }
}
