/*!
 * Per-address decode state: latest values, freshness and integrity tracking.
 */

use tracing::{debug, trace, warn};

use crate::checksum::{ChecksumEngine, ChecksumOutcome};
use crate::error::{Error, Result};
use crate::registry::{MessageSpec, SignalRole, SignalSpec};
use crate::signal_layout::{physical_value, raw_mask, SignalLayout};

/// Failure count at which a message stops being trusted.
pub const MAX_BAD_COUNTER: u32 = 5;

/// Where a message stands relative to its check threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No frame has been accepted yet.
    Unseen,
    /// Last accepted frame is within the check threshold (or there is no threshold).
    Fresh,
    /// Last accepted frame is older than the check threshold.
    Stale,
}

/// One decoded signal and what has been accepted for it.
#[derive(Debug, Clone)]
pub struct TrackedSignal<'a> {
    pub spec: &'a SignalSpec,
    layout: SignalLayout,
    value: f64,
    history: Vec<f64>,
}

impl<'a> TrackedSignal<'a> {
    fn new(spec: &'a SignalSpec, default: f64) -> Self {
        Self {
            spec,
            layout: SignalLayout::from_spec(spec),
            value: default,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &'a str {
        &self.spec.name
    }

    /// Most recently accepted physical value, or the default before any frame.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Values accepted in the current batch, oldest first.
    pub fn history(&self) -> &[f64] {
        &self.history
    }
}

/// Decode and integrity state for one tracked message address.
#[derive(Debug, Clone)]
pub struct MessageState<'a> {
    message: &'a MessageSpec,
    signals: Vec<TrackedSignal<'a>>,
    checksum_index: Option<usize>,
    counter_index: Option<usize>,
    engine: ChecksumEngine<'static>,
    last_seen_ns: Option<u64>,
    check_threshold_ns: u64,
    counter_value: Option<u64>,
    counter_fail_count: u32,
    checksum_fail_count: u32,
    pub ignore_checksum: bool,
    pub ignore_counter: bool,
}

impl<'a> MessageState<'a> {
    /// Track `requested` signals (name, default value) of `message`.
    ///
    /// An empty request list tracks every signal. The checksum and counter
    /// signals are always decoded. A `check_threshold_ns` of zero disables
    /// the timeout check.
    pub fn new(
        message: &'a MessageSpec,
        requested: &[(&str, f64)],
        check_threshold_ns: u64,
    ) -> Result<Self> {
        let mut signals: Vec<TrackedSignal<'a>> = Vec::new();
        if requested.is_empty() {
            signals.extend(message.signals.iter().map(|s| TrackedSignal::new(s, 0.0)));
        } else {
            for &(name, default) in requested {
                let spec = message.signal(name).ok_or_else(|| Error::UnknownSignal {
                    address: message.address,
                    name: name.to_string(),
                })?;
                if !signals.iter().any(|t| t.name() == name) {
                    signals.push(TrackedSignal::new(spec, default));
                }
            }
            let integrity = message
                .signals
                .iter()
                .filter(|s| s.role != SignalRole::Default);
            for spec in integrity {
                if !signals.iter().any(|t| t.name() == spec.name) {
                    signals.push(TrackedSignal::new(spec, 0.0));
                }
            }
        }

        let checksum_index = signals.iter().position(|t| t.spec.role.is_checksum());
        let counter_index = signals
            .iter()
            .position(|t| t.spec.role == SignalRole::Counter);

        Ok(Self {
            message,
            signals,
            checksum_index,
            counter_index,
            engine: ChecksumEngine::new(),
            last_seen_ns: None,
            check_threshold_ns,
            counter_value: None,
            counter_fail_count: 0,
            checksum_fail_count: 0,
            ignore_checksum: false,
            ignore_counter: false,
        })
    }

    /// Decode one frame payload received at `timestamp_ns`.
    ///
    /// Returns true when the frame was accepted into state. Frames with the
    /// wrong length or a bad checksum are discarded, as are counter mismatches
    /// once the counter failure count is at its ceiling.
    pub fn parse(&mut self, timestamp_ns: u64, data: &[u8]) -> bool {
        let address = self.message.address;
        if data.len() != self.message.byte_length {
            trace!(
                "0x{address:X}: dropping {} byte frame, expected {}",
                data.len(),
                self.message.byte_length
            );
            return false;
        }

        let mut raws = Vec::with_capacity(self.signals.len());
        for signal in &self.signals {
            match signal.layout.extract(data) {
                Some(raw) => raws.push(raw),
                None => return false,
            }
        }

        let mut checksum_failed = false;
        if let Some(i) = self.checksum_index {
            if !self.ignore_checksum {
                let spec = self.signals[i].spec;
                // A placeholder never validates, even if the sender used the
                // same zero padding.
                let ok = match self.engine.compute(address, spec, data) {
                    Some(ChecksumOutcome::Computed(expected)) => expected == raws[i],
                    Some(ChecksumOutcome::Placeholder(_)) | None => false,
                };
                checksum_failed = !self.update_checksum(ok);
            }
        }

        let mut counter_failed = false;
        if let Some(i) = self.counter_index {
            if !self.ignore_counter {
                let bits = self.signals[i].spec.bit_length;
                counter_failed = !self.update_counter(raws[i], bits);
            }
        }

        if checksum_failed || counter_failed {
            debug!(
                "0x{address:X} message checks failed, checksum failed {checksum_failed}, counter failed {counter_failed}"
            );
            return false;
        }

        for (signal, raw) in self.signals.iter_mut().zip(raws) {
            signal.value = physical_value(raw, signal.spec);
            signal.history.push(signal.value);
        }
        self.last_seen_ns = Some(timestamp_ns);
        true
    }

    /// Record one checksum comparison. Returns false if the frame must be
    /// dropped.
    fn update_checksum(&mut self, ok: bool) -> bool {
        if ok {
            self.checksum_fail_count = self.checksum_fail_count.saturating_sub(1);
            return true;
        }
        let was = self.checksum_fail_count;
        self.checksum_fail_count = (was + 1).min(MAX_BAD_COUNTER);
        if self.checksum_fail_count == MAX_BAD_COUNTER && was < MAX_BAD_COUNTER {
            warn!("0x{:X} CHECKSUM FAIL #{}", self.message.address, self.checksum_fail_count);
        }
        false
    }

    /// Compare a counter observation against `(previous + 1) mod 2^bits`.
    ///
    /// The first observation seeds the sequence. Returns false while the
    /// failure count is at its ceiling.
    pub fn update_counter_generic(&mut self, value: u64, bits: u32) -> bool {
        self.update_counter(value, bits)
    }

    fn update_counter(&mut self, value: u64, bits: u32) -> bool {
        if let Some(previous) = self.counter_value {
            if previous.wrapping_add(1) & raw_mask(bits) != value {
                self.counter_fail_count = (self.counter_fail_count + 1).min(MAX_BAD_COUNTER);
                if self.counter_fail_count > 1 {
                    warn!(
                        "0x{:X} COUNTER FAIL #{} -- {previous} -> {value}",
                        self.message.address, self.counter_fail_count
                    );
                }
            } else {
                self.counter_fail_count = self.counter_fail_count.saturating_sub(1);
            }
        }
        self.counter_value = Some(value);
        self.counter_fail_count < MAX_BAD_COUNTER
    }

    pub fn freshness(&self, now_ns: u64) -> Freshness {
        match self.last_seen_ns {
            None => Freshness::Unseen,
            Some(seen) if self.check_threshold_ns > 0
                && now_ns.saturating_sub(seen) > self.check_threshold_ns =>
            {
                Freshness::Stale
            }
            Some(_) => Freshness::Fresh,
        }
    }

    /// Whether this message lets the bus be reported valid at `now_ns`.
    pub fn is_valid(&self, now_ns: u64) -> bool {
        let timed_out = self.check_threshold_ns > 0 && self.freshness(now_ns) != Freshness::Fresh;
        !timed_out && !self.integrity_failed()
    }

    /// Counter or checksum failures have reached the ceiling.
    pub fn integrity_failed(&self) -> bool {
        self.counter_fail_count >= MAX_BAD_COUNTER || self.checksum_fail_count >= MAX_BAD_COUNTER
    }

    pub fn address(&self) -> u32 {
        self.message.address
    }

    pub fn message(&self) -> &'a MessageSpec {
        self.message
    }

    pub fn signals(&self) -> &[TrackedSignal<'a>] {
        &self.signals
    }

    /// Latest value of one tracked signal.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.signals
            .iter()
            .find(|s| s.name() == name)
            .map(TrackedSignal::value)
    }

    /// Forget the values accepted so far, keeping the latest value.
    pub fn clear_history(&mut self) {
        for signal in &mut self.signals {
            signal.history.clear();
        }
    }

    /// Take every tracked signal's accepted values since the last drain.
    pub fn drain_history(&mut self) -> Vec<(&'a str, Vec<f64>)> {
        self.signals
            .iter_mut()
            .map(|s| (s.name(), std::mem::take(&mut s.history)))
            .collect()
    }

    pub fn last_seen_ns(&self) -> Option<u64> {
        self.last_seen_ns
    }

    pub fn check_threshold_ns(&self) -> u64 {
        self.check_threshold_ns
    }

    pub fn counter_value(&self) -> Option<u64> {
        self.counter_value
    }

    pub fn counter_fail_count(&self) -> u32 {
        self.counter_fail_count
    }

    pub fn checksum_fail_count(&self) -> u32 {
        self.checksum_fail_count
    }
}
