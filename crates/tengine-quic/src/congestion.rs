//! Congestion window and RTT estimator state that path validation resets.

use std::time::{Duration, Instant};

use tracing::debug;

/// Timer granularity floor for the PTO (RFC 9002, 6.2.1).
pub const GRANULARITY: Duration = Duration::from_millis(1);

/// Initial window for a given maximum datagram size (RFC 9002, 7.2).
pub fn initial_window(mss: usize) -> u64 {
    let mss = mss as u64;
    (10 * mss).min((2 * mss).max(14_720))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Congestion {
    window: u64,
    ssthresh: u64,
    bytes_in_flight: u64,
    recovery_start: Instant,
}

impl Congestion {
    pub fn new(mss: usize, now: Instant) -> Self {
        Self {
            window: initial_window(mss),
            ssthresh: u64::MAX,
            bytes_in_flight: 0,
            recovery_start: now,
        }
    }

    /// Returns to initial values, forgetting everything in flight.
    pub fn reset(&mut self, mss: usize, now: Instant) {
        *self = Self::new(mss, now);
        debug!(window = self.window, "congestion state reset");
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Slow start threshold, `u64::MAX` when unbounded.
    pub fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn recovery_start(&self) -> Instant {
        self.recovery_start
    }

    pub fn on_packet_sent(&mut self, bytes: usize) {
        self.bytes_in_flight += bytes as u64;
    }

    pub fn on_packet_acked(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u64);
    }
}

/// Smoothed RTT estimator (RFC 9002, 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttEstimator {
    initial_rtt: Duration,
    smoothed_rtt: Duration,
    rtt_var: Duration,
    min_rtt: Duration,
    latest_rtt: Duration,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new(initial_rtt: Duration) -> Self {
        Self {
            initial_rtt,
            smoothed_rtt: initial_rtt,
            rtt_var: initial_rtt / 2,
            min_rtt: initial_rtt,
            latest_rtt: initial_rtt,
            has_sample: false,
        }
    }

    pub fn update(&mut self, sample: Duration) {
        self.latest_rtt = sample;
        if !self.has_sample {
            self.smoothed_rtt = sample;
            self.rtt_var = sample / 2;
            self.min_rtt = sample;
            self.has_sample = true;
            return;
        }
        self.min_rtt = self.min_rtt.min(sample);
        let diff = if self.smoothed_rtt > sample {
            self.smoothed_rtt - sample
        } else {
            sample - self.smoothed_rtt
        };
        self.rtt_var = (self.rtt_var * 3 + diff) / 4;
        self.smoothed_rtt = (self.smoothed_rtt * 7 + sample) / 8;
    }

    /// Forgets all samples.
    pub fn reset(&mut self) {
        *self = Self::new(self.initial_rtt);
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    pub fn rtt_var(&self) -> Duration {
        self.rtt_var
    }

    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    /// Probe timeout for the application space.
    pub fn pto(&self, max_ack_delay: Duration) -> Duration {
        self.smoothed_rtt + (self.rtt_var * 4).max(GRANULARITY) + max_ack_delay
    }
}
