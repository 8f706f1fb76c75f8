//! Last-value-wins coalescing of analog readings
//!
//! The first analog reading for a pin opens a window; readings arriving
//! before the window closes replace the pending value. When the window
//! closes the latest value is released. Digital and readback events pass
//! straight through, after any pending value for the same pin.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use s3x_core::{PinNumber, TelemetryEvent};

struct Pending {
    event: TelemetryEvent,
    due: Instant,
}

pub struct Coalescer {
    window: Duration,
    pending: HashMap<PinNumber, Pending>,
}

impl Coalescer {
    /// A zero window disables coalescing
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Offer an event; returns the events to publish now, in order
    pub fn offer(&mut self, event: TelemetryEvent, now: Instant) -> Vec<TelemetryEvent> {
        let pin = event.key.pin;

        if !event.kind.is_coalesced() || self.window.is_zero() {
            let mut ready: Vec<TelemetryEvent> = self.take(pin).into_iter().collect();
            ready.push(event);
            return ready;
        }

        match self.pending.get_mut(&pin) {
            Some(pending) => pending.event = event,
            None => {
                self.pending.insert(
                    pin,
                    Pending {
                        event,
                        due: now + self.window,
                    },
                );
            }
        }
        Vec::new()
    }

    /// Remove the pending event of one pin
    pub fn take(&mut self, pin: PinNumber) -> Option<TelemetryEvent> {
        self.pending.remove(&pin).map(|p| p.event)
    }

    /// Earliest window close, if anything is pending
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Release every event whose window has closed, oldest window first
    pub fn due(&mut self, now: Instant) -> Vec<TelemetryEvent> {
        let mut ready: Vec<(Instant, PinNumber)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(pin, p)| (p.due, *pin))
            .collect();
        ready.sort();

        ready
            .into_iter()
            .filter_map(|(_, pin)| self.take(pin))
            .collect()
    }

    /// Release everything regardless of windows
    pub fn drain(&mut self) -> Vec<TelemetryEvent> {
        let mut events: Vec<(Instant, TelemetryEvent)> = self
            .pending
            .drain()
            .map(|(_, p)| (p.due, p.event))
            .collect();
        events.sort_by_key(|(due, _)| *due);
        events.into_iter().map(|(_, event)| event).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use s3x_core::{PinKey, ReportKind};

    fn event(pin: PinNumber, kind: ReportKind, value: f64, sequence: u64) -> TelemetryEvent {
        TelemetryEvent {
            key: PinKey::new("arduino", pin),
            kind,
            value,
            sequence,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_burst_yields_last_value() {
        let mut coalescer = Coalescer::new(Duration::from_millis(50));
        let start = Instant::now();

        for (i, value) in [100.0, 200.0, 300.0].into_iter().enumerate() {
            let at = start + Duration::from_millis(10 * i as u64);
            let ready = coalescer.offer(event(14, ReportKind::AnalogInput, value, i as u64 + 1), at);
            assert!(ready.is_empty());
        }

        assert!(coalescer.due(start + Duration::from_millis(49)).is_empty());
        let ready = coalescer.due(start + Duration::from_millis(50));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].value, 300.0);
        assert_eq!(ready[0].sequence, 3);
        assert_eq!(coalescer.pending_len(), 0);
    }

    #[test]
    fn test_digital_passes_through() {
        let mut coalescer = Coalescer::new(Duration::from_millis(50));
        let now = Instant::now();
        for seq in 1..=3 {
            let ready = coalescer.offer(event(2, ReportKind::DigitalInput, 1.0, seq), now);
            assert_eq!(ready.len(), 1);
            assert_eq!(ready[0].sequence, seq);
        }
    }

    #[test]
    fn test_pending_flushed_before_pass_through() {
        let mut coalescer = Coalescer::new(Duration::from_millis(50));
        let now = Instant::now();
        coalescer.offer(event(3, ReportKind::AnalogInput, 7.0, 1), now);

        let ready = coalescer.offer(event(3, ReportKind::DigitalInput, 1.0, 2), now);
        let sequences: Vec<u64> = ready.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_zero_window_disables() {
        let mut coalescer = Coalescer::new(Duration::ZERO);
        let ready = coalescer.offer(event(14, ReportKind::AnalogInput, 1.0, 1), Instant::now());
        assert_eq!(ready.len(), 1);
        assert!(coalescer.next_due().is_none());
    }

    #[test]
    fn test_drain_releases_all() {
        let mut coalescer = Coalescer::new(Duration::from_secs(10));
        let now = Instant::now();
        coalescer.offer(event(14, ReportKind::AnalogInput, 1.0, 1), now);
        coalescer.offer(event(15, ReportKind::AnalogInput, 2.0, 1), now);
        assert_eq!(coalescer.drain().len(), 2);
        assert_eq!(coalescer.pending_len(), 0);
    }
}
