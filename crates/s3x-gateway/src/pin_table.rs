//! Pin state table
//!
//! Authoritative record of every pin the gateway has touched. Each entry has
//! its own lock; the map lock is only held long enough to find or insert an
//! entry, so the translator and the reporter never contend on unrelated
//! pins. No lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use s3x_core::{Pin, PinKey, PinMode, PinNumber, PinValue, ReportKind, TelemetryEvent};

/// Pin records of one device, keyed by `(device_id, pin)`
pub struct PinStateTable {
    device_id: String,
    pins: RwLock<HashMap<PinKey, Arc<Mutex<Pin>>>>,
}

impl PinStateTable {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            pins: RwLock::new(HashMap::new()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn key(&self, pin: PinNumber) -> PinKey {
        PinKey::new(self.device_id.clone(), pin)
    }

    fn existing(&self, pin: PinNumber) -> Option<Arc<Mutex<Pin>>> {
        self.pins.read().get(&self.key(pin)).cloned()
    }

    /// Entry for `pin`, created in disabled mode on first touch
    fn entry(&self, pin: PinNumber) -> Arc<Mutex<Pin>> {
        if let Some(entry) = self.existing(pin) {
            return entry;
        }
        let key = self.key(pin);
        self.pins
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Pin::new(key))))
            .clone()
    }

    /// Snapshot of one pin, if it has been touched
    pub fn get(&self, pin: PinNumber) -> Option<Pin> {
        self.existing(pin).map(|entry| entry.lock().clone())
    }

    /// Current mode; untouched pins are disabled. Does not create an entry.
    pub fn mode(&self, pin: PinNumber) -> PinMode {
        self.existing(pin)
            .map(|entry| entry.lock().mode)
            .unwrap_or_default()
    }

    pub fn is_reporting(&self, pin: PinNumber) -> bool {
        self.existing(pin)
            .map(|entry| entry.lock().reporting)
            .unwrap_or(false)
    }

    /// Snapshot of all pins, ordered by pin number
    pub fn snapshot(&self) -> Vec<Pin> {
        let entries: Vec<Arc<Mutex<Pin>>> = self.pins.read().values().cloned().collect();
        let mut pins: Vec<Pin> = entries.iter().map(|entry| entry.lock().clone()).collect();
        pins.sort_by_key(|p| p.key.pin);
        pins
    }

    pub fn len(&self) -> usize {
        self.pins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.read().is_empty()
    }

    /// Record a successful mode change. Leaving a reporting mode ends the
    /// callback registration; a value latched in another mode is dropped.
    pub fn set_mode(&self, pin: PinNumber, mode: PinMode) {
        let entry = self.entry(pin);
        let mut p = entry.lock();
        if p.mode != mode {
            p.last_value = None;
        }
        p.mode = mode;
        if !mode.supports_reporting() {
            p.reporting = false;
        }
    }

    pub fn set_reporting(&self, pin: PinNumber, reporting: bool) {
        self.entry(pin).lock().reporting = reporting;
    }

    /// Record a value written to an output. Writes never produce telemetry.
    pub fn record_write(&self, pin: PinNumber, value: PinValue) {
        let entry = self.entry(pin);
        let mut p = entry.lock();
        p.last_value = Some(value);
        p.last_update = Some(Utc::now());
    }

    /// Apply a raw device report and assign the next sequence number.
    ///
    /// Returns `None` when the pin is not (or no longer) in a reporting
    /// mode; such reports are stale and leave the table untouched.
    pub fn record_report(&self, pin: PinNumber, value: PinValue) -> Option<TelemetryEvent> {
        let entry = self.existing(pin)?;
        let mut p = entry.lock();
        let kind = p.mode.report_kind()?;
        Some(Self::apply(&mut p, kind, value))
    }

    /// Apply a synchronous readback of an output pin
    pub fn record_readback(&self, pin: PinNumber, value: PinValue) -> TelemetryEvent {
        let entry = self.entry(pin);
        let mut p = entry.lock();
        Self::apply(&mut p, ReportKind::Readback, value)
    }

    fn apply(p: &mut Pin, kind: ReportKind, value: PinValue) -> TelemetryEvent {
        let now = Utc::now();
        p.last_value = Some(value);
        p.last_update = Some(now);
        p.sequence += 1;
        TelemetryEvent {
            key: p.key.clone(),
            kind,
            value,
            sequence: p.sequence,
            timestamp: now,
        }
    }

    /// Skip one sequence number on every reporting pin so consumers see the
    /// outage as a gap
    pub fn mark_discontinuity(&self) {
        let entries: Vec<Arc<Mutex<Pin>>> = self.pins.read().values().cloned().collect();
        for entry in entries {
            let mut p = entry.lock();
            if p.reporting && p.sequence > 0 {
                p.sequence += 1;
            }
        }
    }
}
