//! Trace loggers
//!
//! A trace logger periodically asks for the value of one field and records the
//! replies. The gateway drives it: every gated tick goes to [`TraceLogger::tick`],
//! and the gateway itself originates the `get` when the logger wants a value.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bsb_protocol::FieldValue;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::event::Tick;

/// What a logger wants after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to do
    Idle,
    /// Request a fresh value of the field
    RequestValue,
}

/// Periodic consumer of one field's values
pub trait TraceLogger: Send {
    /// Field this logger traces
    fn field_id(&self) -> u32;

    /// Called on every gated tick
    fn tick(&mut self, tick: Tick) -> TickAction;

    /// Called with every device reply for the field
    fn log_value(&mut self, timestamp: SystemTime, value: &FieldValue);
}

/// One logged value
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Field the value belongs to
    pub field_id: u32,
    /// When the reply was read
    pub timestamp: SystemTime,
    /// Decoded value
    pub value: FieldValue,
}

/// Storage for logged values
pub trait TraceSink: Send {
    /// Store one record
    fn record(&mut self, record: &TraceRecord);
}

/// Sink that keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded values
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TraceSink for MemorySink {
    fn record(&mut self, record: &TraceRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Sink that writes records to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&mut self, record: &TraceRecord) {
        info!(field = record.field_id, value = %record.value, "trace");
    }
}

/// Direction of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Value moved from at-or-below to above the threshold
    RisingAbove,
    /// Value moved from at-or-above to below the threshold
    FallingBelow,
}

/// A fired trigger
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Field that crossed
    pub field_id: u32,
    /// Crossing direction
    pub kind: TriggerKind,
    /// Configured threshold
    pub threshold: f64,
    /// Value that crossed it
    pub value: f64,
    /// When the value was read
    pub timestamp: SystemTime,
}

/// Reaction to a fired trigger
pub trait AlertAction: Send {
    /// Handle one alert
    fn alert(&mut self, alert: &Alert);
}

/// Alert action that logs a warning
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlert;

impl AlertAction for LogAlert {
    fn alert(&mut self, alert: &Alert) {
        let direction = match alert.kind {
            TriggerKind::RisingAbove => "rose above",
            TriggerKind::FallingBelow => "fell below",
        };
        warn!(
            "Field {} {} {} (now {})",
            alert.field_id, direction, alert.threshold, alert.value
        );
    }
}

impl<F: FnMut(&Alert) + Send> AlertAction for F {
    fn alert(&mut self, alert: &Alert) {
        self(alert)
    }
}

/// Edge-triggered threshold check
pub struct Trigger {
    kind: TriggerKind,
    threshold: f64,
    last: Option<f64>,
    action: Box<dyn AlertAction>,
}

impl Trigger {
    /// Create a trigger; the first value seen only arms it
    pub fn new(kind: TriggerKind, threshold: f64, action: impl AlertAction + 'static) -> Self {
        Self {
            kind,
            threshold,
            last: None,
            action: Box::new(action),
        }
    }

    fn crossed(&self, previous: f64, value: f64) -> bool {
        match self.kind {
            TriggerKind::RisingAbove => previous <= self.threshold && value > self.threshold,
            TriggerKind::FallingBelow => previous >= self.threshold && value < self.threshold,
        }
    }

    /// Feed a value; fires the action on a crossing and returns whether it fired
    pub fn check(&mut self, field_id: u32, timestamp: SystemTime, value: f64) -> bool {
        let fired = self.last.is_some_and(|previous| self.crossed(previous, value));
        self.last = Some(value);
        if fired {
            self.action.alert(&Alert {
                field_id,
                kind: self.kind,
                threshold: self.threshold,
                value,
                timestamp,
            });
        }
        fired
    }
}

/// Logs one field every `interval` seconds
pub struct SingleFieldLogger {
    field_id: u32,
    interval_ticks: u64,
    countdown: u64,
    sink: Box<dyn TraceSink>,
    triggers: Vec<Trigger>,
}

impl SingleFieldLogger {
    /// `interval_secs` is rounded up to a multiple of `atomic_interval`
    pub fn new(field_id: u32, interval_secs: u64, atomic_interval: u64, sink: impl TraceSink + 'static) -> Self {
        let interval_ticks = interval_secs.div_ceil(atomic_interval.max(1)).max(1);
        Self {
            field_id,
            interval_ticks,
            countdown: 0,
            sink: Box::new(sink),
            triggers: Vec::new(),
        }
    }

    /// Attach a threshold trigger
    pub fn add_trigger(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    /// Builder-style [`add_trigger`](Self::add_trigger)
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.add_trigger(trigger);
        self
    }

    /// Gated ticks between two requests
    pub fn interval_ticks(&self) -> u64 {
        self.interval_ticks
    }
}

impl TraceLogger for SingleFieldLogger {
    fn field_id(&self) -> u32 {
        self.field_id
    }

    fn tick(&mut self, _tick: Tick) -> TickAction {
        if self.countdown == 0 {
            self.countdown = self.interval_ticks - 1;
            TickAction::RequestValue
        } else {
            self.countdown -= 1;
            TickAction::Idle
        }
    }

    fn log_value(&mut self, timestamp: SystemTime, value: &FieldValue) {
        self.sink.record(&TraceRecord {
            field_id: self.field_id,
            timestamp,
            value: value.clone(),
        });

        if let Some(v) = value.as_f64() {
            for trigger in &mut self.triggers {
                trigger.check(self.field_id, timestamp, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_rounds_up_to_atomic_multiple() {
        assert_eq!(SingleFieldLogger::new(1, 60, 5, MemorySink::new()).interval_ticks(), 12);
        assert_eq!(SingleFieldLogger::new(1, 7, 5, MemorySink::new()).interval_ticks(), 2);
        assert_eq!(SingleFieldLogger::new(1, 1, 5, MemorySink::new()).interval_ticks(), 1);
    }

    #[test]
    fn test_requests_on_first_tick_then_every_interval() {
        let mut logger = SingleFieldLogger::new(8700, 15, 5, MemorySink::new());
        let actions: Vec<TickAction> = (0..7)
            .map(|i| logger.tick(Tick::from_unix_secs(i * 5)))
            .collect();
        use TickAction::*;
        assert_eq!(
            actions,
            vec![RequestValue, Idle, Idle, RequestValue, Idle, Idle, RequestValue]
        );
    }

    #[test]
    fn test_values_recorded_to_sink() {
        let sink = MemorySink::new();
        let mut logger = SingleFieldLogger::new(8700, 60, 5, sink.clone());
        logger.log_value(SystemTime::UNIX_EPOCH, &FieldValue::Decimal(-3.5));
        logger.log_value(SystemTime::UNIX_EPOCH, &FieldValue::Null);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, FieldValue::Decimal(-3.5));
        assert_eq!(records[1].field_id, 8700);
    }

    #[test]
    fn test_triggers_fire_on_crossing_only() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let seen = fired.clone();
        let mut logger = SingleFieldLogger::new(8830, 60, 5, MemorySink::new()).with_trigger(
            Trigger::new(TriggerKind::FallingBelow, 40.0, move |alert: &Alert| {
                seen.lock().unwrap().push(alert.value)
            }),
        );

        // First value only arms the trigger, even though it is below
        for v in [35.0, 45.0, 39.0, 38.0, 40.0, 39.5] {
            logger.log_value(SystemTime::UNIX_EPOCH, &FieldValue::Decimal(v));
        }
        assert_eq!(*fired.lock().unwrap(), vec![39.0, 39.5]);
    }

    #[test]
    fn test_rising_trigger() {
        let mut trigger = Trigger::new(TriggerKind::RisingAbove, 20.0, LogAlert);
        let at = SystemTime::UNIX_EPOCH;
        assert!(!trigger.check(1, at, 25.0));
        assert!(!trigger.check(1, at, 19.0));
        assert!(trigger.check(1, at, 21.0));
        assert!(!trigger.check(1, at, 22.0));
    }
}
