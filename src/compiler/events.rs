//! Event logging for the protection pipeline.
//!
//! Every transformation a pass performs is recorded as an [`Event`] so callers
//! can audit what was protected, and why something was left alone, without
//! installing a `tracing` subscriber. Events can be inspected or safely
//! ignored.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event (transformation, skip, error, ...)
//! - [`EventLog`] - Append-only collection with query and summary helpers
//! - [`EventBuilder`] - Fluent API for creating events
//! - [`ProtectionStats`] - Counters derived from a log
//!
//! # Example
//!
//! ```rust
//! use ircloak::compiler::{EventKind, EventLog};
//! use ircloak::ir::FunctionId;
//!
//! let log = EventLog::new();
//! log.record(EventKind::GlobalEncrypted)
//!     .function(FunctionId::new(0))
//!     .global(".str")
//!     .message("6 x i8, 6 encrypted");
//! log.record(EventKind::GlobalSkipped).global("llvm.used");
//!
//! assert_eq!(log.count_kind(EventKind::GlobalEncrypted), 1);
//! assert_eq!(log.summary(), "1 global encrypted");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::ir::FunctionId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A raw global was replaced by an encrypted blob and a shadow buffer.
    GlobalEncrypted,
    /// A raw global was replaced by a stack buffer rebuilt on every entry.
    GlobalMaterialized,
    /// A tagged wrapper was re-pointed at a shadow buffer.
    WrapperRewritten,
    /// A dead original global was erased.
    GlobalRemoved,
    /// A per-function decryption guard was created.
    GuardCreated,
    /// A guarded decryption block was inserted at function entry.
    DecryptionBlockInserted,
    /// A signed-pointer record was cloned for a rewritten wrapper.
    PointerAuthFixed,

    /// A global was considered and left untouched.
    GlobalSkipped,

    /// A pass started.
    PassStarted,
    /// A pass completed.
    PassCompleted,

    /// A function could not be protected.
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::GlobalEncrypted => "global encrypted",
            Self::GlobalMaterialized => "global materialized on stack",
            Self::WrapperRewritten => "wrapper rewritten",
            Self::GlobalRemoved => "global removed",
            Self::GuardCreated => "guard created",
            Self::DecryptionBlockInserted => "decryption block inserted",
            Self::PointerAuthFixed => "signed pointer fixed",
            // Analysis
            Self::GlobalSkipped => "global skipped",
            // Engine
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::GlobalEncrypted
                | Self::GlobalMaterialized
                | Self::WrapperRewritten
                | Self::GlobalRemoved
                | Self::GuardCreated
                | Self::DecryptionBlockInserted
                | Self::PointerAuthFixed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function being processed (if applicable).
    pub function: Option<FunctionId>,
    /// Symbol name of the global involved (if applicable).
    pub global: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = self.function {
            write!(f, " {function}")?;
        }
        if let Some(global) = &self.global {
            write!(f, " @{global}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<FunctionId>,
    global: Option<String>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            global: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function the event belongs to.
    pub fn function(mut self, function: FunctionId) -> Self {
        self.function = Some(function);
        self
    }

    /// Sets the global the event is about.
    pub fn global(mut self, name: impl Into<String>) -> Self {
        self.global = Some(name.into());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            function: self.function.take(),
            global: self.global.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Collection of events from a protection run.
///
/// Statistics are derived from the events rather than tracked separately.
/// Events can be appended concurrently through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of distinct functions with transformation events.
    #[must_use]
    pub fn functions_transformed(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.function)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = Box<dyn Iterator<Item = &'a Event> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct ProtectionStats {
    /// Number of functions that had any transformation.
    pub functions_transformed: usize,
    /// Globals replaced by an encrypted blob and shadow buffer.
    pub globals_encrypted: usize,
    /// Globals replaced by a stack buffer.
    pub globals_materialized: usize,
    /// Tagged wrappers re-pointed.
    pub wrappers_rewritten: usize,
    /// Original globals erased.
    pub globals_removed: usize,
    /// Decryption guards created.
    pub guards_created: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl ProtectionStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            functions_transformed: log.functions_transformed(),
            globals_encrypted: get(EventKind::GlobalEncrypted),
            globals_materialized: get(EventKind::GlobalMaterialized),
            wrappers_rewritten: get(EventKind::WrapperRewritten),
            globals_removed: get(EventKind::GlobalRemoved),
            guards_created: get(EventKind::GuardCreated),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }
}

impl fmt::Display for ProtectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.functions_transformed > 0 {
            parts.push(format!("{} functions", self.functions_transformed));
        }
        if self.globals_encrypted > 0 {
            parts.push(format!("{} encrypted", self.globals_encrypted));
        }
        if self.globals_materialized > 0 {
            parts.push(format!("{} on stack", self.globals_materialized));
        }
        if self.wrappers_rewritten > 0 {
            parts.push(format!("{} wrappers", self.wrappers_rewritten));
        }
        if self.globals_removed > 0 {
            parts.push(format!("{} removed", self.globals_removed));
        }
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }

        if parts.is_empty() {
            f.write_str("no transformations")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert_eq!(log.summary(), "no events");
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        let function = FunctionId::new(2);

        log.record(EventKind::GlobalEncrypted)
            .function(function)
            .global(".str")
            .pass("StringEncryption")
            .message("5 of 6 elements encrypted");

        let event = log.iter().next().unwrap();
        assert_eq!(event.function, Some(function));
        assert_eq!(event.global.as_deref(), Some(".str"));
        assert_eq!(event.pass.as_deref(), Some("StringEncryption"));
        assert_eq!(event.to_string(), "[global encrypted] fn2 @.str 5 of 6 elements encrypted");
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::GuardCreated);
        assert_eq!(log.iter().next().unwrap().message, "guard created");
    }

    #[test]
    fn test_summary_and_stats() {
        let log = EventLog::new();
        let f0 = FunctionId::new(0);
        let f1 = FunctionId::new(1);

        log.record(EventKind::GlobalEncrypted).function(f0);
        log.record(EventKind::GlobalEncrypted).function(f1);
        log.record(EventKind::GlobalRemoved).function(f0);
        log.record(EventKind::GlobalSkipped).function(f1);
        log.record(EventKind::Error).function(f1).message("bad probability");

        assert_eq!(log.summary(), "1 global removed, 2 global encrypted");
        let stats = ProtectionStats::from_log(&log);
        assert_eq!(stats.functions_transformed, 2);
        assert_eq!(stats.globals_encrypted, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.to_string(), "2 functions, 2 encrypted, 1 removed, 1 errors");
    }

    #[test]
    fn test_filters_and_merge() {
        let a = EventLog::new();
        let b = EventLog::new();
        a.record(EventKind::GuardCreated).function(FunctionId::new(0));
        b.record(EventKind::WrapperRewritten).function(FunctionId::new(1));
        b.record(EventKind::Error).function(FunctionId::new(1)).message("boom");
        a.merge(&b);

        assert_eq!(a.len(), 3);
        assert_eq!(a.iter().filter(|e| e.function == Some(FunctionId::new(1))).count(), 2);
        assert_eq!(a.transformations().count(), 2);
        assert_eq!(a.errors().count(), 1);
        assert_eq!(a.clone().len(), 3);
    }

    #[test]
    fn test_thread_safe_append() {
        use std::{sync::Arc, thread};

        let log = Arc::new(EventLog::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for j in 0..100 {
                        log.record(EventKind::GlobalEncrypted)
                            .function(FunctionId::new(i * 100 + j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }
}
