//! Structured reporting of contract violations.
//!
//! The synchronizer does not silently log when something it relies on turns
//! out to be false (a duplicate ledger write, a sync point moving backwards, a
//! snapshot that lost its phase clock). It builds a [`SyncViolation`] and hands
//! it to a [`ViolationObserver`]. The default observer forwards to `tracing`;
//! tests plug in a [`CollectingObserver`] and assert on what was reported.
//!
//! ```
//! use rollback_sync::telemetry::{
//!     CollectingObserver, SyncViolation, ViolationKind, ViolationObserver, ViolationSeverity,
//! };
//! use rollback_sync::Frame;
//!
//! let observer = CollectingObserver::new();
//! observer.on_violation(
//!     &SyncViolation::new(
//!         ViolationSeverity::Critical,
//!         ViolationKind::SyncPoint,
//!         "sync frame moved backwards",
//!         "sync_point.rs:1",
//!     )
//!     .with_frame(Frame::new(12)),
//! );
//! assert!(observer.has_violation(ViolationKind::SyncPoint));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Frame;

mod frame_serializer {
    use crate::Frame;
    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(frame: &Option<Frame>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match frame {
            Some(f) if f.is_valid() => serializer.serialize_i32(f.as_i32()),
            _ => serializer.serialize_none(),
        }
    }
}

/// How bad a violation is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Recoverable; the operation continued with a fallback.
    Warning,
    /// The operation failed but state is intact.
    Error,
    /// A contract the replay depends on is broken; peers may have desynced.
    Critical,
}

impl ViolationSeverity {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem a violation originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Ledger write contract broken (duplicate write, write outside the window,
    /// a duplicated packet carrying a different payload).
    InputLedger,
    /// Frame counter bookkeeping is inconsistent.
    FrameCounters,
    /// The sync point would have moved backwards or past a counter.
    SyncPoint,
    /// Snapshot capture or restore failed.
    Snapshot,
    /// Stall and advantage bookkeeping.
    FlowControl,
    /// Invalid configuration.
    Configuration,
    /// A type's runtime invariant check failed.
    Invariant,
    /// A bug in this crate.
    InternalError,
}

impl ViolationKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputLedger => "input_ledger",
            Self::FrameCounters => "frame_counters",
            Self::SyncPoint => "sync_point",
            Self::Snapshot => "snapshot",
            Self::FlowControl => "flow_control",
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded violation with its context.
///
/// The frame field serializes as an integer for valid frames and as `null`
/// otherwise.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncViolation {
    /// Severity level.
    pub severity: ViolationSeverity,
    /// Originating subsystem.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// `file:line` where the violation was detected.
    pub location: &'static str,
    /// Frame the violation is about, if any.
    #[serde(serialize_with = "frame_serializer::serialize")]
    pub frame: Option<Frame>,
    /// Extra key/value diagnostics.
    pub context: BTreeMap<String, String>,
}

impl SyncViolation {
    /// Creates a violation without frame or context.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            frame: None,
            context: BTreeMap::new(),
        }
    }

    /// Attaches the frame this violation is about.
    #[must_use]
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    ///
    /// ```
    /// use rollback_sync::telemetry::{SyncViolation, ViolationKind, ViolationSeverity};
    /// use rollback_sync::Frame;
    ///
    /// let json = SyncViolation::new(
    ///     ViolationSeverity::Warning,
    ///     ViolationKind::FlowControl,
    ///     "stalled",
    ///     "synchronizer.rs:1",
    /// )
    /// .with_frame(Frame::new(42))
    /// .to_json()
    /// .unwrap();
    /// assert!(json.contains(r#""frame":42"#));
    /// assert!(json.contains(r#""kind":"flow_control""#));
    /// ```
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for SyncViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(frame) = self.frame {
            write!(f, ", frame={frame}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Receives violations. Must be quick; it runs inside the tick.
///
/// ```
/// use rollback_sync::telemetry::{SyncViolation, ViolationObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl ViolationObserver for Counter {
///     fn on_violation(&self, _violation: &SyncViolation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait ViolationObserver: Send + Sync {
    /// Called once per violation.
    fn on_violation(&self, violation: &SyncViolation);
}

/// Forwards violations to `tracing`: `Warning` as `warn!`, the rest as `error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &SyncViolation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let frame = violation
            .frame
            .and_then(Frame::to_option)
            .map_or_else(|| "null".to_string(), |f| f.as_i32().to_string());
        let context = violation
            .context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");

        match violation.severity {
            ViolationSeverity::Warning => tracing::warn!(
                severity,
                kind,
                location,
                frame = %frame,
                context = %context,
                "{}",
                violation.message
            ),
            ViolationSeverity::Error | ViolationSeverity::Critical => tracing::error!(
                severity,
                kind,
                location,
                frame = %frame,
                context = %context,
                "{}",
                violation.message
            ),
        }
    }
}

/// Stores every violation it sees. Intended for tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<SyncViolation>>,
}

impl CollectingObserver {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    #[must_use]
    pub fn violations(&self) -> Vec<SyncViolation> {
        self.violations.lock().clone()
    }

    /// Number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// `true` if a violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// `true` if a violation with exactly `severity` was collected.
    #[must_use]
    pub fn has_severity(&self, severity: ViolationSeverity) -> bool {
        self.violations
            .lock()
            .iter()
            .any(|v| v.severity == severity)
    }

    /// All collected violations of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<SyncViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Forgets everything collected so far.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &SyncViolation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Fans a violation out to several observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Creates a composite with no children.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child observer.
    pub fn add(&mut self, observer: Arc<dyn ViolationObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn ViolationObserver>>) -> Self {
        Self { observers }
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &SyncViolation) {
        for observer in &self.observers {
            observer.on_violation(violation);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Reports to `observer` if present, otherwise to [`TracingObserver`].
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &SyncViolation,
) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation through [`TracingObserver`], recording `file:line`.
///
/// ```
/// use rollback_sync::{report_violation, telemetry::{ViolationKind, ViolationSeverity}};
///
/// report_violation!(
///     ViolationSeverity::Warning,
///     ViolationKind::FlowControl,
///     "advantage delta {} over limit {}",
///     5,
///     3
/// );
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Reports a violation, optionally tagged with a frame, to an
/// `Option<Arc<dyn ViolationObserver>>`.
///
/// ```
/// use rollback_sync::{report_violation_to, Frame};
/// use rollback_sync::telemetry::{CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity};
/// use std::sync::Arc;
///
/// let collector = Arc::new(CollectingObserver::new());
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
///
/// report_violation_to!(&observer, ViolationSeverity::Critical, ViolationKind::InputLedger,
///     frame = Frame::new(3), "duplicate write on {}", "local");
/// assert_eq!(collector.violations()[0].frame, Some(Frame::new(3)));
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, frame = $frame:expr, $msg:literal) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        )
        .with_frame($frame);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, frame = $frame:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        )
        .with_frame($frame);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

/// Asserts that `observer` collected nothing, printing what it did collect.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "Expected no violations, but found {}:\n{:#?}",
            violations.len(),
            violations
        );
    }};
}

/// Asserts that `observer` collected a violation of `kind`.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "Expected violation of kind {:?}, but found: {:#?}",
            $kind,
            $observer.violations()
        );
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// A broken type invariant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant broke.
    pub type_name: &'static str,
    /// The invariant that broke.
    pub invariant: String,
    /// Offending values.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates an invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Attaches the offending values.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// Types with runtime-checkable invariants.
///
/// Checked by [`debug_check_invariants!`] in debug builds or with the
/// `paranoid` feature.
pub trait InvariantChecker {
    /// Returns the first broken invariant, if any.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks invariants in debug builds (or with `paranoid`) and reports
/// failures as critical [`ViolationKind::Invariant`] violations.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [context: {}]",
                violation,
                $context
            );
        }
    }};
}

/// No-op in release builds without `paranoid`.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn sample(severity: ViolationSeverity, kind: ViolationKind) -> SyncViolation {
        SyncViolation::new(severity, kind, "sample", "telemetry.rs:1")
    }

    #[test]
    fn severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_includes_frame_and_context() {
        let v = sample(ViolationSeverity::Critical, ViolationKind::Snapshot)
            .with_frame(Frame::new(9))
            .with_context("entity", "entity#2");
        let text = v.to_string();
        assert!(text.starts_with("[critical/snapshot] sample"));
        assert!(text.contains("frame=9"));
        assert!(text.contains("entity#2"));
    }

    #[test]
    fn collecting_observer_filters_by_kind() {
        let observer = CollectingObserver::new();
        observer.on_violation(&sample(ViolationSeverity::Warning, ViolationKind::FlowControl));
        observer.on_violation(&sample(ViolationSeverity::Critical, ViolationKind::InputLedger));
        assert_eq!(observer.len(), 2);
        assert_eq!(observer.violations_of_kind(ViolationKind::InputLedger).len(), 1);
        assert!(observer.has_severity(ViolationSeverity::Critical));
        assert!(!observer.has_violation(ViolationKind::SyncPoint));
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn composite_forwards_to_all_children() {
        let a = Arc::new(CollectingObserver::new());
        let b = Arc::new(CollectingObserver::new());
        let composite = CompositeObserver::from_observers(vec![a.clone(), b.clone()]);
        composite.on_violation(&sample(ViolationSeverity::Error, ViolationKind::Configuration));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn report_violation_to_routes_to_observer() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::FlowControl,
            "delta {} exceeds {}",
            5,
            3
        );
        let collected = collector.violations();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].message, "delta 5 exceeds 3");
        assert!(collected[0].location.contains("telemetry.rs"));
    }

    #[test]
    fn report_violation_to_none_falls_back_to_tracing() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &observer,
            ViolationSeverity::Error,
            ViolationKind::InternalError,
            "no observer"
        );
    }

    #[test]
    fn invariant_violation_display() {
        let v = InvariantViolation::new("SyncPoint", "current exceeds local frame")
            .with_details("current=5, local=4");
        assert_eq!(
            v.to_string(),
            "SyncPoint: current exceeds local frame (current=5, local=4)"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn null_frame_serializes_as_null() {
        let json = sample(ViolationSeverity::Warning, ViolationKind::SyncPoint)
            .with_frame(Frame::NULL)
            .to_json()
            .unwrap();
        assert!(json.contains(r#""frame":null"#));
    }
}
