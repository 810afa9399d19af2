use std::time::Duration;

use crate::{aggregation::AggregationKind, measure::NumericKind};

/// Result type for measure and view setup calls.
pub type Result<T, E = StatsError> = std::result::Result<T, E>;

/// Errors returned by the setup side of the API: defining measures, building and subscribing
/// views, and configuring the reporting period.
///
/// Recording never returns an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("measure {0:?} is already defined")]
    DuplicateMeasure(String),
    #[error("measure {0:?} is not defined")]
    MeasureNotFound(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("invalid tag key {0:?}: must be 1-255 printable ASCII characters")]
    InvalidTagKey(String),
    #[error("view {view:?}: {aggregation} aggregation is not supported for {kind} measures")]
    IncompatibleAggregation { view: String, aggregation: AggregationKind, kind: NumericKind },
    #[error("view {view:?}: distribution bounds must be finite and strictly increasing")]
    InvalidBuckets { view: String },
    #[error("view {0:?} is already subscribed")]
    DuplicateView(String),
    #[error("view {0:?} is not subscribed")]
    ViewNotFound(String),
    #[error("view {view:?}: tag key {key:?} collides with another exported label")]
    TagKeyConflict { view: String, key: String },
    #[error("interval window must be positive, got {0:?}")]
    InvalidWindow(Duration),
    #[error("reporting period must be positive, got {0:?}")]
    InvalidReportingPeriod(Duration),
}

/// An error returned by a [`crate::sink::Sink`] when it fails to accept a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}
