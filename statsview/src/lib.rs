//! This library records measurements against named measures, aggregates them into views and
//! exports consistent snapshots of those views, either periodically to sinks or on demand to
//! Prometheus scrapes.
//! - [`measure::MeasureRegistry`]: defines typed measures.
//! - [`manager::ViewManager`]: subscribes views and takes snapshots.
//! - [`recorder::Recorder`]: routes measurements to the subscribed views.
//! - [`reporter::Reporter`]: exports snapshots to [`sink::Sink`]s on every reporting period.
//! - [`collector::PrometheusCollector`]: serves snapshots to a [`prometheus::Registry`].
//!
//! # Example
//! ```rust
//! use statsview::{AggregationData, MeasureRegistry, TagSet, View, ViewManager};
//!
//! let measures = MeasureRegistry::new();
//! let videos = measures.define::<i64>("my.org/measures/video_count", "processed videos", "")?;
//!
//! let views = ViewManager::new(&measures);
//! let view = View::builder("video_count", &videos).description("processed video size over time");
//! views.subscribe(view.build()?)?;
//!
//! let recorder = views.recorder();
//! for _ in 0..5 {
//!     recorder.record(&TagSet::new(), [videos.m(1)]);
//! }
//!
//! let snapshot = views.snapshot();
//! let row = snapshot.view("video_count").and_then(|data| data.row(&[])).unwrap();
//! assert_eq!(row.data, AggregationData::Count(5));
//! # Ok::<_, statsview::StatsError>(())
//! ```

#[cfg(feature = "exporter")]
pub mod exporter;

pub mod aggregation;
pub use aggregation::*;

mod aggregator;

pub mod collector;
pub use collector::PrometheusCollector;

pub mod error;
pub use error::{SinkError, StatsError};

pub mod manager;
pub use manager::*;

pub mod measure;
pub use measure::*;

pub mod recorder;
pub use recorder::*;

pub mod reporter;
pub use reporter::{Reporter, ReporterBuilder, ReporterHandle, ReporterStats};

pub mod sink;
pub use sink::*;

pub mod snapshot;
pub use snapshot::*;

pub mod tag;
pub use tag::*;

pub mod view;
pub use view::*;

/// Sealed trait to prevent outside code from implementing the measure number types.
mod private {
    pub trait Sealed {}

    impl Sealed for i64 {}
    impl Sealed for f64 {}
    impl Sealed for i32 {}
    impl Sealed for u32 {}
    impl Sealed for usize {}
    impl Sealed for f32 {}
}
