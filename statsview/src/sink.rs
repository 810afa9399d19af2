use std::fmt;

use tracing::info;

use crate::{aggregation::AggregationData, error::SinkError, snapshot::Snapshot};

/// A destination for the snapshots exported by a [`crate::Reporter`].
///
/// Writes run on a blocking thread, one at a time per sink. A failed write is logged by the
/// reporter and the snapshot is dropped.
pub trait Sink: fmt::Debug + Send + Sync + 'static {
    fn write(&self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

/// A sink that logs every row of every snapshot at `INFO` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn write(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        for data in &snapshot.views {
            for row in &data.rows {
                let tags = row
                    .tags
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join(",");

                let value = DisplayData(&row.data);
                info!(view = data.view.name(), tags = %tags, %value, "View data");
            }
        }

        Ok(())
    }
}

struct DisplayData<'a>(&'a AggregationData);

impl fmt::Display for DisplayData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            AggregationData::Count(count) => write!(f, "count={count}"),
            AggregationData::Sum(sum) => write!(f, "sum={}", sum.as_f64()),
            AggregationData::LastValue { value, .. } => write!(f, "last={}", value.as_f64()),
            AggregationData::Distribution(dist) => write!(
                f,
                "count={} sum={} mean={} min={} max={}",
                dist.count, dist.sum, dist.mean, dist.min, dist.max
            ),
        }
    }
}
