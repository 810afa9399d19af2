use std::{
    sync::{Arc, atomic::Ordering},
    time::SystemTime,
};

use tracing::trace;

use crate::{manager::Shared, measure::Measurement, tag::TagSet};

/// The ingestion path: routes measurements to every view subscribed to their measure.
///
/// Recording never fails and never waits on exporters. Cheap to clone and safe to share between
/// threads.
#[derive(Debug, Clone)]
pub struct Recorder {
    shared: Arc<Shared>,
}

impl Recorder {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Record `measurements` with the given tags, timestamped now.
    pub fn record<I>(&self, tags: &TagSet, measurements: I)
    where
        I: IntoIterator<Item = Measurement>,
    {
        self.record_at(tags, SystemTime::now(), measurements)
    }

    /// Record `measurements` with the given tags and timestamp.
    ///
    /// Measurements of measures with no subscribed view are ignored. A view skips a measurement,
    /// counted in [`Recorder::dropped`], when it is grouped by tag keys missing from `tags` or
    /// when it aggregates a distribution and the value is not finite.
    pub fn record_at<I>(&self, tags: &TagSet, at: SystemTime, measurements: I)
    where
        I: IntoIterator<Item = Measurement>,
    {
        let routes = self.shared.routes.load();
        if routes.is_empty() {
            return;
        }

        let _cut = self.shared.cut.read();
        for measurement in measurements {
            let Some(aggregators) = routes.get(measurement.measure().name()) else { continue };

            for aggregator in aggregators {
                // Same name from another registry.
                if !Arc::ptr_eq(aggregator.view().measure(), measurement.descriptor()) {
                    continue;
                }

                if !aggregator.update(tags, measurement.value(), at) {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        view = aggregator.view().name(),
                        measure = measurement.measure().name(),
                        "Dropped measurement rejected by view"
                    );
                }
            }
        }
    }

    /// Number of measurement updates skipped because of missing tag keys or non-finite
    /// distribution values.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
