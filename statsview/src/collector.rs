//! Exposes view snapshots to Prometheus scrapes.
//!
//! [`PrometheusCollector`] implements [`prometheus::core::Collector`], so it can be registered in
//! any [`prometheus::Registry`]. Every call to `collect` takes a fresh snapshot of the views.
//!
//! | Aggregation    | Window     | Prometheus type |
//! |----------------|------------|-----------------|
//! | `Count`        | cumulative | counter         |
//! | `Count`        | interval   | gauge           |
//! | `Sum`          | any        | gauge           |
//! | `LastValue`    | any        | gauge           |
//! | `Distribution` | any        | histogram       |

use prometheus::{
    core::{Collector, Desc},
    proto as pp,
};

use crate::{
    aggregation::{AggregationData, AggregationKind, DistributionData},
    manager::ViewManager,
    snapshot::{Row, Snapshot, ViewData},
    view::Window,
};

/// A [`Collector`] serving on-demand snapshots of a [`ViewManager`].
///
/// # Example
/// ```rust
/// use statsview::{MeasureRegistry, PrometheusCollector, ViewManager};
///
/// let views = ViewManager::new(&MeasureRegistry::new());
/// let registry = prometheus::Registry::new();
/// registry.register(Box::new(PrometheusCollector::new(&views))).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct PrometheusCollector {
    manager: ViewManager,
}

impl PrometheusCollector {
    pub fn new(manager: &ViewManager) -> Self {
        Self { manager: manager.clone() }
    }

    /// Convert a snapshot into metric families, one per view with at least one row.
    pub fn families(&self, snapshot: &Snapshot) -> Vec<pp::MetricFamily> {
        snapshot.views.iter().filter_map(family).collect()
    }
}

impl Collector for PrometheusCollector {
    /// Views come and go at runtime, so no descriptors are declared up front.
    fn desc(&self) -> Vec<&Desc> {
        Vec::new()
    }

    fn collect(&self) -> Vec<pp::MetricFamily> {
        self.families(&self.manager.snapshot())
    }
}

fn family(data: &ViewData) -> Option<pp::MetricFamily> {
    if data.rows.is_empty() {
        return None;
    }

    let view = &data.view;
    let help = if view.description().is_empty() {
        view.measure().description()
    } else {
        view.description()
    };

    let metric_type = match (view.aggregation().kind(), view.window()) {
        (AggregationKind::Count, Window::Cumulative) => pp::MetricType::COUNTER,
        (AggregationKind::Count, Window::Interval(_)) => pp::MetricType::GAUGE,
        (AggregationKind::Sum | AggregationKind::LastValue, _) => pp::MetricType::GAUGE,
        (AggregationKind::Distribution, _) => pp::MetricType::HISTOGRAM,
    };

    let mut family = pp::MetricFamily::default();
    family.set_name(sanitize(view.name()));
    family.set_help(help.to_owned());
    family.set_field_type(metric_type);
    family.set_metric(data.rows.iter().map(|row| metric(row, metric_type)).collect());

    Some(family)
}

fn metric(row: &Row, metric_type: pp::MetricType) -> pp::Metric {
    let labels = row
        .tags
        .iter()
        .map(|(key, value)| {
            let mut pair = pp::LabelPair::default();
            pair.set_name(sanitize(key.name()));
            pair.set_value(value.clone());
            pair
        })
        .collect();

    let mut m = pp::Metric::from_label(labels);
    match &row.data {
        AggregationData::Count(count) => {
            let value = *count as f64;
            if metric_type == pp::MetricType::COUNTER {
                let mut counter = pp::Counter::default();
                counter.set_value(value);
                m.set_counter(counter);
            } else {
                m.set_gauge(gauge(value));
            }
        }
        // Sums may decrease, so they are exported as gauges.
        AggregationData::Sum(sum) => m.set_gauge(gauge(sum.as_f64())),
        AggregationData::LastValue { value, .. } => m.set_gauge(gauge(value.as_f64())),
        AggregationData::Distribution(dist) => m.set_histogram(histogram(dist)),
    }

    m
}

fn gauge(value: f64) -> pp::Gauge {
    let mut gauge = pp::Gauge::default();
    gauge.set_value(value);
    gauge
}

fn histogram(dist: &DistributionData) -> pp::Histogram {
    let mut histogram = pp::Histogram::default();
    histogram.set_sample_count(dist.count);
    histogram.set_sample_sum(dist.sum);

    // The `+Inf` bucket is derived from the sample count by the encoder.
    let buckets = dist
        .cumulative_buckets()
        .map(|(upper_bound, cumulative_count)| {
            let mut bucket = pp::Bucket::default();
            bucket.set_upper_bound(upper_bound);
            bucket.set_cumulative_count(cumulative_count);
            bucket
        })
        .collect();
    histogram.set_bucket(buckets);

    histogram
}

/// Map a view or tag name onto the Prometheus name charset `[a-zA-Z0-9_]`, not starting with a
/// digit.
pub(crate) fn sanitize(name: &str) -> String {
    let mut out: String =
        name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
