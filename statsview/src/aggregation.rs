//! Aggregations reduce the measurements routed to a view into a single value per row.
//! - [`Aggregation::Count`]: number of measurements, values are ignored.
//! - [`Aggregation::Sum`]: exact sum of the recorded values.
//! - [`Aggregation::LastValue`]: most recent value.
//! - [`Aggregation::Distribution`]: histogram over fixed bucket bounds, plus summary statistics.

use std::{fmt, sync::Arc, time::SystemTime};

use crate::{
    error::{Result, StatsError},
    measure::{NumericKind, Value},
};

/// The aggregation applied by a view.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Count,
    Sum,
    LastValue,
    /// Buckets with inclusive upper bounds, plus one overflow bucket.
    Distribution(Arc<[f64]>),
}

/// The kind of an [`Aggregation`], without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Count,
    Sum,
    LastValue,
    Distribution,
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "Count"),
            Self::Sum => write!(f, "Sum"),
            Self::LastValue => write!(f, "LastValue"),
            Self::Distribution => write!(f, "Distribution"),
        }
    }
}

impl Aggregation {
    /// A distribution aggregation over the given bucket bounds.
    pub fn distribution<B: Into<Vec<f64>>>(bounds: B) -> Self {
        Self::Distribution(bounds.into().into())
    }

    pub fn kind(&self) -> AggregationKind {
        match self {
            Self::Count => AggregationKind::Count,
            Self::Sum => AggregationKind::Sum,
            Self::LastValue => AggregationKind::LastValue,
            Self::Distribution(_) => AggregationKind::Distribution,
        }
    }

    /// Check that this aggregation can be applied to measures of `kind`.
    ///
    /// Distributions need float measures and finite, strictly increasing bounds.
    pub(crate) fn validate(&self, view: &str, kind: NumericKind) -> Result<()> {
        let Self::Distribution(bounds) = self else { return Ok(()) };

        if kind != NumericKind::Float64 {
            return Err(StatsError::IncompatibleAggregation {
                view: view.to_owned(),
                aggregation: self.kind(),
                kind,
            });
        }

        let increasing = bounds.windows(2).all(|pair| pair[0] < pair[1]);
        if !increasing || bounds.iter().any(|b| !b.is_finite()) {
            return Err(StatsError::InvalidBuckets { view: view.to_owned() });
        }

        Ok(())
    }

    /// Whether `value` can be applied. Distributions only take finite values.
    pub(crate) fn accepts(&self, value: Value) -> bool {
        match self {
            Self::Distribution(_) => value.as_f64().is_finite(),
            _ => true,
        }
    }

    /// The identity state for this aggregation: zero count, zero sum, empty distribution.
    pub(crate) fn identity(&self, kind: NumericKind) -> AggregationData {
        match self {
            Self::Count => AggregationData::Count(0),
            Self::Sum => AggregationData::Sum(Value::zero(kind)),
            Self::LastValue => {
                AggregationData::LastValue { value: Value::zero(kind), timestamp: None }
            }
            Self::Distribution(bounds) => {
                AggregationData::Distribution(DistributionData::new(Arc::clone(bounds)))
            }
        }
    }
}

/// The aggregated state of a single row of a view.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationData {
    Count(u64),
    Sum(Value),
    /// `timestamp` is `None` until the first measurement.
    LastValue { value: Value, timestamp: Option<SystemTime> },
    Distribution(DistributionData),
}

impl AggregationData {
    /// Apply one measurement.
    pub(crate) fn update(&mut self, value: Value, at: SystemTime) {
        match self {
            Self::Count(count) => *count += 1,
            Self::Sum(sum) => *sum = sum.add(value),
            Self::LastValue { value: last, timestamp } => {
                // Measurements carrying an older timestamp don't overwrite newer ones.
                if timestamp.is_none_or(|t| at >= t) {
                    *last = value;
                    *timestamp = Some(at);
                }
            }
            Self::Distribution(dist) => dist.add(value.as_f64()),
        }
    }
}

/// Histogram buckets and summary statistics of a distribution row.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionData {
    bounds: Arc<[f64]>,
    /// Per-bucket counts. The last entry counts values above the largest bound.
    pub bucket_counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squared_deviation: f64,
}

impl DistributionData {
    fn new(bounds: Arc<[f64]>) -> Self {
        let bucket_counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            bucket_counts,
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum_of_squared_deviation: 0.0,
        }
    }

    fn add(&mut self, v: f64) {
        // First bucket whose upper bound is >= v, or the overflow bucket.
        let idx = self.bounds.partition_point(|bound| *bound < v);
        self.bucket_counts[idx] += 1;

        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);

        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_of_squared_deviation += delta * (v - self.mean);
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Sample variance, or 0 with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.sum_of_squared_deviation / (self.count - 1) as f64
    }

    /// `(upper bound, cumulative count)` for every finite bucket.
    pub fn cumulative_buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.bounds.iter().zip(&self.bucket_counts).scan(0, |acc, (bound, count)| {
            *acc += count;
            Some((*bound, *acc))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn now() -> SystemTime {
        SystemTime::now()
    }

    #[test]
    fn count_ignores_values() {
        let mut data = Aggregation::Count.identity(NumericKind::Float64);
        for v in [1.0, -3.0, 1e9] {
            data.update(Value::Float(v), now());
        }
        assert_eq!(data, AggregationData::Count(3));
    }

    #[test]
    fn sum_is_exact() {
        let mut data = Aggregation::Sum.identity(NumericKind::Int64);
        for v in [5, -2, 40, 0] {
            data.update(Value::Int(v), now());
        }
        assert_eq!(data, AggregationData::Sum(Value::Int(43)));

        let mut data = Aggregation::Sum.identity(NumericKind::Float64);
        for v in [0.5, 0.25, 2.0] {
            data.update(Value::Float(v), now());
        }
        assert_eq!(data, AggregationData::Sum(Value::Float(2.75)));
    }

    #[test]
    fn last_value_respects_timestamps() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut data = Aggregation::LastValue.identity(NumericKind::Int64);

        data.update(Value::Int(1), t0);
        data.update(Value::Int(2), t0 + Duration::from_secs(2));
        // Late arrival with an older timestamp.
        data.update(Value::Int(3), t0 + Duration::from_secs(1));

        let latest = Some(t0 + Duration::from_secs(2));
        assert_eq!(data, AggregationData::LastValue { value: Value::Int(2), timestamp: latest });

        // Same timestamp overwrites.
        data.update(Value::Int(4), t0 + Duration::from_secs(2));
        assert!(matches!(data, AggregationData::LastValue { value: Value::Int(4), .. }));
    }

    #[test]
    fn last_value_first_write_wins() {
        let before_epoch = SystemTime::UNIX_EPOCH - Duration::from_secs(60);
        let mut data = Aggregation::LastValue.identity(NumericKind::Int64);
        assert!(matches!(data, AggregationData::LastValue { timestamp: None, .. }));

        data.update(Value::Int(9), before_epoch);
        assert_eq!(
            data,
            AggregationData::LastValue { value: Value::Int(9), timestamp: Some(before_epoch) }
        );
    }

    #[test]
    fn distribution_rejects_non_finite() {
        let dist = Aggregation::distribution([1.0, 10.0]);
        assert!(dist.accepts(Value::Float(5.0)));
        assert!(!dist.accepts(Value::Float(f64::NAN)));
        assert!(!dist.accepts(Value::Float(f64::INFINITY)));
        assert!(!dist.accepts(Value::Float(f64::NEG_INFINITY)));

        assert!(Aggregation::Count.accepts(Value::Float(f64::NAN)));
        assert!(Aggregation::Sum.accepts(Value::Float(f64::INFINITY)));
    }

    #[test]
    fn distribution_buckets_and_stats() {
        let agg = Aggregation::distribution([1.0, 5.0, 10.0]);
        let mut data = agg.identity(NumericKind::Float64);
        for v in [0.5, 1.0, 3.0, 5.0, 7.0, 12.0] {
            data.update(Value::Float(v), now());
        }

        let AggregationData::Distribution(dist) = data else { panic!("not a distribution") };
        // Upper bounds are inclusive.
        assert_eq!(dist.bucket_counts, vec![2, 2, 1, 1]);
        assert_eq!(dist.count, 6);
        assert_eq!(dist.sum, 28.5);
        assert!((dist.mean - 4.75).abs() < 1e-12);
        assert_eq!(dist.min, 0.5);
        assert_eq!(dist.max, 12.0);

        // Hand-computed: sum((x - 4.75)^2) = 92.875
        assert!((dist.sum_of_squared_deviation - 92.875).abs() < 1e-9);
        assert!((dist.variance() - 92.875 / 5.0).abs() < 1e-9);

        let cumulative: Vec<_> = dist.cumulative_buckets().collect();
        assert_eq!(cumulative, vec![(1.0, 2), (5.0, 4), (10.0, 5)]);
    }

    #[test]
    fn empty_distribution() {
        let data = Aggregation::distribution(Vec::<f64>::new()).identity(NumericKind::Float64);
        let AggregationData::Distribution(dist) = data else { panic!("not a distribution") };
        assert_eq!(dist.bucket_counts, vec![0]);
        assert_eq!(dist.variance(), 0.0);
    }

    #[test]
    fn validate_distribution() {
        let ok = Aggregation::distribution([0.0, 1.0, 2.5]);
        assert!(ok.validate("v", NumericKind::Float64).is_ok());

        assert_eq!(
            ok.validate("v", NumericKind::Int64),
            Err(StatsError::IncompatibleAggregation {
                view: "v".to_owned(),
                aggregation: AggregationKind::Distribution,
                kind: NumericKind::Int64,
            })
        );

        for bad in [vec![1.0, 1.0], vec![2.0, 1.0], vec![0.0, f64::NAN], vec![f64::INFINITY]] {
            assert!(matches!(
                Aggregation::distribution(bad).validate("v", NumericKind::Float64),
                Err(StatsError::InvalidBuckets { .. })
            ));
        }

        for agg in [Aggregation::Count, Aggregation::Sum, Aggregation::LastValue] {
            assert!(agg.validate("v", NumericKind::Int64).is_ok());
            assert!(agg.validate("v", NumericKind::Float64).is_ok());
        }
    }
}
