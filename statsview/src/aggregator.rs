//! Per-view aggregation state.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::{
    aggregation::AggregationData,
    measure::Value,
    snapshot::{Row, ViewData},
    tag::TagSet,
    view::{View, Window},
};

/// Accumulates the measurements of one subscribed view, one row per distinct combination of tag
/// values.
///
/// Each aggregator has its own lock, so recording into one view never contends with another.
#[derive(Debug)]
pub(crate) struct Aggregator {
    view: Arc<View>,
    clock: Clock,
    /// Subscription time, on both clocks. Used to map window boundaries to wall-clock time.
    created: (Instant, SystemTime),
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    window_start: Instant,
    rows: HashMap<Vec<String>, AggregationData>,
}

impl Aggregator {
    pub(crate) fn new(view: Arc<View>, clock: Clock) -> Self {
        let now = clock.now();
        Self {
            view,
            clock,
            created: (now, SystemTime::now()),
            state: Mutex::new(State { window_start: now, rows: HashMap::new() }),
        }
    }

    pub(crate) fn view(&self) -> &Arc<View> {
        &self.view
    }

    /// Apply one measurement. Returns `false`, leaving the state untouched, if `tags` lacks any of
    /// the view's tag keys or the aggregation does not accept `value`.
    pub(crate) fn update(&self, tags: &TagSet, value: Value, at: SystemTime) -> bool {
        if !self.view.aggregation().accepts(value) {
            return false;
        }
        let Some(key) = tags.values_for(self.view.tag_keys()) else {
            return false;
        };

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let kind = self.view.measure().kind();
        state
            .rows
            .entry(key)
            .or_insert_with(|| self.view.aggregation().identity(kind))
            .update(value, at);

        true
    }

    /// Copy the current window's rows.
    pub(crate) fn read(&self) -> ViewData {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let keys = self.view.tag_keys();
        let mut rows: Vec<Row> = state
            .rows
            .iter()
            .map(|(values, data)| Row {
                tags: keys.iter().cloned().zip(values.iter().cloned()).collect(),
                data: data.clone(),
            })
            .collect();
        let window_start = state.window_start;
        drop(state);

        rows.sort_by(|a, b| a.tags.cmp(&b.tags));

        ViewData {
            view: Arc::clone(&self.view),
            start: self.wall_time(window_start),
            end: self.wall_time(now),
            rows,
        }
    }

    /// Start a new window if the current interval window has elapsed.
    fn roll(&self, state: &mut State, now: Instant) {
        let Window::Interval(interval) = self.view.window() else { return };

        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed < interval {
            return;
        }

        // Skip over every window that passed without activity.
        let windows = elapsed.as_nanos() / interval.as_nanos();
        let advance = interval.as_nanos().saturating_mul(windows);
        state.window_start =
            state.window_start + Duration::from_nanos(advance.min(u64::MAX as u128) as u64);
        state.rows.clear();
    }

    fn wall_time(&self, instant: Instant) -> SystemTime {
        let (created, created_wall) = self.created;
        created_wall + instant.saturating_duration_since(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregation::Aggregation, measure::MeasureRegistry, tag::TagKey};

    fn count_view(window: Window, keys: Vec<TagKey>) -> Arc<View> {
        let registry = MeasureRegistry::new();
        let measure = registry.define::<i64>("requests", "", "1").unwrap();
        let view = View::builder("requests_view", &measure).window(window).tag_keys(keys);
        Arc::new(view.build().unwrap())
    }

    #[test]
    fn rows_grouped_by_tag_values() {
        let method = TagKey::new("method").unwrap();
        let view = count_view(Window::Cumulative, vec![method.clone()]);
        let agg = Aggregator::new(view, Clock::new());

        let get = TagSet::new().with(method.clone(), "GET");
        let post = TagSet::new().with(method.clone(), "POST");
        for tags in [&get, &post, &get] {
            assert!(agg.update(tags, Value::Int(1), SystemTime::now()));
        }

        let data = agg.read();
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.row(&["GET"]).unwrap().data, AggregationData::Count(2));
        assert_eq!(data.row(&["POST"]).unwrap().data, AggregationData::Count(1));
        assert_eq!(data.rows[0].tags, vec![(method, "GET".to_owned())]);
    }

    #[test]
    fn missing_tag_key_is_rejected() {
        let method = TagKey::new("method").unwrap();
        let agg = Aggregator::new(count_view(Window::Cumulative, vec![method]), Clock::new());

        assert!(!agg.update(&TagSet::new(), Value::Int(1), SystemTime::now()));
        assert!(agg.read().rows.is_empty());
    }

    #[test]
    fn non_finite_distribution_value_is_rejected() {
        let registry = MeasureRegistry::new();
        let latency = registry.define::<f64>("latency", "", "ms").unwrap();
        let view = View::builder("latency_dist", &latency)
            .aggregation(Aggregation::distribution([1.0, 10.0]))
            .build()
            .unwrap();
        let agg = Aggregator::new(Arc::new(view), Clock::new());

        let tags = TagSet::new();
        assert!(agg.update(&tags, Value::Float(5.0), SystemTime::now()));
        assert!(!agg.update(&tags, Value::Float(f64::NAN), SystemTime::now()));
        assert!(agg.update(&tags, Value::Float(20.0), SystemTime::now()));

        let data = agg.read();
        let AggregationData::Distribution(dist) = &data.row(&[]).unwrap().data else {
            panic!("not a distribution");
        };
        assert_eq!(dist.bucket_counts, vec![0, 1, 1]);
        assert_eq!(dist.count, 2);
        assert_eq!(dist.sum, 25.0);
        assert_eq!(dist.mean, 12.5);
    }

    #[test]
    fn ungrouped_view_ignores_tags() {
        let host = TagKey::new("host").unwrap();
        let agg = Aggregator::new(count_view(Window::Cumulative, vec![]), Clock::new());

        assert!(agg.update(&TagSet::new().with(host, "a"), Value::Int(1), SystemTime::now()));
        assert!(agg.update(&TagSet::new(), Value::Int(1), SystemTime::now()));

        let data = agg.read();
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.row(&[]).unwrap().data, AggregationData::Count(2));
    }

    #[test]
    fn interval_window_resets() {
        let (clock, mock) = Clock::mock();
        let view = count_view(Window::Interval(Duration::from_secs(10)), vec![]);
        let agg = Aggregator::new(view, clock);
        let tags = TagSet::new();

        for _ in 0..3 {
            agg.update(&tags, Value::Int(1), SystemTime::now());
        }
        mock.increment(Duration::from_secs(4));
        agg.update(&tags, Value::Int(1), SystemTime::now());

        // Mid-window read sees the partial window.
        let data = agg.read();
        assert_eq!(data.row(&[]).unwrap().data, AggregationData::Count(4));

        // Crossing the boundary resets to identity.
        mock.increment(Duration::from_secs(6));
        assert!(agg.read().rows.is_empty());

        agg.update(&tags, Value::Int(1), SystemTime::now());
        mock.increment(Duration::from_secs(25));
        agg.update(&tags, Value::Int(1), SystemTime::now());

        let data = agg.read();
        assert_eq!(data.row(&[]).unwrap().data, AggregationData::Count(1));
        // Windows are aligned to the subscription time: [30s, 40s).
        assert_eq!(data.start.duration_since(agg.created.1).unwrap(), Duration::from_secs(30));
        assert_eq!(data.end.duration_since(agg.created.1).unwrap(), Duration::from_secs(35));
    }

    #[test]
    fn cumulative_window_never_resets() {
        let (clock, mock) = Clock::mock();
        let registry = MeasureRegistry::new();
        let size = registry.define::<f64>("size", "", "By").unwrap();
        let view = Arc::new(
            View::builder("size_sum", &size).aggregation(Aggregation::Sum).build().unwrap(),
        );
        let agg = Aggregator::new(view, clock);

        agg.update(&TagSet::new(), Value::Float(1.5), SystemTime::now());
        mock.increment(Duration::from_secs(3600));
        agg.update(&TagSet::new(), Value::Float(2.0), SystemTime::now());

        let data = agg.read();
        assert_eq!(data.row(&[]).unwrap().data, AggregationData::Sum(Value::Float(3.5)));
        assert_eq!(data.start, agg.created.1);
    }
}
