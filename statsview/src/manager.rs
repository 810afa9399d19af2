use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use quanta::Clock;
use tracing::debug;

use crate::{
    aggregator::Aggregator,
    error::{Result, StatsError},
    measure::MeasureRegistry,
    recorder::Recorder,
    snapshot::{Snapshot, ViewData},
    view::View,
};

/// The default interval at which a [`crate::Reporter`] exports snapshots.
pub const DEFAULT_REPORTING_PERIOD: Duration = Duration::from_secs(10);

/// Measure name -> aggregators of the views subscribed to it.
pub(crate) type Routes = HashMap<String, Vec<Arc<Aggregator>>>;

/// Owns the subscribed views and their aggregation state.
///
/// Cloning the manager yields another handle to the same views. Measurements reach the views
/// through a [`Recorder`] obtained with [`ViewManager::recorder`], and leave them through
/// [`ViewManager::snapshot`].
///
/// # Example
/// ```rust
/// use statsview::{MeasureRegistry, View, ViewManager};
///
/// let measures = MeasureRegistry::new();
/// let videos = measures.define::<i64>("my.org/measures/video_count", "processed videos", "1")?;
///
/// let views = ViewManager::new(&measures);
/// views.subscribe(View::builder("video_count", &videos).build()?)?;
///
/// let recorder = views.recorder();
/// recorder.record(&Default::default(), [videos.m(1)]);
/// # Ok::<_, statsview::StatsError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ViewManager {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    measures: MeasureRegistry,
    clock: Clock,
    views: Mutex<BTreeMap<String, Arc<Aggregator>>>,
    /// Rebuilt on every subscription change. Read without locking by recorders.
    pub(crate) routes: ArcSwap<Routes>,
    /// Held shared by recorders for the duration of a `record` call and exclusively by snapshots
    /// while copying rows, so a measurement is never split across two snapshots.
    pub(crate) cut: RwLock<()>,
    reporting_period_nanos: AtomicU64,
    /// Measurement updates rejected by a view, see [`Recorder::dropped`].
    pub(crate) dropped: AtomicU64,
}

impl ViewManager {
    /// Create a view manager for the measures defined in `measures`.
    pub fn new(measures: &MeasureRegistry) -> Self {
        Self::with_clock(measures, Clock::new())
    }

    /// Create a view manager that measures interval windows with `clock`.
    pub fn with_clock(measures: &MeasureRegistry, clock: Clock) -> Self {
        let shared = Shared {
            measures: measures.clone(),
            clock,
            views: Mutex::new(BTreeMap::new()),
            routes: ArcSwap::from_pointee(Routes::new()),
            cut: RwLock::new(()),
            reporting_period_nanos: AtomicU64::new(DEFAULT_REPORTING_PERIOD.as_nanos() as u64),
            dropped: AtomicU64::new(0),
        };

        Self { shared: Arc::new(shared) }
    }

    /// The measures this manager accepts views over.
    pub fn measures(&self) -> &MeasureRegistry {
        &self.shared.measures
    }

    /// A recorder feeding this manager's views.
    pub fn recorder(&self) -> Recorder {
        Recorder::new(Arc::clone(&self.shared))
    }

    /// Start aggregating `view`, from an identity state.
    ///
    /// Fails without side effects if the view's measure is not defined in this manager's registry,
    /// if its aggregation is incompatible with the measure, or if a view of the same name is
    /// already subscribed.
    pub fn subscribe(&self, view: View) -> Result<()> {
        if !self.shared.measures.contains(view.measure()) {
            return Err(StatsError::MeasureNotFound(view.measure().name().to_owned()));
        }
        view.aggregation().validate(view.name(), view.measure().kind())?;

        let mut views = self.shared.views.lock();
        if views.contains_key(view.name()) {
            return Err(StatsError::DuplicateView(view.name().to_owned()));
        }

        let name = view.name().to_owned();
        let aggregator = Aggregator::new(Arc::new(view), self.shared.clock.clone());
        views.insert(name.clone(), Arc::new(aggregator));
        self.shared.publish_routes(&views);

        debug!(view = %name, "Subscribed view");
        Ok(())
    }

    /// Stop aggregating the view named `name` and discard its state.
    ///
    /// Records that are in flight when this is called may still land in the discarded state.
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        let mut views = self.shared.views.lock();
        if views.remove(name).is_none() {
            return Err(StatsError::ViewNotFound(name.to_owned()));
        }
        self.shared.publish_routes(&views);

        debug!(view = %name, "Unsubscribed view");
        Ok(())
    }

    /// The subscribed view named `name`, if any.
    pub fn find(&self, name: &str) -> Option<Arc<View>> {
        self.shared.views.lock().get(name).map(|agg| Arc::clone(agg.view()))
    }

    /// Set the interval at which reporters export snapshots. Takes effect at the next tick.
    pub fn set_reporting_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(StatsError::InvalidReportingPeriod(period));
        }

        let nanos = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        self.shared.reporting_period_nanos.store(nanos, Ordering::Relaxed);
        Ok(())
    }

    pub fn reporting_period(&self) -> Duration {
        Duration::from_nanos(self.shared.reporting_period_nanos.load(Ordering::Relaxed))
    }

    /// Take a consistent snapshot of every subscribed view.
    pub fn snapshot(&self) -> Snapshot {
        let aggregators: Vec<_> = self.shared.views.lock().values().cloned().collect();

        let views = {
            let _cut = self.shared.cut.write();
            aggregators.iter().map(|agg| agg.read()).collect()
        };

        Snapshot { taken_at: SystemTime::now(), views }
    }

    /// The current rows of the view named `name`.
    pub fn retrieve_data(&self, name: &str) -> Result<ViewData> {
        let aggregator = self
            .shared
            .views
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StatsError::ViewNotFound(name.to_owned()))?;

        Ok(aggregator.read())
    }
}

impl Shared {
    fn publish_routes(&self, views: &BTreeMap<String, Arc<Aggregator>>) {
        let mut routes = Routes::new();
        for aggregator in views.values() {
            let measure = aggregator.view().measure().name().to_owned();
            routes.entry(measure).or_default().push(Arc::clone(aggregator));
        }

        self.routes.store(Arc::new(routes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregation::{Aggregation, AggregationData, AggregationKind},
        measure::NumericKind,
        tag::TagSet,
    };

    #[test]
    fn subscribe_lifecycle() {
        let measures = MeasureRegistry::new();
        let videos = measures.define::<i64>("video_count", "processed videos", "1").unwrap();
        let manager = ViewManager::new(&measures);

        let view = View::builder("video_count_view", &videos).build().unwrap();
        manager.subscribe(view.clone()).unwrap();
        assert_eq!(
            manager.subscribe(view).unwrap_err(),
            StatsError::DuplicateView("video_count_view".to_owned())
        );
        assert!(manager.find("video_count_view").is_some());

        manager.unsubscribe("video_count_view").unwrap();
        assert!(manager.find("video_count_view").is_none());
        assert!(manager.snapshot().views.is_empty());
    }

    #[test]
    fn incompatible_aggregation_leaves_no_state() {
        let measures = MeasureRegistry::new();
        let videos = measures.define::<i64>("video_count", "", "1").unwrap();
        let manager = ViewManager::new(&measures);

        let view = View::builder("video_hist", &videos)
            .aggregation(Aggregation::distribution([1.0, 2.0]))
            .build()
            .unwrap();
        assert_eq!(
            manager.subscribe(view).unwrap_err(),
            StatsError::IncompatibleAggregation {
                view: "video_hist".to_owned(),
                aggregation: AggregationKind::Distribution,
                kind: NumericKind::Int64,
            }
        );
        assert!(manager.find("video_hist").is_none());
        assert!(manager.shared.routes.load().is_empty());
    }

    #[test]
    fn measure_from_other_registry_is_rejected() {
        let ours = MeasureRegistry::new();
        let theirs = MeasureRegistry::new();
        let foreign = theirs.define::<i64>("video_count", "", "1").unwrap();
        let manager = ViewManager::new(&ours);

        let view = View::builder("v", &foreign).build().unwrap();
        assert_eq!(
            manager.subscribe(view).unwrap_err(),
            StatsError::MeasureNotFound("video_count".to_owned())
        );
    }

    #[test]
    fn unsubscribe_unknown_leaves_others() {
        let measures = MeasureRegistry::new();
        let videos = measures.define::<i64>("video_count", "", "1").unwrap();
        let manager = ViewManager::new(&measures);
        manager.subscribe(View::builder("v", &videos).build().unwrap()).unwrap();

        let recorder = manager.recorder();
        recorder.record(&TagSet::new(), [videos.m(1), videos.m(1)]);

        let err = manager.unsubscribe("nope").unwrap_err();
        assert_eq!(err, StatsError::ViewNotFound("nope".into()));

        let data = manager.retrieve_data("v").unwrap();
        assert_eq!(data.row(&[]).unwrap().data, AggregationData::Count(2));
        assert!(matches!(manager.retrieve_data("nope"), Err(StatsError::ViewNotFound(_))));
    }

    #[test]
    fn routes_follow_subscriptions() {
        let measures = MeasureRegistry::new();
        let latency = measures.define::<f64>("latency", "", "ms").unwrap();
        let manager = ViewManager::new(&measures);

        manager
            .subscribe(View::builder("a", &latency).aggregation(Aggregation::Sum).build().unwrap())
            .unwrap();
        manager.subscribe(View::builder("b", &latency).build().unwrap()).unwrap();
        assert_eq!(manager.shared.routes.load()["latency"].len(), 2);

        manager.unsubscribe("a").unwrap();
        assert_eq!(manager.shared.routes.load()["latency"].len(), 1);

        manager.unsubscribe("b").unwrap();
        assert!(manager.shared.routes.load().get("latency").is_none());
    }

    #[test]
    fn reporting_period() {
        let manager = ViewManager::new(&MeasureRegistry::new());
        assert_eq!(manager.reporting_period(), DEFAULT_REPORTING_PERIOD);

        manager.set_reporting_period(Duration::from_secs(1)).unwrap();
        assert_eq!(manager.reporting_period(), Duration::from_secs(1));

        assert_eq!(
            manager.set_reporting_period(Duration::ZERO).unwrap_err(),
            StatsError::InvalidReportingPeriod(Duration::ZERO)
        );
        assert_eq!(manager.reporting_period(), Duration::from_secs(1));
    }

    #[test]
    fn snapshot_views_sorted_by_name() {
        let measures = MeasureRegistry::new();
        let videos = measures.define::<i64>("video_count", "", "1").unwrap();
        let manager = ViewManager::new(&measures);
        for name in ["zeta", "alpha", "mid"] {
            manager.subscribe(View::builder(name, &videos).build().unwrap()).unwrap();
        }

        let names: Vec<_> =
            manager.snapshot().views.iter().map(|data| data.view.name().to_owned()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }
}
