use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    aggregation::Aggregation,
    collector::sanitize,
    error::{Result, StatsError},
    measure::{Measure, MeasureDescriptor, MeasureNumber},
    tag::TagKey,
};

/// When the aggregated state of a view resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Accumulate from subscription until unsubscription.
    Cumulative,
    /// Reset to the identity state at every fixed interval, counted from subscription.
    Interval(Duration),
}

/// A view aggregates the measurements of one measure, optionally grouped by tag keys.
///
/// Views are inert until subscribed through a [`crate::ViewManager`].
#[derive(Debug, Clone)]
pub struct View {
    name: String,
    description: String,
    measure: Arc<MeasureDescriptor>,
    aggregation: Aggregation,
    window: Window,
    tag_keys: Vec<TagKey>,
}

impl View {
    /// Start building a view over `measure`. Defaults to a cumulative [`Aggregation::Count`]
    /// with no tag keys.
    pub fn builder<N: MeasureNumber>(name: impl Into<String>, measure: &Measure<N>) -> ViewBuilder {
        ViewBuilder {
            name: name.into(),
            description: String::new(),
            measure: Arc::clone(measure.descriptor()),
            aggregation: Aggregation::Count,
            window: Window::Cumulative,
            tag_keys: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn measure(&self) -> &Arc<MeasureDescriptor> {
        &self.measure
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// The tag keys rows are grouped by, sorted.
    pub fn tag_keys(&self) -> &[TagKey] {
        &self.tag_keys
    }
}

/// Builder for [`View`].
#[derive(Debug, Clone)]
pub struct ViewBuilder {
    name: String,
    description: String,
    measure: Arc<MeasureDescriptor>,
    aggregation: Aggregation,
    window: Window,
    tag_keys: Vec<TagKey>,
}

impl ViewBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Group rows by these tag keys. Measurements recorded without all of them are not
    /// aggregated into this view.
    pub fn tag_keys<I: IntoIterator<Item = TagKey>>(mut self, keys: I) -> Self {
        self.tag_keys = keys.into_iter().collect();
        self
    }

    /// Build the view. Aggregation compatibility is checked on subscription.
    ///
    /// Tag keys must stay distinct once mapped to Prometheus label names, and distributions
    /// cannot use `le`, which names the bucket label.
    pub fn build(self) -> Result<View> {
        if self.name.is_empty() {
            return Err(StatsError::InvalidName(self.name));
        }

        match self.window {
            Window::Interval(interval) if interval.is_zero() => {
                return Err(StatsError::InvalidWindow(interval));
            }
            _ => {}
        }

        let mut tag_keys = self.tag_keys;
        tag_keys.sort();
        tag_keys.dedup();

        let is_distribution = matches!(self.aggregation, Aggregation::Distribution(_));
        let mut labels = HashSet::with_capacity(tag_keys.len());
        for key in &tag_keys {
            let label = sanitize(key.name());
            if (is_distribution && label == "le") || !labels.insert(label) {
                return Err(StatsError::TagKeyConflict {
                    view: self.name,
                    key: key.name().to_owned(),
                });
            }
        }

        Ok(View {
            name: self.name,
            description: self.description,
            measure: self.measure,
            aggregation: self.aggregation,
            window: self.window,
            tag_keys,
        })
    }
}
