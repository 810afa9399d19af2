use std::{sync::Arc, time::SystemTime};

use crate::{aggregation::AggregationData, tag::TagKey, view::View};

/// A point-in-time copy of every subscribed view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Wall-clock time the snapshot was taken at.
    pub taken_at: SystemTime,
    /// One entry per subscribed view, sorted by view name.
    pub views: Vec<ViewData>,
}

impl Snapshot {
    /// Find the data of a view by name.
    pub fn view(&self, name: &str) -> Option<&ViewData> {
        self.views.iter().find(|data| data.view.name() == name)
    }
}

/// The rows of a single view, aggregated over `[start, end]`.
#[derive(Debug, Clone)]
pub struct ViewData {
    pub view: Arc<View>,
    /// Start of the current window: the subscription time for cumulative views.
    pub start: SystemTime,
    pub end: SystemTime,
    /// One row per distinct combination of tag values, sorted by tag values.
    pub rows: Vec<Row>,
}

impl ViewData {
    /// The row whose tag values equal `values`, in tag key order.
    pub fn row(&self, values: &[&str]) -> Option<&Row> {
        self.rows.iter().find(|row| {
            row.tags.len() == values.len() &&
                row.tags.iter().zip(values).all(|((_, have), want)| have == want)
        })
    }
}

/// The aggregated state for one combination of tag values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub tags: Vec<(TagKey, String)>,
    pub data: AggregationData,
}
