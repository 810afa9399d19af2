use std::{collections::BTreeMap, fmt};

use crate::error::{Result, StatsError};

const MAX_KEY_LEN: usize = 255;

/// A validated tag key. Views group their rows by tag keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagKey(String);

impl TagKey {
    /// Create a tag key. Keys must be 1-255 printable ASCII characters.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty() &&
            name.len() <= MAX_KEY_LEN &&
            name.bytes().all(|b| b.is_ascii_graphic() || b == b' ');
        if !valid {
            return Err(StatsError::InvalidTagKey(name));
        }

        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of tags attached to a `record` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: BTreeMap<TagKey, String>,
}

impl TagSet {
    /// An empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tag.
    pub fn insert(&mut self, key: TagKey, value: impl Into<String>) -> &mut Self {
        self.tags.insert(key, value.into());
        self
    }

    /// Builder-style [`TagSet::insert`].
    pub fn with(mut self, key: TagKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &TagKey) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &str)> {
        self.tags.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Project this set onto `keys`, in order. Returns `None` if any key is missing.
    pub(crate) fn values_for(&self, keys: &[TagKey]) -> Option<Vec<String>> {
        keys.iter().map(|key| self.tags.get(key).cloned()).collect()
    }
}

impl FromIterator<(TagKey, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (TagKey, String)>>(iter: I) -> Self {
        Self { tags: iter.into_iter().collect() }
    }
}
