//! Distinct label values of a metric's series
//!
//! Only the block index is consulted; no chunk is read.

use crate::tsdb::{Block, Labels, Matcher, TsdbResult};
use std::collections::{BTreeMap, BTreeSet};

/// Number of distinct values seen for one label name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelStat {
    pub label: String,
    pub occurrences: u64,
}

/// Label name to the distinct values it takes across a set of series
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelProfile {
    values: BTreeMap<String, BTreeSet<String>>,
}

impl LabelProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, labels: &Labels) {
        for label in labels {
            self.values
                .entry(label.name.clone())
                .or_default()
                .insert(label.value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Label names by distinct value count, highest first, ties by name
    pub fn ranked(&self) -> Vec<LabelStat> {
        let mut stats: Vec<LabelStat> = self
            .values
            .iter()
            .map(|(label, values)| LabelStat {
                label: label.clone(),
                occurrences: values.len() as u64,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.label.cmp(&b.label))
        });
        stats
    }

    /// Every `(name, value)` pair, sorted by name then value
    pub fn raw(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.values.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.values.get(name)
    }
}

/// Profile the labels of every series named `metric` in the block
pub fn label_profile(block: &Block, metric: &str) -> TsdbResult<LabelProfile> {
    let index = block.index()?;
    let postings = index.postings_for_matchers(&[Matcher::metric_name(metric)])?;

    let mut profile = LabelProfile::new();
    for reference in &postings {
        let (labels, _) = index.series(*reference)?;
        profile.add(&labels);
    }

    tracing::debug!(
        block = %block.id(),
        metric,
        series = postings.len(),
        labels = profile.len(),
        "labels profiled"
    );

    Ok(profile)
}
