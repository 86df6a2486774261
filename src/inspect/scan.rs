//! Per-metric sample and series counts

use crate::tsdb::{Block, Db, Labels, Matcher, TsdbResult};

/// Totals for one metric name within a block's time range
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricStat {
    pub metric: String,
    pub series: u64,
    pub samples: u64,
}

/// Sample count of a single series
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesStat {
    pub labels: Labels,
    pub samples: u64,
}

/// Count the samples of every series named `metric` within the block's range
///
/// The query runs against the whole database, so series continuing into
/// overlapping blocks are merged before counting.
pub fn series_stats(db: &Db, block: &Block, metric: &str) -> TsdbResult<Vec<SeriesStat>> {
    let meta = block.meta();
    let querier = db.querier(meta.min_time, meta.max_time);
    let series = querier.select(&[Matcher::metric_name(metric)])?;

    let mut stats = Vec::with_capacity(series.len());
    for s in &series {
        stats.push(SeriesStat {
            samples: s.count_samples()?,
            labels: s.labels().clone(),
        });
    }

    tracing::debug!(
        block = %meta.ulid,
        metric,
        series = stats.len(),
        blocks_queried = querier.block_count(),
        "metric scanned"
    );

    Ok(stats)
}

pub fn num_samples(db: &Db, block: &Block, metric: &str) -> TsdbResult<MetricStat> {
    let stats = series_stats(db, block, metric)?;
    Ok(totals(metric, &stats))
}

/// Fold per-series counts into a metric total
pub fn totals(metric: &str, stats: &[SeriesStat]) -> MetricStat {
    MetricStat {
        metric: metric.to_string(),
        series: stats.len() as u64,
        samples: stats.iter().map(|s| s.samples).sum(),
    }
}
