//! Top metrics of a block by sample count
//!
//! Every metric name in the block index is scanned. Scans run on a bounded
//! pool of scoped worker threads; results come back to the calling thread,
//! which alone reports progress and sorts the outcome.

use super::{
    labels::{label_profile, LabelStat},
    scan::{num_samples, MetricStat},
};
use crate::tsdb::{Block, Db, TsdbResult, METRIC_NAME};
use crossbeam::channel::{bounded, Receiver};
use std::{num::NonZeroUsize, thread};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportOptions {
    /// Number of metrics to report
    pub top: usize,
    /// Number of labels listed per metric
    pub top_labels: usize,
    /// Scan threads; 0 uses the available parallelism, 1 scans sequentially
    pub workers: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top: 100,
            top_labels: 5,
            workers: 0,
        }
    }
}

impl ReportOptions {
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            n => n,
        }
    }
}

/// One row of the report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricReport {
    pub stat: MetricStat,
    pub labels: Vec<LabelStat>,
}

impl MetricReport {
    /// `name: count` pairs joined by `, `
    pub fn label_summary(&self) -> String {
        self.labels
            .iter()
            .map(|l| format!("{}: {}", l.label, crate::output::group_thousands(l.occurrences)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Limit a requested count to the population it is taken from
pub fn clamp_limit(requested: usize, population: usize) -> usize {
    requested.min(population)
}

/// Order by samples, highest first, ties by metric name
pub fn sort_stats(stats: &mut [MetricStat]) {
    stats.sort_by(|a, b| {
        b.samples
            .cmp(&a.samples)
            .then_with(|| a.metric.cmp(&b.metric))
    });
}

/// Scan every metric of the block and report the top ones
///
/// `progress` is called with `(done, total)` after each metric is scanned.
pub fn top_metrics<F>(
    db: &Db,
    block: &Block,
    options: &ReportOptions,
    mut progress: F,
) -> TsdbResult<Vec<MetricReport>>
where
    F: FnMut(usize, usize),
{
    let metrics = block.index()?.label_values(METRIC_NAME);
    let workers = options.effective_workers().min(metrics.len()).max(1);

    tracing::debug!(
        block = %block.id(),
        metrics = metrics.len(),
        workers,
        "scanning metrics"
    );

    let mut stats = if workers == 1 {
        scan_sequential(db, block, &metrics, &mut progress)?
    } else {
        scan_parallel(db, block, metrics, workers, &mut progress)?
    };
    sort_stats(&mut stats);

    let top = clamp_limit(options.top, stats.len());
    stats.truncate(top);

    let mut reports = Vec::with_capacity(stats.len());
    for stat in stats {
        let mut labels = label_profile(block, &stat.metric)?.ranked();
        labels.truncate(clamp_limit(options.top_labels, labels.len()));
        reports.push(MetricReport { stat, labels });
    }

    Ok(reports)
}

fn scan_sequential(
    db: &Db,
    block: &Block,
    metrics: &[String],
    progress: &mut dyn FnMut(usize, usize),
) -> TsdbResult<Vec<MetricStat>> {
    let total = metrics.len();
    let mut stats = Vec::with_capacity(total);
    for metric in metrics {
        stats.push(num_samples(db, block, metric)?);
        progress(stats.len(), total);
    }
    Ok(stats)
}

fn scan_parallel(
    db: &Db,
    block: &Block,
    metrics: Vec<String>,
    workers: usize,
    progress: &mut dyn FnMut(usize, usize),
) -> TsdbResult<Vec<MetricStat>> {
    let total = metrics.len();
    let (job_tx, job_rx) = bounded::<String>(workers * 2);
    let (result_tx, result_rx) = bounded::<TsdbResult<MetricStat>>(workers * 2);

    let scanned = crossbeam::thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                for metric in job_rx {
                    // The collector hung up after an error
                    if result_tx.send(num_samples(db, block, &metric)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        s.spawn(move |_| {
            for metric in metrics {
                if job_tx.send(metric).is_err() {
                    break;
                }
            }
        });

        collect(result_rx, total, progress)
    });

    match scanned {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Drain scan results, stopping at the first error. The receiver is dropped
/// on return so blocked workers wind down.
fn collect(
    results: Receiver<TsdbResult<MetricStat>>,
    total: usize,
    progress: &mut dyn FnMut(usize, usize),
) -> TsdbResult<Vec<MetricStat>> {
    let mut stats = Vec::with_capacity(total);
    for result in results.iter() {
        stats.push(result?);
        progress(stats.len(), total);
    }
    Ok(stats)
}
