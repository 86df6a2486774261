//! The `blocks`, `metric` and `metrics` commands
//!
//! Each command computes everything first and only then renders its table,
//! so a failing scan never leaves a partial table behind.

use crate::{
    config::InspectConfig,
    errors::{TsdbInfoError, TsdbInfoResult, UsageError},
    inspect::{self, ReportOptions},
    output::{format_timestamp, group_thousands, ProgressBar, TabWriter},
    tsdb::{Block, Db},
};
use std::{io::Write, path::Path};

/// Open the configured storage directory
pub fn open_storage(config: &InspectConfig) -> TsdbInfoResult<Db> {
    let path = storage_path(config)?;
    Db::open(path, config.tsdb_options()).map_err(|source| TsdbInfoError::Storage {
        path: path.to_path_buf(),
        source,
    })
}

pub fn storage_path(config: &InspectConfig) -> TsdbInfoResult<&Path> {
    config
        .storage
        .path
        .as_deref()
        .ok_or(TsdbInfoError::Usage(UsageError::MissingStoragePath))
}

pub fn find_block<'a>(db: &'a Db, id: &str) -> TsdbInfoResult<&'a Block> {
    db.block(id)
        .ok_or_else(|| UsageError::BlockNotFound(id.to_string()).into())
}

/// List every block with its time range and stats
pub fn run_blocks<W: Write>(db: &Db, out: W) -> TsdbInfoResult<()> {
    let rows = inspect::list_blocks(db);

    let mut tw = TabWriter::new(out);
    writeln!(tw, "ID\tFROM\tUNTIL\tSTATS")?;
    for row in &rows {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}",
            row.id,
            format_timestamp(row.min_time),
            format_timestamp(row.max_time),
            row.stats
        )?;
    }
    tw.into_inner()?;
    Ok(())
}

/// Sample, series and label statistics of one metric in one block
pub fn run_metric<W: Write>(
    db: &Db,
    block_id: &str,
    metric: &str,
    show_series: bool,
    out: W,
) -> TsdbInfoResult<()> {
    let block = find_block(db, block_id)?;

    let series = inspect::series_stats(db, block, metric)
        .map_err(|e| TsdbInfoError::query(format!("scanning metric {}", metric), e))?;
    let stat = inspect::scan::totals(metric, &series);
    let profile = inspect::label_profile(block, metric)
        .map_err(|e| TsdbInfoError::query(format!("profiling labels of {}", metric), e))?;

    let mut tw = TabWriter::new(out);
    writeln!(tw, "Metric\t{}", stat.metric)?;
    writeln!(tw, "Samples\t{}", group_thousands(stat.samples))?;
    writeln!(tw, "TimeSeries\t{}", group_thousands(stat.series))?;
    for label in profile.ranked() {
        writeln!(
            tw,
            "Label\t{}\t{}",
            label.label,
            group_thousands(label.occurrences)
        )?;
    }
    for (name, value) in profile.raw() {
        writeln!(tw, "LabelValue\t{}\t{}", name, value)?;
    }
    if show_series {
        for s in &series {
            writeln!(tw, "Series\t{}\t{}", s.labels, group_thousands(s.samples))?;
        }
    }
    tw.into_inner()?;
    Ok(())
}

/// Metrics of a block with the most samples
pub fn run_metrics<W: Write>(
    db: &Db,
    block_id: &str,
    options: &ReportOptions,
    show_progress: bool,
    out: W,
) -> TsdbInfoResult<()> {
    let block = find_block(db, block_id)?;

    let mut bar = None;
    let reports = inspect::top_metrics(db, block, options, |done, total| {
        let bar = bar.get_or_insert_with(|| ProgressBar::stderr(total, show_progress));
        if let Err(e) = bar.set(done) {
            tracing::debug!(error = %e, "progress redraw failed");
        }
    });
    let reports =
        reports.map_err(|e| TsdbInfoError::query(format!("scanning block {}", block_id), e));
    let reports = finish_scan(reports, bar)?;

    let mut tw = TabWriter::new(out);
    writeln!(tw, "METRIC\tSAMPLES\tSERIES\tLABELS")?;
    for report in &reports {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}",
            report.stat.metric,
            group_thousands(report.stat.samples),
            group_thousands(report.stat.series),
            report.label_summary()
        )?;
    }
    tw.into_inner()?;
    Ok(())
}

/// Close the progress bar of a scan. A failed scan keeps its own error; the
/// bar's is only reported when the scan succeeded.
fn finish_scan<T, W: Write>(
    scan: TsdbInfoResult<T>,
    bar: Option<ProgressBar<W>>,
) -> TsdbInfoResult<T> {
    let finished = match bar {
        Some(bar) => bar.finish().map(drop),
        None => Ok(()),
    };
    match (scan, finished) {
        (Err(e), Err(finish)) => {
            tracing::debug!(error = %finish, "closing progress bar failed");
            Err(e)
        }
        (scan, finished) => {
            finished?;
            scan
        }
    }
}
