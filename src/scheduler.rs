use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info};

use crate::app::{Outcome, ProgressEvent, ProgressSink};
use crate::domain::{Resolution, SampleKey};
use crate::error::KiraError;
use crate::matrix::CombinedTable;
use crate::pool::run_pool;
use crate::sra::{RunResolver, resolve_sample};
use crate::writer::{BatchWriter, ResolutionBatch};

pub const DEFAULT_SAVE_INTERVAL: usize = 500;
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub save_interval: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            save_interval: DEFAULT_SAVE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub samples: usize,
    pub completed: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
    pub runs: usize,
    pub rows_written: usize,
    pub flushes: usize,
}

impl ResolveStats {
    fn record(&mut self, resolution: &Resolution) {
        self.completed += 1;
        match resolution {
            Resolution::Found(runs) => {
                self.found += 1;
                self.runs += runs.len();
            }
            Resolution::NotFound => self.not_found += 1,
            Resolution::Failed(_) => self.failed += 1,
        }
    }
}

/// Resolutions owned by the coordinating thread.
///
/// Every key starts unresolved. Completed keys queue up in completion order
/// until the next batch is taken.
#[derive(Debug, Default)]
pub struct PendingResolutions {
    entries: HashMap<SampleKey, Option<Resolution>>,
    completed: VecDeque<SampleKey>,
}

impl PendingResolutions {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a SampleKey>) -> Self {
        Self {
            entries: keys.into_iter().map(|key| (key.clone(), None)).collect(),
            completed: VecDeque::new(),
        }
    }

    pub fn record(&mut self, key: SampleKey, resolution: Resolution) {
        let slot = self.entries.entry(key.clone()).or_insert(None);
        if slot.is_none() {
            self.completed.push_back(key);
        }
        *slot = Some(resolution);
    }

    /// Keys resolved since the last batch.
    pub fn ready(&self) -> usize {
        self.completed.len()
    }

    /// Keys still held, resolved or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every key resolved since the last batch, oldest first.
    pub fn take_batch(&mut self) -> ResolutionBatch {
        let mut batch = Vec::with_capacity(self.completed.len());
        while let Some(key) = self.completed.pop_front() {
            if let Some(Some(resolution)) = self.entries.remove(&key) {
                batch.push((key, resolution));
            }
        }
        batch
    }
}

pub struct Scheduler {
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Result<Self, KiraError> {
        if options.workers == 0 {
            return Err(KiraError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if options.save_interval == 0 {
            return Err(KiraError::InvalidConfig(
                "save interval must be at least 1".to_string(),
            ));
        }
        Ok(Self { options })
    }

    /// Resolves every distinct sample key in `table` and hands finished
    /// batches to `writer` after each `save_interval` completions and after
    /// the last one. A writer error aborts the run.
    pub fn run<R, W>(
        &self,
        table: &CombinedTable,
        resolver: &R,
        writer: &mut W,
        sink: &dyn ProgressSink,
    ) -> Result<ResolveStats, KiraError>
    where
        R: RunResolver + ?Sized,
        W: BatchWriter,
    {
        let keys = table.sample_keys().to_vec();
        let total = keys.len();
        let mut pending = PendingResolutions::new(&keys);
        let mut stats = ResolveStats {
            samples: total,
            ..ResolveStats::default()
        };

        info!(
            samples = total,
            workers = self.options.workers,
            save_interval = self.options.save_interval,
            "resolving samples"
        );
        sink.event(ProgressEvent::progress(
            format!("phase=Resolve; {total} samples queued"),
            0,
            total,
        ));

        let save_interval = self.options.save_interval;
        run_pool(
            keys,
            self.options.workers,
            |key| resolve_sample(resolver, key),
            |key, resolution| {
                stats.record(&resolution);
                sink.event(
                    ProgressEvent::progress(
                        format!("phase=Resolve; {}", describe(&key, &resolution)),
                        stats.completed,
                        total,
                    )
                    .with_outcome(Outcome::from(&resolution)),
                );
                pending.record(key, resolution);

                let cancelled = sink.cancelled();
                if cancelled || stats.completed % save_interval == 0 || stats.completed == total {
                    flush(table, &mut pending, writer, sink, &mut stats)?;
                }
                if cancelled {
                    info!(completed = stats.completed, total, "resolution cancelled");
                    return Err(KiraError::Cancelled);
                }
                Ok(())
            },
        )?;

        info!(
            found = stats.found,
            not_found = stats.not_found,
            failed = stats.failed,
            rows = stats.rows_written,
            flushes = stats.flushes,
            "resolution finished"
        );
        Ok(stats)
    }
}

fn flush<W: BatchWriter>(
    table: &CombinedTable,
    pending: &mut PendingResolutions,
    writer: &mut W,
    sink: &dyn ProgressSink,
    stats: &mut ResolveStats,
) -> Result<(), KiraError> {
    let batch = pending.take_batch();
    if batch.is_empty() {
        return Ok(());
    }
    sink.event(
        ProgressEvent::message(format!("phase=Store; flushing {} samples", batch.len()))
            .with_outcome(Outcome::Flushed),
    );
    let written = writer.write_batch(table, &batch)?;
    stats.rows_written += written;
    stats.flushes += 1;
    debug!(
        samples = batch.len(),
        rows = written,
        remaining = pending.len(),
        "flushed batch"
    );
    Ok(())
}

fn describe(key: &SampleKey, resolution: &Resolution) -> String {
    match resolution {
        Resolution::Found(runs) => format!("{key}: {} runs", runs.len()),
        Resolution::NotFound => format!("{key}: no runs"),
        Resolution::Failed(reason) => format!("{key}: lookup failed ({reason})"),
    }
}
