use std::collections::HashSet;
use std::fs;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{Resolution, RunAccession};
use crate::error::KiraError;
use crate::fastq::{ConvertStats, convert_fasta_file};
use crate::matrix::load_series_directory;
use crate::pool::run_pool;
use crate::scheduler::{ResolveStats, Scheduler, SchedulerOptions};
use crate::sra::RunResolver;
use crate::srr::{SrrClient, ToolInfo, fastq_path};
use crate::store::{read_table, replace_table_atomic};
use crate::writer::{IncrementalWriter, RUN_COLUMN};

pub const DOWNLOAD_PATH_COLUMN: &str = "Download_Path";

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub input_dir: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub scheduler: SchedulerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub input_dir: String,
    pub output: String,
    pub series_files: usize,
    pub table_rows: usize,
    pub appended_to_existing: bool,
    pub stats: ResolveStats,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub table: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub table: String,
    pub output_dir: String,
    pub runs: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub rows_with_path: usize,
    pub tool: ToolInfo,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub input: String,
    pub output: String,
    pub max_read_len: usize,
    pub stats: ConvertStats,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Resolve,
    Download,
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// What a single progress step settled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Found,
    NotFound,
    Failed,
    Flushed,
}

impl From<&Resolution> for Outcome {
    fn from(resolution: &Resolution) -> Self {
        match resolution {
            Resolution::Found(_) => Outcome::Found,
            Resolution::NotFound => Outcome::NotFound,
            Resolution::Failed(_) => Outcome::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub progress: Option<Progress>,
    pub outcome: Option<Outcome>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            progress: None,
            outcome: None,
        }
    }

    pub fn progress(message: impl Into<String>, completed: usize, total: usize) -> Self {
        Self {
            message: message.into(),
            progress: Some(Progress { completed, total }),
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    /// Whether the user asked to stop. Long jobs poll this between steps and
    /// wind down after their current write.
    fn cancelled(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct App<R: RunResolver, S: SrrClient> {
    resolver: R,
    srr: S,
}

impl<R: RunResolver, S: SrrClient> App<R, S> {
    pub fn new(resolver: R, srr: S) -> Self {
        Self { resolver, srr }
    }

    pub fn resolve(
        &self,
        options: &ResolveOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ResolveResult, KiraError> {
        let started_at = iso_timestamp();
        let scheduler = Scheduler::new(options.scheduler)?;

        sink.event(ProgressEvent::message(format!(
            "phase=Parse; scanning {}",
            options.input_dir
        )));
        let table = load_series_directory(options.input_dir.as_std_path())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Parse; {} rows from {} series files",
            table.len(),
            table.series_count()
        )));

        let mut writer = IncrementalWriter::new(options.output.clone());
        let appended_to_existing = writer.store().exists();
        if appended_to_existing {
            info!(path = %options.output, "appending to existing output");
        }
        let stats = scheduler.run(&table, &self.resolver, &mut writer, sink)?;

        sink.event(ProgressEvent::message(format!(
            "phase=Done; {} rows written to {}",
            stats.rows_written, options.output
        )));
        Ok(ResolveResult {
            input_dir: options.input_dir.to_string(),
            output: options.output.to_string(),
            series_files: table.series_count(),
            table_rows: table.len(),
            appended_to_existing,
            stats,
            started_at,
            finished_at: iso_timestamp(),
        })
    }

    /// Downloads every run listed in the `SRR` column of `options.table`, then
    /// rewrites the table with a `Download_Path` column.
    pub fn download(
        &self,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, KiraError> {
        let started_at = iso_timestamp();
        let (mut headers, mut records) = read_table(&options.table)?;
        let run_index = headers
            .iter()
            .position(|name| name == RUN_COLUMN)
            .ok_or_else(|| {
                KiraError::InvalidTable(format!("{} has no {RUN_COLUMN} column", options.table))
            })?;

        let mut seen = HashSet::new();
        let mut runs = Vec::new();
        for record in &records {
            let value = record[run_index].trim();
            if value.is_empty() {
                continue;
            }
            match value.parse::<RunAccession>() {
                Ok(run) => {
                    if seen.insert(run.clone()) {
                        runs.push(run);
                    }
                }
                Err(err) => warn!(value, error = %err, "skipping invalid run accession"),
            }
        }

        fs::create_dir_all(options.output_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let total = runs.len();
        sink.event(ProgressEvent::progress(
            format!("phase=Fetch; {total} runs queued"),
            0,
            total,
        ));

        let output_dir = options.output_dir.as_std_path();
        let mut completed = 0usize;
        let mut downloaded = 0usize;
        let mut failed = 0usize;
        run_pool(
            runs,
            options.workers,
            |run| self.srr.download_fastq(run, output_dir),
            |run, result| {
                completed += 1;
                let (message, outcome) = match result {
                    Ok(_) => {
                        downloaded += 1;
                        (format!("phase=Fetch; {run} downloaded"), Outcome::Found)
                    }
                    Err(err) => {
                        failed += 1;
                        warn!(run = %run, error = %err, "download failed");
                        (format!("phase=Fetch; {run} failed"), Outcome::Failed)
                    }
                };
                sink.event(
                    ProgressEvent::progress(message, completed, total).with_outcome(outcome),
                );
                if sink.cancelled() {
                    return Err(KiraError::Cancelled);
                }
                Ok(())
            },
        )?;

        sink.event(ProgressEvent::message("phase=Store; updating download paths"));
        let path_index = match headers.iter().position(|name| name == DOWNLOAD_PATH_COLUMN) {
            Some(index) => index,
            None => {
                headers.push(DOWNLOAD_PATH_COLUMN.to_string());
                for record in &mut records {
                    record.push(String::new());
                }
                headers.len() - 1
            }
        };
        let mut rows_with_path = 0usize;
        for record in &mut records {
            let path = record[run_index]
                .trim()
                .parse::<RunAccession>()
                .ok()
                .map(|run| fastq_path(output_dir, &run))
                .filter(|path| path.exists());
            record[path_index] = match path {
                Some(path) => {
                    rows_with_path += 1;
                    path.to_string_lossy().to_string()
                }
                None => String::new(),
            };
        }
        replace_table_atomic(&options.table, &headers, &records)?;
        info!(
            table = %options.table,
            downloaded,
            failed,
            rows_with_path,
            "download paths updated"
        );

        Ok(DownloadResult {
            table: options.table.to_string(),
            output_dir: options.output_dir.to_string(),
            runs: total,
            downloaded,
            failed,
            rows_with_path,
            tool: self.srr.tool_info(),
            started_at,
            finished_at: iso_timestamp(),
        })
    }
}

pub fn convert_fasta(
    input: &Utf8PathBuf,
    output: &Utf8PathBuf,
    max_read_len: usize,
    sink: &dyn ProgressSink,
) -> Result<ConvertResult, KiraError> {
    sink.event(ProgressEvent::message(format!(
        "phase=Convert; {input} -> {output}"
    )));
    let stats = convert_fasta_file(input.as_std_path(), output.as_std_path(), max_read_len)?;
    sink.event(ProgressEvent::message(format!(
        "phase=Done; {} reads from {} records",
        stats.reads, stats.records
    )));
    Ok(ConvertResult {
        input: input.to_string(),
        output: output.to_string(),
        max_read_len,
        stats,
    })
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SampleKey;
    use crate::output::JsonOutput;
    use std::path::{Path, PathBuf};

    struct NoRuns;

    impl RunResolver for NoRuns {
        fn lookup_runs(&self, _key: &SampleKey) -> Result<Vec<RunAccession>, KiraError> {
            Ok(Vec::new())
        }
    }

    struct FakeSrr;

    impl SrrClient for FakeSrr {
        fn download_fastq(
            &self,
            id: &RunAccession,
            destination_dir: &Path,
        ) -> Result<PathBuf, KiraError> {
            if id.as_str() == "SRR2" {
                return Err(KiraError::SrrDownload("network".to_string()));
            }
            let path = fastq_path(destination_dir, id);
            fs::write(&path, b"@r\nA\n+\nF\n").unwrap();
            Ok(path)
        }

        fn tool_info(&self) -> ToolInfo {
            ToolInfo { fastq_dump: None }
        }
    }

    #[test]
    fn download_adds_path_column() {
        let temp = tempfile::tempdir().unwrap();
        let table = Utf8PathBuf::from_path_buf(temp.path().join("runs.csv")).unwrap();
        let output_dir = Utf8PathBuf::from_path_buf(temp.path().join("reads")).unwrap();
        fs::write(
            table.as_std_path(),
            "Sample_geo_accession,SRR\nGSM1,SRR1\nGSM1,SRR2\nGSM3,SRR1\n",
        )
        .unwrap();

        let app = App::new(NoRuns, FakeSrr);
        let result = app
            .download(
                &DownloadOptions {
                    table: table.clone(),
                    output_dir: output_dir.clone(),
                    workers: 2,
                },
                &JsonOutput,
            )
            .unwrap();

        assert_eq!(result.runs, 2);
        assert_eq!(result.downloaded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.rows_with_path, 2);

        let (headers, records) = read_table(&table).unwrap();
        assert_eq!(headers.last().unwrap(), DOWNLOAD_PATH_COLUMN);
        assert!(records[0][2].ends_with("SRR1.fastq"));
        assert_eq!(records[1][2], "");
        assert!(records[2][2].ends_with("SRR1.fastq"));
    }
}
