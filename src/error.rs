use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid run accession: {0}")]
    InvalidRunAccession(String),

    #[error("invalid sample accession: {0}")]
    InvalidSampleKey(String),

    #[error("no *_series_matrix.txt files found in {0}")]
    #[diagnostic(help("download series matrix files from GEO into this directory first"))]
    NoSeriesMatrix(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("SRA lookup failed: {0}")]
    SraHttp(String),

    #[error("SRA returned status {status}: {message}")]
    SraStatus { status: u16, message: String },

    #[error("malformed SRA response: {0}")]
    SraResponse(String),

    #[error("failed to append batch to {path}: {message}")]
    Flush { path: PathBuf, message: String },

    #[error("invalid CSV table: {0}")]
    InvalidTable(String),

    #[error("invalid FASTA input: {0}")]
    InvalidFasta(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("SRA download failed: {0}")]
    SrrDownload(String),

    #[error("stopped before every sample was resolved")]
    #[diagnostic(help("rows flushed so far are kept; rerun to append the rest"))]
    Cancelled,

    #[error("worker pool failed: {0}")]
    WorkerPool(String),
}
