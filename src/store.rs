use std::fs::{self, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, WriterBuilder};
use tempfile::Builder;
use tracing::debug;

use crate::error::KiraError;

/// Append-only CSV file. The header is written only when the file is created.
#[derive(Debug, Clone)]
pub struct OutputStore {
    path: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    /// Appends `records`, creating the file (and its header) if it is missing.
    pub fn append<I, R, F>(&self, header: &[&str], records: I) -> Result<usize, KiraError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path()).map_err(|err| self.flush_error(err))?;
        }
        let is_new = !self.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| self.flush_error(err))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer
                .write_record(header)
                .map_err(|err| self.flush_error(err))?;
        }
        let mut written = 0usize;
        for record in records {
            writer
                .write_record(record)
                .map_err(|err| self.flush_error(err))?;
            written += 1;
        }
        writer.flush().map_err(|err| self.flush_error(err))?;
        debug!(path = %self.path, rows = written, header = is_new, "appended batch");
        Ok(written)
    }

    fn flush_error(&self, err: impl std::fmt::Display) -> KiraError {
        KiraError::Flush {
            path: self.path.clone().into_std_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Replaces `path` with a fresh CSV through a temp file in the same directory.
pub fn replace_table_atomic<H, HF, I, R, F>(
    path: &Utf8Path,
    header: H,
    records: I,
) -> Result<(), KiraError>
where
    H: IntoIterator<Item = HF>,
    HF: AsRef<[u8]>,
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix("kira-sr-table")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(temp.as_file());
        writer
            .write_record(header)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for record in records {
            writer
                .write_record(record)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Reads a headed CSV into its header and records.
pub fn read_table(path: &Utf8Path) -> Result<(Vec<String>, Vec<Vec<String>>), KiraError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_std_path())
        .map_err(|err| KiraError::InvalidTable(format!("{path}: {err}")))?;
    let headers = reader
        .headers()
        .map_err(|err| KiraError::InvalidTable(format!("{path}: {err}")))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| KiraError::InvalidTable(format!("{path}: {err}")))?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok((headers, records))
}
