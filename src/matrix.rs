use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::SampleKey;
use crate::error::KiraError;
use crate::series::{SampleRow, SeriesRecord};

pub const MATRIX_SUFFIX: &str = "_series_matrix.txt";
pub const MATRIX_GZ_SUFFIX: &str = "_series_matrix.txt.gz";

/// All rows of every series matrix in a directory, indexed by sample accession.
#[derive(Debug, Clone, Default)]
pub struct CombinedTable {
    rows: Vec<SampleRow>,
    index: HashMap<SampleKey, Vec<usize>>,
    keys: Vec<SampleKey>,
    series: usize,
}

impl CombinedTable {
    pub fn from_records(records: impl IntoIterator<Item = SeriesRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            table.extend(record);
        }
        table
    }

    fn extend(&mut self, record: SeriesRecord) {
        self.series += 1;
        for row in record.rows {
            let position = self.rows.len();
            let key = row
                .sample_geo_accession
                .as_deref()
                .and_then(|value| value.parse::<SampleKey>().ok());
            if let Some(key) = key {
                let positions = self.index.entry(key.clone()).or_default();
                if positions.is_empty() {
                    self.keys.push(key);
                }
                positions.push(position);
            }
            self.rows.push(row);
        }
    }

    /// Number of series records merged into the table.
    pub fn series_count(&self) -> usize {
        self.series
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct sample keys in first-seen order.
    pub fn sample_keys(&self) -> &[SampleKey] {
        &self.keys
    }

    /// Every row carrying `key`, in table order.
    pub fn rows_for<'a>(
        &'a self,
        key: &SampleKey,
    ) -> impl Iterator<Item = &'a SampleRow> + use<'a> {
        self.index
            .get(key)
            .map(|positions| positions.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&position| &self.rows[position])
    }
}

pub fn is_matrix_file(name: &str) -> bool {
    name.ends_with(MATRIX_SUFFIX) || name.ends_with(MATRIX_GZ_SUFFIX)
}

/// Series matrix files directly under `dir`, sorted by name.
pub fn discover_matrix_files(dir: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| KiraError::Filesystem(format!("read dir {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(is_matrix_file)
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn load_series_directory(dir: &Path) -> Result<CombinedTable, KiraError> {
    let files = discover_matrix_files(dir)?;
    if files.is_empty() {
        return Err(KiraError::NoSeriesMatrix(dir.to_path_buf()));
    }
    let mut records = Vec::with_capacity(files.len());
    for path in &files {
        let record = SeriesRecord::from_path(path)?;
        if record.is_empty() {
            warn!(path = %path.display(), "series matrix has no sample rows");
        }
        records.push(record);
    }
    let table = CombinedTable::from_records(records);
    info!(
        files = files.len(),
        rows = table.len(),
        samples = table.sample_keys().len(),
        "loaded series matrices"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::parse_series_matrix;

    #[test]
    fn duplicate_keys_share_one_entry() {
        let first = parse_series_matrix(
            "!Series_geo_accession\t\"GSE1\"\n!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\n",
        );
        let second = parse_series_matrix(
            "!Series_geo_accession\t\"GSE2\"\n!Sample_geo_accession\t\"GSM2\"\n",
        );
        let table = CombinedTable::from_records([first, second]);
        assert_eq!(table.len(), 3);
        let keys = table
            .sample_keys()
            .iter()
            .map(SampleKey::as_str)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["GSM1", "GSM2"]);

        let gsm2: SampleKey = "GSM2".parse().unwrap();
        let series = table
            .rows_for(&gsm2)
            .map(|row| row.series_geo_accession.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(series, vec!["GSE1", "GSE2"]);
    }

    #[test]
    fn rows_without_accession_have_no_key() {
        let record = parse_series_matrix("!Sample_title\t\"a\"\t\"b\"\n");
        let table = CombinedTable::from_records([record]);
        assert_eq!(table.len(), 2);
        assert!(table.sample_keys().is_empty());
    }

    #[test]
    fn suffix_filter() {
        assert!(is_matrix_file("GSE1_series_matrix.txt"));
        assert!(is_matrix_file("GSE1-GPL2_series_matrix.txt.gz"));
        assert!(!is_matrix_file("GSE1_family.soft.gz"));
    }
}
