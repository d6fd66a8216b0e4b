use camino::Utf8PathBuf;

use crate::domain::{Resolution, RunAccession, SampleKey};
use crate::error::KiraError;
use crate::matrix::CombinedTable;
use crate::series::{SERIES_COLUMNS, SampleRow};
use crate::store::OutputStore;

pub const RUN_COLUMN: &str = "SRR";

/// Resolved samples handed to a writer in one flush.
pub type ResolutionBatch = Vec<(SampleKey, Resolution)>;

/// Persists resolved batches. Returns the number of rows written.
pub trait BatchWriter {
    fn write_batch(
        &mut self,
        table: &CombinedTable,
        batch: &[(SampleKey, Resolution)],
    ) -> Result<usize, KiraError>;
}

/// One output row: a table row paired with one of its runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedRow<'a> {
    pub row: &'a SampleRow,
    pub run: &'a RunAccession,
}

impl ExpandedRow<'_> {
    pub fn record(&self) -> [&str; 12] {
        let [a, b, c, d, e, f, g, h, i, j, k] = self.row.record();
        [a, b, c, d, e, f, g, h, i, j, k, self.run.as_str()]
    }
}

pub fn output_header() -> [&'static str; 12] {
    let [a, b, c, d, e, f, g, h, i, j, k] = SERIES_COLUMNS;
    [a, b, c, d, e, f, g, h, i, j, k, RUN_COLUMN]
}

/// Replicates every row of each batch key once per resolved run.
///
/// Keys with no runs produce nothing. Order follows the batch, then the table,
/// then the run list.
pub fn expand_batch<'a>(
    table: &'a CombinedTable,
    batch: &'a [(SampleKey, Resolution)],
) -> Vec<ExpandedRow<'a>> {
    let mut rows = Vec::new();
    for (key, resolution) in batch {
        let runs = resolution.runs();
        if runs.is_empty() {
            continue;
        }
        for row in table.rows_for(key) {
            rows.extend(runs.iter().map(|run| ExpandedRow { row, run }));
        }
    }
    rows
}

#[derive(Debug, Clone)]
pub struct IncrementalWriter {
    store: OutputStore,
    rows_written: usize,
    flushes: usize,
}

impl IncrementalWriter {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            store: OutputStore::new(path),
            rows_written: 0,
            flushes: 0,
        }
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl BatchWriter for IncrementalWriter {
    fn write_batch(
        &mut self,
        table: &CombinedTable,
        batch: &[(SampleKey, Resolution)],
    ) -> Result<usize, KiraError> {
        let expanded = expand_batch(table, batch);
        let written = self.store.append(
            &output_header(),
            expanded.iter().map(|row| row.record()),
        )?;
        self.rows_written += written;
        self.flushes += 1;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::parse_series_matrix;

    fn table() -> CombinedTable {
        let record = parse_series_matrix(
            "!Series_geo_accession\t\"GSE1\"\n\
!Sample_title\t\"a\"\t\"b\"\n\
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\n",
        );
        CombinedTable::from_records([record])
    }

    fn runs(ids: &[&str]) -> Resolution {
        Resolution::from_runs(ids.iter().map(|id| id.parse().unwrap()).collect())
    }

    #[test]
    fn empty_resolution_expands_to_nothing() {
        let table = table();
        let batch = vec![
            ("GSM2".parse().unwrap(), runs(&[])),
            (
                "GSM1".parse().unwrap(),
                Resolution::Failed("boom".to_string()),
            ),
        ];
        assert!(expand_batch(&table, &batch).is_empty());
    }

    #[test]
    fn k_runs_expand_to_k_rows() {
        let table = table();
        let batch = vec![("GSM1".parse().unwrap(), runs(&["SRR1", "SRR2", "SRR3"]))];
        let expanded = expand_batch(&table, &batch);
        assert_eq!(expanded.len(), 3);
        for (row, run) in expanded.iter().zip(["SRR1", "SRR2", "SRR3"]) {
            assert_eq!(row.row, &table.rows()[0]);
            let record = row.record();
            assert_eq!(&record[..11], &table.rows()[0].record()[..]);
            assert_eq!(record[11], run);
        }
    }

    #[test]
    fn header_ends_with_run_column() {
        let header = output_header();
        assert_eq!(header[0], "Series_geo_accession");
        assert_eq!(header[11], RUN_COLUMN);
    }
}
