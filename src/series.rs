use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::KiraError;

pub const SERIES_ACCESSION_TAG: &str = "!Series_geo_accession";
pub const SERIES_SAMPLE_ID_TAG: &str = "!Series_sample_id";
pub const CHARACTERISTICS_TAG: &str = "!Sample_characteristics_ch1";

/// Characteristic lines beyond this count are dropped.
pub const MAX_CHARACTERISTICS: usize = 3;

/// Column names of a parsed row, in output order.
pub const SERIES_COLUMNS: [&str; 11] = [
    "Series_geo_accession",
    "Series_sample_id",
    "Sample_title",
    "Sample_geo_accession",
    "Sample_source_name_ch1",
    "Sample_organism_ch1",
    "Sample_molecule_ch1",
    "Sample_platform_id",
    "Sample_Character_1",
    "Sample_Character_2",
    "Sample_Character_3",
];

const SAMPLE_TAGS: [&str; 6] = [
    "!Sample_title",
    "!Sample_geo_accession",
    "!Sample_source_name_ch1",
    "!Sample_organism_ch1",
    "!Sample_molecule_ch1",
    "!Sample_platform_id",
];

/// Per-sample columns: the six tagged attributes followed by the characteristic slots.
const COLUMN_SLOTS: usize = SAMPLE_TAGS.len() + MAX_CHARACTERISTICS;

type Column = Vec<Option<String>>;

/// One (series, sample) row. Absent values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRow {
    pub series_geo_accession: Option<String>,
    pub series_sample_id: Option<String>,
    pub sample_title: Option<String>,
    pub sample_geo_accession: Option<String>,
    pub sample_source_name: Option<String>,
    pub sample_organism: Option<String>,
    pub sample_molecule: Option<String>,
    pub sample_platform_id: Option<String>,
    pub characteristics: [Option<String>; MAX_CHARACTERISTICS],
}

impl SampleRow {
    /// Field values in `SERIES_COLUMNS` order, absent values as empty strings.
    pub fn record(&self) -> [&str; 11] {
        fn field(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("")
        }
        [
            field(&self.series_geo_accession),
            field(&self.series_sample_id),
            field(&self.sample_title),
            field(&self.sample_geo_accession),
            field(&self.sample_source_name),
            field(&self.sample_organism),
            field(&self.sample_molecule),
            field(&self.sample_platform_id),
            field(&self.characteristics[0]),
            field(&self.characteristics[1]),
            field(&self.characteristics[2]),
        ]
    }
}

/// A parsed series matrix file, normalized so every column has one entry per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesRecord {
    pub series_accession: Option<String>,
    pub rows: Vec<SampleRow>,
}

impl SeriesRecord {
    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        let bytes = fs::read(path)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
        let is_gzip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        let text = if is_gzip {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut raw = Vec::new();
            decoder.read_to_end(&mut raw).map_err(|err| {
                KiraError::Filesystem(format!("decompress {}: {err}", path.display()))
            })?;
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        let record = parse_series_matrix(&text);
        debug!(
            path = %path.display(),
            series = record.series_accession.as_deref().unwrap_or("-"),
            rows = record.len(),
            "parsed series matrix"
        );
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn parse_series_matrix(text: &str) -> SeriesRecord {
    let mut series_accession = None;
    let mut sample_ids: Vec<String> = Vec::new();
    let mut columns: [Option<Column>; COLUMN_SLOTS] = Default::default();
    let mut characteristics_seen = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with('!') {
            continue;
        }
        let mut fields = line.split('\t');
        let Some(tag) = fields.next() else {
            continue;
        };
        match tag.trim() {
            SERIES_ACCESSION_TAG => {
                series_accession = fields.next().and_then(clean_field);
            }
            SERIES_SAMPLE_ID_TAG => {
                sample_ids = fields
                    .next()
                    .map(|value| {
                        value
                            .trim()
                            .trim_matches('"')
                            .split_whitespace()
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
            }
            CHARACTERISTICS_TAG => {
                if characteristics_seen < MAX_CHARACTERISTICS {
                    columns[SAMPLE_TAGS.len() + characteristics_seen] =
                        Some(fields.map(clean_field).collect());
                }
                characteristics_seen += 1;
            }
            other => {
                if let Some(slot) = SAMPLE_TAGS.iter().position(|known| *known == other) {
                    columns[slot] = Some(fields.map(clean_field).collect());
                }
            }
        }
    }

    if characteristics_seen > MAX_CHARACTERISTICS {
        debug!(
            dropped = characteristics_seen - MAX_CHARACTERISTICS,
            "extra characteristics lines ignored"
        );
    }
    for (slot, column) in columns.iter().enumerate().take(SAMPLE_TAGS.len()) {
        if column.is_none() {
            debug!(tag = SAMPLE_TAGS[slot], "tag missing, column padded");
        }
    }

    normalize(series_accession, sample_ids, columns)
}

fn normalize(
    series_accession: Option<String>,
    sample_ids: Vec<String>,
    columns: [Option<Column>; COLUMN_SLOTS],
) -> SeriesRecord {
    let len = columns
        .iter()
        .map(|column| column.as_ref().map(Vec::len).unwrap_or(0))
        .max()
        .unwrap_or(0);

    let mut columns = columns.map(|column| pad(column.unwrap_or_default(), len).into_iter());
    let mut sample_ids = sample_ids.into_iter();

    let mut rows = Vec::with_capacity(len);
    for _ in 0..len {
        let series_sample_id = sample_ids.next();
        let mut next = |slot: usize| columns[slot].next().flatten();
        rows.push(SampleRow {
            series_geo_accession: series_accession.clone(),
            series_sample_id,
            sample_title: next(0),
            sample_geo_accession: next(1),
            sample_source_name: next(2),
            sample_organism: next(3),
            sample_molecule: next(4),
            sample_platform_id: next(5),
            characteristics: [next(6), next(7), next(8)],
        });
    }

    SeriesRecord {
        series_accession,
        rows,
    }
}

fn pad(mut column: Column, len: usize) -> Column {
    column.resize(len, None);
    column
}

fn clean_field(value: &str) -> Option<String> {
    let value = value.trim().trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = "!Series_title\t\"Example\"\n\
!Series_geo_accession\t\"GSE1\"\n\
!Series_sample_id\t\"GSM1 GSM2 GSM3 \"\n\
!Sample_title\t\"liver\"\t\"kidney\"\t\"brain\"\n\
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"\n\
!Sample_organism_ch1\t\"Homo sapiens\"\t\"Homo sapiens\"\n\
!Sample_characteristics_ch1\t\"age: 1\"\t\"age: 2\"\t\"age: 3\"\n\
!series_matrix_table_begin\n\
\"ID_REF\"\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"\n\
!series_matrix_table_end\n";

    #[test]
    fn parses_tagged_columns() {
        let record = parse_series_matrix(MATRIX);
        assert_eq!(record.series_accession.as_deref(), Some("GSE1"));
        assert_eq!(record.len(), 3);
        let first = &record.rows[0];
        assert_eq!(first.series_geo_accession.as_deref(), Some("GSE1"));
        assert_eq!(first.series_sample_id.as_deref(), Some("GSM1"));
        assert_eq!(first.sample_title.as_deref(), Some("liver"));
        assert_eq!(first.sample_geo_accession.as_deref(), Some("GSM1"));
        assert_eq!(first.characteristics[0].as_deref(), Some("age: 1"));
        assert_eq!(first.characteristics[1], None);
    }

    #[test]
    fn short_columns_are_padded() {
        let record = parse_series_matrix(MATRIX);
        assert_eq!(record.rows[1].sample_organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(record.rows[2].sample_organism, None);
        assert_eq!(record.rows[2].sample_source_name, None);
    }

    #[test]
    fn fourth_characteristic_is_dropped() {
        let text = "!Sample_geo_accession\t\"GSM1\"\n\
!Sample_characteristics_ch1\t\"a\"\n\
!Sample_characteristics_ch1\t\"b\"\n\
!Sample_characteristics_ch1\t\"c\"\n\
!Sample_characteristics_ch1\t\"d\"\n";
        let record = parse_series_matrix(text);
        assert_eq!(record.len(), 1);
        let values = record.rows[0]
            .characteristics
            .iter()
            .map(|value| value.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![Some("a"), Some("b"), Some("c")]);
    }

    #[test]
    fn sample_ids_truncate_to_row_count() {
        let text = "!Series_sample_id\t\"GSM1 GSM2 GSM3\"\n\
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\n";
        let record = parse_series_matrix(text);
        assert_eq!(record.len(), 2);
        assert_eq!(record.rows[1].series_sample_id.as_deref(), Some("GSM2"));
    }

    #[test]
    fn series_tag_only_yields_no_rows() {
        let record = parse_series_matrix("!Series_geo_accession\t\"GSE9\"\n");
        assert_eq!(record.series_accession.as_deref(), Some("GSE9"));
        assert!(record.is_empty());
    }

    #[test]
    fn untagged_text_yields_empty_record() {
        let record = parse_series_matrix("hello\nworld\n");
        assert_eq!(record, SeriesRecord::default());
    }

    #[test]
    fn record_uses_empty_string_for_absent() {
        let row = SampleRow {
            sample_geo_accession: Some("GSM1".to_string()),
            ..SampleRow::default()
        };
        let record = row.record();
        assert_eq!(record[3], "GSM1");
        assert_eq!(record[0], "");
        assert_eq!(record.len(), SERIES_COLUMNS.len());
    }
}
