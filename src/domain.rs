use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// GEO sample accession used as the lookup key against SRA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleKey(String);

impl SampleKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('"').trim();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(KiraError::InvalidSampleKey(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('"').to_uppercase();
        let is_valid = ["SRR", "ERR", "DRR"]
            .iter()
            .find_map(|prefix| normalized.strip_prefix(prefix))
            .map(|digits| !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false);
        if !is_valid {
            return Err(KiraError::InvalidRunAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Outcome of one sample lookup.
///
/// `NotFound` and `Failed` both expand to zero output rows; they are kept
/// apart so summaries can report lookup failures separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Vec<RunAccession>),
    NotFound,
    Failed(String),
}

impl Resolution {
    pub fn from_runs(runs: Vec<RunAccession>) -> Self {
        if runs.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::Found(runs)
        }
    }

    pub fn runs(&self) -> &[RunAccession] {
        match self {
            Resolution::Found(runs) => runs,
            Resolution::NotFound | Resolution::Failed(_) => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Resolution::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_sample_key_strips_quotes() {
        let key: SampleKey = "\"GSM1234\"".parse().unwrap();
        assert_eq!(key.as_str(), "GSM1234");
    }

    #[test]
    fn parse_sample_key_rejects_blank() {
        let err = "  \"\" ".parse::<SampleKey>().unwrap_err();
        assert_matches!(err, KiraError::InvalidSampleKey(_));
    }

    #[test]
    fn parse_run_accession_valid() {
        let run: RunAccession = "srr014966".parse().unwrap();
        assert_eq!(run.as_str(), "SRR014966");
        let run: RunAccession = "ERR000001".parse().unwrap();
        assert_eq!(run.as_str(), "ERR000001");
    }

    #[test]
    fn parse_run_accession_invalid() {
        let err = "SRX12345".parse::<RunAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidRunAccession(_));
        assert!("SRR".parse::<RunAccession>().is_err());
    }

    #[test]
    fn failed_resolution_has_no_runs() {
        let failed = Resolution::Failed("timeout".to_string());
        assert!(failed.runs().is_empty());
        assert!(failed.is_failed());
        assert_eq!(Resolution::from_runs(Vec::new()), Resolution::NotFound);
    }
}
