use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Resolution, RunAccession, SampleKey};
use crate::error::KiraError;

pub const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

const ESEARCH_RETMAX: &str = "500";

static RUN_ACC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"acc="([SED]RR\d+)""#).expect("run accession pattern"));

/// Sample → run lookup against an external metadata service.
pub trait RunResolver: Send + Sync {
    fn lookup_runs(&self, key: &SampleKey) -> Result<Vec<RunAccession>, KiraError>;
}

/// Looks up `key` and folds every error, or a panicking resolver, into
/// [`Resolution::Failed`].
pub fn resolve_sample<R: RunResolver + ?Sized>(resolver: &R, key: &SampleKey) -> Resolution {
    match panic::catch_unwind(AssertUnwindSafe(|| resolver.lookup_runs(key))) {
        Ok(Ok(runs)) => {
            debug!(sample = %key, runs = runs.len(), "resolved sample");
            Resolution::from_runs(runs)
        }
        Ok(Err(err)) => {
            warn!(sample = %key, error = %err, "run lookup failed");
            Resolution::Failed(err.to_string())
        }
        Err(payload) => {
            let reason = panic_message(&*payload);
            warn!(sample = %key, reason, "run lookup panicked");
            Resolution::Failed(format!("lookup panicked: {reason}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[derive(Clone)]
pub struct SraHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SraHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-sr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::SraHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::SraHttp(err.to_string()))?;

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            client,
            base_url: EUTILS_BASE.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, KiraError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self.send_with_retries(|| {
            let mut request = self
                .client
                .get(&url)
                .query(params)
                .query(&[("retmode", "json"), ("tool", "kira-sr")]);
            if let Some(key) = &self.api_key {
                request = request.query(&[("api_key", key.as_str())]);
            }
            request
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "E-utilities request failed".to_string());
            return Err(KiraError::SraStatus { status, message });
        }
        response
            .json()
            .map_err(|err| KiraError::SraResponse(err.to_string()))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 4;
        const BASE_DELAY_MS: u64 = 350;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, delay_ms = delay, "retrying E-utilities request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::SraHttp(err.to_string()));
                }
            }
        }
    }
}

impl RunResolver for SraHttpClient {
    fn lookup_runs(&self, key: &SampleKey) -> Result<Vec<RunAccession>, KiraError> {
        let search = self.get_json(
            "esearch.fcgi",
            &[
                ("db", "sra"),
                ("term", key.as_str()),
                ("retmax", ESEARCH_RETMAX),
            ],
        )?;
        let ids = parse_esearch_ids(&search)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids.join(",");
        let summary = self.get_json("esummary.fcgi", &[("db", "sra"), ("id", id_list.as_str())])?;
        parse_summary_runs(&summary)
    }
}

pub fn parse_esearch_ids(payload: &Value) -> Result<Vec<String>, KiraError> {
    if let Some(message) = payload["error"].as_str() {
        return Err(KiraError::SraResponse(message.to_string()));
    }
    let list = payload["esearchresult"]["idlist"]
        .as_array()
        .ok_or_else(|| KiraError::SraResponse("esearch result has no idlist".to_string()))?;
    Ok(list
        .iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect())
}

/// Run accessions listed in an SRA esummary payload, in order of first appearance.
pub fn parse_summary_runs(payload: &Value) -> Result<Vec<RunAccession>, KiraError> {
    let result = &payload["result"];
    let uids = result["uids"]
        .as_array()
        .ok_or_else(|| KiraError::SraResponse("esummary result has no uids".to_string()))?;
    let mut runs: Vec<RunAccession> = Vec::new();
    for uid in uids.iter().filter_map(Value::as_str) {
        let Some(markup) = result[uid]["runs"].as_str() else {
            continue;
        };
        for capture in RUN_ACC_RE.captures_iter(markup) {
            let run: RunAccession = capture[1].parse()?;
            if !runs.contains(&run) {
                runs.push(run);
            }
        }
    }
    Ok(runs)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn esearch_ids_are_extracted() {
        let payload = json!({
            "header": {"type": "esearch"},
            "esearchresult": {"count": "2", "idlist": ["101", "102"]}
        });
        assert_eq!(parse_esearch_ids(&payload).unwrap(), vec!["101", "102"]);
    }

    #[test]
    fn esearch_error_is_reported() {
        let payload = json!({"error": "API rate limit exceeded"});
        assert!(parse_esearch_ids(&payload).is_err());
    }

    #[test]
    fn summary_runs_keep_first_seen_order() {
        let payload = json!({
            "result": {
                "uids": ["2", "1"],
                "2": {"runs": "<Run acc=\"SRR20\" total_spots=\"10\"/><Run acc=\"SRR10\" total_spots=\"5\"/>"},
                "1": {"runs": "<Run acc=\"SRR10\" total_spots=\"5\"/>"}
            }
        });
        let runs = parse_summary_runs(&payload).unwrap();
        let runs = runs.iter().map(RunAccession::as_str).collect::<Vec<_>>();
        assert_eq!(runs, vec!["SRR20", "SRR10"]);
    }

    #[test]
    fn summary_without_uids_is_malformed() {
        let payload = json!({"result": {}});
        assert!(parse_summary_runs(&payload).is_err());
    }
}
