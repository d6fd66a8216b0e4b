use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::domain::RunAccession;
use crate::error::KiraError;

pub const DEFAULT_DOWNLOAD_WORKERS: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub fastq_dump: Option<String>,
}

pub trait SrrClient: Send + Sync {
    /// Downloads one run into `destination_dir`, returning the expected FASTQ path.
    fn download_fastq(&self, id: &RunAccession, destination_dir: &Path)
    -> Result<PathBuf, KiraError>;
    fn tool_info(&self) -> ToolInfo;
}

#[derive(Debug, Clone)]
pub enum SrrToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SystemSrrClient {
    fastq_dump: Option<PathBuf>,
}

impl SystemSrrClient {
    pub fn new() -> Self {
        Self {
            fastq_dump: find_in_path("fastq-dump"),
        }
    }

    pub fn with_program(program: PathBuf) -> Self {
        Self {
            fastq_dump: Some(program),
        }
    }

    pub fn tool_status(&self) -> SrrToolStatus {
        if self.fastq_dump.is_none() {
            return SrrToolStatus::Missing {
                message: "missing fastq-dump (SRA Toolkit)".to_string(),
            };
        }
        SrrToolStatus::Ready
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), KiraError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| KiraError::MissingTool(format!("{}: {err}", program.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(KiraError::SrrDownload(message))
    }
}

impl Default for SystemSrrClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SrrClient for SystemSrrClient {
    fn download_fastq(
        &self,
        id: &RunAccession,
        destination_dir: &Path,
    ) -> Result<PathBuf, KiraError> {
        let program = self
            .fastq_dump
            .as_ref()
            .ok_or_else(|| KiraError::MissingTool("fastq-dump".to_string()))?;
        fs::create_dir_all(destination_dir)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let args = vec![
            id.as_str().to_string(),
            "--outdir".to_string(),
            destination_dir.to_string_lossy().to_string(),
        ];
        self.run_cmd(program.as_path(), &args)?;
        Ok(fastq_path(destination_dir, id))
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            fastq_dump: self
                .fastq_dump
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
        }
    }
}

/// Where `fastq-dump` leaves a single-file run.
pub fn fastq_path(destination_dir: &Path, id: &RunAccession) -> PathBuf {
    destination_dir.join(format!("{}.fastq", id.as_str()))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_dirs(name, std::env::split_paths(&path_var))
}

fn find_in_dirs(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    for dir in dirs {
        if cfg!(windows) {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        let plain = dir.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastq_path_uses_run_name() {
        let id: RunAccession = "SRR014966".parse().unwrap();
        let path = fastq_path(Path::new("/data/reads"), &id);
        assert!(path.ends_with("SRR014966.fastq"));
    }

    #[test]
    fn exe_suffix_is_only_tried_on_windows() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        std::fs::write(bin.path().join("fastq-dump"), "").unwrap();
        std::fs::write(bin.path().join("fastq-dump.exe"), "").unwrap();

        let dirs = vec![empty.path().to_path_buf(), bin.path().to_path_buf()];
        let found = find_in_dirs("fastq-dump", dirs).unwrap();
        let expected = if cfg!(windows) {
            "fastq-dump.exe"
        } else {
            "fastq-dump"
        };
        assert_eq!(found, bin.path().join(expected));
        assert_eq!(find_in_dirs("fastq-dump", vec![empty.path().to_path_buf()]), None);
    }

    #[test]
    fn missing_program_reports_tool() {
        let client = SystemSrrClient { fastq_dump: None };
        assert!(matches!(client.tool_status(), SrrToolStatus::Missing { .. }));
        let id: RunAccession = "SRR1".parse().unwrap();
        let err = client
            .download_fastq(&id, Path::new("unused"))
            .unwrap_err();
        assert!(matches!(err, KiraError::MissingTool(_)));
    }

    #[test]
    fn unrunnable_program_is_a_missing_tool() {
        let client = SystemSrrClient::with_program(PathBuf::from("/nonexistent/fastq-dump"));
        assert!(matches!(client.tool_status(), SrrToolStatus::Ready));
        let temp = tempfile::tempdir().unwrap();
        let id: RunAccession = "SRR1".parse().unwrap();
        let err = client.download_fastq(&id, temp.path()).unwrap_err();
        assert!(matches!(err, KiraError::MissingTool(_)));
    }
}
