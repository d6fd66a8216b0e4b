use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_series_resolver::app::{
    App, ConvertResult, DownloadOptions, DownloadResult, ProgressSinkKind, ResolveOptions,
    ResolveResult, convert_fasta,
};
use kira_series_resolver::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use kira_series_resolver::domain::{RunAccession, SampleKey};
use kira_series_resolver::error::KiraError;
use kira_series_resolver::output::{JsonOutput, OutputMode};
use kira_series_resolver::sra::{RunResolver, SraHttpClient};
use kira_series_resolver::srr::{SrrClient, SrrToolStatus, SystemSrrClient, ToolInfo};
use kira_series_resolver::tui::Tui;

#[derive(Parser)]
#[command(name = "kira-sr")]
#[command(about = "Resolve GEO series matrix samples to SRA runs")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve every sample in a folder of series matrix files to SRA runs")]
    Resolve(ResolveArgs),
    #[command(about = "Download the runs listed in a resolved CSV with fastq-dump")]
    Download(DownloadArgs),
    #[command(about = "Convert FASTA to FASTQ with constant quality")]
    Fa2fq(ConvertArgs),
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(long, alias = "folder_path")]
    folder_path: Utf8PathBuf,

    #[arg(long, alias = "save_path")]
    save_path: Utf8PathBuf,

    #[arg(long)]
    save_interval: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long, alias = "gsm_srr_csv")]
    gsm_srr_csv: Utf8PathBuf,

    #[arg(long, alias = "output_folder")]
    output_folder: Utf8PathBuf,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct ConvertArgs {
    input: Utf8PathBuf,

    output: Utf8PathBuf,

    #[arg(long)]
    max_len: Option<usize>,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NoSeriesMatrix(_)
        | KiraError::InvalidTable(_)
        | KiraError::InvalidConfig(_)
        | KiraError::InvalidFasta(_) => 2,
        KiraError::SraHttp(_)
        | KiraError::SraStatus { .. }
        | KiraError::SraResponse(_)
        | KiraError::MissingTool(_)
        | KiraError::SrrDownload(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Resolve(args) => run_resolve(args, output_mode),
        Commands::Download(args) => run_download(args, output_mode),
        Commands::Fa2fq(args) => run_convert(args, output_mode),
    }
}

fn run_resolve(args: ResolveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        save_interval: args.save_interval,
        workers: args.workers,
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;
    let resolver = SraHttpClient::new()?
        .with_base_url(config.eutils_base_url.clone())
        .with_api_key(config.api_key.clone());
    let app = App::new(resolver, NopSrr);
    let options = ResolveOptions {
        input_dir: args.folder_path,
        output: args.save_path,
        scheduler: config.scheduler,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.resolve(&options, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Resolve);
            let result = tui.run(move |sink| app.resolve(&options, sink))?;
            print_resolve_summary(&result, &config);
            Ok(())
        }
    }
}

fn run_download(args: DownloadArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        download_workers: args.workers,
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;
    let srr = SystemSrrClient::new();
    if let SrrToolStatus::Missing { message } = srr.tool_status() {
        return Err(KiraError::MissingTool(message).into());
    }
    let app = App::new(NopResolver, srr);
    let options = DownloadOptions {
        table: args.gsm_srr_csv,
        output_dir: args.output_folder,
        workers: config.download_workers,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&options, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Download);
            let result = tui.run(move |sink| app.download(&options, sink))?;
            print_download_summary(&result);
            Ok(())
        }
    }
}

fn run_convert(args: ConvertArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        max_read_len: args.max_len,
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;
    let max_read_len = config.max_read_len;

    match output_mode {
        OutputMode::NonInteractive => {
            let result = convert_fasta(&args.input, &args.output, max_read_len, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Convert);
            let (input, output) = (args.input, args.output);
            let result =
                tui.run(move |sink| convert_fasta(&input, &output, max_read_len, sink))?;
            print_convert_summary(&result);
            Ok(())
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_resolve_summary(result: &ResolveResult, config: &ResolvedConfig) {
    let stats = &result.stats;
    println!("{CYAN}KIRA-SR resolve summary{RESET}");
    println!(
        "series files: {}   matrix rows: {}   samples: {}",
        result.series_files, result.table_rows, stats.samples
    );
    println!(
        "{GREEN}found: {} ({} runs){RESET}   {YELLOW}no runs: {}{RESET}   {RED}failed: {}{RESET}",
        stats.found, stats.runs, stats.not_found, stats.failed
    );
    let mode = if result.appended_to_existing {
        "appended to"
    } else {
        "created"
    };
    println!(
        "{} rows {mode} {} in {} flushes (interval {}, workers {})",
        stats.rows_written,
        result.output,
        stats.flushes,
        config.scheduler.save_interval,
        config.scheduler.workers
    );
    if let Some(source) = &config.source {
        println!("config: {source}");
    }
}

fn print_download_summary(result: &DownloadResult) {
    println!("{CYAN}KIRA-SR download summary{RESET}");
    println!(
        "{GREEN}downloaded: {}{RESET} / {} runs   {RED}failed: {}{RESET}",
        result.downloaded, result.runs, result.failed
    );
    println!(
        "{} rows in {} point into {}",
        result.rows_with_path, result.table, result.output_dir
    );
    if let Some(version) = &result.tool.fastq_dump {
        println!("fastq-dump: {version}");
    }
}

fn print_convert_summary(result: &ConvertResult) {
    println!("{CYAN}KIRA-SR fa2fq summary{RESET}");
    println!(
        "{GREEN}{} reads{RESET} from {} records (max length {}) -> {}",
        result.stats.reads, result.stats.records, result.max_read_len, result.output
    );
}

struct NopResolver;
struct NopSrr;

impl RunResolver for NopResolver {
    fn lookup_runs(&self, _key: &SampleKey) -> Result<Vec<RunAccession>, KiraError> {
        Err(KiraError::SraHttp("SRA client not configured".to_string()))
    }
}

impl SrrClient for NopSrr {
    fn download_fastq(
        &self,
        _id: &RunAccession,
        _destination_dir: &Path,
    ) -> Result<PathBuf, KiraError> {
        Err(KiraError::MissingTool(
            "SRA tools not configured".to_string(),
        ))
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo { fastq_dump: None }
    }
}
