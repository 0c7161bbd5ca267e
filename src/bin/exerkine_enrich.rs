use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use exerkine_enrich::client::EutilsClient;
use exerkine_enrich::config::{ConfigLoader, ConfigOverrides};
use exerkine_enrich::dispatch::CancellationToken;
use exerkine_enrich::domain::Stage;
use exerkine_enrich::error::EnrichError;
use exerkine_enrich::input::load_query_list;
use exerkine_enrich::output::{ConsoleOutput, JsonOutput, OutputMode};
use exerkine_enrich::pipeline::{Pipeline, PipelineSettings, run_pipeline};
use exerkine_enrich::progress::ProgressSink;

#[derive(Parser)]
#[command(name = "exerkine-enrich")]
#[command(about = "Enrich gene/protein symbols with NCBI gene, protein, pathway and literature records")]
#[command(version, author)]
struct Cli {
    /// Newline-delimited list of query symbols; a default list is written if absent.
    #[arg(long)]
    input: Option<String>,

    /// Directory receiving the TSV and FASTA outputs.
    #[arg(long)]
    output_dir: Option<String>,

    /// JSON configuration file (default: exerkine-enrich.json if present).
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    max_retries: Option<usize>,

    /// Base delay of the linear retry backoff.
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Per-invocation deadline for external tools; 0 disables it.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Requests per second across all workers; 0 disables the limiter.
    #[arg(long)]
    rate: Option<u32>,

    #[arg(long)]
    organism: Option<String>,

    /// Stage to run (repeatable); all stages when omitted.
    #[arg(long = "stage", value_enum)]
    stages: Vec<Stage>,

    /// Print the run report as JSON instead of progress lines.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EnrichError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EnrichError) -> u8 {
    match error {
        EnrichError::MissingTool(_)
        | EnrichError::Spawn { .. }
        | EnrichError::CommandFailed { .. }
        | EnrichError::Timeout { .. } => 3,
        EnrichError::InvalidQueryKey(_)
        | EnrichError::InputList { .. }
        | EnrichError::ConfigRead(_)
        | EnrichError::ConfigParse(_)
        | EnrichError::InvalidConfig(_) => 2,
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
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let overrides = ConfigOverrides {
        input: cli.input,
        output_dir: cli.output_dir,
        workers: cli.workers,
        max_retries: cli.max_retries,
        retry_delay_ms: cli.retry_delay_ms,
        command_timeout_secs: cli.timeout_secs,
        requests_per_second: cli.rate,
        organism: cli.organism,
        stages: cli.stages,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;

    // Every tool must resolve before any stage starts.
    let client = EutilsClient::new(&config.tools, config.command_timeout)?;

    let list = load_query_list(&config.input)?;
    if list.materialized {
        tracing::info!(path = %config.input, keys = list.keys.len(), "wrote default query list");
    }

    let pipeline = Pipeline::new(client, PipelineSettings::from(&config))?;
    let cancel = CancellationToken::new();
    let console = ConsoleOutput::new(std::io::stdout().is_terminal());
    let events: &dyn ProgressSink = match mode {
        OutputMode::Human => &console,
        OutputMode::Json => &JsonOutput,
    };

    let report = run_pipeline(
        &pipeline,
        &config,
        &list.keys,
        list.materialized,
        events,
        &cancel,
    )?;

    match mode {
        OutputMode::Human => console.print_report(&report),
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
    }
    Ok(())
}
