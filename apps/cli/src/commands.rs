//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use autoblogger_core::{JobEvent, Orchestrator, Pipeline};
use autoblogger_rules::RuleSet;
use autoblogger_shared::{
    AppConfig, ArticleJob, JobId, JobState, SourceReference, config_file_path, expand_home,
    init_config, load_config, validate_cms_credentials, validate_model_key,
};
use autoblogger_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// autoblogger — rule-driven article rewriting and publishing.
#[derive(Parser)]
#[command(
    name = "autoblogger",
    version,
    about = "Rewrite source articles with AI, enrich them with SEO rules, and publish them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process one article end-to-end and wait for the result.
    Run {
        /// Source article URL.
        #[arg(conflicts_with = "text_file", required_unless_present = "text_file")]
        url: Option<String>,

        /// Read raw article text from a file instead of fetching a URL.
        #[arg(long)]
        text_file: Option<PathBuf>,
    },

    /// Queue a job and exit; continue it later with `resume`.
    Submit {
        /// Source article URL.
        #[arg(conflicts_with = "text_file", required_unless_present = "text_file")]
        url: Option<String>,

        /// Read raw article text from a file instead of fetching a URL.
        #[arg(long)]
        text_file: Option<PathBuf>,
    },

    /// Show the persisted state of a job.
    Status {
        /// Job identifier.
        job: String,
    },

    /// List all jobs.
    Jobs,

    /// Cancel a job (cooperative; takes effect between stages).
    Cancel {
        /// Job identifier.
        job: String,
    },

    /// Resume all non-terminal jobs and run them to completion.
    Resume,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Rule-table management.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Rule-table subcommands.
#[derive(Subcommand)]
pub(crate) enum RulesAction {
    /// Seed the rules directory with starter tables.
    Init,
    /// Load and validate the rule tables.
    Check,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "autoblogger=info",
        1 => "autoblogger=debug",
        _ => "autoblogger=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { url, text_file } => cmd_run(source_from(url, text_file)?).await,
        Command::Submit { url, text_file } => cmd_submit(source_from(url, text_file)?).await,
        Command::Status { job } => cmd_status(&job).await,
        Command::Jobs => cmd_jobs().await,
        Command::Cancel { job } => cmd_cancel(&job).await,
        Command::Resume => cmd_resume().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        Command::Rules { action } => match action {
            RulesAction::Init => cmd_rules_init().await,
            RulesAction::Check => cmd_rules_check().await,
        },
    }
}

/// Build a source reference from the URL/text-file flags.
fn source_from(url: Option<String>, text_file: Option<PathBuf>) -> Result<SourceReference> {
    match (url, text_file) {
        (Some(url), None) => Ok(SourceReference::Url { url }),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| eyre!("cannot read {}: {e}", path.display()))?;
            Ok(SourceReference::RawText { text })
        }
        _ => Err(eyre!("provide a URL or --text-file")),
    }
}

// ---------------------------------------------------------------------------
// Orchestrator construction
// ---------------------------------------------------------------------------

/// Load config, rules, and storage and wire up the orchestrator.
async fn build_orchestrator(config: &AppConfig) -> Result<(Orchestrator, Arc<Storage>)> {
    validate_model_key(config)?;
    validate_cms_credentials(config)?;

    let rules_dir = expand_home(&config.defaults.rules_dir);
    let rules = Arc::new(RuleSet::load(&rules_dir)?);

    let state_dir = expand_home(&config.defaults.state_dir);
    let storage = Arc::new(Storage::open(&state_dir.join("jobs.db")).await?);

    let pipeline = Pipeline::from_config(config, rules)?;
    let orchestrator = Orchestrator::new(
        pipeline,
        storage.clone(),
        config.retries.clone(),
        config.defaults.max_concurrent_jobs,
    );
    Ok((orchestrator, storage))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(source: SourceReference) -> Result<()> {
    let config = load_config()?;
    let (orchestrator, _storage) = build_orchestrator(&config).await?;

    let job_id = orchestrator.submit(source).await?;
    info!(%job_id, "job submitted");

    let spinner = job_spinner();
    let mut events = orchestrator.subscribe();
    let spinner_handle = {
        let spinner = spinner.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.job_id() != &job_id {
                    continue;
                }
                match event {
                    JobEvent::StateChanged { state, .. } => {
                        spinner.set_message(state.label());
                    }
                    JobEvent::StageRetrying { stage, attempt, .. } => {
                        spinner.set_message(format!("{stage} failed, retry {attempt}"));
                    }
                }
            }
        })
    };

    let job = orchestrator.wait_terminal(&job_id).await?;
    spinner_handle.abort();
    spinner.finish_and_clear();

    print_job(&job);
    match job.state {
        JobState::Succeeded => Ok(()),
        JobState::Abandoned => Err(eyre!("job was cancelled")),
        JobState::Failed { stage, kind, message } => {
            Err(eyre!("job failed at {stage} ({kind}): {message}"))
        }
        _ => Err(eyre!("job ended in unexpected state")),
    }
}

async fn cmd_submit(source: SourceReference) -> Result<()> {
    let config = load_config()?;
    let (orchestrator, _storage) = build_orchestrator(&config).await?;

    let job_id = orchestrator.submit(source).await?;
    println!("submitted job {job_id}");
    println!("run `autoblogger resume` to process queued jobs");
    Ok(())
}

async fn cmd_status(job: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let id: JobId = job.parse().map_err(|e| eyre!("invalid job id '{job}': {e}"))?;
    let job = storage
        .get_job(&id)
        .await?
        .ok_or_else(|| eyre!("no job with id {id}"))?;

    print_job(&job);
    Ok(())
}

async fn cmd_jobs() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let jobs = storage.list_jobs().await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    for job in jobs {
        println!(
            "{}  {:<24}  {}",
            job.id,
            job.state.label(),
            job.source.label()
        );
    }
    Ok(())
}

async fn cmd_cancel(job: &str) -> Result<()> {
    let config = load_config()?;
    let (orchestrator, _storage) = build_orchestrator(&config).await?;

    let id: JobId = job.parse().map_err(|e| eyre!("invalid job id '{job}': {e}"))?;
    orchestrator.cancel(&id).await?;
    println!("cancellation requested for {id}");
    Ok(())
}

async fn cmd_resume() -> Result<()> {
    let config = load_config()?;
    let (orchestrator, _storage) = build_orchestrator(&config).await?;

    let resumed = orchestrator.resume_pending().await?;
    if resumed.is_empty() {
        println!("nothing to resume");
        return Ok(());
    }
    println!("resuming {} job(s)", resumed.len());

    let mut failures = 0usize;
    for id in &resumed {
        let job = orchestrator.wait_terminal(id).await?;
        println!("{}  {}", job.id, job.state.label());
        if !matches!(job.state, JobState::Succeeded) {
            failures += 1;
        }
    }

    if failures > 0 {
        Err(eyre!("{failures} job(s) did not succeed"))
    } else {
        Ok(())
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let path = config_file_path()?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_rules_init() -> Result<()> {
    let config = load_config()?;
    let dir = expand_home(&config.defaults.rules_dir);
    let written = RuleSet::init(&dir)?;

    if written.is_empty() {
        println!("rule tables already present in {}", dir.display());
    } else {
        println!("seeded {} table(s) in {}", written.len(), dir.display());
    }
    Ok(())
}

async fn cmd_rules_check() -> Result<()> {
    let config = load_config()?;
    let dir = expand_home(&config.defaults.rules_dir);
    RuleSet::load(&dir)?;
    println!("rule tables in {} are valid", dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let state_dir = expand_home(&config.defaults.state_dir);
    Ok(Arc::new(Storage::open(&state_dir.join("jobs.db")).await?))
}

fn job_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message("submitting");
    spinner
}

fn print_job(job: &ArticleJob) {
    println!();
    println!("  Job:     {}", job.id);
    println!("  Source:  {}", job.source.label());
    println!("  State:   {}", job.state.label());
    println!("  Created: {}", job.created_at.to_rfc3339());

    if let Some(receipt) = &job.receipt {
        println!("  Post:    #{} {}", receipt.post_id, receipt.url);
        println!("  At:      {}", receipt.published_at.to_rfc3339());
    }

    if !job.errors.is_empty() {
        println!("  Errors:");
        for record in &job.errors {
            println!(
                "    {} {} ({}): {}",
                record.at.to_rfc3339(),
                record.stage,
                record.kind,
                record.message
            );
        }
    }
    println!();
}
