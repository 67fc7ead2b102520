//! tagrelay - parameter-gated pipeline promotion
//!
//! The `tagrelay` command drives both sides of the promotion handshake.
//!
//! ## Commands
//!
//! - `publish`: Write an image tag to a slot and start downstream pipelines
//! - `wait`: Block until a slot satisfies a condition
//! - `get` / `history`: Inspect a slot
//! - `reset` / `init-slot`: Put a slot (back) on the dry-run tag
//! - `buildspec` / `build`: Render a build spec or run an image build locally
//! - `plan` / `promote`: Show or execute the promotion of a manifest

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument, Level};

use slot_state::fakes::MemoryParameterStore;
use slot_state::{SurrealHandle, SurrealParameterStore, DEFAULT_LOCAL_PATH};
use tagrelay_ci::{BuildJob, BuildPipeline, PhaseConfig};
use tagrelay_core::metrics::METRICS;
use tagrelay_core::obs::slot_span;
use tagrelay_core::{
    ApprovalDecision, ApprovalGate, AutoApproval, BuildSpec, Deployer, ImageTag, Manifest,
    ParameterStore, PipelineTrigger, PollParameter, PollProps, PromotionPlan, PromotionRunner,
    PublishMode, RecordingDeployer, RecordingTrigger, ShellDeployer, SlotName, Stage, StepKind,
    TagPublisher, WriteMetadata,
};
use tagrelay_aws::{CodePipelineTrigger, SsmParameterStore};

#[derive(Parser)]
#[command(name = "tagrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parameter-gated pipeline promotion", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Where slots live and how pipelines are started
    #[arg(long, global = true, value_enum, env = "TAGRELAY_BACKEND", default_value = "surreal")]
    backend: BackendKind,

    /// SurrealDB endpoint for the surreal backend (default: local files in .tagrelay/slots)
    #[arg(long, global = true, env = "SURREALDB_URL")]
    db_url: Option<String>,

    /// Print command results as JSON
    #[arg(long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-process store; triggers are only recorded
    Memory,
    /// SurrealDB (`--db-url`, local files when unset); triggers are only recorded
    Surreal,
    /// SSM Parameter Store and CodePipeline
    Ssm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Shell,
    Native,
}

impl From<ModeArg> for PublishMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shell => PublishMode::Shell,
            ModeArg::Native => PublishMode::Native,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an image tag to a slot, then start downstream pipelines
    Publish {
        /// Slot name, e.g. /CdkPipeline/dev/SubPipes/ApiHandlerPipeline/EcrTag
        #[arg(long)]
        slot: String,

        /// Revision the image was built from; tagged with its first 7 characters
        #[arg(long, env = "CODEBUILD_RESOLVED_SOURCE_VERSION")]
        source_version: Option<String>,

        /// Explicit tag; wins over the revision
        #[arg(long)]
        tag: Option<String>,

        /// Pipeline to start after the write (repeatable)
        #[arg(long = "trigger")]
        triggers: Vec<String>,

        /// Recorded as the writer
        #[arg(long, default_value = "tagrelay")]
        written_by: String,
    },

    /// Wait until a slot satisfies a condition
    Wait {
        #[arg(long)]
        slot: String,

        /// Stop once the value equals this (wins over --until-not)
        #[arg(long)]
        until: Option<String>,

        /// Stop once the value differs from this
        #[arg(long)]
        until_not: Option<String>,

        /// Seconds between reads
        #[arg(long, default_value = "30")]
        poll_period: u64,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the equivalent shell loop instead of waiting
        #[arg(long)]
        render: bool,
    },

    /// Show the current value of a slot
    Get {
        #[arg(long)]
        slot: String,
    },

    /// Show every write to a slot, newest first
    History {
        #[arg(long)]
        slot: String,

        /// Maximum number of writes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Put a slot back on the dry-run tag
    Reset {
        #[arg(long)]
        slot: String,

        #[arg(long, default_value = "tagrelay")]
        written_by: String,
    },

    /// Create a slot holding the dry-run tag unless it exists
    InitSlot {
        #[arg(long)]
        slot: String,
    },

    /// Render the build spec of an image pipeline, a static site or the synth step
    #[command(group(ArgGroup::new("target").required(true).args(["image", "site", "synth"])))]
    Buildspec {
        #[arg(short, long, default_value = "tagrelay.toml")]
        manifest: PathBuf,

        #[arg(long, required_unless_present = "synth")]
        stage: Option<Stage>,

        /// Image pipeline id
        #[arg(long)]
        image: Option<String>,

        /// Static site id
        #[arg(long)]
        site: Option<String>,

        /// Render the root pipeline's synth step
        #[arg(long)]
        synth: bool,

        /// Whether the rendered buildspec writes the slot itself
        #[arg(long, value_enum, default_value = "shell")]
        mode: ModeArg,
    },

    /// Build an image pipeline locally and publish its tag on success
    Build {
        #[arg(short, long, default_value = "tagrelay.toml")]
        manifest: PathBuf,

        #[arg(long)]
        stage: Stage,

        #[arg(long)]
        image: String,

        /// Source checkout to build in
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Revision being built (default: env, then git HEAD)
        #[arg(long)]
        source_version: Option<String>,

        /// Per-phase timeout in seconds (0 = none)
        #[arg(long, default_value = "3600")]
        phase_timeout: u64,
    },

    /// Show the promotion plan of a manifest
    Plan {
        #[arg(short, long, default_value = "tagrelay.toml")]
        manifest: PathBuf,
    },

    /// Promote through every stage of a manifest
    Promote {
        #[arg(short, long, default_value = "tagrelay.toml")]
        manifest: PathBuf,

        /// Approve manual approvals without asking
        #[arg(long)]
        approve: bool,

        /// Record deploys instead of running their commands
        #[arg(long)]
        dry_run: bool,
    },
}

/// Store and trigger selected by `--backend`.
struct Backends {
    store: Arc<dyn ParameterStore>,
    trigger: Arc<dyn PipelineTrigger>,
}

impl Backends {
    async fn connect(kind: BackendKind, db_url: Option<&str>) -> Result<Self> {
        match kind {
            BackendKind::Memory => Ok(Self::in_memory()),
            BackendKind::Surreal => {
                let handle = match db_url.map(str::trim).filter(|url| !url.is_empty()) {
                    Some(url) => {
                        if url.starts_with("mem://") {
                            warn!("in-memory slot database; writes end with this process");
                        }
                        SurrealHandle::connect(url).await
                    }
                    None => SurrealHandle::setup_local(Path::new(DEFAULT_LOCAL_PATH)).await,
                }
                .context("Failed to connect to slot database")?;
                warn!("surreal backend records pipeline triggers without starting them");
                Ok(Self {
                    store: Arc::new(SurrealParameterStore::new(Arc::new(handle))),
                    trigger: Arc::new(RecordingTrigger::new()),
                })
            }
            BackendKind::Ssm => {
                let config = tagrelay_aws::load_sdk_config().await;
                Ok(Self {
                    store: Arc::new(SsmParameterStore::from_conf(&config)),
                    trigger: Arc::new(CodePipelineTrigger::from_conf(&config)),
                })
            }
        }
    }

    fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryParameterStore::new()),
            trigger: Arc::new(RecordingTrigger::new()),
        }
    }

    fn publisher(&self) -> TagPublisher {
        TagPublisher::new(self.store.clone(), self.trigger.clone())
    }
}

/// Asks on the terminal, prompting on stderr.
struct PromptApproval;

/// Writes `prompt` to `output` and reads one answer line from `input`.
fn confirm(
    mut input: impl BufRead,
    mut output: impl Write,
    prompt: &str,
) -> std::io::Result<bool> {
    output.write_all(prompt.as_bytes())?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[async_trait]
impl ApprovalGate for PromptApproval {
    async fn request(&self, step: &str, approval: &str) -> tagrelay_core::Result<ApprovalDecision> {
        let prompt = format!("{approval}: continue with {step}? [y/N] ");
        let approved = tokio::task::spawn_blocking(move || {
            // stdout carries command output
            confirm(std::io::stdin().lock(), std::io::stderr(), &prompt)
        })
        .await
        .map_err(std::io::Error::other)??;

        if approved {
            Ok(ApprovalDecision::Approved)
        } else {
            Ok(ApprovalDecision::Rejected {
                reason: "declined at prompt".to_string(),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tagrelay_core::init_tracing(cli.json, level);

    let result = run(cli).await;
    METRICS.flush();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let out = cli.output;

    // Commands that never touch a store.
    match &cli.command {
        Commands::Buildspec {
            manifest,
            stage,
            image,
            site,
            synth,
            mode,
        } => {
            let target = match (image, site) {
                _ if *synth => BuildTarget::Synth,
                (Some(image), _) => BuildTarget::Image(image),
                (None, Some(site)) => BuildTarget::Site(site),
                (None, None) => anyhow::bail!("one of --image, --site or --synth is required"),
            };
            return cmd_buildspec(manifest, *stage, target, (*mode).into());
        }
        Commands::Plan { manifest } => return cmd_plan(manifest, out),
        Commands::Wait {
            slot,
            until,
            until_not,
            poll_period,
            timeout,
            render: true,
        } => {
            let poll = poll_parameter(slot, until, until_not, *poll_period, *timeout)?;
            println!("{}", poll.render_commands().join("\n"));
            return Ok(());
        }
        _ => {}
    }

    let backends = Backends::connect(cli.backend, cli.db_url.as_deref()).await?;

    match cli.command {
        Commands::Publish {
            slot,
            source_version,
            tag,
            triggers,
            written_by,
        } => {
            cmd_publish(
                &backends,
                &slot,
                source_version.as_deref(),
                tag.as_deref(),
                &triggers,
                &written_by,
                out,
            )
            .await
        }
        Commands::Wait {
            slot,
            until,
            until_not,
            poll_period,
            timeout,
            ..
        } => {
            let poll = poll_parameter(&slot, &until, &until_not, poll_period, timeout)?;
            cmd_wait(&backends, &poll, out).await
        }
        Commands::Get { slot } => cmd_get(&backends, &slot, out).await,
        Commands::History { slot, limit } => cmd_history(&backends, &slot, limit, out).await,
        Commands::Reset { slot, written_by } => cmd_reset(&backends, &slot, &written_by).await,
        Commands::InitSlot { slot } => cmd_init_slot(&backends, &slot).await,
        Commands::Build {
            manifest,
            stage,
            image,
            workspace,
            source_version,
            phase_timeout,
        } => {
            cmd_build(
                &backends,
                &manifest,
                stage,
                &image,
                &workspace,
                source_version.as_deref(),
                phase_timeout,
                out,
            )
            .await
        }
        Commands::Promote {
            manifest,
            approve,
            dry_run,
        } => {
            let approvals: Arc<dyn ApprovalGate> = if approve {
                Arc::new(AutoApproval)
            } else {
                Arc::new(PromptApproval)
            };
            let deployer: Arc<dyn Deployer> = if dry_run {
                Arc::new(RecordingDeployer::new())
            } else {
                Arc::new(ShellDeployer)
            };
            cmd_promote(&backends, &manifest, approvals, deployer, out).await
        }
        Commands::Buildspec { .. } | Commands::Plan { .. } => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_slot(slot: &str) -> Result<SlotName> {
    SlotName::parse(slot).with_context(|| format!("invalid slot name '{slot}'"))
}

fn poll_parameter(
    slot: &str,
    until: &Option<String>,
    until_not: &Option<String>,
    poll_period: u64,
    timeout: Option<u64>,
) -> Result<PollParameter> {
    let props = PollProps {
        parameter: slot.to_string(),
        poll_period: Some(Duration::from_secs(poll_period)),
        until: until.clone(),
        until_not: until_not.clone(),
        timeout: timeout.map(Duration::from_secs),
    };
    PollParameter::new(props).context("invalid wait condition")
}

// ========== Slot Commands ==========

async fn cmd_publish(
    backends: &Backends,
    slot: &str,
    source_version: Option<&str>,
    tag: Option<&str>,
    triggers: &[String],
    written_by: &str,
    out: OutputFormat,
) -> Result<()> {
    let slot = parse_slot(slot)?;
    let tag = match tag {
        Some(explicit) => ImageTag::explicit(explicit).context("tag must not be blank")?,
        None => ImageTag::from_source_version(source_version),
    };

    let mut metadata = WriteMetadata::by(written_by);
    if let Some(version) = source_version {
        metadata = metadata.with_source_version(version);
    }

    let outcome = backends
        .publisher()
        .publish(&slot, &tag, metadata, triggers)
        .await
        .with_context(|| format!("failed to publish {tag} to {slot}"))?;

    if out == OutputFormat::Json {
        print_json(&outcome)?;
    } else {
        println!(
            "Published {} -> {} (version {})",
            slot, outcome.record.value, outcome.record.version
        );
        for (pipeline, execution_id) in &outcome.triggered {
            println!("  started {pipeline} ({execution_id})");
        }
        for (pipeline, error) in &outcome.failed_triggers {
            println!("  failed to start {pipeline}: {error}");
        }
    }

    if !outcome.fully_triggered() {
        anyhow::bail!(
            "{} downstream pipeline(s) could not be started",
            outcome.failed_triggers.len()
        );
    }
    Ok(())
}

async fn cmd_wait(backends: &Backends, poll: &PollParameter, out: OutputFormat) -> Result<()> {
    info!(slot = %poll.parameter(), "Waiting for slot");
    let outcome = poll
        .wait(backends.store.as_ref())
        .instrument(slot_span(poll.parameter().as_str()))
        .await
        .with_context(|| format!("wait on {} failed", poll.parameter()))?;

    if out == OutputFormat::Json {
        print_json(&serde_json::json!({
            "slot": poll.parameter(),
            "value": outcome.value,
            "attempts": outcome.attempts,
            "waited_ms": outcome.waited.as_millis() as u64,
        }))
    } else {
        println!("{}", outcome.value);
        Ok(())
    }
}

async fn cmd_get(backends: &Backends, slot: &str, out: OutputFormat) -> Result<()> {
    let slot = parse_slot(slot)?;
    let record = backends.store.get(&slot).await?;

    match (record, out) {
        (Some(record), OutputFormat::Json) => print_json(&record),
        (Some(record), OutputFormat::Text) => {
            println!("{}", record.value);
            Ok(())
        }
        (None, _) => anyhow::bail!("slot {slot} does not exist"),
    }
}

async fn cmd_history(
    backends: &Backends,
    slot: &str,
    limit: usize,
    out: OutputFormat,
) -> Result<()> {
    let slot = parse_slot(slot)?;
    let history: Vec<_> = backends
        .store
        .history(&slot)
        .await?
        .into_iter()
        .take(limit)
        .collect();

    if out == OutputFormat::Json {
        return print_json(&history);
    }
    if history.is_empty() {
        println!("No history for {slot}");
        return Ok(());
    }
    for record in history {
        println!(
            "v{} {} {} by {}",
            record.version,
            record.written_at.to_rfc3339(),
            record.value,
            if record.metadata.written_by.is_empty() {
                "-"
            } else {
                record.metadata.written_by.as_str()
            }
        );
    }
    Ok(())
}

async fn cmd_reset(backends: &Backends, slot: &str, written_by: &str) -> Result<()> {
    let slot = parse_slot(slot)?;
    let record = backends.publisher().reset(&slot, written_by).await?;
    println!("Reset {} (version {})", slot, record.version);
    Ok(())
}

async fn cmd_init_slot(backends: &Backends, slot: &str) -> Result<()> {
    let slot = parse_slot(slot)?;
    let record = tagrelay_core::ensure_slot(backends.store.as_ref(), &slot).await?;
    println!("{} = {} (version {})", slot, record.value, record.version);
    Ok(())
}

// ========== Build Commands ==========

/// What `buildspec` renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildTarget<'a> {
    Image(&'a str),
    Site(&'a str),
    Synth,
}

fn render_buildspec(
    manifest: &Manifest,
    stage: Option<Stage>,
    target: BuildTarget<'_>,
    mode: PublishMode,
) -> Result<BuildSpec> {
    let need_stage = || stage.context("--stage is required for image and site builds");
    Ok(match target {
        BuildTarget::Image(image) => manifest.build_project(need_stage()?, image)?.render(mode),
        BuildTarget::Site(site) => manifest.static_site_project(need_stage()?, site)?.render(),
        BuildTarget::Synth => manifest.synth_project().render(),
    })
}

fn cmd_buildspec(
    manifest: &Path,
    stage: Option<Stage>,
    target: BuildTarget<'_>,
    mode: PublishMode,
) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let spec = render_buildspec(&manifest, stage, target, mode)?;
    println!("{}", spec.to_json_pretty()?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_build(
    backends: &Backends,
    manifest: &Path,
    stage: Stage,
    image: &str,
    workspace: &Path,
    source_version: Option<&str>,
    phase_timeout: u64,
    out: OutputFormat,
) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let project = manifest.build_project(stage, image)?;
    let spec = project.render(PublishMode::Native);
    let phases = PhaseConfig::from_build_spec(&spec, &project.build_env(), phase_timeout);

    let source_version = tagrelay_core::resolve_source_version(source_version, workspace);
    let job = BuildJob::new(image, workspace.to_path_buf(), &phases, source_version);

    info!(image = %image, stage = %stage, tag = %job.image_tag(), "Building image");
    let result = BuildPipeline::run(
        &backends.publisher(),
        &job,
        phases,
        &project.tag_slot,
        &project.triggers,
    )
    .await
    .context("build failed to run")?;

    if out == OutputFormat::Json {
        print_json(&result)?;
    } else {
        println!("Run ID: {}", result.run_id);
        println!("Status: {}", if result.success { "PASSED" } else { "FAILED" });
        println!("Duration: {}ms", result.duration_ms);
        for stage_result in &result.stages {
            let status = if stage_result.passed() { "ok" } else { "FAILED" };
            println!(
                "  {} {} ({}ms, exit code: {})",
                status, stage_result.stage_name, stage_result.duration_ms, stage_result.exit_code
            );
        }
        for skipped in &result.skipped {
            println!("  skipped {skipped}");
        }
        for violation in &result.verdict.violations {
            println!("  - {violation}");
        }
        if let Some(published) = &result.published {
            println!(
                "Published {} -> {}",
                published.record.name, published.record.value
            );
        }
    }

    if result.success {
        Ok(())
    } else {
        anyhow::bail!("build of {image} failed")
    }
}

// ========== Promotion Commands ==========

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("failed to load manifest {}", path.display()))
}

fn cmd_plan(manifest: &Path, out: OutputFormat) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let plan = PromotionPlan::from_manifest(&manifest)?;

    if out == OutputFormat::Json {
        return print_json(&plan);
    }

    println!("Promotion plan for {}", plan.pipeline);
    for (index, step) in plan.steps.iter().enumerate() {
        println!("{}. {}", index + 1, step.name);
        for approval in &step.approvals {
            println!("   pre:  manual approval {approval}");
        }
        match &step.kind {
            StepKind::Dns { command } | StepKind::SubPipes { command, .. } => {
                if let Some(command) = command {
                    println!("   run:  {command}");
                }
            }
            StepKind::App { apps, .. } => {
                for app in apps {
                    let images: Vec<_> = app.images.iter().map(|i| i.image.as_str()).collect();
                    println!("   app:  {} [{}]", app.app, images.join(", "));
                }
            }
        }
        for wait in &step.waits {
            println!("   post: {} {} != none", wait.name, wait.slot);
        }
    }
    Ok(())
}

async fn cmd_promote(
    backends: &Backends,
    manifest: &Path,
    approvals: Arc<dyn ApprovalGate>,
    deployer: Arc<dyn Deployer>,
    out: OutputFormat,
) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let plan = PromotionPlan::from_manifest(&manifest)?;
    let runner = PromotionRunner::new(backends.store.clone(), approvals, deployer);

    let report = runner
        .run(&plan)
        .await
        .with_context(|| format!("promotion of {} stopped", plan.pipeline))?;

    if out == OutputFormat::Json {
        return print_json(&report);
    }
    for step in &report.steps {
        println!("{}: deployed [{}]", step.step, step.deployed.join(", "));
        for (slot, value) in &step.tags {
            println!("  {slot} = {value}");
        }
    }
    Ok(())
}
