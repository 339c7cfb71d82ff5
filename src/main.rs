mod config;
mod contracts;
mod errors;
mod graph;
mod instance;
mod plan_input;
mod resume;
mod scheduler;
mod slug;
mod state_machine;
mod state_store;
mod structured_logger;
mod workflow_paths;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use config::CoordinatorConfig;
use errors::CoordinatorError;
use instance::{PhaseStatus, WorkflowInstance, WorkflowKind};
use state_machine::{PhaseStateMachine, StateCommand};
use state_store::{FileStateStore, StateStore};
use structured_logger::StructuredLogger;

#[derive(Parser)]
#[command(name = "delivery")]
#[command(about = "Phase-gated coordinator for feature and epic delivery workflows")]
#[command(version, long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DELIVERY_GIT_SHA"),
    ", commit ts ",
    env!("DELIVERY_BUILD_TIMESTAMP"),
    ")"
))]
struct Cli {
    /// Working directory whose state namespace to use (defaults to the
    /// current directory)
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,

    /// Explicit config file (defaults to <working-dir>/delivery.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new workflow instance; the specification phase starts
    /// immediately
    Init {
        /// The feature or epic title (all arguments are joined)
        #[arg(trailing_var_arg = true, required = true)]
        title: Vec<String>,

        /// Explicit instance slug (skips slug generation)
        #[arg(short, long)]
        name: Option<String>,

        /// Whether this is a single feature or a larger epic
        #[arg(short, long, value_enum, default_value = "feature")]
        kind: KindArg,
    },
    /// Attach the sprint plan from a plan document to the tasks phase
    Plan {
        id: String,
        /// YAML or JSON document declaring the sprints
        #[arg(long)]
        sprints: PathBuf,
    },
    /// Compute the minimal remaining work for an interrupted workflow
    Continue { id: String },
    /// Dump the stored workflow instance as JSON
    Status { id: String },
    /// Complete the current phase (the next one starts automatically)
    Advance { id: String },
    /// Mark the current phase failed, blocking downstream phases
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Retry the failed phase, or re-arm the current phase's rejected gate
    Retry { id: String },
    /// Approve the current phase's gate
    ApproveGate { id: String },
    /// Reject the current phase's gate
    RejectGate { id: String },
    /// Report sprint execution progress
    Sprint {
        #[command(subcommand)]
        command: SprintCommand,
    },
    /// Abandon the instance; one-way, nothing can be changed afterwards
    Abandon { id: String },
}

#[derive(Subcommand)]
enum SprintCommand {
    /// Report a sprint picked up by an executor
    Start { id: String, sprint_id: String },
    /// Report a sprint finished
    Complete { id: String, sprint_id: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Feature,
    Epic,
}

impl From<KindArg> for WorkflowKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Feature => WorkflowKind::Feature,
            KindArg::Epic => WorkflowKind::Epic,
        }
    }
}

struct App {
    config: CoordinatorConfig,
    store: FileStateStore,
    logs_dir: PathBuf,
}

impl App {
    fn new(working_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self> {
        let working_dir = match working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("Could not determine working directory")?,
        };
        let config = match config_path {
            Some(path) => CoordinatorConfig::load(&path)?,
            None => CoordinatorConfig::load_or_default(&working_dir)?,
        };
        let state_root = match &config.state_root {
            Some(root) => root.clone(),
            None => workflow_paths::state_dir(&working_dir)?,
        };
        let logs_dir = workflow_paths::logs_dir(&working_dir)?;

        Ok(Self {
            config,
            store: FileStateStore::new(state_root),
            logs_dir,
        })
    }

    fn logger(&self, id: &str) -> Result<Arc<StructuredLogger>> {
        Ok(Arc::new(StructuredLogger::new(id, &self.logs_dir)?))
    }

    /// Reload-apply-save loop for every mutating command. Version
    /// conflicts mean another worker committed in between; those are
    /// retried with a fresh read, not surfaced as failures.
    async fn mutate<F>(&self, id: &str, build_command: F) -> Result<()>
    where
        F: Fn(&WorkflowInstance) -> Result<StateCommand>,
    {
        let logger = self.logger(id)?;
        let mut attempts = 0;
        loop {
            let current = self.store.load(id).await?;
            let expected = current.version;
            let command = build_command(&current)?;

            let mut machine = PhaseStateMachine::new(current, Arc::clone(&logger));
            let events = machine.apply(command)?;

            match self.store.save(machine.instance(), expected).await {
                Ok(_) => {
                    for event in &events {
                        println!("{}", event.describe());
                    }
                    return Ok(());
                }
                Err(CoordinatorError::VersionConflict { .. })
                    if attempts < self.config.conflict_retries =>
                {
                    attempts += 1;
                    tracing::warn!(
                        instance = id,
                        attempt = attempts,
                        "save lost to a concurrent writer; reloading and retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn init(&self, title_words: &[String], name: Option<String>, kind: KindArg) -> Result<()> {
        let title = title_words.join(" ");
        if title.trim().is_empty() {
            bail!("a title is required");
        }
        let id = match name {
            Some(name) => {
                slug::validate_slug(&name)?;
                name
            }
            None => slug::generate_slug(&title)?,
        };

        let instance = WorkflowInstance::new(&id, &title, kind.into(), &self.config.gates);
        match self.store.save(&instance, 0).await {
            Ok(version) => {
                let logger = self.logger(&id)?;
                logger.log(
                    "Cli",
                    serde_json::json!({
                        "kind": "instance_created",
                        "title": title,
                        "workflow_kind": instance.kind,
                    }),
                );
                println!("created workflow {} (version {})", id, version);
                println!("phase specification started");
                Ok(())
            }
            Err(CoordinatorError::VersionConflict { .. }) => {
                bail!("workflow instance '{}' already exists", id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn status(&self, id: &str) -> Result<()> {
        let instance = self.store.load(id).await?;
        println!("{}", serde_json::to_string_pretty(&instance)?);
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        let instance = self.store.load(id).await?;
        let plan = resume::plan_resume(&instance)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::new(cli.working_dir.clone(), cli.config.clone())?;

    match cli.command {
        Command::Init { title, name, kind } => app.init(&title, name, kind).await,
        Command::Plan { id, sprints } => {
            let declarations = plan_input::load_sprint_declarations(&sprints)?;
            app.mutate(&id, move |_| {
                Ok(StateCommand::AttachSprints {
                    declarations: declarations.clone(),
                })
            })
            .await
        }
        Command::Continue { id } => app.resume(&id).await,
        Command::Status { id } => app.status(&id).await,
        Command::Advance { id } => {
            app.mutate(&id, |instance| {
                Ok(StateCommand::CompletePhase {
                    phase: instance.current_phase,
                })
            })
            .await
        }
        Command::Fail { id, reason } => {
            app.mutate(&id, move |instance| {
                Ok(StateCommand::FailPhase {
                    phase: instance.current_phase,
                    reason: reason.clone(),
                })
            })
            .await
        }
        Command::Retry { id } => {
            app.mutate(&id, |instance| {
                // A failed phase takes precedence; otherwise assume the
                // caller means the current phase's rejected gate.
                let phase = instance
                    .phases
                    .iter()
                    .find(|p| p.status == PhaseStatus::Failed)
                    .map(|p| p.name)
                    .unwrap_or(instance.current_phase);
                Ok(StateCommand::RetryPhase { phase })
            })
            .await
        }
        Command::ApproveGate { id } => {
            app.mutate(&id, |instance| {
                Ok(StateCommand::ApproveGate {
                    phase: instance.current_phase,
                })
            })
            .await
        }
        Command::RejectGate { id } => {
            app.mutate(&id, |instance| {
                Ok(StateCommand::RejectGate {
                    phase: instance.current_phase,
                })
            })
            .await
        }
        Command::Sprint { command } => match command {
            SprintCommand::Start { id, sprint_id } => {
                app.mutate(&id, move |_| {
                    Ok(StateCommand::StartSprint {
                        sprint_id: sprint_id.clone(),
                    })
                })
                .await
            }
            SprintCommand::Complete { id, sprint_id } => {
                app.mutate(&id, move |_| {
                    Ok(StateCommand::CompleteSprint {
                        sprint_id: sprint_id.clone(),
                    })
                })
                .await
            }
        },
        Command::Abandon { id } => app.mutate(&id, |_| Ok(StateCommand::Abandon)).await,
    }
}
