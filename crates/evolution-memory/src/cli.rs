//! Command surface of the `evolution-memory` binary.
//!
//! Every command prints either pretty JSON or a single human-readable line
//! on stdout. Logs go to stderr.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::context_engine::{ContextSnapshotManager, RetrievalEngine};
use crate::enrichment::summarizer_from_config;
use crate::evolution::{InefficiencyAnalyzer, MutationLifecycleManager, PatternAggregator};
use crate::ingest::{ingest_event, ObservationEvent};
use crate::memory_db::{MemoryDatabase, NewObservation};
use crate::session_pointer::SessionPointer;

const DEFAULT_LIMIT: usize = 5;
const AUTO_SESSION_TASK: &str = "Auto-session";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "evolution-memory",
    version,
    about = "Persistent memory and self-evolution engine for coding agents"
)]
pub struct Cli {
    /// Store file (overrides EVOLUTION_DB_PATH)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the store and bring its schema up to date
    Init,

    /// Load historical context for a task
    #[command(alias = "load_context")]
    LoadContext {
        /// Project path (defaults to the detected project root)
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Store one tool observation
    #[command(alias = "store_observation")]
    StoreObservation {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        tool: String,
        #[arg(long)]
        input: String,
        #[arg(long)]
        output: String,
        #[arg(long, default_value = "")]
        context: String,
        /// Record the invocation as failed
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 0)]
        exec_ms: u64,
    },

    /// Read one observation event as JSON from stdin and store it
    Ingest,

    /// Finalize a session with its summary and score
    #[command(alias = "compress_session")]
    Finalize {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        summary: String,
        #[arg(long, default_value_t = 0.5)]
        score: f64,
        #[arg(long, default_value_t = 0)]
        tokens: u64,
    },

    /// Full-text search over past sessions
    Query {
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Show store statistics
    Stats,

    /// Manage the active session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Quick capture of an agent action into the active session
    Capture {
        /// What happened, e.g. "fixed auth bug in login.tsx"
        description: String,
        #[arg(short, long, default_value = "agent_action")]
        tool: String,
    },

    /// Analyze a session for inefficiencies
    Analyze {
        #[arg(long)]
        session_id: String,
    },

    /// Mid-session progress check
    Checkpoint {
        #[arg(long)]
        session_id: String,
        #[arg(long, default_value_t = 0)]
        step: u32,
    },

    /// Analyze a session and record proposed mutations
    Evolve {
        #[arg(long)]
        session_id: String,
    },

    /// Apply a proposed mutation
    Apply {
        #[arg(long)]
        mutation_id: String,
        #[arg(long)]
        confirm: bool,
    },

    /// Roll back a mutation
    Rollback {
        #[arg(long)]
        mutation_id: String,
    },

    /// Record (or reinforce) a learned pattern
    Learn {
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value_t = 0.5)]
        confidence: f64,
        /// Session that exhibited the pattern (repeatable)
        #[arg(long = "source-session")]
        source_sessions: Vec<String>,
    },

    /// List learned patterns
    Patterns,

    /// Identify common tool workflows
    Workflows,

    /// Aggregate patterns across sessions
    Aggregate {
        /// Only sessions whose project path starts with this prefix
        #[arg(long)]
        scan_path: Option<String>,
    },

    /// Suggest a skill for a learned pattern
    SuggestSkill {
        #[arg(long)]
        pattern: String,
    },

    /// Propose agent rule updates from established learnings
    SuggestAgentsUpdate,

    /// Context snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Run the HTTP memory worker
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// Start a session for the current project
    Start {
        #[arg(short, long)]
        task: String,
    },
    /// End the active session
    End {
        #[arg(short, long)]
        summary: String,
        #[arg(long, default_value_t = 0.8)]
        score: f64,
    },
}

#[derive(Debug, Subcommand)]
pub enum SnapshotAction {
    /// Extract critical facts from conversation text ("-" reads stdin)
    Extract {
        #[arg(long)]
        conversation: String,
    },
    /// Persist a fact bundle
    Flush {
        #[arg(long)]
        session_id: String,
        /// Critical facts as JSON
        #[arg(long)]
        facts: String,
        #[arg(long, default_value_t = 5)]
        priority: u8,
    },
    /// Latest snapshot for a session
    Load {
        #[arg(long)]
        session_id: String,
    },
    /// Most recent snapshots, optionally for one project
    Recent {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Line(String),
}

impl CommandOutput {
    fn json<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn render(&self) -> anyhow::Result<String> {
        match self {
            Self::Json(value) => Ok(serde_json::to_string_pretty(value)?),
            Self::Line(line) => Ok(line.clone()),
        }
    }
}

/// Run one parsed command and print its output.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let config = match cli.db_path.clone() {
        Some(path) => config.with_db_path(path),
        None => config,
    };
    crate::metrics::init_metrics()?;

    let output = execute(cli.command, &config).await?;
    println!("{}", output.render()?);
    Ok(())
}

pub async fn execute(command: Command, config: &Config) -> anyhow::Result<CommandOutput> {
    let db = Arc::new(MemoryDatabase::open(&config.db_path, config.max_payload_bytes)?);
    let pointer = SessionPointer::for_database(&config.db_path);

    match command {
        Command::Init => Ok(CommandOutput::Line(format!(
            "Memory database ready at {} (schema version {})",
            config.db_path.display(),
            db.schema_version()?
        ))),

        Command::LoadContext { project, task, limit } => {
            let project = project.unwrap_or_else(|| config.project_path());
            let engine = RetrievalEngine::with_limit(db, config.retrieval_limit);
            CommandOutput::json(&engine.load_context(&project, task.as_deref(), limit)?)
        }

        Command::StoreObservation { session_id, tool, input, output, context, failed, exec_ms } => {
            let observation = db.observations.append(NewObservation {
                session_id: &session_id,
                tool_name: &tool,
                input: &input,
                output: &output,
                context: &context,
                execution_time_ms: exec_ms,
                success: !failed,
            })?;
            Ok(CommandOutput::Line(format!("Observation stored: {}", observation.observation_id)))
        }

        Command::Ingest => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let event = ObservationEvent::parse(&raw)?;
            let summarizer = summarizer_from_config(config);
            let active = pointer.read()?;
            let observation = ingest_event(&db, summarizer.as_ref(), event, active.as_deref()).await?;
            Ok(CommandOutput::Json(json!({
                "status": "success",
                "observation_id": observation.observation_id,
                "session_id": observation.session_id,
            })))
        }

        Command::Finalize { session_id, summary, score, tokens } => {
            let updated = db.sessions.finalize_session(&session_id, &summary, score, tokens)?;
            Ok(CommandOutput::Line(if updated == 0 {
                format!("No open session {}; nothing finalized", session_id)
            } else {
                format!("Session finalized: {}", session_id)
            }))
        }

        Command::Query { text, limit } => CommandOutput::json(&db.sessions.search(&text, limit)?),

        Command::Stats => CommandOutput::json(&db.statistics()?),

        Command::Session { action: SessionAction::Start { task } } => {
            let session = db.sessions.create_session(&config.project_path(), &task, None)?;
            pointer.write(&session.session_id)?;
            info!("Session started for {}", session.project_path);
            Ok(CommandOutput::Line(format!("Session started: {}", session.session_id)))
        }

        Command::Session { action: SessionAction::End { summary, score } } => match pointer.read()? {
            Some(session_id) => {
                db.sessions.finalize_session(&session_id, &summary, score, 0)?;
                pointer.clear()?;
                Ok(CommandOutput::Line(format!("Session ended: {}", session_id)))
            }
            None => Ok(CommandOutput::Line("No active session found".to_string())),
        },

        Command::Capture { description, tool } => {
            let session_id = match pointer.read()? {
                Some(id) => id,
                None => {
                    let session = db.sessions.create_session(&config.project_path(), AUTO_SESSION_TASK, None)?;
                    pointer.write(&session.session_id)?;
                    info!("Auto-created session {}", session.session_id);
                    session.session_id
                }
            };
            db.observations.append(NewObservation {
                session_id: &session_id,
                tool_name: &tool,
                input: &description,
                output: "captured",
                context: "",
                execution_time_ms: 0,
                success: true,
            })?;
            Ok(CommandOutput::Line(format!("Captured: {}", description)))
        }

        Command::Analyze { session_id } => {
            CommandOutput::json(&InefficiencyAnalyzer::new(db).analyze_session(&session_id)?)
        }

        Command::Checkpoint { session_id, step } => {
            let manager = MutationLifecycleManager::new(db, config.mutation_config());
            CommandOutput::json(&manager.checkpoint(&session_id, step)?)
        }

        Command::Evolve { session_id } => {
            let manager = MutationLifecycleManager::new(db, config.mutation_config());
            let report = manager.evolve(&session_id)?;
            crate::metrics::add_mutations(report.mutations.len());
            CommandOutput::json(&report)
        }

        Command::Apply { mutation_id, confirm } => {
            let manager = MutationLifecycleManager::new(db, config.mutation_config());
            CommandOutput::json(&manager.apply(&mutation_id, confirm)?)
        }

        Command::Rollback { mutation_id } => {
            let manager = MutationLifecycleManager::new(db, config.mutation_config());
            CommandOutput::json(&manager.rollback(&mutation_id)?)
        }

        Command::Learn { pattern, description, confidence, source_sessions } => {
            CommandOutput::json(&db.learnings.upsert(&pattern, &description, confidence, &source_sessions)?)
        }

        Command::Patterns => CommandOutput::json(&db.learnings.all()?),

        Command::Workflows => CommandOutput::json(&PatternAggregator::new(db).common_workflows()?),

        Command::Aggregate { scan_path } => {
            let prefix = scan_path.as_deref().filter(|p| !p.is_empty());
            CommandOutput::json(&PatternAggregator::new(db).aggregate(prefix)?)
        }

        Command::SuggestSkill { pattern } => CommandOutput::json(&PatternAggregator::new(db).suggest_skill(&pattern)?),

        Command::SuggestAgentsUpdate => CommandOutput::json(&PatternAggregator::new(db).propose_agent_rules()?),

        Command::Snapshot { action } => {
            let manager = ContextSnapshotManager::new(db);
            match action {
                SnapshotAction::Extract { conversation } => {
                    let text = if conversation == "-" {
                        let mut raw = String::new();
                        std::io::stdin().read_to_string(&mut raw)?;
                        raw
                    } else {
                        conversation
                    };
                    CommandOutput::json(&manager.extract(&text))
                }
                SnapshotAction::Flush { session_id, facts, priority } => {
                    let snapshot = manager.flush_json(&session_id, &facts, priority)?;
                    Ok(CommandOutput::Json(json!({ "snapshot_id": snapshot.snapshot_id })))
                }
                SnapshotAction::Load { session_id } => CommandOutput::json(&manager.load(&session_id)?),
                SnapshotAction::Recent { project, limit } => {
                    let project = project.as_deref().filter(|p| !p.is_empty());
                    CommandOutput::json(&manager.recent(project, None, limit)?)
                }
            }
        }

        Command::Serve => {
            crate::server::run_worker_server(config.clone(), db).await?;
            Ok(CommandOutput::Line("Memory worker stopped".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let root = dir.path().to_string_lossy().into_owned();
        Config::from_lookup(
            |key| (key == "EVOLUTION_PROJECT_ROOT").then(|| root.clone()),
            dir.path(),
        )
        .unwrap()
    }

    fn line(output: CommandOutput) -> String {
        match output {
            CommandOutput::Line(line) => line,
            other => panic!("expected a line, got {:?}", other),
        }
    }

    fn json_value(output: CommandOutput) -> Value {
        match output {
            CommandOutput::Json(value) => value,
            other => panic!("expected JSON, got {:?}", other),
        }
    }

    // ===== Parsing =====

    #[test]
    fn test_parse_underscore_aliases_and_global_db_path() {
        let cli = Cli::try_parse_from([
            "evolution-memory", "load_context", "--project", "/repo", "--task", "fix", "--db-path", "/tmp/m.db",
        ])
        .unwrap();
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/m.db")));
        assert!(matches!(cli.command, Command::LoadContext { limit: None, .. }));

        let cli = Cli::try_parse_from([
            "evolution-memory", "store_observation", "--session-id", "s", "--tool", "Read",
            "--input", "a", "--output", "b", "--failed",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::StoreObservation { failed: true, exec_ms: 0, .. }));
    }

    #[test]
    fn test_parse_repeatable_sources() {
        let cli = Cli::try_parse_from([
            "evolution-memory", "learn", "--pattern", "p", "--description", "d",
            "--source-session", "a", "--source-session", "b",
        ])
        .unwrap();
        match cli.command {
            Command::Learn { source_sessions, confidence, .. } => {
                assert_eq!(source_sessions, vec!["a", "b"]);
                assert_eq!(confidence, 0.5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_apply_requires_mutation_id() {
        assert!(Cli::try_parse_from(["evolution-memory", "apply"]).is_err());
    }

    // ===== Execution =====

    #[tokio::test]
    async fn test_init_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let out = line(execute(Command::Init, &config).await.unwrap());
        assert!(out.contains("schema version"));
        assert!(config.db_path.exists());
    }

    #[tokio::test]
    async fn test_session_capture_end_flow() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let pointer = SessionPointer::for_database(&config.db_path);

        // capture without a session auto-creates one
        execute(Command::Capture { description: "fixed bug".into(), tool: "agent_action".into() }, &config)
            .await
            .unwrap();
        let auto = pointer.read().unwrap().unwrap();

        let out = line(
            execute(Command::Session { action: SessionAction::End { summary: "done".into(), score: 0.9 } }, &config)
                .await
                .unwrap(),
        );
        assert_eq!(out, format!("Session ended: {}", auto));
        assert_eq!(pointer.read().unwrap(), None);

        let out = line(
            execute(Command::Session { action: SessionAction::Start { task: "new work".into() } }, &config)
                .await
                .unwrap(),
        );
        let started = pointer.read().unwrap().unwrap();
        assert!(out.ends_with(&started));
        assert_ne!(started, auto);

        let stats = json_value(execute(Command::Stats, &config).await.unwrap());
        assert_eq!(stats["total_sessions"], 2);
        assert_eq!(stats["total_observations"], 1);
        assert_eq!(stats["avg_success_score"], 0.9);
    }

    #[tokio::test]
    async fn test_session_end_without_pointer_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let out = line(
            execute(Command::Session { action: SessionAction::End { summary: "x".into(), score: 0.5 } }, &config)
                .await
                .unwrap(),
        );
        assert_eq!(out, "No active session found");
    }

    #[tokio::test]
    async fn test_unconfirmed_apply_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let err = execute(Command::Apply { mutation_id: "m-1".into(), confirm: false }, &config)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<MemoryError>(), Some(MemoryError::ConfirmationRequired(_))));
        assert_eq!(err.to_string(), "Use --confirm to apply mutation m-1");
    }

    #[tokio::test]
    async fn test_learn_twice_then_list_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        for _ in 0..2 {
            execute(
                Command::Learn {
                    pattern: "read_before_edit".into(),
                    description: "Read files before editing".into(),
                    confidence: 0.9,
                    source_sessions: vec![],
                },
                &config,
            )
            .await
            .unwrap();
        }
        let patterns = json_value(execute(Command::Patterns, &config).await.unwrap());
        let list = patterns.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["frequency"], 2);
    }

    #[tokio::test]
    async fn test_snapshot_flush_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let err = execute(
            Command::Snapshot {
                action: SnapshotAction::Flush { session_id: "s".into(), facts: "{oops".into(), priority: 5 },
            },
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<MemoryError>(), Some(MemoryError::MalformedInput(_))));
    }

    #[tokio::test]
    async fn test_finalize_unknown_session_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let out = line(
            execute(
                Command::Finalize { session_id: "missing".into(), summary: "s".into(), score: 0.5, tokens: 0 },
                &config,
            )
            .await
            .unwrap(),
        );
        assert!(out.starts_with("No open session"));
    }
}
