use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;

use agentos::config::ConfigStore;
use agentos::deps::SkillContext;
use agentos::engine::{CancelToken, Engine, TurnOutcome};
use agentos::skills::{DiskSkill, MemorySkill, SystemSkill};

/// AgentOS - personal system agent for disk, memory, and maintenance tasks
#[derive(Parser, Debug)]
#[command(name = "agentos", version, about)]
struct Args {
    /// Output JSON for machine consumption
    #[arg(long, global = true)]
    json: bool,

    /// Data directory (database + configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disk cleaning and analysis
    Disk {
        #[arg(long, value_enum)]
        action: DiskAction,
        /// Cache ID for clean, path for explore, threshold for large-files
        #[arg(long)]
        target: Option<String>,
    },
    /// Second Brain: notes and command history
    Memory {
        #[arg(long, value_enum)]
        action: MemoryAction,
        /// Note text, search query, or scrub pattern
        #[arg(long)]
        content: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },
    /// System maintenance (Docker, logs, trash, apt)
    System {
        #[arg(long, value_enum)]
        action: SystemAction,
    },
    /// Ask the agent in natural language (one turn)
    Chat {
        /// The request, e.g. "clean the pip cache"
        prompt: Vec<String>,
    },
    /// Show or change the model configuration
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DiskAction {
    Scan,
    Clean,
    Explore,
    LargeFiles,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MemoryAction {
    AddNote,
    GetNotes,
    Sync,
    Search,
    Scrub,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SystemAction {
    Status,
    DockerPrune,
    VacuumLogs,
    EmptyTrash,
    AptClean,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the active configuration
    Get,
    /// Update model and/or endpoint
    Set {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
    /// List models the endpoint offers
    Models,
}

fn emit<T: Serialize>(json: bool, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        let rendered = serde_json::to_value(value)?;
        match &rendered {
            serde_json::Value::Array(items) => {
                for item in items {
                    println!("{}", item);
                }
            }
            other => println!("{}", other),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("agentos"))
            .unwrap_or_else(|| PathBuf::from(".agentos"))
    });

    let context = Arc::new(
        SkillContext::builder()
            .with_disk(DiskSkill::new())?
            .with_memory(MemorySkill::new(data_dir.join("agent.db")))?
            .with_system(SystemSkill::new())?
            .build()?,
    );
    let config_store = ConfigStore::new(data_dir.join("config.toml"));

    match args.command {
        Command::Disk { action, target } => {
            let disk = context.disk();
            match action {
                DiskAction::Scan => emit(args.json, &disk.scan_caches())?,
                DiskAction::Clean => {
                    let target = target.ok_or("clean requires --target <cache_id>")?;
                    emit(args.json, &disk.clean_cache(&target))?;
                }
                DiskAction::Explore => {
                    let path = target.unwrap_or_else(|| "~".to_string());
                    emit(args.json, &disk.explore_folder(&path))?;
                }
                DiskAction::LargeFiles => {
                    let threshold = target.unwrap_or_else(|| "500M".to_string());
                    emit(args.json, &disk.large_files(&threshold))?;
                }
            }
        }

        Command::Memory {
            action,
            content,
            tags,
        } => {
            let memory = context.memory();
            match action {
                MemoryAction::AddNote => {
                    let content = content.ok_or("add-note requires --content")?;
                    let tags: Vec<String> = tags
                        .map(|t| {
                            t.split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    emit(args.json, &memory.add_note(&content, &tags)?)?;
                }
                MemoryAction::GetNotes => {
                    emit(args.json, &memory.get_notes(tags.as_deref())?)?;
                }
                MemoryAction::Sync => emit(args.json, &memory.ingest_shell_history()?)?,
                MemoryAction::Search => {
                    let query = content.unwrap_or_default();
                    emit(args.json, &memory.search(&query)?)?;
                }
                MemoryAction::Scrub => {
                    let pattern = content.ok_or("scrub requires --content <pattern>")?;
                    emit(args.json, &memory.scrub_history(&pattern)?)?;
                }
            }
        }

        Command::System { action } => {
            let system = context.system();
            match action {
                SystemAction::Status => emit(args.json, &system.status())?,
                SystemAction::DockerPrune => emit(args.json, &system.docker_prune())?,
                SystemAction::VacuumLogs => emit(args.json, &system.vacuum_logs("2weeks"))?,
                SystemAction::EmptyTrash => emit(args.json, &system.empty_trash())?,
                SystemAction::AptClean => emit(args.json, &system.apt_clean())?,
            }
        }

        Command::Chat { prompt } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                return Err("chat requires a prompt".into());
            }

            let engine = Engine::new(config_store, Arc::clone(&context));
            let mut session = engine.session()?;

            // Ctrl-C stops the turn at the next round-trip or dispatch boundary.
            let cancel = CancelToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("cancelling turn");
                    signal_token.cancel();
                }
            });

            match session.run_turn(&prompt, &cancel).await {
                TurnOutcome::Final(answer) => println!("{}", answer),
                TurnOutcome::Aborted(reason) => {
                    eprintln!("turn aborted: {}", reason);
                    std::process::exit(1);
                }
            }
        }

        Command::Settings { action } => match action {
            SettingsAction::Get => emit(args.json, &config_store.load()?)?,
            SettingsAction::Set { model, base_url } => {
                emit(args.json, &config_store.set_config(model, base_url)?)?;
            }
            SettingsAction::Models => {
                let engine = Engine::new(config_store, Arc::clone(&context));
                emit(args.json, &engine.list_models().await?)?;
            }
        },
    }

    Ok(())
}
