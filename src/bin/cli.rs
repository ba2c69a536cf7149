//! pawpair CLI
//!
//! Works the room from a terminal through the same views the server uses,
//! so validation and the coin rules are identical:
//! - List, add, toggle and archive tasks
//! - Check the room balance
//! - Look after the cat
//! - Generate a config file

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use pawpair::backend::{shared, SharedBackend, Side, TaskId};
use pawpair::config::{generate_default_config, BackendConfig, Config};
use pawpair::views::{ChecklistSnapshot, ChecklistView, PetAction, PetSnapshot, PetView};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pawpair-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shared checklist and virtual cat, from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Room to work in (default: from config)
    #[arg(short, long, global = true)]
    pub room: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Use a throwaway in-memory backend instead of the configured one
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Checklist tasks
    Tasks {
        #[command(subcommand)]
        action: TaskCommand,
    },

    /// Show the room's coin balance
    Coins,

    /// The room's cat
    Pet {
        #[command(subcommand)]
        action: PetCommand,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List visible tasks on one side
    List {
        #[arg(short, long)]
        side: Side,
    },
    /// Add a task
    Add {
        #[arg(short, long)]
        side: Side,
        title: String,
        /// Coins earned when done
        reward: i64,
    },
    /// Flip a task's done flag
    Toggle {
        #[arg(short, long)]
        side: Side,
        id: String,
    },
    /// Hide a task; its reward still counts
    Archive {
        #[arg(short, long)]
        side: Side,
        id: String,
    },
}

#[derive(Subcommand)]
pub enum PetCommand {
    /// Show meters, age and coins
    Show,
    /// Spend coins: feed, pet, play or bathe
    Act { action: PetAction },
    /// Apply one decay step
    Decay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write config to {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load_default(),
    };
    if cli.offline {
        config.backend = BackendConfig::memory();
    }
    pawpair::logging::init(&config.logging);
    config.validate().context("Invalid configuration")?;

    let room = cli
        .room
        .clone()
        .unwrap_or_else(|| config.rooms.default_room.clone());
    let backend = shared::init(&config.backend).context("Failed to bind backend")?;

    match cli.command {
        Commands::Tasks { action } => run_tasks(&cli.format, &config, backend, &room, action).await,
        Commands::Coins => {
            let coins = backend
                .coins_for_room(&room)
                .await
                .with_context(|| format!("Failed to read coins for room {}", room))?;
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({"room": room, "coins": coins}))?
                ),
                OutputFormat::Table => println!("Room {}: {} coins", room, coins),
            }
            Ok(())
        }
        Commands::Pet { action } => run_pet(&cli.format, &config, backend, &room, action).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn run_tasks(
    format: &OutputFormat,
    config: &Config,
    backend: SharedBackend,
    room: &str,
    command: TaskCommand,
) -> anyhow::Result<()> {
    let side = match &command {
        TaskCommand::List { side }
        | TaskCommand::Add { side, .. }
        | TaskCommand::Toggle { side, .. }
        | TaskCommand::Archive { side, .. } => *side,
    };
    let view = ChecklistView::new(backend, room, side, config.rooms.label_for(side));
    view.refresh().await.context("Failed to load tasks")?;

    match command {
        TaskCommand::List { .. } => {}
        TaskCommand::Add { title, reward, .. } => {
            view.add_task(&title, reward).await?;
        }
        TaskCommand::Toggle { id, .. } => {
            view.toggle_done(&TaskId::new(id)).await?;
        }
        TaskCommand::Archive { id, .. } => {
            view.remove_task(&TaskId::new(id)).await?;
        }
    }

    print_checklist(format, &view.snapshot().await)
}

async fn run_pet(
    format: &OutputFormat,
    config: &Config,
    backend: SharedBackend,
    room: &str,
    command: PetCommand,
) -> anyhow::Result<()> {
    let view = Arc::new(PetView::new(backend, room, config.polling.animation_hold()));
    view.refresh_pet().await.context("Failed to load pet")?;
    view.refresh_coins().await.context("Failed to load coins")?;

    let snapshot = match command {
        PetCommand::Show => view.snapshot().await,
        PetCommand::Act { action } => view.act(action).await?,
        PetCommand::Decay => {
            view.decay_tick().await?;
            view.snapshot().await
        }
    };

    print_pet(format, &snapshot)
}

fn print_checklist(format: &OutputFormat, snapshot: &ChecklistSnapshot) -> anyhow::Result<()> {
    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!(
        "{} ({}, room {}) - {} coins",
        snapshot.label, snapshot.side, snapshot.room, snapshot.coins
    );
    println!();

    if snapshot.tasks.is_empty() {
        println!("No tasks yet.");
        println!();
        println!("Add one with:");
        println!("  pawpair-cli tasks add --side {} \"Dishes\" 3", snapshot.side);
        return Ok(());
    }

    println!("{:<10} {:<6} {:<8} {}", "ID", "Done", "Reward", "Title");
    println!("{}", "-".repeat(50));
    for task in &snapshot.tasks {
        println!(
            "{:<10} {:<6} {:<8} {}",
            task.id.as_str(),
            if task.done { "[x]" } else { "[ ]" },
            task.reward,
            task.title
        );
    }
    Ok(())
}

fn meter_bar(value: u8) -> String {
    let filled = (value as usize + 5) / 10;
    format!("{}{} {:>3}%", "#".repeat(filled), ".".repeat(10 - filled), value)
}

fn print_pet(format: &OutputFormat, snapshot: &PetSnapshot) -> anyhow::Result<()> {
    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!("Virtual Cat, age {} d (room {})", snapshot.age_days, snapshot.room);
    println!();
    println!("  Hunger       {}", meter_bar(snapshot.hunger));
    println!("  Happiness    {}", meter_bar(snapshot.happiness));
    println!("  Cleanliness  {}", meter_bar(snapshot.cleanliness));
    println!();
    println!("Coins available: {}", snapshot.coins);
    if snapshot.animation.key() != "idle" {
        println!("The cat is busy: {}", snapshot.animation.key());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_add() {
        let cli = Cli::try_parse_from([
            "pawpair-cli",
            "--room",
            "den",
            "tasks",
            "add",
            "--side",
            "left",
            "Dishes",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.room.as_deref(), Some("den"));
        match cli.command {
            Commands::Tasks {
                action: TaskCommand::Add { side, title, reward },
            } => {
                assert_eq!(side, Side::Left);
                assert_eq!(title, "Dishes");
                assert_eq!(reward, 3);
            }
            _ => panic!("Expected tasks add"),
        }
    }

    #[test]
    fn test_parse_pet_act() {
        let cli = Cli::try_parse_from(["pawpair-cli", "--offline", "pet", "act", "bath"]).unwrap();
        assert!(cli.offline);
        assert!(matches!(
            cli.command,
            Commands::Pet {
                action: PetCommand::Act {
                    action: PetAction::Bathe
                }
            }
        ));
        assert!(Cli::try_parse_from(["pawpair-cli", "pet", "act", "dance"]).is_err());
    }

    #[test]
    fn test_meter_bar() {
        assert_eq!(meter_bar(100), "########## 100%");
        assert_eq!(meter_bar(0), "..........   0%");
        assert_eq!(meter_bar(44), "####......  44%");
    }
}
