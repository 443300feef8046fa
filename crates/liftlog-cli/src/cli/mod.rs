//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;

use crate::context::AppContext;
use crate::logging;

mod commands;

#[derive(Parser)]
#[command(name = "liftlog")]
#[command(version)]
#[command(about = "Workout log and AI training feedback client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in with a registered account
    Login {
        #[arg(value_name = "EMAIL")]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "LIFTLOG_PASSWORD")]
        password: Option<String>,
    },

    /// Register a new account (session starts after email confirmation)
    Signup {
        #[arg(value_name = "EMAIL")]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "LIFTLOG_PASSWORD")]
        password: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Log in with a guest identity (no account required)
    Guest,

    /// Show the current identity
    Whoami,

    /// Manage workouts
    Workouts {
        #[command(subcommand)]
        command: WorkoutCommands,
    },

    /// Request a fresh AI analysis of a workout
    Analyze {
        #[arg(value_name = "WORKOUT_ID")]
        workout_id: String,
    },

    /// Show the stored AI analysis for a workout
    Analysis {
        #[arg(value_name = "WORKOUT_ID")]
        workout_id: String,
    },

    /// Show the AI summary of the last week of training
    Weekly,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum WorkoutCommands {
    /// List logged workouts
    List,
    /// Log a workout
    Add {
        #[arg(long)]
        title: String,

        /// Workout date (YYYY-MM-DD; server defaults to today)
        #[arg(long)]
        date: Option<chrono::NaiveDate>,

        /// Duration in minutes
        #[arg(long)]
        duration: Option<u32>,

        #[arg(long)]
        notes: Option<String>,

        /// Exercise entry as `name[:sets[:reps[:weight_kg]]]` (repeatable)
        #[arg(long = "exercise", value_name = "SPEC")]
        exercises: Vec<String>,
    },
    /// Show a workout with its exercises
    Show {
        #[arg(value_name = "WORKOUT_ID")]
        id: String,
    },
    /// Delete a workout
    Delete {
        #[arg(value_name = "WORKOUT_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init()?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    // Config commands don't need the session core.
    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        };
    }

    let ctx = AppContext::bootstrap().await?;

    let result = match cli.command {
        Commands::Login { email, password } => commands::auth::login(&ctx, &email, password).await,
        Commands::Signup { email, password } => {
            commands::auth::signup(&ctx, &email, password).await
        }
        Commands::Logout => commands::auth::logout(&ctx).await,
        Commands::Guest => commands::auth::guest(&ctx).await,
        Commands::Whoami => commands::auth::whoami(&ctx),

        Commands::Workouts { command } => match command {
            WorkoutCommands::List => commands::workouts::list(&ctx).await,
            WorkoutCommands::Add {
                title,
                date,
                duration,
                notes,
                exercises,
            } => commands::workouts::add(&ctx, title, date, duration, notes, &exercises).await,
            WorkoutCommands::Show { id } => commands::workouts::show(&ctx, &id).await,
            WorkoutCommands::Delete { id } => commands::workouts::delete(&ctx, &id).await,
        },

        Commands::Analyze { workout_id } => commands::analysis::analyze(&ctx, &workout_id).await,
        Commands::Analysis { workout_id } => commands::analysis::show(&ctx, &workout_id).await,
        Commands::Weekly => commands::analysis::weekly(&ctx).await,

        Commands::Config { .. } => unreachable!("handled above"),
    };

    // Run end-of-command bookkeeping even when the command failed; a 401
    // must still complete the forced sign-out. The command's own error
    // takes precedence in the exit status.
    let finished = ctx.finish().await;
    result.and(finished)
}
