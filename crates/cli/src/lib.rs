pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use signoff_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff approval workflow operator CLI",
    long_about = "Create approval workflows for proposals, record decisions and delegations, \
                  inspect progress, and run the expiry sweep.",
    after_help = "Examples:\n  signoff migrate\n  signoff create --proposal P-2026-0042 --config approvers.json\n  signoff decide --task <id> --user u-2 --decision approve\n  signoff sweep"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Register or update the proposal record an approval workflow attaches to")]
    Proposal {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "pending_approval")]
        status: String,
    },
    #[command(about = "Create approval tasks for a proposal from a JSON workflow config")]
    Create {
        #[arg(long)]
        proposal: String,
        #[arg(long, help = "Path to a JSON file holding the workflow config")]
        config: PathBuf,
    },
    #[command(about = "Record an approve or reject decision on a task")]
    Decide {
        #[arg(long)]
        task: String,
        #[arg(long, help = "Acting user: the approver or the current delegate")]
        user: String,
        #[arg(long, help = "approve|reject")]
        decision: String,
        #[arg(long)]
        comments: Option<String>,
        #[arg(long, help = "Notify the next tier of approvers when the workflow stays open")]
        notify_next: bool,
    },
    #[command(about = "Hand an open task to another user")]
    Delegate {
        #[arg(long)]
        task: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        reason: Option<String>,
    },
    #[command(about = "Take a delegated task back")]
    Undelegate {
        #[arg(long)]
        task: String,
        #[arg(long)]
        user: String,
    },
    #[command(about = "List open approval tasks for a user")]
    Pending {
        #[arg(long)]
        user: String,
        #[arg(long)]
        include_expired: bool,
    },
    #[command(about = "Show approval progress for a proposal")]
    Progress {
        #[arg(long)]
        proposal: String,
    },
    #[command(about = "Expire overdue approval tasks")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Proposal { id, title, status } => commands::proposal::run(&id, &title, &status),
        Command::Create { proposal, config } => commands::create::run(&proposal, &config),
        Command::Decide { task, user, decision, comments, notify_next } => {
            commands::decide::run(&task, &user, &decision, comments, notify_next)
        }
        Command::Delegate { task, from, to, reason } => {
            commands::delegate::run(&task, &from, &to, reason)
        }
        Command::Undelegate { task, user } => commands::delegate::run_cancel(&task, &user),
        Command::Pending { user, include_expired } => {
            commands::pending::run(&user, include_expired)
        }
        Command::Progress { proposal } => commands::progress::run(&proposal),
        Command::Sweep => commands::sweep::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded; keep the existing one.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
