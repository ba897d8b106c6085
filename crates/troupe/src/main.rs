// ABOUTME: troupe CLI entry point.
// ABOUTME: Provides orchestrator, dashboard, teardown, and worker-side inbox/task subcommands.

use clap::{Parser, Subcommand};
use troupe::commands::{self, parse_task_status};
use troupe::{run_dashboard, run_start, run_supervisor, run_teardown, StartOptions, SupervisorOptions};
use troupe_core::config::expand_path;
use troupe_core::{Persona, TaskStatus};

#[derive(Parser)]
#[command(name = "troupe")]
#[command(about = "Orchestrator for teams of role-playing agent sessions")]
struct Cli {
    /// Workspace root shared by the orchestrator and its workers
    #[arg(long, global = true, env = "TROUPE_WORKSPACE", default_value = ".")]
    workspace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace, register a team, and run the orchestrator
    Start {
        /// Comma-separated personas (e.g. manager,engineer,qa)
        #[arg(long, value_delimiter = ',')]
        team: Vec<Persona>,
        /// Goal delivered to the manager's inbox
        #[arg(long)]
        goal: Option<String>,
        /// Run the orchestrator in its own terminal session
        #[arg(long)]
        detach: bool,
        /// No dashboard
        #[arg(long)]
        headless: bool,
    },
    /// Run the orchestrator control loop on an existing workspace
    Run {
        /// No dashboard
        #[arg(long)]
        headless: bool,
    },
    /// Open the dashboard without running the control loop
    Dashboard,
    /// Kill every session and delete the workspace
    Teardown {
        /// Confirm the teardown
        #[arg(long)]
        yes: bool,
    },
    /// Send an instruction to a session's inbox
    Send {
        /// Sender: a session id, or "user"
        #[arg(long, default_value = "user")]
        from: String,
        /// Recipient session id
        #[arg(long)]
        to: String,
        /// Message text
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Read unread instructions for a session
    Inbox {
        #[arg(long)]
        session: String,
        /// Show without marking as read
        #[arg(long)]
        peek: bool,
    },
    /// Show a session's task log
    Tasks {
        #[arg(long)]
        session: String,
    },
    /// Edit a session's task log
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Show every session, its progress, and cost
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Watch a session's inbox and task log (runs inside the worker's terminal)
    Watch {
        #[arg(long)]
        session: String,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Append a task
    Add {
        #[arg(long)]
        session: String,
        /// Who assigned the task
        #[arg(long, default_value = "user")]
        by: String,
        #[arg(required = true)]
        description: Vec<String>,
    },
    /// Change a task's status
    Set {
        #[arg(long)]
        session: String,
        index: usize,
        #[arg(value_parser = parse_task_status)]
        status: TaskStatus,
    },
}

impl Commands {
    /// The dashboard owns the terminal, so logs go to a file instead.
    fn uses_dashboard(&self) -> bool {
        match self {
            Commands::Start {
                detach, headless, ..
            } => !detach && !headless,
            Commands::Run { headless } => !headless,
            Commands::Dashboard => true,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if cli.command.uses_dashboard() {
        troupe_log::init_file("troupe");
    } else {
        troupe_log::init();
    }

    let workspace = expand_path(&cli.workspace);

    match cli.command {
        Commands::Start {
            team,
            goal,
            detach,
            headless,
        } => {
            run_start(StartOptions {
                workspace,
                team,
                goal,
                detach,
                headless,
            })
            .await
        }
        Commands::Run { headless } => {
            run_supervisor(SupervisorOptions {
                workspace,
                headless,
            })
            .await
        }
        Commands::Dashboard => run_dashboard(workspace).await,
        Commands::Teardown { yes } => run_teardown(workspace, yes).await,
        Commands::Send { from, to, message } => {
            commands::run_send(workspace, &from, &to, &message.join(" "))
        }
        Commands::Inbox { session, peek } => commands::run_inbox(workspace, &session, peek),
        Commands::Tasks { session } => commands::run_tasks(workspace, &session),
        Commands::Task { action } => match action {
            TaskAction::Add {
                session,
                by,
                description,
            } => commands::run_task_add(workspace, &session, &description.join(" "), &by),
            TaskAction::Set {
                session,
                index,
                status,
            } => commands::run_task_set(workspace, &session, index, status),
        },
        Commands::Status { json } => commands::run_status(workspace, json),
        Commands::Watch { session } => commands::run_watch(workspace, &session).await,
    }
}
