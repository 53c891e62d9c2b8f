mod background;
mod cmd;
mod output;
mod root;

use agdt_core::launcher::RUN_TASK_SUBCOMMAND;
use clap::{Parser, Subcommand};
use cmd::task::TaskExit;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "agdt",
    about = "Agentic devtools: shared state, background tasks and workflows for AI-driven development",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository root (default: nearest ancestor with .git, else the current directory)
    #[arg(long, global = true, env = "AGDT_ROOT")]
    root: Option<PathBuf>,

    /// State directory (default: <repo root>/scripts/temp)
    #[arg(long, global = true, env = "AGDT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Print what would happen without launching anything (also enabled by state `dry_run`)
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a state value (dotted keys address nested objects)
    Set {
        key: String,
        value: String,
        /// Parse VALUE as JSON instead of storing it as a string
        #[arg(long)]
        typed: bool,
    },

    /// Print a state value
    Get { key: String },

    /// Remove a state value
    Delete { key: String },

    /// Remove all state, task logs and review data
    Clear,

    /// Print the whole state document
    Show,

    /// Stage all changes and commit them in the background
    GitSaveWork {
        /// Commit message (default: state `commit_message`)
        #[arg(long, short)]
        message: Option<String>,
    },

    /// List background tasks
    Tasks,

    /// Show one background task (default: the remembered one)
    TaskStatus {
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Print a background task's log
    TaskLog {
        #[arg(long)]
        task_id: Option<String>,
        /// Only the last N lines (0 = all)
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Wait briefly for a background task and report what to do next
    TaskWait {
        #[arg(long)]
        task_id: Option<String>,
        /// Seconds between polls (default: state `background.wait_interval` or 5)
        #[arg(long)]
        wait_interval: Option<f64>,
        /// Seconds after start before the task is reported as timed out (default: 600)
        #[arg(long)]
        timeout: Option<f64>,
        /// Log lines printed for a failed task (0 = all)
        #[arg(long)]
        log_lines: Option<usize>,
    },

    /// Remove expired task records and orphaned task logs
    TasksClean {
        /// Retention in hours (default: state `background.expiry_hours` or 24)
        #[arg(long)]
        expiry_hours: Option<f64>,
    },

    /// Start a workflow
    InitiateWorkflow {
        name: String,
        /// Extra state keys that must be set
        #[arg(long = "required")]
        required: Vec<String>,
        /// Extra state keys passed to the prompt when set
        #[arg(long = "optional")]
        optional: Vec<String>,
        /// Starting step (default: initiate)
        #[arg(long)]
        step: Option<String>,
    },

    /// Move the active workflow to its next step (or --step)
    AdvanceWorkflow {
        name: String,
        #[arg(long)]
        step: Option<String>,
        /// Context variable as KEY=VALUE; an empty VALUE removes the key
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// initiated, in-progress, completed or failed
        #[arg(long)]
        status: Option<String>,
    },

    /// Show the active workflow
    GetWorkflow,

    /// Forget the active workflow
    ClearWorkflow,

    /// Print the prompt for the active workflow's current step
    GetNextWorkflowPrompt,

    /// Queue files for pull request review
    ReviewAddFiles {
        #[arg(required = true)]
        files: Vec<String>,
        /// Pull request id (default: state `pull_request_id`)
        #[arg(long)]
        pull_request_id: Option<String>,
    },

    /// Show review queue progress
    ReviewQueueStatus {
        #[arg(long)]
        pull_request_id: Option<String>,
    },

    /// Submit the review of one file in the background (inputs staged under `file_review.*`)
    ReviewSubmitFile {
        #[arg(long)]
        file_path: Option<String>,
        /// Approve, Changes or Suggest
        #[arg(long)]
        outcome: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        /// JSON array of {line, endLine, severity, content}
        #[arg(long)]
        suggestions: Option<String>,
        #[arg(long)]
        pull_request_id: Option<String>,
    },

    /// Generate the review summary in the background
    ReviewGenerateSummary {
        #[arg(long)]
        pull_request_id: Option<String>,
    },

    /// Run a background task from its bootstrap file (used by the launcher)
    #[command(name = "__run-task", hide = true)]
    RunTask { bootstrap: PathBuf },
}

/// `agdt-<command> ...` is `agdt <command> ...`, except for a background
/// child, which re-executes whatever name its parent was invoked as.
fn normalized_args(mut args: Vec<OsString>) -> Vec<OsString> {
    if args.get(1).is_some_and(|a| a == RUN_TASK_SUBCOMMAND) {
        return args;
    }
    let invoked = args
        .first()
        .and_then(|a| Path::new(a).file_stem())
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("agdt-"))
        .map(str::to_string);
    if let Some(command) = invoked {
        args.insert(1, command.into());
        args[0] = "agdt".into();
    }
    args
}

fn main() {
    let cli = Cli::parse_from(normalized_args(std::env::args_os().collect()));

    // A background child's stderr is its task log.
    let default_level = match &cli.command {
        Commands::RunTask { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let ctx = cmd::Ctx::new(&root, cli.state_dir.as_deref(), cli.json, cli.dry_run);

    let result = match cli.command {
        Commands::Set { key, value, typed } => cmd::state::set(&ctx, &key, &value, typed),
        Commands::Get { key } => cmd::state::get(&ctx, &key),
        Commands::Delete { key } => cmd::state::delete(&ctx, &key),
        Commands::Clear => cmd::state::clear(&ctx),
        Commands::Show => cmd::state::show(&ctx),
        Commands::GitSaveWork { message } => cmd::git::save_work(&ctx, message.as_deref()),
        Commands::Tasks => cmd::task::list(&ctx),
        Commands::TaskStatus { task_id } => cmd::task::status(&ctx, task_id.as_deref()),
        Commands::TaskLog { task_id, lines } => cmd::task::log(&ctx, task_id.as_deref(), lines),
        Commands::TaskWait {
            task_id,
            wait_interval,
            timeout,
            log_lines,
        } => cmd::task::wait(
            &ctx,
            cmd::task::WaitArgs {
                task_id,
                wait_interval,
                timeout,
                log_lines,
            },
        ),
        Commands::TasksClean { expiry_hours } => cmd::task::clean(&ctx, expiry_hours),
        Commands::InitiateWorkflow {
            name,
            required,
            optional,
            step,
        } => cmd::workflow::initiate(&ctx, &name, &required, &optional, step.as_deref()),
        Commands::AdvanceWorkflow {
            name,
            step,
            vars,
            status,
        } => cmd::workflow::advance(&ctx, &name, step.as_deref(), &vars, status.as_deref()),
        Commands::GetWorkflow => cmd::workflow::show(&ctx),
        Commands::ClearWorkflow => cmd::workflow::clear(&ctx),
        Commands::GetNextWorkflowPrompt => cmd::workflow::next_prompt(&ctx),
        Commands::ReviewAddFiles {
            files,
            pull_request_id,
        } => cmd::review::add_files(&ctx, &files, pull_request_id.as_deref()),
        Commands::ReviewQueueStatus { pull_request_id } => {
            cmd::review::queue_status(&ctx, pull_request_id.as_deref())
        }
        Commands::ReviewSubmitFile {
            file_path,
            outcome,
            summary,
            suggestions,
            pull_request_id,
        } => cmd::review::submit_file(
            &ctx,
            cmd::review::SubmitArgs {
                file_path,
                outcome,
                summary,
                suggestions,
                pull_request_id,
            },
        ),
        Commands::ReviewGenerateSummary { pull_request_id } => {
            cmd::review::generate_summary(&ctx, pull_request_id.as_deref())
        }
        Commands::RunTask { bootstrap } => cmd::run_task::run(&ctx, &bootstrap),
    };

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<TaskExit>() {
            eprintln!("error: {exit}");
            std::process::exit(exit.code);
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn multi_call_name_becomes_subcommand() {
        assert_eq!(
            normalized_args(args(&["/usr/bin/agdt-task-wait", "--timeout", "5"])),
            args(&["agdt", "task-wait", "--timeout", "5"])
        );
        assert_eq!(normalized_args(args(&["agdt", "show"])), args(&["agdt", "show"]));
    }

    #[test]
    fn background_child_keeps_its_arguments() {
        let child = args(&["/bin/agdt-review-generate-summary", "__run-task", "/s/t.toml"]);
        assert_eq!(normalized_args(child.clone()), child);
        let cli = Cli::try_parse_from(normalized_args(child)).unwrap();
        assert!(matches!(cli.command, Commands::RunTask { .. }));
    }
}
