//! Build-task runner: `echotrace-tasks verify`, `echotrace-tasks run-hub`, ...

use clap::Parser;

use echotrace::logging;
use echotrace::tasks::{run_task, ProcessExecutor, Task, DEFAULT_TOOL, TOOL_ENV};

#[derive(Parser)]
#[command(name = "echotrace-tasks")]
#[command(about = "Run EchoTrace build tasks")]
struct Args {
    /// Task to run
    #[arg(value_enum)]
    task: Task,

    /// Tool binary used for every invocation
    #[arg(long, env = TOOL_ENV, default_value = DEFAULT_TOOL)]
    tool: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    if let Err(e) = run_task(args.task, &args.tool, &ProcessExecutor) {
        tracing::error!("Task {:?} failed: {}", args.task, e);
        std::process::exit(e.exit_code());
    }
}
