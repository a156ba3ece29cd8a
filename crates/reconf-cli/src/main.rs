use clap::{Parser, Subcommand};

mod commands;
mod instance;

#[derive(Parser)]
#[command(
    name = "reconf",
    about = "Reconf: plans datacenter reconfigurations under placement constraints",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a plan that brings an instance to a state satisfying its
    /// constraints.
    ///
    /// The instance is a JSON document holding the source model, the
    /// constraints and, optionally, node partitions solved concurrently.
    Solve {
        /// Path to the instance JSON file
        #[arg(short, long)]
        instance: String,
        /// Solver configuration (reconf.toml); defaults apply when absent
        #[arg(short, long)]
        config: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Replay a plan against the constraints of an instance
    Check {
        /// Path to the instance JSON file
        #[arg(short, long)]
        instance: String,
        /// Path to the plan JSON file
        #[arg(short, long)]
        plan: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reconf=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Solve {
            instance,
            config,
            format,
        } => commands::solve::solve(&instance, config.as_deref(), &format),
        Commands::Check { instance, plan } => commands::check::check(&instance, &plan),
    }
}
