use std::path::Path;

use reconf_solver::{solve_partitioned, ReconfigurationAlgorithm, SolveOutcome, SolverConfig};
use tracing::info;

use crate::instance::Instance;

pub fn solve(instance: &str, config: Option<&str>, format: &str) -> anyhow::Result<()> {
    let instance = Instance::from_file(Path::new(instance))?;
    let config = match config {
        Some(path) => SolverConfig::from_file(Path::new(path))?,
        None => SolverConfig::default(),
    };
    info!(
        constraints = instance.constraints.len(),
        partitions = instance.partitions.len(),
        "instance loaded"
    );

    let outcome = if instance.partitions.is_empty() {
        ReconfigurationAlgorithm::new(config).solve(&instance.model, &instance.constraints)?
    } else {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(solve_partitioned(
            &instance.model,
            &instance.constraints,
            &instance.partitions,
            &config,
        ))?
    };

    match format {
        "json" => {
            let out = serde_json::json!({
                "plan": outcome.plan,
                "stats": outcome.stats,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => print_text(&outcome),
    }

    if outcome.plan.is_none() {
        anyhow::bail!("no plan found");
    }
    Ok(())
}

fn print_text(outcome: &SolveOutcome) {
    let stats = &outcome.stats;
    match &outcome.plan {
        Some(plan) => {
            print!("{plan}");
            println!(
                "✓ {} actions, duration {}, cost {}{}",
                plan.size(),
                plan.duration(),
                stats.cost.unwrap_or_default(),
                if stats.optimal { " (optimal)" } else { "" }
            );
        }
        None if stats.time_limit_reached => {
            println!("✗ time limit reached before any plan was found");
        }
        None => println!("✗ no plan satisfies the constraints"),
    }
    println!(
        "  {} nodes, {} backtracks, {} solutions in {} ms",
        stats.nodes, stats.backtracks, stats.solutions, stats.elapsed_ms
    );
}
