use std::path::Path;

use anyhow::Context;
use reconf_model::{check_plan, ReconfigurationPlan};
use tracing::warn;

use crate::instance::Instance;

pub fn check(instance: &str, plan: &str) -> anyhow::Result<()> {
    let instance = Instance::from_file(Path::new(instance))?;
    let content = std::fs::read_to_string(plan).with_context(|| format!("reading plan {plan}"))?;
    let plan: ReconfigurationPlan =
        serde_json::from_str(&content).with_context(|| format!("parsing plan {plan}"))?;

    if plan.source().mapping() != instance.model.mapping() {
        warn!("the plan does not start from the instance model");
    }

    match check_plan(&plan, &instance.constraints) {
        Ok(()) => {
            println!(
                "✓ {} actions satisfy {} constraints",
                plan.size(),
                instance.constraints.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Check failed: {e}");
            Err(e.into())
        }
    }
}
