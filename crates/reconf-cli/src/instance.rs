//! JSON instances: a source model, the constraints to satisfy and an
//! optional node partitioning.
//!
//! ```json
//! {
//!   "model": { ... },
//!   "constraints": [ { "id": "ban", "vms": [0], "nodes": [1] } ],
//!   "partitions": [[0, 1], [2, 3]]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use reconf_model::{Model, NodeId, SatConstraint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub model: Model,
    #[serde(default)]
    pub constraints: Vec<SatConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<BTreeSet<NodeId>>,
}

impl Instance {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading instance {}", path.display()))?;
        let instance = serde_json::from_str(&content)
            .with_context(|| format!("parsing instance {}", path.display()))?;
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_an_instance() {
        let mut mo = Model::new();
        let (n0, n1) = (mo.new_node(), mo.new_node());
        let vm = mo.new_vm();
        mo.mapping_mut().add_online_node(n0);
        mo.mapping_mut().add_online_node(n1);
        mo.mapping_mut().add_running_vm(vm, n0);
        let instance = Instance {
            model: mo,
            constraints: vec![SatConstraint::ban([vm], [n0])],
            partitions: Vec::new(),
        };
        let json = serde_json::to_string(&instance).unwrap();
        assert!(!json.contains("partitions"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        let back = Instance::from_file(file.path()).unwrap();
        assert_eq!(back.constraints, instance.constraints);
        assert_eq!(back.model.mapping(), instance.model.mapping());
        assert!(back.partitions.is_empty());
    }

    #[test]
    fn reports_the_broken_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"constraints\": []}}").unwrap();
        let err = Instance::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("parsing instance"));
    }
}
