//! Loads a plan file: a single JSON document carrying the datacenter and
//! component values the builder consumes (spec §1, §6). Schema parsing
//! (YAML/HCL) is out of scope per SPEC_FULL.md §1 — this is the stand-in
//! loader every subcommand wires in front of [`cldctl_core::builder::Builder`].

use anyhow::{Context, Result};
use cldctl_core::model::{ComponentValue, DatacenterValue};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct PlanFile {
    pub environment: String,
    pub datacenter: DatacenterValue,
    #[serde(default)]
    pub components: Vec<ComponentValue>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading plan file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing plan file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_plan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"environment":"staging","datacenter":{{"name":"dc","hooks":[]}},"components":[]}}"#
        )
        .unwrap();

        let plan = PlanFile::load(file.path()).unwrap();
        assert_eq!(plan.environment, "staging");
        assert_eq!(plan.datacenter.name, "dc");
        assert!(plan.components.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = PlanFile::load(Path::new("/nonexistent/plan.json"));
        assert!(result.is_err());
    }
}
