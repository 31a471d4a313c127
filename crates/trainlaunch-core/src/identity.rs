//! Experiment identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label correlating logs, checkpoints, and tracking records for one run.
///
/// Rendered as `<label>_nodes_<nodes>_gpus_<gpus>`. The same string is used as
/// the results directory suffix, the experiment name, and the logger run name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentIdentity(String);

impl ExperimentIdentity {
    /// Build the identity for an experiment label and a node/GPU shape.
    pub fn new(label: &str, nodes: u32, gpus_per_node: u32) -> Self {
        Self(format!("{label}_nodes_{nodes}_gpus_{gpus_per_node}"))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExperimentIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
