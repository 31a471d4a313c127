//! Job shape, device lists, and scheduler directives.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Resource request and scheduling hints for one submission.
///
/// Fixed at submission time; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    /// Number of nodes in the allocation.
    pub nodes: u32,

    /// GPUs (and worker processes) per node.
    pub gpus_per_node: u32,

    /// Scheduler partition.
    pub partition: String,

    /// Account charged for the allocation.
    pub account: String,

    /// Wall-clock limit in scheduler syntax (e.g. `8:00:00`).
    pub time_limit: String,

    /// Request whole nodes.
    pub exclusive: bool,

    /// Job name shown by the scheduler.
    pub job_name: String,

    /// Mail notification events (e.g. `FAIL`), if any.
    pub mail_type: Option<String>,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            nodes: 2,
            gpus_per_node: 16,
            partition: "batch".to_string(),
            account: String::new(),
            time_limit: "8:00:00".to_string(),
            exclusive: true,
            job_name: "bionemo".to_string(),
            mail_type: Some("FAIL".to_string()),
        }
    }
}

impl JobSpec {
    /// Check the node and GPU counts.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.nodes < 1 {
            return Err(CoreError::InvalidNodeCount(self.nodes));
        }
        if self.gpus_per_node < 1 {
            return Err(CoreError::InvalidGpuCount(self.gpus_per_node));
        }
        Ok(())
    }

    /// Total number of tasks: one per GPU across all nodes.
    pub fn task_count(&self) -> u64 {
        u64::from(self.nodes) * u64::from(self.gpus_per_node)
    }

    /// Device indices visible to each node's tasks.
    pub fn device_list(&self) -> Result<DeviceList, CoreError> {
        DeviceList::for_gpus(self.gpus_per_node)
    }

    /// Per-step shape: node count and one task per GPU on each node.
    ///
    /// Used when launching inside an existing allocation, which already
    /// fixes partition, account, and time limit.
    pub fn step_shape(&self) -> SchedulerDirectives {
        let mut directives = SchedulerDirectives::default();
        directives
            .push("nodes", self.nodes.to_string())
            .push("ntasks-per-node", self.gpus_per_node.to_string())
            .push("gpus-per-node", self.gpus_per_node.to_string());
        directives
    }

    /// `#SBATCH` directives equivalent to this job.
    pub fn directives(&self) -> SchedulerDirectives {
        let mut directives = SchedulerDirectives::default();
        directives
            .push("nodes", self.nodes.to_string())
            .push("ntasks", self.task_count().to_string())
            .push("ntasks-per-node", self.gpus_per_node.to_string())
            .push("gpus-per-node", self.gpus_per_node.to_string());
        if !self.time_limit.is_empty() {
            directives.push("time", self.time_limit.clone());
        }
        if !self.partition.is_empty() {
            directives.push("partition", self.partition.clone());
        }
        if !self.account.is_empty() {
            directives.push("account", self.account.clone());
        }
        if !self.job_name.is_empty() {
            directives.push("job-name", self.job_name.clone());
        }
        if let Some(mail_type) = &self.mail_type {
            directives.push("mail-type", mail_type.clone());
        }
        if self.exclusive {
            directives.flag("exclusive");
        }
        directives
    }
}

/// Comma-joined GPU indices `0..n`, as expected by `CUDA_VISIBLE_DEVICES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList(Vec<u32>);

impl DeviceList {
    /// Build the list for `gpus` devices. Zero GPUs is a configuration error.
    pub fn for_gpus(gpus: u32) -> Result<Self, CoreError> {
        if gpus < 1 {
            return Err(CoreError::InvalidGpuCount(gpus));
        }
        Ok(Self((0..gpus).collect()))
    }

    /// The device indices in increasing order.
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

/// Ordered `#SBATCH` header lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerDirectives {
    entries: Vec<(String, Option<String>)>,
}

impl SchedulerDirectives {
    /// Add `--name=value`.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Add a bare `--name`.
    pub fn flag(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), None));
        self
    }

    /// Value of a directive, if present with a value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether a directive is present, with or without a value.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Render as launcher arguments (`--name=value` or `--name`).
    pub fn to_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("--{name}={value}"),
                None => format!("--{name}"),
            })
            .collect()
    }

    /// Render as header lines, one directive per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            match value {
                Some(value) => out.push_str(&format!("#SBATCH --{name}={value}\n")),
                None => out.push_str(&format!("#SBATCH --{name}\n")),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_shape_args() {
        assert_eq!(
            spec(2, 16).step_shape().to_args(),
            vec!["--nodes=2", "--ntasks-per-node=16", "--gpus-per-node=16"]
        );
    }

    #[test]
    fn test_directive_args_include_flags() {
        let args = spec(1, 4).directives().to_args();
        assert!(args.contains(&"--partition=batch".to_string()));
        assert!(args.contains(&"--time=8:00:00".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--exclusive"));
    }

    fn spec(nodes: u32, gpus: u32) -> JobSpec {
        JobSpec {
            nodes,
            gpus_per_node: gpus,
            partition: "batch".to_string(),
            account: "ent_aiapps_omics".to_string(),
            time_limit: "8:00:00".to_string(),
            exclusive: true,
            job_name: "bionemo".to_string(),
            mail_type: Some("FAIL".to_string()),
        }
    }

    #[test]
    fn test_task_count() {
        assert_eq!(spec(2, 16).task_count(), 32);
        assert_eq!(spec(1, 1).task_count(), 1);
        assert_eq!(spec(7, 3).task_count(), 21);
    }

    #[test]
    fn test_device_list_is_increasing_from_zero() {
        for gpus in 1..=16 {
            let devices = DeviceList::for_gpus(gpus).unwrap();
            assert_eq!(devices.len(), gpus as usize);
            assert_eq!(devices.indices()[0], 0);
            assert!(devices.indices().windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn test_device_list_display() {
        let devices = spec(2, 16).device_list().unwrap();
        assert_eq!(
            devices.to_string(),
            "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15"
        );
        assert_eq!(DeviceList::for_gpus(1).unwrap().to_string(), "0");
    }

    #[test]
    fn test_zero_gpus_rejected() {
        assert_eq!(
            DeviceList::for_gpus(0),
            Err(CoreError::InvalidGpuCount(0))
        );
        assert_eq!(spec(2, 0).validate(), Err(CoreError::InvalidGpuCount(0)));
    }

    #[test]
    fn test_zero_nodes_rejected() {
        assert_eq!(spec(0, 8).validate(), Err(CoreError::InvalidNodeCount(0)));
    }

    #[test]
    fn test_directives() {
        let directives = spec(2, 16).directives();
        assert_eq!(directives.get("nodes"), Some("2"));
        assert_eq!(directives.get("ntasks"), Some("32"));
        assert_eq!(directives.get("ntasks-per-node"), Some("16"));
        assert_eq!(directives.get("partition"), Some("batch"));
        assert!(directives.contains("exclusive"));

        let rendered = directives.render();
        assert!(rendered.contains("#SBATCH --time=8:00:00\n"));
        assert!(rendered.ends_with("#SBATCH --exclusive\n"));
    }

    #[test]
    fn test_directives_skip_empty_hints() {
        let mut job = spec(1, 4);
        job.account.clear();
        job.exclusive = false;
        job.mail_type = None;
        let directives = job.directives();
        assert!(!directives.contains("account"));
        assert!(!directives.contains("exclusive"));
        assert!(!directives.contains("mail-type"));
    }
}
