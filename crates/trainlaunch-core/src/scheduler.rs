//! Scheduler-provided environment.
//!
//! Inside an allocation Slurm exports the job id, this node's rank, and the
//! allocation shape. These values are read, never computed.

use crate::{CoreError, JobId};

pub const SLURM_JOB_ID: &str = "SLURM_JOB_ID";
pub const SLURM_NODEID: &str = "SLURM_NODEID";
pub const SLURM_JOB_NUM_NODES: &str = "SLURM_JOB_NUM_NODES";
pub const SLURM_GPUS_PER_NODE: &str = "SLURM_GPUS_PER_NODE";

/// Values the scheduler exports into the submitting process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerEnv {
    pub job_id: Option<JobId>,
    pub node_rank: Option<u32>,
    pub node_count: Option<u32>,
    pub gpus_per_node: Option<u32>,
}

impl SchedulerEnv {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through an arbitrary lookup, so tests need not touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            job_id: get(SLURM_JOB_ID).map(|v| JobId::new(v.trim())),
            node_rank: get(SLURM_NODEID)
                .map(|v| parse_count(SLURM_NODEID, &v))
                .transpose()?,
            node_count: get(SLURM_JOB_NUM_NODES)
                .map(|v| parse_count(SLURM_JOB_NUM_NODES, &v))
                .transpose()?,
            gpus_per_node: get(SLURM_GPUS_PER_NODE)
                .map(|v| parse_gpus(&v))
                .transpose()?,
        })
    }

    /// Whether we are running inside an allocation.
    pub fn in_allocation(&self) -> bool {
        self.job_id.is_some()
    }
}

fn parse_count(name: &str, value: &str) -> Result<u32, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidSchedulerVar {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// `SLURM_GPUS_PER_NODE` is `N`, `type:N` (e.g. `a100:8`), or a comma list of
/// those for mixed GPU types; the per-type counts are summed.
fn parse_gpus(value: &str) -> Result<u32, CoreError> {
    let invalid = || CoreError::InvalidSchedulerVar {
        name: SLURM_GPUS_PER_NODE.to_string(),
        value: value.to_string(),
    };
    value.trim().split(',').try_fold(0u32, |total, entry| {
        let count = entry.trim().rsplit(':').next().unwrap_or_default();
        let count: u32 = count.parse().map_err(|_| invalid())?;
        total.checked_add(count).ok_or_else(invalid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_reads_allocation() {
        let env = SchedulerEnv::from_lookup(lookup(&[
            (SLURM_JOB_ID, "881"),
            (SLURM_NODEID, "1"),
            (SLURM_JOB_NUM_NODES, "2"),
            (SLURM_GPUS_PER_NODE, "16"),
        ]))
        .unwrap();

        assert_eq!(env.job_id, Some(JobId::new("881")));
        assert_eq!(env.node_rank, Some(1));
        assert_eq!(env.node_count, Some(2));
        assert_eq!(env.gpus_per_node, Some(16));
        assert!(env.in_allocation());
    }

    #[test]
    fn test_outside_allocation() {
        let env = SchedulerEnv::from_lookup(lookup(&[])).unwrap();
        assert_eq!(env, SchedulerEnv::default());
        assert!(!env.in_allocation());
    }

    #[test]
    fn test_typed_gpu_count() {
        let env = SchedulerEnv::from_lookup(lookup(&[(SLURM_GPUS_PER_NODE, "a100:8")])).unwrap();
        assert_eq!(env.gpus_per_node, Some(8));
    }

    #[test]
    fn test_mixed_gpu_types_are_summed() {
        let env = SchedulerEnv::from_lookup(lookup(&[(SLURM_GPUS_PER_NODE, "a100:4,v100:2")]))
            .unwrap();
        assert_eq!(env.gpus_per_node, Some(6));
    }

    #[test]
    fn test_malformed_gpu_list() {
        for value in ["a100:4,", "a100:4,v100", "a100:x"] {
            let err = SchedulerEnv::from_lookup(lookup(&[(SLURM_GPUS_PER_NODE, value)])).unwrap_err();
            assert_eq!(
                err,
                CoreError::InvalidSchedulerVar {
                    name: SLURM_GPUS_PER_NODE.to_string(),
                    value: value.to_string(),
                }
            );
        }
    }

    #[test]
    fn test_malformed_value() {
        let err = SchedulerEnv::from_lookup(lookup(&[(SLURM_JOB_NUM_NODES, "two")])).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidSchedulerVar {
                name: SLURM_JOB_NUM_NODES.to_string(),
                value: "two".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_values_are_absent() {
        let env = SchedulerEnv::from_lookup(lookup(&[(SLURM_JOB_ID, " ")])).unwrap();
        assert!(env.job_id.is_none());
    }
}
