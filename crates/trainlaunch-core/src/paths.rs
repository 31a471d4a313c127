//! Host directories and their container mount points.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{CoreError, ExperimentIdentity};

/// File name of the persisted job script inside the results directory.
pub const JOB_SCRIPT_FILE_NAME: &str = "job_script.sh";

/// A `host:container` bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// Storage layout on the host and inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSet {
    /// Root under which data, code, and outputs live.
    pub storage_root: PathBuf,

    /// Host dataset directory.
    pub data_dir: PathBuf,

    /// Host code checkout.
    pub code_dir: PathBuf,

    /// Host output root; results directories are created under it.
    pub output_dir: PathBuf,

    /// Container path for `data_dir`.
    pub data_mount: PathBuf,

    /// Container path for `code_dir`. Also the container working directory.
    pub code_mount: PathBuf,

    /// Container path for `output_dir`.
    pub output_mount: PathBuf,
}

impl PathSet {
    /// Check that every path is absolute, free of mount-list separators, and
    /// that container targets are distinct.
    pub fn validate(&self) -> Result<(), CoreError> {
        let host = [
            ("storage.root", &self.storage_root),
            ("storage.data_dir", &self.data_dir),
            ("storage.code_dir", &self.code_dir),
            ("storage.output_dir", &self.output_dir),
        ];
        let container = [
            ("mounts.data", &self.data_mount),
            ("mounts.code", &self.code_mount),
            ("mounts.output", &self.output_mount),
        ];
        for &(field, path) in host.iter().chain(container.iter()) {
            if !path.is_absolute() {
                return Err(CoreError::RelativePath {
                    field,
                    path: path.display().to_string(),
                });
            }
            let text = path.to_string_lossy();
            if text.contains(',') || text.contains(':') {
                return Err(CoreError::InvalidMountPath {
                    field,
                    path: text.into_owned(),
                });
            }
        }

        let mut seen: Vec<&Path> = Vec::with_capacity(3);
        for mount in [&self.code_mount, &self.output_mount, &self.data_mount] {
            if seen.contains(&mount.as_path()) {
                return Err(CoreError::DuplicateMountTarget(mount.display().to_string()));
            }
            seen.push(mount.as_path());
        }
        Ok(())
    }

    /// The three bind mounts: code, output, data.
    pub fn mounts(&self) -> [Mount; 3] {
        [
            Mount::new(&self.code_dir, &self.code_mount),
            Mount::new(&self.output_dir, &self.output_mount),
            Mount::new(&self.data_dir, &self.data_mount),
        ]
    }

    /// Mount list in launcher syntax: `host:container` pairs joined by commas.
    pub fn mount_list(&self) -> String {
        self.mounts()
            .iter()
            .map(Mount::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Host results directory for an experiment.
    pub fn results_dir(&self, identity: &ExperimentIdentity) -> PathBuf {
        self.output_dir.join(identity.as_str())
    }

    /// Container view of the results directory.
    pub fn results_mount(&self, identity: &ExperimentIdentity) -> PathBuf {
        self.output_mount.join(identity.as_str())
    }

    /// Host path of the persisted job script.
    pub fn script_path(&self, identity: &ExperimentIdentity) -> PathBuf {
        self.results_dir(identity).join(JOB_SCRIPT_FILE_NAME)
    }

    /// Container path of the persisted job script.
    pub fn script_mount(&self, identity: &ExperimentIdentity) -> PathBuf {
        self.results_mount(identity).join(JOB_SCRIPT_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> PathSet {
        PathSet {
            storage_root: "/gpfs/megatron".into(),
            data_dir: "/gpfs/megatron/data/zinc_csv_split".into(),
            code_dir: "/gpfs/megatron/code/NeMo".into(),
            output_dir: "/gpfs/megatron/nemo".into(),
            data_mount: "/data".into(),
            code_mount: "/code".into(),
            output_mount: "/result".into(),
        }
    }

    #[test]
    fn test_mount_list_has_three_distinct_targets() {
        let paths = paths();
        let mounts = paths.mounts();
        assert_eq!(mounts.len(), 3);
        assert_ne!(mounts[0].container, mounts[1].container);
        assert_ne!(mounts[1].container, mounts[2].container);
        assert_ne!(mounts[0].container, mounts[2].container);
        assert_eq!(
            paths.mount_list(),
            "/gpfs/megatron/code/NeMo:/code,/gpfs/megatron/nemo:/result,/gpfs/megatron/data/zinc_csv_split:/data"
        );
    }

    #[test]
    fn test_duplicate_mount_target_rejected() {
        let mut paths = paths();
        paths.data_mount = "/code".into();
        assert_eq!(
            paths.validate(),
            Err(CoreError::DuplicateMountTarget("/code".to_string()))
        );
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut paths = paths();
        paths.output_mount = "result".into();
        assert!(matches!(
            paths.validate(),
            Err(CoreError::RelativePath { field: "mounts.output", .. })
        ));
    }

    #[test]
    fn test_separator_in_host_path_rejected() {
        let mut paths = paths();
        paths.storage_root = "/gpfs/a,b".into();
        paths.code_dir = "/gpfs/a,b/code/NeMo".into();
        assert!(matches!(
            paths.validate(),
            Err(CoreError::InvalidMountPath { field: "storage.root", .. })
        ));

        let mut tagged = self::paths();
        tagged.data_dir = "/gpfs/megatron/data:v2".into();
        assert!(matches!(
            tagged.validate(),
            Err(CoreError::InvalidMountPath { field: "storage.data_dir", .. })
        ));
    }

    #[test]
    fn test_separator_in_mount_point_rejected() {
        let mut paths = paths();
        paths.output_mount = "/result,/etc".into();
        assert_eq!(
            paths.validate(),
            Err(CoreError::InvalidMountPath {
                field: "mounts.output",
                path: "/result,/etc".to_string(),
            })
        );
    }

    #[test]
    fn test_valid_paths_give_three_pairs() {
        let paths = paths();
        assert_eq!(paths.validate(), Ok(()));
        assert_eq!(paths.mount_list().split(',').count(), 3);
    }

    #[test]
    fn test_results_paths() {
        let paths = paths();
        let id = ExperimentIdentity::new("Draco-RNO", 2, 16);
        assert_eq!(
            paths.results_dir(&id),
            PathBuf::from("/gpfs/megatron/nemo/Draco-RNO_nodes_2_gpus_16")
        );
        assert_eq!(
            paths.script_mount(&id),
            PathBuf::from("/result/Draco-RNO_nodes_2_gpus_16/job_script.sh")
        );
    }
}
