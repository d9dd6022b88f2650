//! Control group management for the housekeeping threads.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RuntimeError};

/// Name of the child cgroup that receives non-vCPU threads.
pub const HOUSEKEEPING_CGROUP: &str = "housekeeping";

/// Controller the housekeeping cgroup is scoped to.
pub const CPUSET_SUBSYSTEM: &str = "cpuset";

/// The cgroup of a guest's launcher.
pub trait CgroupManager {
    /// Creates a child cgroup `name` with `subsystem` enabled. Existing
    /// children are kept as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be created.
    fn create_child_cgroup(&self, name: &str, subsystem: &str) -> Result<()>;

    /// Restricts child `name` to `cpus`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cpuset cannot be written.
    fn set_cpuset(&self, name: &str, cpus: &[u32]) -> Result<()>;

    /// Lists the thread ids in the cgroup itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread list cannot be read.
    fn cgroup_threads(&self) -> Result<Vec<i32>>;

    /// Moves `tid` into child `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be attached.
    fn attach_tid(&self, subsystem: &str, name: &str, tid: i32) -> Result<()>;
}

/// [`CgroupManager`] over a unified (v2) cgroup directory.
#[derive(Debug, Clone)]
pub struct CgroupV2Manager {
    path: PathBuf,
}

impl CgroupV2Manager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| RuntimeError::cgroup(path, e))
    }
}

impl CgroupManager for CgroupV2Manager {
    fn create_child_cgroup(&self, name: &str, subsystem: &str) -> Result<()> {
        let child = self.path.join(name);
        if child.is_dir() {
            tracing::debug!(cgroup = %child.display(), "child cgroup already exists");
            return Ok(());
        }

        // Interface files of a controller only appear in children once the
        // parent delegates it.
        Self::write(
            &self.path.join("cgroup.subtree_control"),
            &format!("+{subsystem}"),
        )?;
        fs::create_dir(&child).map_err(|e| RuntimeError::cgroup(&child, e))?;
        // Threads of one process can only be split across threaded cgroups.
        Self::write(&child.join("cgroup.type"), "threaded")?;
        tracing::debug!(cgroup = %child.display(), subsystem, "created child cgroup");
        Ok(())
    }

    fn set_cpuset(&self, name: &str, cpus: &[u32]) -> Result<()> {
        let value = cpus
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self::write(&self.path.join(name).join("cpuset.cpus"), &value)
    }

    fn cgroup_threads(&self) -> Result<Vec<i32>> {
        let path = self.path.join("cgroup.threads");
        let content = fs::read_to_string(&path).map_err(|e| RuntimeError::cgroup(&path, e))?;
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn attach_tid(&self, subsystem: &str, name: &str, tid: i32) -> Result<()> {
        tracing::trace!(subsystem, cgroup = name, tid, "attaching thread");
        Self::write(
            &self.path.join(name).join("cgroup.threads"),
            &tid.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_cgroup_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cgroup.threads"), "10\n11\n\n12\n").unwrap();
        let manager = CgroupV2Manager::new(dir.path());

        manager
            .create_child_cgroup(HOUSEKEEPING_CGROUP, CPUSET_SUBSYSTEM)
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("cgroup.subtree_control")).unwrap(),
            "+cpuset"
        );
        manager
            .create_child_cgroup(HOUSEKEEPING_CGROUP, CPUSET_SUBSYSTEM)
            .unwrap();
        let child = dir.path().join(HOUSEKEEPING_CGROUP);
        assert_eq!(
            fs::read_to_string(child.join("cgroup.type")).unwrap(),
            "threaded"
        );

        manager.set_cpuset(HOUSEKEEPING_CGROUP, &[0, 1, 5]).unwrap();
        assert_eq!(fs::read_to_string(child.join("cpuset.cpus")).unwrap(), "0,1,5");

        assert_eq!(manager.cgroup_threads().unwrap(), vec![10, 11, 12]);

        manager
            .attach_tid(CPUSET_SUBSYSTEM, HOUSEKEEPING_CGROUP, 11)
            .unwrap();
        assert_eq!(fs::read_to_string(child.join("cgroup.threads")).unwrap(), "11");
    }

    #[test]
    fn test_existing_child_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join(HOUSEKEEPING_CGROUP);
        fs::create_dir(&child).unwrap();
        let manager = CgroupV2Manager::new(dir.path());

        manager
            .create_child_cgroup(HOUSEKEEPING_CGROUP, CPUSET_SUBSYSTEM)
            .unwrap();
        assert!(!dir.path().join("cgroup.subtree_control").exists());
        assert!(!child.join("cgroup.type").exists());
    }

    #[test]
    fn test_missing_cgroup_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CgroupV2Manager::new(dir.path().join("gone"));
        let err = manager.cgroup_threads().unwrap_err();
        assert!(err.to_string().contains("gone"));
    }
}
