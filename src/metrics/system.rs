//! Host resource sampling for batch status lines and gauges.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, System};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Static host description logged once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HostInfo {
    pub cpu_count: usize,
    pub memory_total_gb: f64,
    /// Filesystem holding the artifact directory, if it could be found.
    pub disk_total_gb: Option<f64>,
    pub disk_free_gb: Option<f64>,
}

/// Point-in-time resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub disk_free_gb: Option<f64>,
}

/// Samples CPU, memory and free disk space for the filesystem that holds
/// `disk_path`.
#[derive(Debug)]
pub struct ResourceMonitor {
    system: System,
    disk_path: PathBuf,
}

impl ResourceMonitor {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system,
            disk_path: disk_path.into(),
        }
    }

    pub fn host_info(&mut self) -> HostInfo {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        let disk = self.disk_space();
        HostInfo {
            cpu_count: self.system.cpus().len(),
            memory_total_gb: self.system.total_memory() as f64 / GIB,
            disk_total_gb: disk.map(|(total, _)| total as f64 / GIB),
            disk_free_gb: disk.map(|(_, free)| free as f64 / GIB),
        }
    }

    /// CPU usage covers the time since the previous sample.
    pub fn sample(&mut self) -> ResourceSnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let available = self.system.available_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            total.saturating_sub(available) as f64 / total as f64 * 100.0
        };

        ResourceSnapshot {
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
            memory_available_gb: available as f64 / GIB,
            disk_free_gb: self.disk_space().map(|(_, free)| free as f64 / GIB),
        }
    }

    /// `(total, available)` bytes of the deepest mount containing the path.
    fn disk_space(&self) -> Option<(u64, u64)> {
        let target = existing_ancestor(&self.disk_path);
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| (disk.total_space(), disk.available_space()))
    }
}

/// The artifact directory may not exist yet; use its closest existing parent.
fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .ancestors()
        .find_map(|p| p.canonicalize().ok())
        .unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_ancestor_of_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("circuits").join("nested");
        let resolved = existing_ancestor(&missing);
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_sample_is_in_range() {
        let dir = TempDir::new().unwrap();
        let mut monitor = ResourceMonitor::new(dir.path());
        let snapshot = monitor.sample();
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!(snapshot.memory_available_gb >= 0.0);
        assert!(snapshot.cpu_percent >= 0.0);
        if let Some(free) = snapshot.disk_free_gb {
            assert!(free >= 0.0);
        }
    }

    #[test]
    fn test_host_info() {
        let dir = TempDir::new().unwrap();
        let info = ResourceMonitor::new(dir.path()).host_info();
        assert!(info.memory_total_gb > 0.0);
        if let (Some(total), Some(free)) = (info.disk_total_gb, info.disk_free_gb) {
            assert!(free <= total);
        }
    }
}
