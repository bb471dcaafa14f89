//! Well-known paths and attach configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AttachError, Result};

/// Shared-config file written by the primary process
pub const DEFAULT_CONFIG_PATH: &str = "/var/run/.netbricks-outside_config";

/// Hugepage table written by the primary process
pub const DEFAULT_HUGEPAGE_INFO_PATH: &str = "/var/run/.netbricks-outside_hugepage_info";

/// Kernel page-table export of the current process
pub const DEFAULT_PAGEMAP_PATH: &str = "/proc/self/pagemap";

/// Device yielding zero-filled pages, used to reserve address ranges
pub const DEFAULT_ZERO_DEVICE: &str = "/dev/zero";

/// Path of the shared-config file
pub fn runtime_config_path() -> &'static Path {
    Path::new(DEFAULT_CONFIG_PATH)
}

/// Path of the hugepage table file
pub fn hugepage_info_path() -> &'static Path {
    Path::new(DEFAULT_HUGEPAGE_INFO_PATH)
}

/// Configuration for one attach attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Shared control structure file
    pub config_path: PathBuf,
    /// Hugepage table file
    pub hugepage_path: PathBuf,
    /// Page-table export consulted for physical addresses
    pub pagemap_path: PathBuf,
    /// Zero device backing the pass-1 reservations
    pub zero_device: PathBuf,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            config_path: runtime_config_path().to_path_buf(),
            hugepage_path: hugepage_info_path().to_path_buf(),
            pagemap_path: PathBuf::from(DEFAULT_PAGEMAP_PATH),
            zero_device: PathBuf::from(DEFAULT_ZERO_DEVICE),
        }
    }
}

impl AttachConfig {
    /// Create a configuration using the well-known paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared-config file path
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Set the hugepage table path
    pub fn with_hugepage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.hugepage_path = path.into();
        self
    }

    /// Set the page-table export path
    pub fn with_pagemap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pagemap_path = path.into();
        self
    }

    /// Set the zero device path
    pub fn with_zero_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.zero_device = path.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("config_path", &self.config_path),
            ("hugepage_path", &self.hugepage_path),
            ("pagemap_path", &self.pagemap_path),
            ("zero_device", &self.zero_device),
        ];

        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(AttachError::invalid_parameter(name, "Path cannot be empty"));
            }
        }

        if self.config_path == self.hugepage_path {
            return Err(AttachError::invalid_parameter(
                "hugepage_path",
                "Hugepage table and shared config must be different files",
            ));
        }

        Ok(())
    }
}
