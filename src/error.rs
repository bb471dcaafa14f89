//! Error types and handling for hugeattach

/// Result type alias for hugeattach operations
pub type Result<T> = std::result::Result<T, AttachError>;

/// Errors reported by the attach sequence
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The shared-config or hugepage-table file cannot be opened or read
    #[error("Config unavailable: {path}: {message}")]
    ConfigUnavailable {
        path: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A mapping at an OS-chosen address failed outright
    #[error("Mapping failed: {message}")]
    MapFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A fixed-address mapping did not land where it was requested
    #[error("Address mismatch: requested {requested:#x}, got {actual}")]
    AddressMismatch {
        requested: usize,
        actual: MappedAt,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A segment's declared length cannot be satisfied by its hugepages
    #[error("Hugepage missing for segment {segment}: {message}")]
    HugepageMissing {
        segment: usize,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The kernel page-table export cannot resolve the address
    #[error("Physical address unavailable for {address:#x}: {message}")]
    PhysicalAddressUnavailable { address: usize, message: String },

    /// The shared structures describe an impossible layout
    #[error("Invalid layout: {message}")]
    InvalidLayout { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },
}

/// Where the OS placed a fixed-address request that missed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedAt {
    /// The mapping call itself failed
    Nowhere,
    /// The mapping landed at a different address
    Address(usize),
}

impl std::fmt::Display for MappedAt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappedAt::Nowhere => write!(f, "no mapping"),
            MappedAt::Address(addr) => write!(f, "{:#x}", addr),
        }
    }
}

impl AttachError {
    /// Create a config unavailable error from an I/O error
    pub fn config_unavailable(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::ConfigUnavailable {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a config unavailable error without an underlying I/O error
    pub fn config_invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigUnavailable {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a map failed error
    pub fn map_failed(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::MapFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an address mismatch error for a mapping that landed elsewhere
    pub fn address_mismatch(requested: usize, actual: usize) -> Self {
        Self::AddressMismatch {
            requested,
            actual: MappedAt::Address(actual),
            source: None,
        }
    }

    /// Create an address mismatch error for a mapping call that failed
    pub fn address_denied(requested: usize, source: std::io::Error) -> Self {
        Self::AddressMismatch {
            requested,
            actual: MappedAt::Nowhere,
            source: Some(source),
        }
    }

    /// Create a hugepage missing error
    pub fn hugepage_missing(segment: usize, message: impl Into<String>) -> Self {
        Self::HugepageMissing {
            segment,
            message: message.into(),
            source: None,
        }
    }

    /// Create a hugepage missing error for a backing file that cannot be opened
    pub fn backing_file_missing(segment: usize, path: &str, source: std::io::Error) -> Self {
        Self::HugepageMissing {
            segment,
            message: format!("cannot open backing file {}: {}", path, source),
            source: Some(source),
        }
    }

    /// Create a physical address unavailable error
    pub fn phys_unavailable(address: usize, message: impl Into<String>) -> Self {
        Self::PhysicalAddressUnavailable {
            address,
            message: message.into(),
        }
    }

    /// Create an invalid layout error
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::InvalidLayout {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Whether this error aborts the attach attempt
    ///
    /// Only a degraded physical-address resolver leaves the rest of the
    /// sequence usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PhysicalAddressUnavailable { .. })
    }
}
