//! # hugeattach - Rejoin a primary process's hugepage memory layout
//!
//! A primary process maps a set of hugepage-backed segments and publishes a
//! shared control structure describing them. hugeattach lets a secondary
//! process rebuild the same mappings at byte-identical virtual addresses, so
//! pointers stored in shared memory stay valid without translation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌─────────────┐
//! │ config paths │──►│   attach   │──►│  segments   │
//! └──────────────┘   │ provisional│   │ 1. reserve  │
//!                    │ wait ready │   │ 2. hugepages│
//!                    │ reattach   │   └─────────────┘
//!                    └────────────┘          │
//!                          │                 ▼
//!                          └──────►  AttachedMemory  ◄── physaddr
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use hugeattach::{AttachConfig, Bootstrap};
//!
//! let memory = Bootstrap::new(AttachConfig::default()).run()?;
//! for seg in memory.segments() {
//!     println!("segment at {:#x}, {} bytes", seg.addr(), seg.len());
//! }
//! # Ok::<(), hugeattach::AttachError>(())
//! ```

pub mod error;
pub mod config;
pub mod layout;
pub mod mapping;
pub mod attach;
pub mod physaddr;
pub mod segments;
pub mod bootstrap;

#[cfg(feature = "c-api")]
pub mod ffi;

pub use error::{AttachError, MappedAt, Result};
pub use config::AttachConfig;
pub use attach::{ProvisionalConfig, SharedConfig, SpinWait};
pub use bootstrap::{AttachState, AttachedMemory, Bootstrap};
pub use layout::{HugepageRecord, HugepageTable, MemConfig, MemSeg, SegmentDescriptor};
pub use physaddr::{PhysAddrResolver, PhysAddrStats};
pub use segments::{reconstruct_segments, MappedSegment};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 3;
pub const VERSION_PATCH: u32 = 0;
