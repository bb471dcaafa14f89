//! Bootstrap sequence of a secondary process
//!
//! ```text
//! Unattached ─► ProvisionalMapped ─► Ready ─► Relocated ─► SegmentsReserved ─► SegmentsMapped
//!      └──────────────┴─────────────────┴─────────┴───────────────┴──► Aborted
//! ```
//!
//! Every resource acquired by a failing attempt is released before
//! [`Bootstrap::run`] returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    attach::{ProvisionalConfig, SharedConfig},
    config::AttachConfig,
    error::{AttachError, Result},
    layout::{MemConfig, SegmentDescriptor},
    physaddr::PhysAddrResolver,
    segments::{HugepageTableFile, MappedSegment, ReservedSegments},
};

/// Progress of one attach attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachState {
    Unattached,
    ProvisionalMapped,
    Ready,
    Relocated,
    SegmentsReserved,
    SegmentsMapped,
    Aborted,
}

impl AttachState {
    /// Whether the attempt is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttachState::SegmentsMapped | AttachState::Aborted)
    }
}

impl std::fmt::Display for AttachState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttachState::Unattached => "unattached",
            AttachState::ProvisionalMapped => "provisional-mapped",
            AttachState::Ready => "ready",
            AttachState::Relocated => "relocated",
            AttachState::SegmentsReserved => "segments-reserved",
            AttachState::SegmentsMapped => "segments-mapped",
            AttachState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Drives one attach attempt and records how far it got
#[derive(Debug)]
pub struct Bootstrap {
    config: AttachConfig,
    state: AttachState,
    resolver: Arc<PhysAddrResolver>,
}

impl Bootstrap {
    pub fn new(config: AttachConfig) -> Self {
        let resolver = Arc::new(PhysAddrResolver::new(config.pagemap_path.clone()));
        Self::with_resolver(config, resolver)
    }

    /// Attach using a resolver shared with the caller
    ///
    /// A resolver that is already unavailable is not probed again.
    pub fn with_resolver(config: AttachConfig, resolver: Arc<PhysAddrResolver>) -> Self {
        Self {
            config,
            state: AttachState::Unattached,
            resolver,
        }
    }

    pub fn resolver(&self) -> &Arc<PhysAddrResolver> {
        &self.resolver
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    fn advance(&mut self, next: AttachState) {
        log::debug!("attach state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the whole sequence
    ///
    /// A fresh attempt may be started on the same value after a failure.
    pub fn run(&mut self) -> Result<AttachedMemory> {
        self.state = AttachState::Unattached;
        match self.run_steps() {
            Ok(memory) => Ok(memory),
            Err(e) => {
                log::error!("attach aborted in state {}: {}", self.state, e);
                self.advance(AttachState::Aborted);
                Err(e)
            }
        }
    }

    fn run_steps(&mut self) -> Result<AttachedMemory> {
        self.config.validate()?;
        log::info!("reconstructing the primary's memory layout");

        let resolver = Arc::clone(&self.resolver);
        if !resolver.is_available() || !resolver.probe() {
            log::warn!("physical addresses unavailable, continuing without them");
        }

        let provisional = ProvisionalConfig::attach(&self.config.config_path)?;
        self.advance(AttachState::ProvisionalMapped);

        provisional.wait_ready();
        self.advance(AttachState::Ready);

        let shared = provisional.reattach()?;
        self.advance(AttachState::Relocated);

        let descriptors = shared.segments();
        let reserved = match ReservedSegments::reserve(&descriptors, &self.config.zero_device) {
            Ok(reserved) => reserved,
            Err(e) => return Err(abandon(shared, e)),
        };
        self.advance(AttachState::SegmentsReserved);

        let mapped = HugepageTableFile::open(&self.config.hugepage_path)
            .and_then(|table_file| reserved.map_hugepages(&table_file));
        let segments = match mapped {
            Ok(segments) => segments,
            Err(e) => return Err(abandon(shared, e)),
        };
        self.advance(AttachState::SegmentsMapped);

        log::info!(
            "memory layout reconstructed: {} segments, {:#x} bytes",
            segments.len(),
            segments.iter().map(MappedSegment::len).sum::<usize>()
        );

        Ok(AttachedMemory {
            shared,
            segments,
            resolver,
        })
    }
}

/// Unmap the relocated config of an aborting attempt
fn abandon(shared: SharedConfig, err: AttachError) -> AttachError {
    // SAFETY: the attempt is aborting and no pointer into the config escaped it.
    if let Err(e) = unsafe { shared.detach() } {
        log::warn!("could not release shared config: {}", e);
    }
    err
}

/// Memory of the primary process, reconstructed in this process
///
/// Mappings persist for the life of the process unless
/// [`AttachedMemory::detach`] is called.
#[derive(Debug)]
pub struct AttachedMemory {
    shared: SharedConfig,
    segments: Vec<MappedSegment>,
    resolver: Arc<PhysAddrResolver>,
}

impl AttachedMemory {
    /// Run a bootstrap with `config`
    pub fn attach(config: AttachConfig) -> Result<Self> {
        Bootstrap::new(config).run()
    }

    pub fn shared(&self) -> &SharedConfig {
        &self.shared
    }

    pub fn mem_config(&self) -> &MemConfig {
        self.shared.config()
    }

    pub fn segments(&self) -> &[MappedSegment] {
        &self.segments
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segments.iter().map(MappedSegment::descriptor)
    }

    /// Total bytes mapped across all segments
    pub fn total_mapped(&self) -> usize {
        self.segments.iter().map(MappedSegment::len).sum()
    }

    /// Segment containing `addr`, if any
    pub fn segment_containing(&self, addr: usize) -> Option<&MappedSegment> {
        self.segments
            .iter()
            .find(|seg| addr >= seg.addr() && addr < seg.addr() + seg.len())
    }

    pub fn resolver(&self) -> &PhysAddrResolver {
        &self.resolver
    }

    /// Physical address backing `addr`
    pub fn virt_to_phys(&self, addr: usize) -> Result<u64> {
        self.resolver.virt_to_phys(addr)
    }

    /// Unmap every segment and the shared config
    ///
    /// Every mapping is released even if one fails; the first error is
    /// returned.
    ///
    /// # Safety
    /// No pointer into the reconstructed memory may be used afterwards.
    pub unsafe fn detach(self) -> Result<()> {
        let Self { shared, segments, .. } = self;
        release_all(
            segments
                .into_iter()
                .map(|segment| segment.unmap())
                .chain(std::iter::once_with(move || shared.detach())),
        )
    }
}

/// Run every release step, keeping the first failure
fn release_all(steps: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    let mut first_error = None;
    for outcome in steps {
        if let Err(e) = outcome {
            log::warn!("could not release mapping: {}", e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
