//! Shared fixtures for the integration tests
//!
//! A fixture plays the primary: it writes a shared config and a hugepage
//! table into a temp dir, backed by ordinary files instead of hugetlbfs.

#![allow(dead_code)]

use std::{
    fs::{self, File},
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use hugeattach::{
    layout::{HugepageRecord, MemConfig, MemSeg, MEM_CONFIG_SIZE, RTE_MAGIC},
    mapping::page_size,
    AttachConfig,
};
use tempfile::TempDir;

static ADDRESS_SPACE: Mutex<()> = Mutex::new(());

/// Serialise tests that pick free addresses and map at them
pub fn address_space_lock() -> MutexGuard<'static, ()> {
    ADDRESS_SPACE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Start of a currently unmapped range of `len` bytes
pub fn free_range(len: usize) -> usize {
    let probe = memmap2::MmapMut::map_anon(len).unwrap();
    probe.as_ptr() as usize
}

/// Bytes of `[addr, addr + len)` covered by any mapping of this process
pub fn mapped_bytes(addr: usize, len: usize) -> usize {
    let maps = fs::read_to_string("/proc/self/maps").unwrap();
    let end = addr + len;
    maps.lines()
        .filter_map(|line| {
            let range = line.split_whitespace().next()?;
            let (lo, hi) = range.split_once('-')?;
            Some((
                usize::from_str_radix(lo, 16).ok()?,
                usize::from_str_radix(hi, 16).ok()?,
            ))
        })
        .map(|(lo, hi)| hi.min(end).saturating_sub(lo.max(addr)))
        .sum()
}

pub fn is_unmapped(addr: usize, len: usize) -> bool {
    mapped_bytes(addr, len) == 0
}

/// Size of one fake hugepage
pub fn hugepage_size() -> usize {
    2 * page_size()
}

/// One segment of the fixture
#[derive(Debug, Clone, Copy)]
pub struct SegmentPlan {
    pub addr: usize,
    pub hugepages: usize,
}

impl SegmentPlan {
    pub fn len(&self) -> usize {
        self.hugepages * hugepage_size()
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub table_path: PathBuf,
    pub self_address: usize,
    pub segments: Vec<SegmentPlan>,
    pub records: Vec<HugepageRecord>,
    pub ready: bool,
}

impl Fixture {
    /// Segments of the given hugepage counts at free addresses, one page apart
    pub fn new(hugepages_per_segment: &[usize]) -> Self {
        let dir = TempDir::new().unwrap();
        let gap = page_size();
        let config_span = (MEM_CONFIG_SIZE + gap - 1) / gap * gap + gap;
        let total: usize = config_span
            + hugepages_per_segment
                .iter()
                .map(|n| n * hugepage_size() + gap)
                .sum::<usize>();
        // One hole for the config and every segment, so nothing picked here
        // overlaps anything else picked here
        let base = free_range(total);

        let mut segments = Vec::new();
        let mut addr = base + config_span;
        for &hugepages in hugepages_per_segment {
            segments.push(SegmentPlan { addr, hugepages });
            addr += hugepages * hugepage_size() + gap;
        }

        let mut fixture = Self {
            config_path: dir.path().join("config"),
            table_path: dir.path().join("hugepage_info"),
            dir,
            self_address: base,
            segments,
            records: Vec::new(),
            ready: true,
        };

        for index in 0..fixture.segments.len() {
            for page in 0..fixture.segments[index].hugepages {
                fixture.add_record(index, page);
            }
        }
        fixture
    }

    /// Back hugepage `page` of segment `segment` with a new file
    pub fn add_record(&mut self, segment: usize, page: usize) -> PathBuf {
        let path = self.dir.path().join(format!("rtemap_{}_{}", segment, page));
        let file = File::create(&path).unwrap();
        file.set_len(hugepage_size() as u64).unwrap();

        let va = self.segments.get(segment).map_or(0, |s| s.addr + page * hugepage_size());
        let record = HugepageRecord::new(&path, va as u64, hugepage_size() as u64, segment as i32)
            .unwrap()
            .with_ids(0, self.records.len() as i32);
        self.records.push(record);
        path
    }

    pub fn write(&self) {
        let mut config = MemConfig::new_boxed();
        config.magic = if self.ready { RTE_MAGIC } else { 0 };
        config.mem_cfg_addr = self.self_address as u64;
        for (index, seg) in self.segments.iter().enumerate() {
            config.set_segment(
                index,
                MemSeg::new(seg.addr as u64, 0, seg.len() as u64, hugepage_size() as u64, 0),
            );
        }
        fs::write(&self.config_path, config.as_bytes()).unwrap();

        let table: Vec<u8> = self
            .records
            .iter()
            .flat_map(|r| r.as_bytes().iter().copied())
            .collect();
        fs::write(&self.table_path, table).unwrap();
    }

    pub fn attach_config(&self) -> AttachConfig {
        AttachConfig::new()
            .with_config_path(&self.config_path)
            .with_hugepage_path(&self.table_path)
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(SegmentPlan::len).sum()
    }

    pub fn nothing_mapped(&self) -> bool {
        self.segments.iter().all(|s| is_unmapped(s.addr, s.len()))
    }
}
