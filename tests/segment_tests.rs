//! Integration tests for segment reservation and hugepage remapping

mod common;

use std::path::Path;

use common::{address_space_lock, hugepage_size, is_unmapped, mapped_bytes, Fixture};
use hugeattach::{
    reconstruct_segments, segments::HugepageTableFile, segments::ReservedSegments, AttachError,
    ProvisionalConfig, SharedConfig,
};

fn relocate(fixture: &Fixture) -> SharedConfig {
    let provisional = ProvisionalConfig::attach(&fixture.config_path).unwrap();
    provisional.wait_ready();
    provisional.reattach().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_ranges_equal_declared_segments() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[3, 1, 2]);
        fixture.write();

        let shared = relocate(&fixture);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();

        assert_eq!(segments.len(), 3);
        let total: usize = segments.iter().map(|s| s.len()).sum();
        assert_eq!(total, fixture.total_len());

        for (mapped, plan) in segments.iter().zip(&fixture.segments) {
            assert_eq!(mapped.addr(), plan.addr);
            assert_eq!(mapped.len(), plan.len());
            assert_eq!(mapped.hugepage_count(), plan.hugepages);
            assert_eq!(mapped_bytes(plan.addr, plan.len()), plan.len());
        }

        // The gap after each segment stays free
        for plan in &fixture.segments {
            assert!(is_unmapped(plan.addr + plan.len(), 1));
        }

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
        assert!(fixture.nothing_mapped());
    }

    #[test]
    fn test_writes_reach_backing_files() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[2]);
        fixture.write();

        let shared = relocate(&fixture);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();
        let base = segments[0].addr();

        // Second hugepage of the segment is the second record's file
        unsafe { *((base + hugepage_size() + 5) as *mut u8) = 0xa5 };
        let bytes = std::fs::read(fixture.records[1].path()).unwrap();
        assert_eq!(bytes[5], 0xa5);

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_undershooting_records_is_hugepage_missing_and_unwinds() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[2, 3]);
        // Segment 1 loses its last hugepage
        fixture.records.pop();
        fixture.write();

        let shared = relocate(&fixture);
        let err = reconstruct_segments(&shared, &fixture.attach_config()).unwrap_err();
        assert!(matches!(err, AttachError::HugepageMissing { segment: 1, .. }));
        assert!(fixture.nothing_mapped());

        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_records_for_unknown_segments_are_ignored() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[1]);
        // Segment ids with no descriptor, pointing at files that do not exist
        fixture.add_record(7, 0);
        fixture.add_record(40, 0);
        for record in &fixture.records[1..] {
            std::fs::remove_file(record.path()).unwrap();
        }
        fixture.write();

        let shared = relocate(&fixture);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].hugepage_count(), 1);

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_records_past_segment_length_are_not_consumed() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[2, 1]);
        // A third record for segment 0 after it is already satisfied
        let extra = fixture.add_record(0, 2);
        std::fs::remove_file(extra).unwrap();
        fixture.write();

        let shared = relocate(&fixture);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();
        assert_eq!(segments[0].hugepage_count(), 2);
        assert_eq!(segments[1].hugepage_count(), 1);

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_interleaved_records_fill_segments_in_table_order() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[2, 2]);
        // Table order: seg0 p0, seg1 p0, seg0 p1, seg1 p1
        fixture.records.swap(1, 2);
        fixture.write();

        let shared = relocate(&fixture);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();
        let second_page = segments[0].addr() + hugepage_size();
        unsafe { *(second_page as *mut u8) = 0x3c };

        // records[2] is now segment 0's second hugepage
        let bytes = std::fs::read(fixture.records[2].path()).unwrap();
        assert_eq!(bytes[0], 0x3c);

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_missing_backing_file_unwinds_every_segment() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[1, 2, 1]);
        fixture.write();
        // Second hugepage of segment 1
        std::fs::remove_file(fixture.records[2].path()).unwrap();

        let shared = relocate(&fixture);
        let err = reconstruct_segments(&shared, &fixture.attach_config()).unwrap_err();
        assert!(matches!(err, AttachError::HugepageMissing { segment: 1, source: Some(_), .. }));
        assert!(fixture.nothing_mapped());

        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_denied_reservation_is_mismatch_and_retry_succeeds() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[1, 1, 1]);
        fixture.write();
        let shared = relocate(&fixture);

        // Something else already sits on segment 2
        let blocked = fixture.segments[2];
        let zero = std::fs::File::open("/dev/zero").unwrap();
        let squatter = hugeattach::mapping::map_at(
            blocked.addr,
            blocked.len(),
            hugeattach::mapping::Access::ReadOnly,
            hugeattach::mapping::Sharing::Private,
            &zero,
        )
        .unwrap();

        let err = ReservedSegments::reserve(&shared.segments(), Path::new("/dev/zero")).unwrap_err();
        assert!(matches!(err, AttachError::AddressMismatch { requested, .. } if requested == blocked.addr));
        assert!(is_unmapped(fixture.segments[0].addr, fixture.segments[0].len()));
        assert!(is_unmapped(fixture.segments[1].addr, fixture.segments[1].len()));
        assert_eq!(mapped_bytes(blocked.addr, blocked.len()), blocked.len());

        // Clean state: the same attempt now goes through
        drop(squatter);
        let segments = reconstruct_segments(&shared, &fixture.attach_config()).unwrap();
        assert_eq!(segments.len(), 3);

        for segment in segments {
            unsafe { segment.unmap() }.unwrap();
        }
        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_misplaced_hugepage_mapping_is_mismatch_and_unwinds() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[1, 1]);
        // Segment 1 is split at a sub-page offset, so its second piece can
        // never land at the requested address
        fixture.records[1].size = 100;
        fixture.add_record(1, 1);
        let last = fixture.records.len() - 1;
        fixture.records[last].size = (hugepage_size() - 100) as u64;
        fixture.write();

        let shared = relocate(&fixture);
        let err = reconstruct_segments(&shared, &fixture.attach_config()).unwrap_err();
        match err {
            AttachError::AddressMismatch { requested, .. } => {
                assert_eq!(requested, fixture.segments[1].addr + 100);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fixture.nothing_mapped());

        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_overrunning_record_is_invalid_layout() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[1]);
        fixture.records[0].size = 2 * hugepage_size() as u64;
        fixture.write();

        let shared = relocate(&fixture);
        let err = reconstruct_segments(&shared, &fixture.attach_config()).unwrap_err();
        assert!(matches!(err, AttachError::InvalidLayout { .. }));
        assert!(fixture.nothing_mapped());

        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_missing_table_file_releases_reservations() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[1, 1]);
        fixture.write();
        std::fs::remove_file(&fixture.table_path).unwrap();

        let shared = relocate(&fixture);
        let err = reconstruct_segments(&shared, &fixture.attach_config()).unwrap_err();
        assert!(matches!(err, AttachError::ConfigUnavailable { .. }));
        assert!(fixture.nothing_mapped());

        unsafe { shared.detach() }.unwrap();
    }

    #[test]
    fn test_table_file_counts_whole_records() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[2, 1]);
        fixture.write();

        let table_file = HugepageTableFile::open(&fixture.table_path).unwrap();
        let table = table_file.table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.indices_for(0).count(), 2);
        assert_eq!(table.indices_for(1).count(), 1);
    }
}
