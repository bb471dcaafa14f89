//! End-to-end tests of the bootstrap sequence

mod common;

use common::{address_space_lock, is_unmapped, mapped_bytes, Fixture};
use hugeattach::{layout::MEM_CONFIG_SIZE, AttachError, AttachState, Bootstrap};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_attach_reaches_segments_mapped() {
        let _lock = address_space_lock();
        let fixture = Fixture::new(&[2, 2]);
        fixture.write();

        let mut bootstrap = Bootstrap::new(fixture.attach_config());
        assert_eq!(bootstrap.state(), AttachState::Unattached);
        let memory = bootstrap.run().unwrap();
        assert_eq!(bootstrap.state(), AttachState::SegmentsMapped);
        assert!(bootstrap.state().is_terminal());

        assert_eq!(memory.shared().addr(), fixture.self_address);
        assert_eq!(memory.segments().len(), 2);
        assert_eq!(memory.total_mapped(), fixture.total_len());
        assert_eq!(memory.mem_config().segment_count(), 2);

        let inside = fixture.segments[1].addr + 10;
        let segment = memory.segment_containing(inside).unwrap();
        assert_eq!(segment.descriptor().index, 1);
        assert!(memory.segment_containing(fixture.self_address).is_none());

        unsafe { memory.detach() }.unwrap();
        assert!(fixture.nothing_mapped());
        assert!(is_unmapped(fixture.self_address, MEM_CONFIG_SIZE));
    }

    #[test]
    fn test_failed_attach_is_aborted_and_releases_config() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[1, 2]);
        fixture.records.pop();
        fixture.write();

        let mut bootstrap = Bootstrap::new(fixture.attach_config());
        let err = bootstrap.run().unwrap_err();
        assert!(matches!(err, AttachError::HugepageMissing { .. }));
        assert_eq!(bootstrap.state(), AttachState::Aborted);
        assert!(fixture.nothing_mapped());
        assert!(is_unmapped(fixture.self_address, MEM_CONFIG_SIZE));
    }

    #[test]
    fn test_retry_after_fixing_layout() {
        let _lock = address_space_lock();
        let mut fixture = Fixture::new(&[1]);
        let missing = fixture.records.pop().unwrap();
        fixture.write();

        let mut bootstrap = Bootstrap::new(fixture.attach_config());
        assert!(bootstrap.run().is_err());

        fixture.records.push(missing);
        fixture.write();
        let memory = bootstrap.run().unwrap();
        assert_eq!(bootstrap.state(), AttachState::SegmentsMapped);
        let seg = fixture.segments[0];
        assert_eq!(mapped_bytes(seg.addr, seg.len()), seg.len());

        unsafe { memory.detach() }.unwrap();
    }

    #[test]
    fn test_missing_config_aborts_before_mapping() {
        let config = hugeattach::AttachConfig::new()
            .with_config_path("/nonexistent/hugeattach/config")
            .with_hugepage_path("/nonexistent/hugeattach/table");
        let mut bootstrap = Bootstrap::new(config);
        assert!(matches!(bootstrap.run(), Err(AttachError::ConfigUnavailable { .. })));
        assert_eq!(bootstrap.state(), AttachState::Aborted);
    }
}
