use std::sync::Arc;

use npheap::{Command, Device, DeviceConfig, ErrorKind, ExposureTable, MappingRequest, Reply};
use npheap_testkit::{CountingAllocator, FailingAllocator, RejectingAddressSpace, page_size};

fn counting_device() -> (Device, CountingAllocator) {
    let allocator = CountingAllocator::new();
    let device = Device::with_allocator(DeviceConfig::default(), Arc::new(allocator.clone())).unwrap();
    (device, allocator)
}

fn size_of(device: &Device, key: u64) -> u64 {
    match device.handle_control(Command::GetSize(key)).unwrap() {
        Reply::Size(size) => size,
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn test_map_getsize_delete_lock_scenario() {
    let p = page_size();
    let (device, _) = counting_device();
    let space = ExposureTable::new(p);

    device
        .handle_mapping(&space, &MappingRequest::new(5, p, 16 * p))
        .unwrap();
    assert_eq!(size_of(&device, 5), p);

    // A larger second mapping does not resize the object; the host rejects
    // exposing more than the object holds.
    let second = device.handle_mapping(&space, &MappingRequest::new(5, 2 * p, 32 * p));
    assert!(matches!(
        second.unwrap_err().kind(),
        ErrorKind::ExposureFailed { key: 5, .. }
    ));
    assert_eq!(size_of(&device, 5), p);

    device.handle_control(Command::Delete(5)).unwrap();
    assert_eq!(size_of(&device, 5), 0);

    assert_eq!(device.handle_control(Command::Lock(7)).unwrap(), Reply::Done);
    assert_eq!(size_of(&device, 7), 0);
    device.handle_control(Command::Unlock(7)).unwrap();
}

#[test]
fn test_repeated_mapping_allocates_once() {
    let p = page_size();
    let (device, allocator) = counting_device();
    let space = ExposureTable::new(p);

    let first = device
        .handle_mapping(&space, &MappingRequest::new(1, 2 * p, 16 * p))
        .unwrap();
    let second = device
        .handle_mapping(&space, &MappingRequest::new(1, 2 * p, 32 * p))
        .unwrap();
    assert!(first.allocated);
    assert!(!second.allocated);
    assert_eq!(second.size, 2 * p);
    assert_eq!(allocator.allocations(), 1);

    // Both ranges are backed by the same pages.
    let (a, _) = space.resolve(16 * p).unwrap();
    let (b, _) = space.resolve(32 * p).unwrap();
    assert!(a.same_buffer(&b));
}

#[test]
fn test_processes_share_object_contents() {
    let p = page_size();
    let (device, _) = counting_device();
    let writer = ExposureTable::new(p);
    let reader = ExposureTable::new(p);

    device
        .handle_mapping(&writer, &MappingRequest::new(3, p, 64 * p))
        .unwrap();
    device
        .handle_mapping(&reader, &MappingRequest::new(3, p, 144 * p))
        .unwrap();

    device.handle_control(Command::Lock(3)).unwrap();
    let (storage, offset) = writer.resolve(64 * p + 0x10).unwrap();
    unsafe { storage.write_at(offset, b"shared") };
    device.handle_control(Command::Unlock(3)).unwrap();

    device.handle_control(Command::Lock(3)).unwrap();
    let (storage, offset) = reader.resolve(144 * p + 0x10).unwrap();
    let mut out = [0u8; 6];
    unsafe { storage.read_at(offset, &mut out) };
    device.handle_control(Command::Unlock(3)).unwrap();
    assert_eq!(&out, b"shared");
}

#[test]
fn test_mapping_after_delete_starts_zeroed() {
    let p = page_size();
    let (device, allocator) = counting_device();
    let space = ExposureTable::new(p);

    device
        .handle_mapping(&space, &MappingRequest::new(8, p, 0))
        .unwrap();
    let (storage, _) = space.resolve(0).unwrap();
    unsafe { storage.write_at(0, &[0xAA; 16]) };
    drop(storage);

    device.handle_control(Command::Delete(8)).unwrap();
    space.clear();
    assert_eq!(allocator.live(), 0);

    let remap = device
        .handle_mapping(&space, &MappingRequest::new(8, p, 0))
        .unwrap();
    assert!(remap.allocated);
    let (storage, _) = space.resolve(0).unwrap();
    let mut out = [0xFFu8; 16];
    unsafe { storage.read_at(0, &mut out) };
    assert_eq!(out, [0u8; 16]);
}

#[test]
fn test_unlock_of_unknown_key_leaves_others_untouched() {
    let p = page_size();
    let (device, _) = counting_device();
    let space = ExposureTable::new(p);
    device
        .handle_mapping(&space, &MappingRequest::new(1, p, 0))
        .unwrap();
    device.handle_control(Command::Lock(1)).unwrap();
    let before = device.registry().snapshot();

    let err = device.handle_control(Command::Unlock(99)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotFound { key: 99 }));
    assert!(device.registry().find(99).is_none());
    assert_eq!(device.registry().snapshot(), before);
}

#[test]
fn test_allocation_failure_is_retryable() {
    let p = page_size();
    let allocator = Arc::new(FailingAllocator::new(true));
    let device = Device::with_allocator(DeviceConfig::default(), allocator.clone()).unwrap();
    let space = ExposureTable::new(p);
    let request = MappingRequest::new(4, p, 0);

    let err = device.handle_mapping(&space, &request).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::AllocationFailed { key: 4, .. }));
    assert!(err.is_retryable());
    assert_eq!(size_of(&device, 4), 0);
    assert!(space.is_empty());

    allocator.set_failing(false);
    let mapping = device.handle_mapping(&space, &request).unwrap();
    assert!(mapping.allocated);
    assert_eq!(size_of(&device, 4), p);
}

#[test]
fn test_exposure_failure_retains_storage() {
    let p = page_size();
    let (device, allocator) = counting_device();
    let rejecting = RejectingAddressSpace::new();

    let err = device
        .handle_mapping(&rejecting, &MappingRequest::new(6, p, 0))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ExposureFailed { key: 6, .. }));
    assert_eq!(rejecting.attempts(), 1);
    assert_eq!(size_of(&device, 6), p);
    assert_eq!(allocator.live(), 1);

    let space = ExposureTable::new(p);
    let mapping = device
        .handle_mapping(&space, &MappingRequest::new(6, p, 0))
        .unwrap();
    assert!(!mapping.allocated);
    assert_eq!(allocator.allocations(), 1);
}

#[test]
fn test_teardown_frees_everything() {
    let p = page_size();
    let (device, allocator) = counting_device();
    let space = ExposureTable::new(p);
    for key in 0..10u64 {
        device
            .handle_mapping(&space, &MappingRequest::new(key, (key + 1) * p, key * 16 * p))
            .unwrap();
    }
    device.handle_control(Command::Lock(100)).unwrap();
    device.handle_control(Command::Delete(3)).unwrap();
    assert_eq!(allocator.allocations(), 10);

    let registry_keys = device.registry().keys();
    assert_eq!(registry_keys.len(), 11);

    let report = device.shutdown();
    assert_eq!(report.objects, 11);
    // Nothing is freed while exposures are still in place.
    assert_eq!(allocator.live(), 10);
    space.clear();
    assert_eq!(allocator.frees(), allocator.allocations());
}

#[test]
fn test_drained_registry_finds_nothing() {
    let mut registry = npheap::Registry::new();
    let allocator = CountingAllocator::new();
    registry
        .get_or_insert(1)
        .ensure_storage(page_size(), &allocator)
        .unwrap();
    registry.get_or_insert(2);

    let report = registry.drain_all();
    assert_eq!(report.objects, 2);
    assert_eq!(report.bytes_freed, page_size());
    assert!(registry.find(1).is_none());
    assert!(registry.find(2).is_none());
    assert!(registry.is_empty());
    assert_eq!(allocator.live(), 0);
}
