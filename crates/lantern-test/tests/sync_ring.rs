//! Frame ring construction, fence waits and teardown.

use lantern_gpu::{FrameRing, GpuError};
use lantern_test::{MockCall, MockDevice};

#[test]
fn empty_ring_is_rejected() {
    let device = MockDevice::new(800, 600);
    let err = FrameRing::new(&device, 0).err().expect("zero slots");
    assert!(matches!(err, GpuError::InvalidState(_)));
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn slots_are_distinct_and_start_signaled() {
    let device = MockDevice::new(800, 600);
    let mut ring = FrameRing::new(&device, 3).unwrap();
    assert_eq!(ring.len(), 3);

    let slots: Vec<_> = (0..3).map(|i| *ring.slot(i).unwrap()).collect();
    for (i, a) in slots.iter().enumerate() {
        assert!(device.is_fence_signaled(a.in_flight));
        assert_ne!(a.image_available, a.render_finished);
        for b in &slots[i + 1..] {
            assert_ne!(a.in_flight, b.in_flight);
            assert_ne!(a.command_buffer, b.command_buffer);
        }
    }
    assert!(ring.slot(3).is_err());

    unsafe { ring.destroy(&device) };
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn acquire_resets_fence_and_command_buffer() {
    let device = MockDevice::new(800, 600);
    let mut ring = FrameRing::new(&device, 2).unwrap();
    let slot = *ring.slot(1).unwrap();

    let cmd = ring.acquire(&device, 1).unwrap();
    assert_eq!(cmd, slot.command_buffer);
    assert!(!device.is_fence_signaled(slot.in_flight));
    assert!(device.calls().contains(&MockCall::ResetFence(slot.in_flight)));
    assert!(device
        .calls()
        .contains(&MockCall::ResetCommandBuffer(slot.command_buffer)));

    unsafe { ring.destroy(&device) };
}

#[test]
fn unsignaled_fence_times_out_with_its_slot() {
    let device = MockDevice::new(800, 600);
    let mut ring = FrameRing::with_fence_timeout(&device, 2, 1_000).unwrap();
    assert_eq!(ring.fence_timeout_ns(), 1_000);

    // Reset without a submission: nothing will signal it.
    ring.acquire(&device, 1).unwrap();
    let err = ring.wait(&device, 1).unwrap_err();
    assert!(matches!(err, GpuError::FenceTimeout { slot: 1 }));

    ring.wait(&device, 0).unwrap();
    unsafe { ring.destroy(&device) };
}

#[test]
fn destroy_is_idempotent() {
    let device = MockDevice::new(800, 600);
    let mut ring = FrameRing::new(&device, 2).unwrap();
    unsafe {
        ring.destroy(&device);
        ring.destroy(&device);
    }
    assert!(ring.is_empty());
    assert_eq!(
        device.count(|c| matches!(c, MockCall::DestroyFence(_))),
        2
    );
}
