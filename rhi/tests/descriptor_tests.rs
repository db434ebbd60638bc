//! Descriptor heap allocation through the full render backend.

mod common;

use std::collections::BTreeSet;

use rstest::rstest;

use common::{TestBackend, test_config};
use redlilium_rhi::{DescriptorHeapType, DescriptorSlot, GraphicsError};

/// Operation in an allocate/release script: `Some(n)` releases the n-th
/// live slot, `None` allocates.
type Step = Option<usize>;

fn live_indices(slots: &[DescriptorSlot]) -> BTreeSet<u32> {
    slots.iter().map(|slot| slot.index).collect()
}

#[rstest]
#[case::allocate_only(vec![None, None, None])]
#[case::release_first(vec![None, None, Some(0), None])]
#[case::release_middle(vec![None, None, None, Some(1), None, None])]
#[case::drain_and_refill(vec![None, None, Some(0), Some(0), None, None, None])]
fn test_in_use_set_tracks_live_allocations(#[case] script: Vec<Step>) {
    let mut t = TestBackend::new(test_config().with_heap_capacities(16, 4, 8));
    let heap_type = DescriptorHeapType::ShaderVisible;
    let mut live: Vec<DescriptorSlot> = Vec::new();

    for step in script {
        match step {
            None => live.push(t.backend.allocate_descriptor(heap_type).unwrap()),
            Some(n) => {
                let mut slot = live.remove(n);
                t.backend.release_descriptor(&mut slot).unwrap();
                assert!(!slot.is_valid());
            }
        }

        let heaps = t.backend.heaps();
        let in_use: BTreeSet<u32> = (0..heaps.capacity(heap_type))
            .filter(|&index| heaps.is_in_use(heap_type, index))
            .collect();
        assert_eq!(in_use, live_indices(&live));
        assert_eq!(heaps.used_count(heap_type), live.len() as u32);
    }
}

#[test]
fn test_released_slot_is_reused_first() {
    let mut t = TestBackend::new(test_config());
    let heap_type = DescriptorHeapType::ShaderVisible;

    let a = t.backend.allocate_descriptor(heap_type).unwrap();
    let mut b = t.backend.allocate_descriptor(heap_type).unwrap();
    let _c = t.backend.allocate_descriptor(heap_type).unwrap();
    t.backend.release_descriptor(&mut b).unwrap();

    let d = t.backend.allocate_descriptor(heap_type).unwrap();
    assert_eq!(d.index, b.index);
    assert_ne!(d.index, a.index);
    assert!(d.gpu_handle.is_some());
}

#[rstest]
#[case::shader_visible(DescriptorHeapType::ShaderVisible)]
#[case::depth_stencil(DescriptorHeapType::DepthStencil)]
#[case::render_target(DescriptorHeapType::RenderTarget)]
fn test_exhaustion_never_hands_out_overlapping_slots(#[case] heap_type: DescriptorHeapType) {
    let mut t = TestBackend::new(test_config().with_heap_capacities(6, 3, 5));
    // The presenter already holds its render-target and depth views.
    let available = t.backend.heaps().available_count(heap_type);
    let capacity = t.backend.heaps().capacity(heap_type);

    let mut seen = BTreeSet::new();
    for _ in 0..available {
        let slot = t.backend.allocate_descriptor(heap_type).unwrap();
        assert!(seen.insert(slot.index), "slot {} handed out twice", slot.index);
    }

    match t.backend.allocate_descriptor(heap_type) {
        Err(GraphicsError::DescriptorHeapExhausted {
            heap_type: exhausted,
            capacity: reported,
        }) => {
            assert_eq!(exhausted, heap_type);
            assert_eq!(reported, capacity);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(t.backend.heaps().available_count(heap_type), 0);

    // Still usable afterwards.
    t.run_frame(1);
}

#[test]
fn test_double_release_is_rejected() {
    let mut t = TestBackend::new(test_config());
    let mut slot = t
        .backend
        .allocate_descriptor(DescriptorHeapType::ShaderVisible)
        .unwrap();
    let mut copy = slot;
    t.backend.release_descriptor(&mut slot).unwrap();

    assert!(matches!(
        t.backend.release_descriptor(&mut copy),
        Err(GraphicsError::InvalidParameter(_))
    ));
}
