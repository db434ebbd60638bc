//! Descriptor heap slot allocation.
//!
//! The [`DescriptorHeapManager`] owns three independently sized heaps and
//! hands out fixed-stride slots from them:
//!
//! | Heap | Holds | GPU handle |
//! |------|-------|------------|
//! | render-target | back buffer and offscreen color views | no |
//! | depth-stencil | depth views | no |
//! | shader-visible | constant buffer, SRV and UAV views | yes |
//!
//! # Allocation
//!
//! Each pool is a bump pointer plus a min-ordered free set. Allocation takes
//! the lowest released index if there is one, otherwise the next never-used
//! index. Released slots are never compacted, so a slot's handles stay valid
//! for as long as its owner holds the index.
//!
//! ```text
//! capacity 6, allocate ×4, release 1:
//!
//! index:   0    1    2    3    4    5
//!        [use][free][use][use][    ][    ]
//!               ▲               ▲
//!        free set {1}      bump pointer
//!
//! next allocate → 1, then 4, then 5, then exhausted
//! ```
//!
//! # Thread Safety
//!
//! Not internally synchronized: every mutating method takes `&mut self`.
//! Callers that allocate from several threads must wrap the manager in a mutex.

use std::collections::BTreeSet;

use crate::backend::{CpuDescriptorHandle, GpuDescriptorHandle, GpuDescriptorHeap};
use crate::config::RendererConfig;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, OrFatal};
use crate::types::DescriptorHeapType;

/// One allocated descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    /// Heap the slot belongs to.
    pub heap_type: DescriptorHeapType,
    /// Index within the heap.
    pub index: u32,
    /// CPU handle (`base + index * increment`).
    pub cpu_handle: CpuDescriptorHandle,
    /// GPU handle, for shader-visible slots only.
    pub gpu_handle: Option<GpuDescriptorHandle>,
    /// Whether the slot is live.
    pub in_use: bool,
}

impl DescriptorSlot {
    /// Returns true for a live slot.
    pub fn is_valid(&self) -> bool {
        self.in_use
    }
}

/// A single heap and its free-slot bookkeeping.
#[derive(Debug)]
struct DescriptorPool {
    heap: GpuDescriptorHeap,
    next_unused: u32,
    free: BTreeSet<u32>,
    in_use: Vec<bool>,
}

impl DescriptorPool {
    fn new(heap: GpuDescriptorHeap) -> Self {
        let capacity = heap.capacity as usize;
        Self {
            heap,
            next_unused: 0,
            free: BTreeSet::new(),
            in_use: vec![false; capacity],
        }
    }

    fn capacity(&self) -> u32 {
        self.heap.capacity
    }

    fn used(&self) -> u32 {
        self.next_unused - self.free.len() as u32
    }

    fn take(&mut self) -> Option<u32> {
        let index = match self.free.pop_first() {
            Some(index) => index,
            None if self.next_unused < self.capacity() => {
                self.next_unused += 1;
                self.next_unused - 1
            }
            None => return None,
        };
        self.in_use[index as usize] = true;
        Some(index)
    }

    fn slot(&self, index: u32) -> DescriptorSlot {
        DescriptorSlot {
            heap_type: self.heap.heap_type,
            index,
            cpu_handle: self.heap.cpu_start.offset(index, self.heap.increment),
            gpu_handle: self
                .heap
                .gpu_start
                .map(|start| start.offset(index, self.heap.increment)),
            in_use: true,
        }
    }
}

/// Allocator for render-target, depth-stencil and shader-visible descriptors.
#[derive(Debug)]
pub struct DescriptorHeapManager {
    pools: [DescriptorPool; 3],
}

impl DescriptorHeapManager {
    /// Create the three heaps with the capacities from `config`.
    ///
    /// # Panics
    ///
    /// Heap creation failure is fatal.
    pub fn new(device: &GraphicsDevice, config: &RendererConfig) -> Self {
        let pools = DescriptorHeapType::ALL.map(|heap_type| {
            let capacity = config.heap_capacity(heap_type);
            let heap = device
                .raw()
                .create_descriptor_heap(heap_type, capacity)
                .or_fatal("descriptor heap creation");
            log::debug!("Created {heap_type:?} descriptor heap ({capacity} slots)");
            DescriptorPool::new(heap)
        });
        Self { pools }
    }

    fn pool(&self, heap_type: DescriptorHeapType) -> &DescriptorPool {
        &self.pools[heap_type.index()]
    }

    fn pool_mut(&mut self, heap_type: DescriptorHeapType) -> &mut DescriptorPool {
        &mut self.pools[heap_type.index()]
    }

    /// Allocate the lowest free slot of `heap_type`.
    ///
    /// Exhaustion is recoverable: the caller should skip whatever needed the
    /// slot.
    pub fn allocate(
        &mut self,
        heap_type: DescriptorHeapType,
    ) -> Result<DescriptorSlot, GraphicsError> {
        let pool = self.pool_mut(heap_type);
        match pool.take() {
            Some(index) => {
                log::trace!("Allocated {heap_type:?} descriptor {index}");
                Ok(pool.slot(index))
            }
            None => {
                let capacity = pool.capacity();
                log::warn!("{heap_type:?} descriptor heap exhausted ({capacity} slots in use)");
                Err(GraphicsError::DescriptorHeapExhausted {
                    heap_type,
                    capacity,
                })
            }
        }
    }

    /// Return a slot to its heap.
    ///
    /// Releasing an index that isn't live is an error; the heap is left
    /// untouched.
    pub fn release(
        &mut self,
        heap_type: DescriptorHeapType,
        index: u32,
    ) -> Result<(), GraphicsError> {
        let pool = self.pool_mut(heap_type);
        if index >= pool.capacity() {
            log::error!(
                "Release of {heap_type:?} descriptor {index} past capacity {}",
                pool.capacity()
            );
            return Err(GraphicsError::InvalidParameter(format!(
                "{heap_type:?} descriptor {index} is out of range"
            )));
        }
        if !pool.in_use[index as usize] {
            log::error!("Double release of {heap_type:?} descriptor {index}");
            return Err(GraphicsError::InvalidParameter(format!(
                "{heap_type:?} descriptor {index} is not in use"
            )));
        }

        pool.in_use[index as usize] = false;
        pool.free.insert(index);
        log::trace!("Released {heap_type:?} descriptor {index}");
        Ok(())
    }

    /// Release a slot previously returned by [`DescriptorHeapManager::allocate`].
    pub fn release_slot(&mut self, slot: &mut DescriptorSlot) -> Result<(), GraphicsError> {
        self.release(slot.heap_type, slot.index)?;
        slot.in_use = false;
        Ok(())
    }

    /// Slots of `heap_type` that can still be allocated.
    pub fn available_count(&self, heap_type: DescriptorHeapType) -> u32 {
        let pool = self.pool(heap_type);
        pool.capacity() - pool.used()
    }

    /// Slots of `heap_type` currently live.
    pub fn used_count(&self, heap_type: DescriptorHeapType) -> u32 {
        self.pool(heap_type).used()
    }

    /// Declared capacity of `heap_type`.
    pub fn capacity(&self, heap_type: DescriptorHeapType) -> u32 {
        self.pool(heap_type).capacity()
    }

    /// Whether slot `index` of `heap_type` is live.
    pub fn is_in_use(&self, heap_type: DescriptorHeapType, index: u32) -> bool {
        self.pool(heap_type)
            .in_use
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    /// The heap bound for shader access during a frame.
    pub fn shader_visible_heap(&self) -> &GpuDescriptorHeap {
        &self.pool(DescriptorHeapType::ShaderVisible).heap
    }

    /// Backend heap of `heap_type`.
    pub fn heap(&self, heap_type: DescriptorHeapType) -> &GpuDescriptorHeap {
        &self.pool(heap_type).heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyInstance;

    fn manager(rtv: u32, dsv: u32, srv: u32) -> DescriptorHeapManager {
        let instance = DummyInstance::new();
        let config = RendererConfig::default().with_heap_capacities(rtv.max(2), dsv, srv);
        let device = GraphicsDevice::initialize(&instance, &config);
        let config = config.with_heap_capacities(rtv, dsv, srv);
        DescriptorHeapManager::new(&device, &config)
    }

    #[test]
    fn test_lowest_free_index_first() {
        let mut heaps = manager(4, 1, 4);
        let a = heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        let b = heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        let c = heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));

        heaps.release(DescriptorHeapType::RenderTarget, 1).unwrap();
        heaps.release(DescriptorHeapType::RenderTarget, 0).unwrap();
        assert_eq!(heaps.allocate(DescriptorHeapType::RenderTarget).unwrap().index, 0);
        assert_eq!(heaps.allocate(DescriptorHeapType::RenderTarget).unwrap().index, 1);
        assert_eq!(heaps.allocate(DescriptorHeapType::RenderTarget).unwrap().index, 3);
    }

    #[test]
    fn test_handles_follow_increment() {
        let mut heaps = manager(4, 1, 4);
        let heap = heaps.heap(DescriptorHeapType::ShaderVisible);
        let (cpu_start, gpu_start, increment) = (heap.cpu_start, heap.gpu_start, heap.increment);

        heaps.allocate(DescriptorHeapType::ShaderVisible).unwrap();
        let slot = heaps.allocate(DescriptorHeapType::ShaderVisible).unwrap();
        assert_eq!(slot.cpu_handle, cpu_start.offset(1, increment));
        assert_eq!(slot.gpu_handle, gpu_start.map(|g| g.offset(1, increment)));

        let rtv = heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        assert!(rtv.gpu_handle.is_none());
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let mut heaps = manager(4, 1, 4);
        assert!(heaps.allocate(DescriptorHeapType::DepthStencil).is_ok());
        let err = heaps.allocate(DescriptorHeapType::DepthStencil).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::DescriptorHeapExhausted {
                heap_type: DescriptorHeapType::DepthStencil,
                capacity: 1
            }
        );
        assert_eq!(heaps.available_count(DescriptorHeapType::DepthStencil), 0);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut heaps = manager(4, 1, 4);
        let mut slot = heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        heaps.release_slot(&mut slot).unwrap();
        assert!(!slot.is_valid());
        assert!(heaps.release(DescriptorHeapType::RenderTarget, slot.index).is_err());
        assert!(heaps.release(DescriptorHeapType::RenderTarget, 99).is_err());
        assert_eq!(heaps.used_count(DescriptorHeapType::RenderTarget), 0);
    }

    #[test]
    fn test_pools_are_independent() {
        let mut heaps = manager(4, 2, 4);
        heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        heaps.allocate(DescriptorHeapType::RenderTarget).unwrap();
        assert_eq!(heaps.used_count(DescriptorHeapType::RenderTarget), 2);
        assert_eq!(heaps.used_count(DescriptorHeapType::DepthStencil), 0);
        assert_eq!(heaps.available_count(DescriptorHeapType::ShaderVisible), 4);
    }
}
