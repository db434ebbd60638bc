//! Dummy GPU backend for testing and headless runs.
//!
//! This backend doesn't touch real hardware. It simulates the parts of an
//! explicit API the frontend relies on:
//!
//! - adapters with configurable type and maximum feature level
//! - monotonic fences, completed either immediately or by the test through a
//!   [`DummyController`]
//! - resource state tracking, with barrier and present validation
//! - a log of every command executed on the queue
//! - call counters and injectable pipeline-creation failures

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType, FeatureLevel};
use crate::root_signature::RootSignatureDesc;
use crate::swapchain::{SurfaceHandle, SwapchainDescriptor};
use crate::types::{
    DescriptorHeapType, Extent2d, ResourceState, ScissorRect, TextureDescriptor, TextureFormat,
    Viewport,
};

use super::{
    CpuDescriptorHandle, GpuCommand, GpuCommandAllocator, GpuCommandList, GpuDescriptorHandle,
    GpuDescriptorHeap, GpuDevice, GpuFence, GpuInstance, GpuPipeline, GpuQueue, GpuResource,
    GpuRootSignature, GpuSwapchain, GraphicsPipelineDesc, RawDescriptorHeap,
};

// ============================================================================
// Recorded commands
// ============================================================================

/// Owned copy of a command, as recorded into a dummy command list.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Resource state transition.
    Barrier {
        /// Resource identity.
        resource: u64,
        /// State before.
        before: ResourceState,
        /// State after.
        after: ResourceState,
    },
    /// Output target binding.
    SetRenderTargets {
        /// Color view.
        color: CpuDescriptorHandle,
        /// Depth view.
        depth: Option<CpuDescriptorHandle>,
    },
    /// Color clear.
    ClearRenderTarget {
        /// Cleared view.
        view: CpuDescriptorHandle,
        /// Clear color.
        color: [f32; 4],
    },
    /// Depth-stencil clear.
    ClearDepthStencil {
        /// Cleared view.
        view: CpuDescriptorHandle,
        /// Depth value.
        depth: f32,
        /// Stencil value.
        stencil: u8,
    },
    /// Descriptor heap binding.
    SetDescriptorHeap {
        /// Heap identity.
        heap: u64,
    },
    /// Viewport.
    SetViewport(Viewport),
    /// Scissor rectangle.
    SetScissor(ScissorRect),
    /// Binding layout.
    SetRootSignature {
        /// Layout identity.
        id: u64,
    },
    /// Pipeline.
    SetPipeline {
        /// Pipeline identity.
        id: u64,
    },
    /// Draw call.
    Draw {
        /// Vertex count.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
    },
}

/// Command list state for the dummy backend.
#[derive(Debug)]
pub struct DummyCommandList {
    id: u64,
    allocator: u64,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

impl DummyCommandList {
    /// List identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the list is open for recording.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Commands recorded since the last reset.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }
}

// ============================================================================
// Fence
// ============================================================================

/// A simulated monotonic fence.
///
/// The queue "signals" by raising the pending value; the simulated GPU
/// "completes" by copying pending into completed and waking waiters.
#[derive(Debug)]
pub struct DummyFence {
    completed: Mutex<u64>,
    pending: AtomicU64,
    condvar: Condvar,
}

impl DummyFence {
    fn new(initial_value: u64) -> Self {
        Self {
            completed: Mutex::new(initial_value),
            pending: AtomicU64::new(initial_value),
            condvar: Condvar::new(),
        }
    }

    /// Last completed value.
    pub fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    /// Highest value signaled on the queue.
    pub fn pending_value(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    fn signal(&self, value: u64) {
        self.pending.fetch_max(value, Ordering::AcqRel);
    }

    fn complete_pending(&self) {
        let pending = self.pending.load(Ordering::Acquire);
        let mut completed = self.completed.lock();
        if pending > *completed {
            *completed = pending;
            self.condvar.notify_all();
        }
    }

    fn wait(&self, value: u64) {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.condvar.wait(&mut completed);
        }
    }
}

// ============================================================================
// Swapchain
// ============================================================================

/// Simulated swapchain.
#[derive(Debug)]
pub struct DummySwapchain {
    buffers: Vec<u64>,
    current: u32,
    format: TextureFormat,
    extent: Extent2d,
}

// ============================================================================
// Shared state and controller
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ViewEntry {
    resource: u64,
    heap_type: DescriptorHeapType,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: AtomicU64,
    manual_completion: AtomicBool,
    fail_pipeline_creation: AtomicBool,
    fail_root_signature_creation: AtomicBool,
    fail_device_at: Mutex<Option<FeatureLevel>>,
    device_attempts: Mutex<Vec<(String, FeatureLevel)>>,
    root_signature_creations: AtomicU64,
    pipeline_creations: AtomicU64,
    fence_waits: AtomicU64,
    submissions: AtomicU64,
    presents: AtomicU64,
    fences: Mutex<Vec<Weak<DummyFence>>>,
    resource_states: Mutex<HashMap<u64, ResourceState>>,
    views: Mutex<HashMap<u64, ViewEntry>>,
    executed: Mutex<Vec<RecordedCommand>>,
    validation_errors: Mutex<Vec<String>>,
    input_semantics: Mutex<Vec<Vec<String>>>,
}

impl DummyState {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn validation_error(&self, message: String) {
        log::error!("[Dummy Validation] {message}");
        self.validation_errors.lock().push(message);
    }

    fn complete_all(&self) {
        let mut fences = self.fences.lock();
        fences.retain(|fence| fence.strong_count() > 0);
        for fence in fences.iter().filter_map(Weak::upgrade) {
            fence.complete_pending();
        }
    }
}

/// Test-side view of the simulated GPU.
///
/// Obtained from [`DummyInstance::controller`]; shares state with every device
/// created by that instance.
#[derive(Debug, Clone)]
pub struct DummyController {
    state: Arc<DummyState>,
}

impl DummyController {
    /// Stop completing fence values at signal time.
    ///
    /// Signaled values stay pending until [`DummyController::complete_all`].
    pub fn set_manual_completion(&self, manual: bool) {
        self.state.manual_completion.store(manual, Ordering::Release);
        if !manual {
            self.state.complete_all();
        }
    }

    /// Let the simulated GPU catch up with every signaled value.
    pub fn complete_all(&self) {
        self.state.complete_all();
    }

    /// Spawn a simulated GPU thread that calls [`complete_all`] once the
    /// device has seen `waits` fence waits in total.
    ///
    /// [`complete_all`]: Self::complete_all
    pub fn complete_on_wait(&self, waits: u64) -> std::thread::JoinHandle<()> {
        let controller = self.clone();
        std::thread::spawn(move || {
            while controller.fence_waits() < waits {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            controller.complete_all();
        })
    }

    /// Make subsequent pipeline creations fail.
    pub fn set_fail_pipeline_creation(&self, fail: bool) {
        self.state
            .fail_pipeline_creation
            .store(fail, Ordering::Release);
    }

    /// Make subsequent binding layout creations fail.
    pub fn set_fail_root_signature_creation(&self, fail: bool) {
        self.state
            .fail_root_signature_creation
            .store(fail, Ordering::Release);
    }

    /// Reject device creation at `level` even on adapters that support it.
    pub fn set_fail_device_at(&self, level: Option<FeatureLevel>) {
        *self.state.fail_device_at.lock() = level;
    }

    /// Every `(adapter name, level)` device creation attempted so far.
    pub fn device_attempts(&self) -> Vec<(String, FeatureLevel)> {
        self.state.device_attempts.lock().clone()
    }

    /// Number of binding layouts created.
    pub fn root_signature_creations(&self) -> u64 {
        self.state.root_signature_creations.load(Ordering::Acquire)
    }

    /// Number of device-level pipeline compiles requested.
    pub fn pipeline_creations(&self) -> u64 {
        self.state.pipeline_creations.load(Ordering::Acquire)
    }

    /// Number of blocking fence waits.
    pub fn fence_waits(&self) -> u64 {
        self.state.fence_waits.load(Ordering::Acquire)
    }

    /// Number of command lists executed.
    pub fn submissions(&self) -> u64 {
        self.state.submissions.load(Ordering::Acquire)
    }

    /// Number of presents.
    pub fn presents(&self) -> u64 {
        self.state.presents.load(Ordering::Acquire)
    }

    /// Current tracked state of a dummy resource.
    pub fn resource_state(&self, resource: &GpuResource) -> Option<ResourceState> {
        match resource {
            GpuResource::Dummy { id, .. } => self.state.resource_states.lock().get(id).copied(),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Every command executed on the queue, in order.
    pub fn executed_commands(&self) -> Vec<RecordedCommand> {
        self.state.executed.lock().clone()
    }

    /// Forget the executed command log.
    pub fn clear_executed_commands(&self) {
        self.state.executed.lock().clear();
    }

    /// Validation errors raised so far.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.validation_errors.lock().clone()
    }

    /// Semantic names seen by each pipeline creation, in order.
    pub fn pipeline_input_semantics(&self) -> Vec<Vec<String>> {
        self.state.input_semantics.lock().clone()
    }
}

// ============================================================================
// Instance
// ============================================================================

/// Dummy API instance.
#[derive(Debug)]
pub struct DummyInstance {
    adapters: Vec<AdapterInfo>,
    state: Arc<DummyState>,
}

impl Default for DummyInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyInstance {
    /// Create an instance exposing one discrete adapter at the newest level.
    pub fn new() -> Self {
        Self::with_adapters(vec![Self::adapter(
            "Dummy Adapter",
            AdapterType::Discrete,
            FeatureLevel::V1_3,
        )])
    }

    /// Create an instance exposing the given adapters.
    ///
    /// Adapter indices are reassigned to their position in `adapters`.
    pub fn with_adapters(mut adapters: Vec<AdapterInfo>) -> Self {
        for (index, adapter) in adapters.iter_mut().enumerate() {
            adapter.index = index;
        }
        Self {
            adapters,
            state: Arc::new(DummyState::default()),
        }
    }

    /// Describe a simulated adapter.
    pub fn adapter(
        name: &str,
        device_type: AdapterType,
        max_feature_level: FeatureLevel,
    ) -> AdapterInfo {
        let dedicated_memory = match device_type {
            AdapterType::Discrete => 8 << 30,
            AdapterType::Integrated => 512 << 20,
            _ => 0,
        };
        AdapterInfo {
            index: 0,
            name: name.to_string(),
            vendor_id: 0,
            device_id: 0,
            device_type,
            dedicated_memory,
            max_feature_level,
        }
    }

    /// Handle for inspecting and steering the simulated GPU.
    pub fn controller(&self) -> DummyController {
        DummyController {
            state: self.state.clone(),
        }
    }
}

impl GpuInstance for DummyInstance {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GraphicsError> {
        Ok(self.adapters.clone())
    }

    fn create_device(
        &self,
        adapter: &AdapterInfo,
        level: FeatureLevel,
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError> {
        self.state
            .device_attempts
            .lock()
            .push((adapter.name.clone(), level));

        if !adapter.supports(level) {
            return Err(GraphicsError::DeviceCreationFailed(format!(
                "adapter '{}' tops out at feature level {}",
                adapter.name, adapter.max_feature_level
            )));
        }
        if *self.state.fail_device_at.lock() == Some(level) {
            return Err(GraphicsError::DeviceCreationFailed(format!(
                "'{}' refused feature level {level}",
                adapter.name
            )));
        }

        log::trace!("DummyInstance: created device on '{}' at {level}", adapter.name);
        Ok(Arc::new(DummyDevice {
            state: self.state.clone(),
        }))
    }
}

// ============================================================================
// Device
// ============================================================================

/// Dummy logical device.
#[derive(Debug)]
pub struct DummyDevice {
    state: Arc<DummyState>,
}

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the dummy backend"))
}

fn heap_increment(heap_type: DescriptorHeapType) -> u64 {
    match heap_type {
        DescriptorHeapType::RenderTarget => 32,
        DescriptorHeapType::DepthStencil => 8,
        DescriptorHeapType::ShaderVisible => 32,
    }
}

impl DummyDevice {
    fn record(&self, command: &GpuCommand<'_>) -> Option<RecordedCommand> {
        Some(match *command {
            GpuCommand::Barrier {
                resource,
                before,
                after,
            } => match resource {
                GpuResource::Dummy { id, .. } => RecordedCommand::Barrier {
                    resource: *id,
                    before,
                    after,
                },
                #[allow(unreachable_patterns)]
                _ => return None,
            },
            GpuCommand::SetRenderTargets { color, depth } => {
                RecordedCommand::SetRenderTargets { color, depth }
            }
            GpuCommand::ClearRenderTarget { view, color } => {
                RecordedCommand::ClearRenderTarget { view, color }
            }
            GpuCommand::ClearDepthStencil {
                view,
                depth,
                stencil,
            } => RecordedCommand::ClearDepthStencil {
                view,
                depth,
                stencil,
            },
            GpuCommand::SetDescriptorHeap(heap) => match &heap.raw {
                RawDescriptorHeap::Dummy { id } => RecordedCommand::SetDescriptorHeap { heap: *id },
                #[allow(unreachable_patterns)]
                _ => return None,
            },
            GpuCommand::SetViewport(viewport) => RecordedCommand::SetViewport(viewport),
            GpuCommand::SetScissor(rect) => RecordedCommand::SetScissor(rect),
            GpuCommand::SetRootSignature(layout) => match layout {
                GpuRootSignature::Dummy { id } => RecordedCommand::SetRootSignature { id: *id },
                #[allow(unreachable_patterns)]
                _ => return None,
            },
            GpuCommand::SetPipeline(pipeline) => match pipeline {
                GpuPipeline::Dummy { id } => RecordedCommand::SetPipeline { id: *id },
                #[allow(unreachable_patterns)]
                _ => return None,
            },
            GpuCommand::Draw {
                vertex_count,
                instance_count,
                ..
            } => RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        })
    }

    /// Replay one command against the tracked resource states.
    fn execute(&self, command: &RecordedCommand) {
        let state = &self.state;
        match command {
            RecordedCommand::Barrier {
                resource,
                before,
                after,
            } => {
                let mut states = state.resource_states.lock();
                let current = states.get(resource).copied().unwrap_or_default();
                if current != *before {
                    drop(states);
                    state.validation_error(format!(
                        "barrier on resource {resource}: expected {before:?}, \
                         resource is in {current:?}"
                    ));
                    state.resource_states.lock().insert(*resource, *after);
                } else {
                    states.insert(*resource, *after);
                }
            }
            RecordedCommand::SetRenderTargets { color, depth } => {
                self.expect_view_state(*color, ResourceState::RenderTarget);
                if let Some(depth) = depth {
                    self.expect_view_state(*depth, ResourceState::DepthWrite);
                }
            }
            RecordedCommand::ClearRenderTarget { view, .. } => {
                self.expect_view_state(*view, ResourceState::RenderTarget);
            }
            RecordedCommand::ClearDepthStencil { view, .. } => {
                self.expect_view_state(*view, ResourceState::DepthWrite);
            }
            _ => {}
        }
    }

    fn expect_view_state(&self, view: CpuDescriptorHandle, expected: ResourceState) {
        let entry = self.state.views.lock().get(&view.0).copied();
        let Some(entry) = entry else {
            self.state
                .validation_error(format!("descriptor {view:?} holds no view"));
            return;
        };
        let current = self
            .state
            .resource_states
            .lock()
            .get(&entry.resource)
            .copied()
            .unwrap_or_default();
        if current != expected {
            self.state.validation_error(format!(
                "{:?} view of resource {} used while resource is in {current:?}, \
                 expected {expected:?}",
                entry.heap_type, entry.resource
            ));
        }
    }

    fn write_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
        heap_type: DescriptorHeapType,
    ) -> Result<(), GraphicsError> {
        let GpuResource::Dummy {
            id,
            format: storage,
            ..
        } = resource
        else {
            return Err(wrong_backend("resource"));
        };
        if !format.is_view_compatible(*storage) {
            return Err(GraphicsError::InvalidParameter(format!(
                "view format {format:?} is incompatible with storage format {storage:?}"
            )));
        }
        self.state.views.lock().insert(
            dest.0,
            ViewEntry {
                resource: *id,
                heap_type,
            },
        );
        Ok(())
    }
}

#[allow(irrefutable_let_patterns)]
impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_queue(&self) -> Result<GpuQueue, GraphicsError> {
        Ok(GpuQueue::Dummy)
    }

    fn create_command_allocator(&self) -> Result<GpuCommandAllocator, GraphicsError> {
        Ok(GpuCommandAllocator::Dummy {
            id: self.state.allocate_id(),
        })
    }

    fn create_command_list(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<GpuCommandList, GraphicsError> {
        let GpuCommandAllocator::Dummy { id: allocator } = allocator else {
            return Err(wrong_backend("command allocator"));
        };
        Ok(GpuCommandList::Dummy(DummyCommandList {
            id: self.state.allocate_id(),
            allocator: *allocator,
            recording: true,
            commands: Vec::new(),
        }))
    }

    fn reset_command_allocator(
        &self,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let GpuCommandAllocator::Dummy { id } = allocator else {
            return Err(wrong_backend("command allocator"));
        };
        log::trace!("DummyDevice: reset allocator {id}");
        Ok(())
    }

    fn reset_command_list(
        &self,
        list: &mut GpuCommandList,
        allocator: &GpuCommandAllocator,
    ) -> Result<(), GraphicsError> {
        let (GpuCommandList::Dummy(list), GpuCommandAllocator::Dummy { id }) = (list, allocator)
        else {
            return Err(wrong_backend("command list"));
        };
        if list.recording {
            return Err(GraphicsError::CommandFailed(format!(
                "command list {} reset while still recording",
                list.id
            )));
        }
        list.allocator = *id;
        list.recording = true;
        list.commands.clear();
        Ok(())
    }

    fn encode(&self, list: &mut GpuCommandList, command: GpuCommand<'_>) {
        let GpuCommandList::Dummy(list) = list else {
            log::error!("DummyDevice: command list from another backend");
            return;
        };
        if !list.recording {
            self.state.validation_error(format!(
                "command {command:?} recorded into closed list {}",
                list.id
            ));
            return;
        }
        match self.record(&command) {
            Some(recorded) => list.commands.push(recorded),
            None => self
                .state
                .validation_error(format!("command {command:?} references foreign objects")),
        }
    }

    fn close_command_list(&self, list: &mut GpuCommandList) -> Result<(), GraphicsError> {
        let GpuCommandList::Dummy(list) = list else {
            return Err(wrong_backend("command list"));
        };
        if !list.recording {
            return Err(GraphicsError::CommandFailed(format!(
                "command list {} closed twice",
                list.id
            )));
        }
        list.recording = false;
        Ok(())
    }

    fn execute_command_list(
        &self,
        queue: &GpuQueue,
        list: &GpuCommandList,
    ) -> Result<(), GraphicsError> {
        let (GpuQueue::Dummy, GpuCommandList::Dummy(list)) = (queue, list) else {
            return Err(wrong_backend("queue or command list"));
        };
        if list.recording {
            return Err(GraphicsError::CommandFailed(format!(
                "command list {} submitted while open",
                list.id
            )));
        }
        for command in &list.commands {
            self.execute(command);
        }
        self.state
            .executed
            .lock()
            .extend(list.commands.iter().cloned());
        self.state.submissions.fetch_add(1, Ordering::AcqRel);
        log::trace!(
            "DummyDevice: executed list {} ({} commands, allocator {})",
            list.id,
            list.commands.len(),
            list.allocator
        );
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, GraphicsError> {
        let fence = Arc::new(DummyFence::new(initial_value));
        self.state.fences.lock().push(Arc::downgrade(&fence));
        Ok(GpuFence::Dummy(fence))
    }

    fn signal_fence(
        &self,
        queue: &GpuQueue,
        fence: &GpuFence,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let (GpuQueue::Dummy, GpuFence::Dummy(fence)) = (queue, fence) else {
            return Err(wrong_backend("queue or fence"));
        };
        fence.signal(value);
        if !self.state.manual_completion.load(Ordering::Acquire) {
            fence.complete_pending();
        }
        Ok(())
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        match fence {
            GpuFence::Dummy(fence) => fence.completed_value(),
            #[allow(unreachable_patterns)]
            _ => 0,
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), GraphicsError> {
        let GpuFence::Dummy(fence) = fence else {
            return Err(wrong_backend("fence"));
        };
        self.state.fence_waits.fetch_add(1, Ordering::AcqRel);
        fence.wait(value);
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        // Idle means the simulated GPU has drained everything signaled so far.
        self.state.complete_all();
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<GpuDescriptorHeap, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "{heap_type:?} heap needs a non-zero capacity"
            )));
        }
        let id = self.state.allocate_id();
        let base = id << 32;
        Ok(GpuDescriptorHeap {
            heap_type,
            capacity,
            increment: heap_increment(heap_type),
            cpu_start: CpuDescriptorHandle(base),
            gpu_start: heap_type
                .is_shader_visible()
                .then_some(GpuDescriptorHandle(base | (1 << 63))),
            raw: RawDescriptorHeap::Dummy { id },
        })
    }

    fn create_render_target_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError> {
        if format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} cannot back a render-target view"
            )));
        }
        self.write_view(resource, format, dest, DescriptorHeapType::RenderTarget)
    }

    fn create_depth_stencil_view(
        &self,
        resource: &GpuResource,
        format: TextureFormat,
        dest: CpuDescriptorHandle,
    ) -> Result<(), GraphicsError> {
        if !format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} cannot back a depth-stencil view"
            )));
        }
        self.write_view(resource, format, dest, DescriptorHeapType::DepthStencil)
    }

    fn create_depth_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuResource, GraphicsError> {
        if !descriptor.format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is not a depth format",
                descriptor.format
            )));
        }
        let id = self.state.allocate_id();
        self.state
            .resource_states
            .lock()
            .insert(id, ResourceState::DepthWrite);
        log::trace!(
            "DummyDevice: creating depth texture {:?} ({}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );
        Ok(GpuResource::Dummy {
            id,
            format: descriptor.format,
            extent: descriptor.size,
        })
    }

    fn create_swapchain(
        &self,
        queue: &GpuQueue,
        _surface: &SurfaceHandle,
        descriptor: &SwapchainDescriptor,
    ) -> Result<GpuSwapchain, GraphicsError> {
        let GpuQueue::Dummy = queue else {
            return Err(wrong_backend("queue"));
        };
        let mut states = self.state.resource_states.lock();
        let buffers = (0..descriptor.buffer_count)
            .map(|_| {
                let id = self.state.allocate_id();
                states.insert(id, ResourceState::Present);
                id
            })
            .collect();
        Ok(GpuSwapchain::Dummy(DummySwapchain {
            buffers,
            current: 0,
            format: descriptor.format,
            extent: descriptor.extent,
        }))
    }

    fn swapchain_buffer(
        &self,
        swapchain: &GpuSwapchain,
        index: u32,
    ) -> Result<GpuResource, GraphicsError> {
        let GpuSwapchain::Dummy(swapchain) = swapchain else {
            return Err(wrong_backend("swapchain"));
        };
        let id = swapchain.buffers.get(index as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "back buffer {index} out of range ({})",
                swapchain.buffers.len()
            ))
        })?;
        Ok(GpuResource::Dummy {
            id: *id,
            format: swapchain.format,
            extent: swapchain.extent,
        })
    }

    fn current_back_buffer_index(&self, swapchain: &GpuSwapchain) -> u32 {
        match swapchain {
            GpuSwapchain::Dummy(swapchain) => swapchain.current,
            #[allow(unreachable_patterns)]
            _ => 0,
        }
    }

    fn present(
        &self,
        queue: &GpuQueue,
        swapchain: &mut GpuSwapchain,
        sync_interval: u32,
    ) -> Result<(), GraphicsError> {
        let (GpuQueue::Dummy, GpuSwapchain::Dummy(swapchain)) = (queue, swapchain) else {
            return Err(wrong_backend("queue or swapchain"));
        };
        let buffer = swapchain.buffers[swapchain.current as usize];
        let state = self
            .state
            .resource_states
            .lock()
            .get(&buffer)
            .copied()
            .unwrap_or_default();
        if state != ResourceState::Present {
            let message = format!("presented back buffer {buffer} is in {state:?}");
            self.state.validation_error(message.clone());
            return Err(GraphicsError::InvalidParameter(message));
        }
        swapchain.current = (swapchain.current + 1) % swapchain.buffers.len() as u32;
        self.state.presents.fetch_add(1, Ordering::AcqRel);
        log::trace!("DummyDevice: presented buffer {buffer} (sync interval {sync_interval})");
        Ok(())
    }

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<GpuRootSignature, GraphicsError> {
        self.state
            .root_signature_creations
            .fetch_add(1, Ordering::AcqRel);
        if self
            .state
            .fail_root_signature_creation
            .load(Ordering::Acquire)
        {
            return Err(GraphicsError::Internal(format!(
                "binding layout with {} parameters rejected by the dummy device",
                desc.parameters.len()
            )));
        }
        log::trace!(
            "DummyDevice: creating binding layout with {} parameters, {} static samplers",
            desc.parameters.len(),
            desc.static_samplers.len()
        );
        Ok(GpuRootSignature::Dummy {
            id: self.state.allocate_id(),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GpuPipeline, GraphicsError> {
        self.state.pipeline_creations.fetch_add(1, Ordering::AcqRel);
        self.state.input_semantics.lock().push(
            desc.input_layout
                .iter()
                .map(|element| element.semantic_name.to_string_lossy().into_owned())
                .collect(),
        );

        if self.state.fail_pipeline_creation.load(Ordering::Acquire) {
            return Err(GraphicsError::PipelineCreationFailed(format!(
                "'{}' rejected by the dummy device",
                desc.label
            )));
        }
        let GpuRootSignature::Dummy { id: layout } = desc.root_signature else {
            return Err(wrong_backend("binding layout"));
        };
        if *layout == 0 {
            return Err(GraphicsError::PipelineCreationFailed(format!(
                "'{}' compiled against a null binding layout",
                desc.label
            )));
        }
        if desc.vertex_shader.bytecode.is_empty() || desc.pixel_shader.bytecode.is_empty() {
            return Err(GraphicsError::PipelineCreationFailed(format!(
                "'{}' has an empty shader stage",
                desc.label
            )));
        }
        if desc.render_target_formats.is_empty() {
            return Err(GraphicsError::PipelineCreationFailed(format!(
                "'{}' declares no render targets",
                desc.label
            )));
        }
        Ok(GpuPipeline::Dummy {
            id: self.state.allocate_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> (Arc<dyn GpuDevice>, DummyController) {
        let instance = DummyInstance::new();
        let adapter = instance.enumerate_adapters().unwrap().remove(0);
        let device = instance.create_device(&adapter, FeatureLevel::V1_3).unwrap();
        (device, instance.controller())
    }

    #[test]
    fn test_device_creation_respects_max_level() {
        let instance = DummyInstance::with_adapters(vec![DummyInstance::adapter(
            "Old",
            AdapterType::Integrated,
            FeatureLevel::V1_2,
        )]);
        let adapter = instance.enumerate_adapters().unwrap().remove(0);
        assert!(instance.create_device(&adapter, FeatureLevel::V1_3).is_err());
        assert!(instance.create_device(&adapter, FeatureLevel::V1_2).is_ok());
        assert_eq!(instance.controller().device_attempts().len(), 2);
    }

    #[test]
    fn test_fence_completes_immediately_by_default() {
        let (device, _controller) = device();
        let queue = device.create_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        device.signal_fence(&queue, &fence, 3).unwrap();
        assert_eq!(device.fence_completed_value(&fence), 3);
    }

    #[test]
    fn test_manual_completion_holds_values() {
        let (device, controller) = device();
        controller.set_manual_completion(true);
        let queue = device.create_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        device.signal_fence(&queue, &fence, 1).unwrap();
        assert_eq!(device.fence_completed_value(&fence), 0);
        controller.complete_all();
        assert_eq!(device.fence_completed_value(&fence), 1);
    }

    #[test]
    fn test_barrier_mismatch_is_reported() {
        let (device, controller) = device();
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let depth = device
            .create_depth_texture(&TextureDescriptor::new_2d(
                4,
                4,
                TextureFormat::Depth24UnormStencil8,
            ))
            .unwrap();

        device.encode(
            &mut list,
            GpuCommand::Barrier {
                resource: &depth,
                before: ResourceState::Present,
                after: ResourceState::Common,
            },
        );
        device.close_command_list(&mut list).unwrap();
        device.execute_command_list(&queue, &list).unwrap();

        assert_eq!(controller.validation_errors().len(), 1);
        assert_eq!(
            controller.resource_state(&depth),
            Some(ResourceState::Common)
        );
    }

    #[test]
    fn test_submit_open_list_fails() {
        let (device, _controller) = device();
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator).unwrap();
        assert!(device.execute_command_list(&queue, &list).is_err());
    }

    #[test]
    fn test_shader_visible_heap_has_gpu_start() {
        let (device, _controller) = device();
        let rtv = device
            .create_descriptor_heap(DescriptorHeapType::RenderTarget, 4)
            .unwrap();
        let srv = device
            .create_descriptor_heap(DescriptorHeapType::ShaderVisible, 4)
            .unwrap();
        assert!(rtv.gpu_start.is_none());
        assert!(srv.gpu_start.is_some());
        assert_ne!(rtv.cpu_start, srv.cpu_start);
    }
}
