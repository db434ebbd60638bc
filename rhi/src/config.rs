//! Compiled-in renderer configuration.
//!
//! The backend has no CLI, environment or persisted settings. Every tunable
//! is a constant here, gathered into [`RendererConfig::default`]. Callers that
//! need different values (tests, tools) override them with the `with_*`
//! builder methods before the backend is created.

use bitflags::bitflags;

use crate::instance::FeatureLevel;
use crate::types::TextureFormat;

/// Client area width in pixels.
pub const CLIENT_WIDTH: u32 = 1280;
/// Client area height in pixels.
pub const CLIENT_HEIGHT: u32 = 720;
/// Number of back buffers in the swapchain.
pub const BUFFER_COUNT: u32 = 2;
/// Number of frame slots the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;
/// Capacity of the render-target view heap.
pub const RTV_HEAP_CAPACITY: u32 = 16;
/// Capacity of the depth-stencil view heap.
pub const DSV_HEAP_CAPACITY: u32 = 4;
/// Capacity of the shader-visible resource heap.
pub const SHADER_VISIBLE_HEAP_CAPACITY: u32 = 1024;
/// Present sync interval; 1 ties presentation to vertical refresh.
pub const SYNC_INTERVAL: u32 = 1;
/// Presentable surface format.
pub const SURFACE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
/// Format of the render-target views created over back buffers.
pub const RENDER_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
/// Depth-stencil target format.
pub const DEPTH_STENCIL_FORMAT: TextureFormat = TextureFormat::Depth24UnormStencil8;
/// Feature levels tried during device creation, newest first.
pub const SUPPORTED_FEATURE_LEVELS: [FeatureLevel; 2] = [FeatureLevel::V1_3, FeatureLevel::V1_2];
/// Clear color applied to the back buffer at the start of every frame.
pub const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 1.0];
/// Depth clear value.
pub const CLEAR_DEPTH: f32 = 1.0;

bitflags! {
    /// Validation message severities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValidationSeverity: u32 {
        /// Memory corruption reported by the validation layer.
        const CORRUPTION = 1 << 0;
        /// API misuse.
        const ERROR = 1 << 1;
        /// Likely bug or performance problem.
        const WARNING = 1 << 2;
        /// Informational output.
        const INFO = 1 << 3;
    }
}

/// Validation layer settings.
///
/// # Example
///
/// ```ignore
/// let validation = ValidationConfig::default()
///     .with_enabled(true)
///     .with_break_on(ValidationSeverity::CORRUPTION | ValidationSeverity::ERROR)
///     .with_denied_message(0x609a13b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Install the validation layer.
    pub enabled: bool,
    /// Severities promoted to a break.
    pub break_on: ValidationSeverity,
    /// Abort the process on a break instead of only logging it.
    pub abort_on_break: bool,
    /// Message IDs that are dropped without logging.
    pub denied_messages: Vec<i32>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            break_on: ValidationSeverity::CORRUPTION | ValidationSeverity::ERROR,
            abort_on_break: false,
            denied_messages: Vec::new(),
        }
    }
}

impl ValidationConfig {
    /// Enable or disable the validation layer.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set which severities are promoted to a break.
    pub fn with_break_on(mut self, severities: ValidationSeverity) -> Self {
        self.break_on = severities;
        self
    }

    /// Abort the process when a break-on message arrives.
    pub fn with_abort_on_break(mut self, abort: bool) -> Self {
        self.abort_on_break = abort;
        self
    }

    /// Suppress a message ID.
    pub fn with_denied_message(mut self, message_id: i32) -> Self {
        self.denied_messages.push(message_id);
        self
    }

    /// Whether a message ID is on the deny-list.
    pub fn is_denied(&self, message_id: i32) -> bool {
        self.denied_messages.contains(&message_id)
    }
}

/// Shader compiler baseline arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderCompileOptions {
    /// Embed debug names in the compiled binary.
    pub debug_info: bool,
    /// Keep runtime bounds checks (unoptimized) or strip them (optimized).
    pub optimize: bool,
    /// Flip Y to match the top-left origin convention.
    pub adjust_coordinate_space: bool,
}

impl Default for ShaderCompileOptions {
    fn default() -> Self {
        Self {
            debug_info: cfg!(debug_assertions),
            optimize: !cfg!(debug_assertions),
            adjust_coordinate_space: true,
        }
    }
}

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Client area width.
    pub width: u32,
    /// Client area height.
    pub height: u32,
    /// Number of swapchain back buffers.
    pub buffer_count: u32,
    /// Number of frame slots (command allocators and fence values).
    pub frames_in_flight: usize,
    /// Render-target heap capacity.
    pub rtv_heap_capacity: u32,
    /// Depth-stencil heap capacity.
    pub dsv_heap_capacity: u32,
    /// Shader-visible heap capacity.
    pub shader_visible_heap_capacity: u32,
    /// Present sync interval.
    pub sync_interval: u32,
    /// Presentable surface format.
    pub surface_format: TextureFormat,
    /// Render-target view format.
    pub render_target_format: TextureFormat,
    /// Depth-stencil format.
    pub depth_stencil_format: TextureFormat,
    /// Back buffer clear color.
    pub clear_color: [f32; 4],
    /// Validation layer settings.
    pub validation: ValidationConfig,
    /// Shader compiler settings.
    pub shader: ShaderCompileOptions,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: CLIENT_WIDTH,
            height: CLIENT_HEIGHT,
            buffer_count: BUFFER_COUNT,
            frames_in_flight: FRAMES_IN_FLIGHT,
            rtv_heap_capacity: RTV_HEAP_CAPACITY,
            dsv_heap_capacity: DSV_HEAP_CAPACITY,
            shader_visible_heap_capacity: SHADER_VISIBLE_HEAP_CAPACITY,
            sync_interval: SYNC_INTERVAL,
            surface_format: SURFACE_FORMAT,
            render_target_format: RENDER_TARGET_FORMAT,
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            clear_color: CLEAR_COLOR,
            validation: ValidationConfig::default(),
            shader: ShaderCompileOptions::default(),
        }
    }
}

impl RendererConfig {
    /// Set the client area size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of back buffers.
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the number of frame slots.
    pub fn with_frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = count;
        self
    }

    /// Set all three descriptor heap capacities.
    pub fn with_heap_capacities(mut self, rtv: u32, dsv: u32, shader_visible: u32) -> Self {
        self.rtv_heap_capacity = rtv;
        self.dsv_heap_capacity = dsv;
        self.shader_visible_heap_capacity = shader_visible;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the validation layer settings.
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Set the shader compiler settings.
    pub fn with_shader_options(mut self, options: ShaderCompileOptions) -> Self {
        self.shader = options;
        self
    }

    /// Capacity of a given descriptor heap.
    pub fn heap_capacity(&self, heap_type: crate::types::DescriptorHeapType) -> u32 {
        use crate::types::DescriptorHeapType;
        match heap_type {
            DescriptorHeapType::RenderTarget => self.rtv_heap_capacity,
            DescriptorHeapType::DepthStencil => self.dsv_heap_capacity,
            DescriptorHeapType::ShaderVisible => self.shader_visible_heap_capacity,
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), crate::error::GraphicsError> {
        use crate::error::GraphicsError;
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "client area must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.buffer_count < 2 {
            return Err(GraphicsError::InvalidParameter(format!(
                "flip presentation needs at least 2 back buffers, got {}",
                self.buffer_count
            )));
        }
        if self.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.rtv_heap_capacity < self.buffer_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "render-target heap ({}) cannot hold {} back buffer views",
                self.rtv_heap_capacity, self.buffer_count
            )));
        }
        if self.dsv_heap_capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "depth-stencil heap needs at least one slot".to_string(),
            ));
        }
        if !self.render_target_format.is_view_compatible(self.surface_format) {
            return Err(GraphicsError::InvalidParameter(format!(
                "render-target format {:?} cannot view surface format {:?}",
                self.render_target_format, self.surface_format
            )));
        }
        if !self.depth_stencil_format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is not a depth format",
                self.depth_stencil_format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.width, CLIENT_WIDTH);
        assert_eq!(config.height, CLIENT_HEIGHT);
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.sync_interval, 1);
        assert_eq!(config.surface_format, TextureFormat::Rgba8Unorm);
        assert_eq!(config.render_target_format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(
            config.depth_stencil_format,
            TextureFormat::Depth24UnormStencil8
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feature_levels_newest_first() {
        assert!(SUPPORTED_FEATURE_LEVELS.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_validate_rejects_single_buffer() {
        let config = RendererConfig::default().with_buffer_count(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_rtv_heap() {
        let config = RendererConfig::default().with_heap_capacities(1, 1, 8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deny_list() {
        let validation = ValidationConfig::default().with_denied_message(42);
        assert!(validation.is_denied(42));
        assert!(!validation.is_denied(7));
    }
}
