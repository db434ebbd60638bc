//! Pipeline descriptor value type.

use std::path::{Path, PathBuf};

use crate::config::{DEPTH_STENCIL_FORMAT, RENDER_TARGET_FORMAT};
use crate::types::{CompareFunction, InputClassification, TextureFormat, VertexFormat};

use super::state::{
    BlendMode, BlendState, CullMode, DepthStencilState, FillMode, FrontFace, PrimitiveTopology,
    RasterizerState,
};

/// Offset value that places an element directly after the previous element
/// in the same slot.
pub const APPEND_ALIGNED: u32 = u32::MAX;

/// Reference to a shader entry point on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderRef {
    /// WGSL source file.
    pub path: PathBuf,
    /// Entry point name.
    pub entry_point: String,
    /// Target profile tag, e.g. `vs_6_0`.
    pub target_profile: String,
}

impl ShaderRef {
    /// Create a shader reference.
    pub fn new(
        path: impl Into<PathBuf>,
        entry_point: impl Into<String>,
        target_profile: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            entry_point: entry_point.into(),
            target_profile: target_profile.into(),
        }
    }

    /// Vertex shader compiled for `vs_6_0`.
    pub fn vertex(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self::new(path, entry_point, "vs_6_0")
    }

    /// Pixel shader compiled for `ps_6_0`.
    pub fn pixel(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self::new(path, entry_point, "ps_6_0")
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One vertex attribute of the input layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    /// Semantic name, e.g. `POSITION`.
    pub semantic_name: String,
    /// Semantic index, for repeated semantics such as `TEXCOORD1`.
    pub semantic_index: u32,
    /// Attribute format.
    pub format: VertexFormat,
    /// Vertex buffer slot.
    pub input_slot: u32,
    /// Byte offset within the vertex, or [`APPEND_ALIGNED`].
    pub aligned_byte_offset: u32,
    /// Per-vertex or per-instance data.
    pub classification: InputClassification,
    /// Instances drawn per element step; 0 for per-vertex data.
    pub instance_step_rate: u32,
}

impl InputElement {
    /// Per-vertex attribute in slot 0, appended after the previous one.
    pub fn per_vertex(semantic_name: impl Into<String>, format: VertexFormat) -> Self {
        Self {
            semantic_name: semantic_name.into(),
            semantic_index: 0,
            format,
            input_slot: 0,
            aligned_byte_offset: APPEND_ALIGNED,
            classification: InputClassification::PerVertex,
            instance_step_rate: 0,
        }
    }

    /// Per-instance attribute, stepping once per instance.
    pub fn per_instance(
        semantic_name: impl Into<String>,
        format: VertexFormat,
        input_slot: u32,
    ) -> Self {
        Self {
            input_slot,
            classification: InputClassification::PerInstance,
            instance_step_rate: 1,
            ..Self::per_vertex(semantic_name, format)
        }
    }

    /// Set the semantic index.
    pub fn with_semantic_index(mut self, index: u32) -> Self {
        self.semantic_index = index;
        self
    }

    /// Set the vertex buffer slot.
    pub fn with_slot(mut self, slot: u32) -> Self {
        self.input_slot = slot;
        self
    }

    /// Set an explicit byte offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.aligned_byte_offset = offset;
        self
    }
}

/// Everything needed to build one graphics pipeline.
///
/// A plain value: cheap to clone, compare and tweak before building.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PsoDescriptor {
    /// Debug label.
    pub label: String,
    /// Vertex shader.
    pub vertex_shader: ShaderRef,
    /// Pixel shader.
    pub pixel_shader: ShaderRef,
    /// Blend mode of the render target.
    pub blend_mode: BlendMode,
    /// Face culling.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Fill mode.
    pub fill_mode: FillMode,
    /// Enable the depth test.
    pub depth_test: bool,
    /// Depth comparison.
    pub depth_compare: CompareFunction,
    /// Write depth.
    pub depth_write: bool,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Render-target format.
    pub render_target_format: TextureFormat,
    /// Depth-stencil format, if a depth target is bound.
    pub depth_stencil_format: Option<TextureFormat>,
    /// Multisample count.
    pub sample_count: u32,
    /// Multisample coverage mask.
    pub sample_mask: u32,
    /// Input layout, in attribute location order.
    pub input_layout: Vec<InputElement>,
}

impl PsoDescriptor {
    /// Opaque, depth-tested triangles into the default targets, with no
    /// vertex input.
    pub fn new(
        label: impl Into<String>,
        vertex_shader: ShaderRef,
        pixel_shader: ShaderRef,
    ) -> Self {
        Self {
            label: label.into(),
            vertex_shader,
            pixel_shader,
            blend_mode: BlendMode::Off,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Cw,
            fill_mode: FillMode::Solid,
            depth_test: true,
            depth_compare: CompareFunction::Less,
            depth_write: true,
            topology: PrimitiveTopology::TriangleList,
            render_target_format: RENDER_TARGET_FORMAT,
            depth_stencil_format: Some(DEPTH_STENCIL_FORMAT),
            sample_count: 1,
            sample_mask: u32::MAX,
            input_layout: Vec::new(),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the blend mode.
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Set face culling.
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set the front face winding.
    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Set the fill mode.
    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    /// Enable or disable the depth test, with its comparison.
    pub fn with_depth_test(mut self, enabled: bool, compare: CompareFunction) -> Self {
        self.depth_test = enabled;
        self.depth_compare = compare;
        self
    }

    /// Enable or disable depth writes.
    pub fn with_depth_write(mut self, enabled: bool) -> Self {
        self.depth_write = enabled;
        self
    }

    /// Set the primitive topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the render-target format.
    pub fn with_render_target_format(mut self, format: TextureFormat) -> Self {
        self.render_target_format = format;
        self
    }

    /// Set or clear the depth-stencil format.
    pub fn with_depth_stencil_format(mut self, format: Option<TextureFormat>) -> Self {
        self.depth_stencil_format = format;
        self
    }

    /// Set multisampling.
    pub fn with_samples(mut self, count: u32, mask: u32) -> Self {
        self.sample_count = count;
        self.sample_mask = mask;
        self
    }

    /// Append an input element.
    pub fn with_input_element(mut self, element: InputElement) -> Self {
        self.input_layout.push(element);
        self
    }

    /// Replace the whole input layout.
    pub fn with_input_layout(mut self, elements: Vec<InputElement>) -> Self {
        self.input_layout = elements;
        self
    }

    /// Blend state derived from the blend mode.
    pub fn blend_state(&self) -> BlendState {
        self.blend_mode.to_state()
    }

    /// Rasterizer state.
    pub fn rasterizer_state(&self) -> RasterizerState {
        RasterizerState {
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            fill_mode: self.fill_mode,
            ..RasterizerState::default()
        }
    }

    /// Depth-stencil state. Depth is disabled when there is no depth target.
    pub fn depth_stencil_state(&self) -> DepthStencilState {
        if self.depth_stencil_format.is_none() {
            return DepthStencilState::disabled();
        }
        DepthStencilState {
            depth_test_enabled: self.depth_test,
            depth_compare: self.depth_compare,
            depth_write_enabled: self.depth_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> PsoDescriptor {
        PsoDescriptor::new(
            "test",
            ShaderRef::vertex("a.wgsl", "vs_main"),
            ShaderRef::pixel("a.wgsl", "ps_main"),
        )
    }

    #[test]
    fn test_defaults_target_configured_formats() {
        let desc = descriptor();
        assert_eq!(desc.render_target_format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(
            desc.depth_stencil_format,
            Some(TextureFormat::Depth24UnormStencil8)
        );
        assert_eq!(desc.vertex_shader.target_profile, "vs_6_0");
        assert_eq!(desc.pixel_shader.target_profile, "ps_6_0");
    }

    #[test]
    fn test_no_depth_target_disables_depth() {
        let desc = descriptor().with_depth_stencil_format(None);
        assert!(!desc.depth_stencil_state().depth_test_enabled);
        assert!(!desc.depth_stencil_state().depth_write_enabled);
    }

    #[test]
    fn test_overrides() {
        let desc = descriptor()
            .with_blend_mode(BlendMode::Alpha)
            .with_cull_mode(CullMode::None)
            .with_depth_test(true, CompareFunction::LessEqual)
            .with_depth_write(false);
        assert!(desc.blend_state().enabled);
        assert_eq!(desc.rasterizer_state().cull_mode, CullMode::None);
        let depth = desc.depth_stencil_state();
        assert_eq!(depth.depth_compare, CompareFunction::LessEqual);
        assert!(!depth.depth_write_enabled);
    }

    #[test]
    fn test_per_instance_element() {
        let element = InputElement::per_instance("TRANSFORM", VertexFormat::Float32x4, 1)
            .with_semantic_index(2);
        assert_eq!(element.classification, InputClassification::PerInstance);
        assert_eq!(element.instance_step_rate, 1);
        assert_eq!(element.input_slot, 1);
        assert_eq!(element.semantic_index, 2);
    }
}
