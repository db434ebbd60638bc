//! Resource usage states, descriptor heap kinds and shader visibility.

/// Usage state of a GPU resource.
///
/// A resource must be transitioned with a barrier before it is used in a
/// different state. Back buffers rest in [`ResourceState::Present`] between
/// frames and are moved to [`ResourceState::RenderTarget`] while drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Generic state; also the initial state of freshly created textures.
    #[default]
    Common,
    /// Ready to be handed to the display.
    Present,
    /// Bound as a color render target.
    RenderTarget,
    /// Bound as a writable depth-stencil target.
    DepthWrite,
    /// Bound as a read-only depth-stencil target.
    DepthRead,
    /// Sampled from a pixel shader.
    PixelShaderResource,
    /// Read or written as an unordered-access view.
    UnorderedAccess,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDest,
}

impl ResourceState {
    /// Returns true for states that write to the resource.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::RenderTarget | Self::DepthWrite | Self::UnorderedAccess | Self::CopyDest
        )
    }
}

/// Kind of descriptor heap.
///
/// Each kind is an independently sized pool; only
/// [`DescriptorHeapType::ShaderVisible`] slots carry a GPU handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Render-target views.
    RenderTarget,
    /// Depth-stencil views.
    DepthStencil,
    /// Constant-buffer, shader-resource and unordered-access views.
    ShaderVisible,
}

impl DescriptorHeapType {
    /// All heap kinds, in pool order.
    pub const ALL: [DescriptorHeapType; 3] = [
        DescriptorHeapType::RenderTarget,
        DescriptorHeapType::DepthStencil,
        DescriptorHeapType::ShaderVisible,
    ];

    /// Position of this kind in [`DescriptorHeapType::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::RenderTarget => 0,
            Self::DepthStencil => 1,
            Self::ShaderVisible => 2,
        }
    }

    /// Whether slots of this kind are addressable from shaders.
    pub fn is_shader_visible(self) -> bool {
        self == Self::ShaderVisible
    }
}

/// Shader stages a binding slot is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderVisibility {
    /// Visible to every stage.
    #[default]
    All,
    /// Vertex stage only.
    Vertex,
    /// Pixel stage only.
    Pixel,
}

impl ShaderVisibility {
    /// Whether two visibilities can observe the same register.
    pub fn overlaps(self, other: ShaderVisibility) -> bool {
        self == Self::All || other == Self::All || self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_type_index_matches_all() {
        for (i, heap_type) in DescriptorHeapType::ALL.iter().enumerate() {
            assert_eq!(heap_type.index(), i);
        }
        assert!(DescriptorHeapType::ShaderVisible.is_shader_visible());
        assert!(!DescriptorHeapType::RenderTarget.is_shader_visible());
    }

    #[test]
    fn test_visibility_overlap() {
        assert!(ShaderVisibility::All.overlaps(ShaderVisibility::Pixel));
        assert!(ShaderVisibility::Vertex.overlaps(ShaderVisibility::Vertex));
        assert!(!ShaderVisibility::Vertex.overlaps(ShaderVisibility::Pixel));
    }
}
