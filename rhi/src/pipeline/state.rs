//! Fixed-function pipeline state: blending, rasterization, depth testing and
//! primitive assembly.

use bitflags::bitflags;

use crate::types::CompareFunction;

/// Blend factor for blending operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    /// 0.0
    #[default]
    Zero,
    /// 1.0
    One,
    /// Source color
    Src,
    /// 1 - source color
    OneMinusSrc,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// Destination color
    Dst,
    /// 1 - destination color
    OneMinusDst,
    /// Destination alpha
    DstAlpha,
    /// 1 - destination alpha
    OneMinusDstAlpha,
}

/// Blend operation for combining colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOperation {
    /// source + destination
    #[default]
    Add,
    /// source - destination
    Subtract,
    /// destination - source
    ReverseSubtract,
    /// min(source, destination)
    Min,
    /// max(source, destination)
    Max,
}

/// One blend equation (color or alpha).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    /// Source factor.
    pub src_factor: BlendFactor,
    /// Destination factor.
    pub dst_factor: BlendFactor,
    /// Blend operation.
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self::REPLACE
    }
}

impl BlendComponent {
    /// Source replaces destination.
    pub const REPLACE: Self = Self::new(BlendFactor::One, BlendFactor::Zero, BlendOperation::Add);

    /// Create a blend component.
    pub const fn new(
        src_factor: BlendFactor,
        dst_factor: BlendFactor,
        operation: BlendOperation,
    ) -> Self {
        Self {
            src_factor,
            dst_factor,
            operation,
        }
    }
}

bitflags! {
    /// Color channels written by the output merger.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u8 {
        /// Red channel.
        const RED = 1 << 0;
        /// Green channel.
        const GREEN = 1 << 1;
        /// Blue channel.
        const BLUE = 1 << 2;
        /// Alpha channel.
        const ALPHA = 1 << 3;
        /// All channels.
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorWrites {
    fn default() -> Self {
        Self::ALL
    }
}

/// Named blend configurations a pipeline descriptor can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Blending disabled; source overwrites destination.
    #[default]
    Off,
    /// `src * a + dst * (1 - a)`.
    Alpha,
    /// `src * a + dst`.
    Additive,
    /// `dst - src * a`.
    Subtractive,
    /// `src * dst`.
    Multiplicative,
}

impl BlendMode {
    /// Expand into a full blend state.
    pub fn to_state(self) -> BlendState {
        use BlendFactor::*;
        use BlendOperation::*;

        let (enabled, color, alpha) = match self {
            Self::Off => (false, BlendComponent::REPLACE, BlendComponent::REPLACE),
            Self::Alpha => (
                true,
                BlendComponent::new(SrcAlpha, OneMinusSrcAlpha, Add),
                BlendComponent::new(One, OneMinusSrcAlpha, Add),
            ),
            Self::Additive => (
                true,
                BlendComponent::new(SrcAlpha, One, Add),
                BlendComponent::new(Zero, One, Add),
            ),
            Self::Subtractive => (
                true,
                BlendComponent::new(SrcAlpha, One, ReverseSubtract),
                BlendComponent::new(Zero, One, Add),
            ),
            Self::Multiplicative => (
                true,
                BlendComponent::new(Dst, Zero, Add),
                BlendComponent::new(DstAlpha, Zero, Add),
            ),
        };

        BlendState {
            enabled,
            color,
            alpha,
            write_mask: ColorWrites::ALL,
        }
    }
}

/// Blend state for the single render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Whether blending is enabled at all.
    pub enabled: bool,
    /// Color blend component.
    pub color: BlendComponent,
    /// Alpha blend component.
    pub alpha: BlendComponent,
    /// Channels written.
    pub write_mask: ColorWrites,
}

impl Default for BlendState {
    fn default() -> Self {
        BlendMode::Off.to_state()
    }
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// Draw both faces.
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
}

/// Front face winding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    /// Counter-clockwise triangles face forward.
    Ccw,
    /// Clockwise triangles face forward.
    #[default]
    Cw,
}

/// Polygon fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    /// Filled triangles.
    #[default]
    Solid,
    /// Triangle edges only.
    Wireframe,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    /// Face culling.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Fill mode.
    pub fill_mode: FillMode,
    /// Clip geometry against the near and far planes.
    pub depth_clip: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::Cw,
            fill_mode: FillMode::Solid,
            depth_clip: true,
        }
    }
}

/// Depth testing state. Stencil is left disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    /// Enable the depth test.
    pub depth_test_enabled: bool,
    /// Depth comparison.
    pub depth_compare: CompareFunction,
    /// Write passing depth values.
    pub depth_write_enabled: bool,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enabled: true,
            depth_compare: CompareFunction::Less,
            depth_write_enabled: true,
        }
    }
}

impl DepthStencilState {
    /// Depth test and write both disabled.
    pub fn disabled() -> Self {
        Self {
            depth_test_enabled: false,
            depth_compare: CompareFunction::Always,
            depth_write_enabled: false,
        }
    }
}

/// How vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Isolated points.
    PointList,
    /// Pairs of vertices form lines.
    LineList,
    /// Connected line strip.
    LineStrip,
    /// Triples of vertices form triangles.
    #[default]
    TriangleList,
    /// Connected triangle strip.
    TriangleStrip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_disables_blending() {
        let state = BlendMode::Off.to_state();
        assert!(!state.enabled);
        assert_eq!(state.color, BlendComponent::REPLACE);
        assert_eq!(state.write_mask, ColorWrites::ALL);
    }

    #[test]
    fn test_subtractive_reverses_operands() {
        let state = BlendMode::Subtractive.to_state();
        assert!(state.enabled);
        assert_eq!(state.color.operation, BlendOperation::ReverseSubtract);
    }

    #[test]
    fn test_multiplicative_scales_by_destination() {
        let state = BlendMode::Multiplicative.to_state();
        assert_eq!(state.color.src_factor, BlendFactor::Dst);
        assert_eq!(state.color.dst_factor, BlendFactor::Zero);
    }
}
