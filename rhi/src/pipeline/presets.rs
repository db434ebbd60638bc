//! Named pipeline descriptor presets.
//!
//! Each preset returns a fully filled [`PsoDescriptor`] that can be adjusted
//! with the `with_*` methods before it is built.

use crate::types::{CompareFunction, VertexFormat};

use super::descriptor::{InputElement, PsoDescriptor, ShaderRef};
use super::state::{BlendMode, CullMode, PrimitiveTopology};

/// Lit, opaque geometry: position, normal and one texture coordinate.
///
/// Back-face culled, depth tested and written, blending off.
pub fn opaque_mesh(vertex_shader: ShaderRef, pixel_shader: ShaderRef) -> PsoDescriptor {
    PsoDescriptor::new("opaque_mesh", vertex_shader, pixel_shader).with_input_layout(vec![
        InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
        InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
        InputElement::per_vertex("TEXCOORD", VertexFormat::Float32x2),
    ])
}

/// Alpha-blended quads in screen space: 2D position, texture coordinate and
/// a packed color.
///
/// No culling, no depth.
pub fn screen_space_sprite(vertex_shader: ShaderRef, pixel_shader: ShaderRef) -> PsoDescriptor {
    PsoDescriptor::new("screen_space_sprite", vertex_shader, pixel_shader)
        .with_blend_mode(BlendMode::Alpha)
        .with_cull_mode(CullMode::None)
        .with_depth_test(false, CompareFunction::Always)
        .with_depth_write(false)
        .with_input_layout(vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x2),
            InputElement::per_vertex("TEXCOORD", VertexFormat::Float32x2),
            InputElement::per_vertex("COLOR", VertexFormat::Unorm8x4),
        ])
}

/// World-space debug lines: position and packed color.
///
/// Depth tested against the scene but never written, alpha blended.
pub fn debug_line(vertex_shader: ShaderRef, pixel_shader: ShaderRef) -> PsoDescriptor {
    PsoDescriptor::new("debug_line", vertex_shader, pixel_shader)
        .with_topology(PrimitiveTopology::LineList)
        .with_blend_mode(BlendMode::Alpha)
        .with_cull_mode(CullMode::None)
        .with_depth_test(true, CompareFunction::LessEqual)
        .with_depth_write(false)
        .with_input_layout(vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
            InputElement::per_vertex("COLOR", VertexFormat::Unorm8x4),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaders() -> (ShaderRef, ShaderRef) {
        (
            ShaderRef::vertex("s.wgsl", "vs_main"),
            ShaderRef::pixel("s.wgsl", "ps_main"),
        )
    }

    #[test]
    fn test_opaque_mesh() {
        let (vs, ps) = shaders();
        let desc = opaque_mesh(vs, ps);
        assert_eq!(desc.blend_mode, BlendMode::Off);
        assert!(desc.depth_write);
        assert_eq!(desc.input_layout.len(), 3);
    }

    #[test]
    fn test_sprite_has_no_depth() {
        let (vs, ps) = shaders();
        let desc = screen_space_sprite(vs, ps);
        assert!(!desc.depth_stencil_state().depth_test_enabled);
        assert_eq!(desc.blend_mode, BlendMode::Alpha);
    }

    #[test]
    fn test_debug_line_topology() {
        let (vs, ps) = shaders();
        let desc = debug_line(vs, ps).with_blend_mode(BlendMode::Additive);
        assert_eq!(desc.topology, PrimitiveTopology::LineList);
        assert_eq!(desc.blend_mode, BlendMode::Additive);
        assert!(!desc.depth_write);
    }
}
