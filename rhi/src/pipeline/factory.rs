//! Pipeline state factory.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use crate::backend::{GpuPipeline, GraphicsPipelineDesc, NativeInputElement, ShaderStageBytecode};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::root_signature::{BindingLayout, RootSignatureBuilder};
use crate::shader::ShaderCompiler;

use super::descriptor::{APPEND_ALIGNED, InputElement, PsoDescriptor};

/// Owned semantic-name strings for one pipeline build.
///
/// Native input elements borrow their names from here, so the storage must
/// outlive the device call that consumes them. Every build creates its own.
#[derive(Debug)]
pub struct InputLayoutStorage {
    names: Vec<CString>,
}

impl InputLayoutStorage {
    /// Copy the semantic names of `elements`.
    pub fn new(elements: &[InputElement]) -> Result<Self, GraphicsError> {
        let names = elements
            .iter()
            .map(|element| {
                CString::new(element.semantic_name.as_str()).map_err(|_| {
                    GraphicsError::InvalidParameter(format!(
                        "semantic name {:?} contains a NUL byte",
                        element.semantic_name
                    ))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { names })
    }

    /// Build native elements borrowing from this storage.
    ///
    /// [`APPEND_ALIGNED`] offsets are resolved against the running size of
    /// each input slot.
    pub fn native_elements<'a>(&'a self, elements: &[InputElement]) -> Vec<NativeInputElement<'a>> {
        let mut slot_cursor: HashMap<u32, u32> = HashMap::new();

        elements
            .iter()
            .zip(&self.names)
            .map(|(element, name)| {
                let cursor = slot_cursor.entry(element.input_slot).or_insert(0);
                let offset = if element.aligned_byte_offset == APPEND_ALIGNED {
                    *cursor
                } else {
                    element.aligned_byte_offset
                };
                *cursor = offset + element.format.size();

                NativeInputElement {
                    semantic_name: name.as_c_str(),
                    semantic_index: element.semantic_index,
                    format: element.format,
                    input_slot: element.input_slot,
                    aligned_byte_offset: offset,
                    classification: element.classification,
                    instance_step_rate: element.instance_step_rate,
                }
            })
            .collect()
    }
}

/// A compiled pipeline together with the binding layout it was built
/// against.
///
/// Immutable once built; share it with `Arc`.
#[derive(Debug)]
pub struct PipelineBinding {
    label: String,
    layout: Arc<BindingLayout>,
    pipeline: GpuPipeline,
}

impl PipelineBinding {
    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binding layout.
    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    /// Backend pipeline.
    pub fn pipeline(&self) -> &GpuPipeline {
        &self.pipeline
    }

    /// Both halves are non-null.
    pub fn is_valid(&self) -> bool {
        self.layout.is_valid() && !self.pipeline.is_null()
    }
}

static_assertions::assert_impl_all!(PipelineBinding: Send, Sync);

/// Builds [`PipelineBinding`]s from descriptors.
#[derive(Debug, Clone)]
pub struct PipelineStateFactory {
    device: GraphicsDevice,
    compiler: ShaderCompiler,
}

impl PipelineStateFactory {
    /// Create a factory for `device`.
    pub fn new(device: &GraphicsDevice, compiler: ShaderCompiler) -> Self {
        Self {
            device: device.clone(),
            compiler,
        }
    }

    /// The shader compiler used for builds.
    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    /// Build a pipeline and its binding layout.
    ///
    /// Binding layout and device compile failures are returned as errors;
    /// neither leaves a half-built binding behind. A layout failure returns
    /// before any shader is compiled or the device is asked for a pipeline.
    ///
    /// # Panics
    ///
    /// Shader compilation failure is fatal.
    pub fn create_pso(
        &self,
        desc: &PsoDescriptor,
        root_signature: &RootSignatureBuilder,
    ) -> Result<PipelineBinding, GraphicsError> {
        crate::profile_scope!("create_pso");

        let layout = root_signature.build(&self.device).inspect_err(|_| {
            log::warn!(
                "Pipeline '{}' skipped: binding layout '{}' failed",
                desc.label,
                root_signature.label()
            );
        })?;

        let vertex = &desc.vertex_shader;
        let pixel = &desc.pixel_shader;
        let vs = self
            .compiler
            .compile(&vertex.path, &vertex.entry_point, &vertex.target_profile);
        let ps = self
            .compiler
            .compile(&pixel.path, &pixel.entry_point, &pixel.target_profile);

        let storage = InputLayoutStorage::new(&desc.input_layout)?;
        let input_layout = storage.native_elements(&desc.input_layout);
        let render_target_formats = [desc.render_target_format];

        let native = GraphicsPipelineDesc {
            label: &desc.label,
            root_signature: layout.raw(),
            vertex_shader: ShaderStageBytecode {
                bytecode: vs.bytecode(),
                entry_point: vs.entry_point(),
            },
            pixel_shader: ShaderStageBytecode {
                bytecode: ps.bytecode(),
                entry_point: ps.entry_point(),
            },
            input_layout: &input_layout,
            blend: desc.blend_state(),
            rasterizer: desc.rasterizer_state(),
            depth_stencil: desc.depth_stencil_state(),
            topology: desc.topology,
            render_target_formats: &render_target_formats,
            depth_stencil_format: desc.depth_stencil_format,
            sample_count: desc.sample_count,
            sample_mask: desc.sample_mask,
        };

        let pipeline = match self.device.raw().create_graphics_pipeline(&native) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("Device failed to compile pipeline '{}': {e}", desc.label);
                drop(layout);
                return Err(e);
            }
        };

        log::debug!(
            "Created pipeline '{}' ({} input elements, {:?})",
            desc.label,
            input_layout.len(),
            desc.blend_mode
        );

        Ok(PipelineBinding {
            label: desc.label.clone(),
            layout,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VertexFormat;

    #[test]
    fn test_append_aligned_offsets_per_slot() {
        let elements = vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
            InputElement::per_vertex("TEXCOORD", VertexFormat::Float32x2),
            InputElement::per_instance("OFFSET", VertexFormat::Float32x2, 1),
            InputElement::per_vertex("COLOR", VertexFormat::Unorm8x4),
        ];
        let storage = InputLayoutStorage::new(&elements).unwrap();
        let native = storage.native_elements(&elements);

        let offsets: Vec<_> = native.iter().map(|e| e.aligned_byte_offset).collect();
        assert_eq!(offsets, [0, 12, 0, 20]);
        assert_eq!(native[1].semantic_name.to_str().unwrap(), "TEXCOORD");
    }

    #[test]
    fn test_explicit_offset_moves_cursor() {
        let elements = vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3).with_offset(16),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
        ];
        let storage = InputLayoutStorage::new(&elements).unwrap();
        let native = storage.native_elements(&elements);
        assert_eq!(native[1].aligned_byte_offset, 28);
    }

    #[test]
    fn test_builds_do_not_share_names() {
        let elements = vec![InputElement::per_vertex("POSITION", VertexFormat::Float32x3)];
        let first = InputLayoutStorage::new(&elements).unwrap();
        let second = InputLayoutStorage::new(&elements).unwrap();
        let a = first.native_elements(&elements);
        let b = second.native_elements(&elements);
        assert_eq!(a[0].semantic_name, b[0].semantic_name);
        assert_ne!(a[0].semantic_name.as_ptr(), b[0].semantic_name.as_ptr());
    }

    #[test]
    fn test_nul_in_semantic_rejected() {
        let elements = vec![InputElement::per_vertex("POS\0ITION", VertexFormat::Float32x3)];
        assert!(InputLayoutStorage::new(&elements).is_err());
    }
}
