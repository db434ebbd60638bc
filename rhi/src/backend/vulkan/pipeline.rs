//! Pipeline layouts, graphics pipelines and the shader-visible pool.
//!
//! A binding layout becomes one descriptor set per root parameter, in
//! declaration order, with bindings numbered by register. Static samplers
//! live in one extra set after the parameters as immutable samplers.
//! Register spaces have no Vulkan counterpart and are ignored.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::backend::GraphicsPipelineDesc;
use crate::error::GraphicsError;
use crate::root_signature::{DescriptorRangeType, RootParameter, RootSignatureDesc, StaticSampler};
use crate::types::{FilterMode, InputClassification};

use super::conversion::{
    convert_address_mode, convert_blend_factor, convert_blend_operation, convert_color_writes,
    convert_compare_function, convert_cull_mode, convert_fill_mode, convert_filter_mode,
    convert_front_face, convert_mipmap_filter_mode, convert_sample_count, convert_topology,
    convert_vertex_format, convert_visibility,
};
use super::{VulkanShared, vk_error};

/// Create the descriptor pool backing a shader-visible heap.
pub(crate) fn create_shader_visible_pool(
    shared: &VulkanShared,
    capacity: u32,
) -> Result<vk::DescriptorPool, GraphicsError> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: capacity,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: capacity,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: capacity,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: capacity,
        },
    ];

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(capacity)
        .pool_sizes(&pool_sizes);

    unsafe { shared.device.create_descriptor_pool(&pool_info, None) }
        .map_err(vk_error("failed to create descriptor pool"))
}

fn descriptor_type(range_type: DescriptorRangeType) -> vk::DescriptorType {
    match range_type {
        DescriptorRangeType::Cbv => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorRangeType::Srv => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorRangeType::Uav => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Bindings of the set for one root parameter.
fn parameter_bindings(
    index: usize,
    parameter: &RootParameter,
) -> Result<Vec<vk::DescriptorSetLayoutBinding<'static>>, GraphicsError> {
    let bindings: Vec<_> = match parameter {
        RootParameter::ConstantBuffer {
            register,
            visibility,
            ..
        } => vec![
            vk::DescriptorSetLayoutBinding::default()
                .binding(*register)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(convert_visibility(*visibility)),
        ],
        RootParameter::DescriptorTable { ranges, visibility } => ranges
            .iter()
            .map(|range| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(range.base_register)
                    .descriptor_type(descriptor_type(range.range_type))
                    .descriptor_count(range.count)
                    .stage_flags(convert_visibility(*visibility))
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    for binding in &bindings {
        if !seen.insert(binding.binding) {
            return Err(GraphicsError::RootSignature(format!(
                "parameter {index}: ranges of different kinds share register {}",
                binding.binding
            )));
        }
    }
    Ok(bindings)
}

fn create_sampler(
    shared: &VulkanShared,
    sampler: &StaticSampler,
) -> Result<vk::Sampler, GraphicsError> {
    let address_mode = convert_address_mode(sampler.address_mode);
    let anisotropic = sampler.filter == FilterMode::Anisotropic;
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(convert_filter_mode(sampler.filter))
        .min_filter(convert_filter_mode(sampler.filter))
        .mipmap_mode(convert_mipmap_filter_mode(sampler.filter))
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .anisotropy_enable(anisotropic)
        .max_anisotropy(if anisotropic {
            sampler.max_anisotropy.max(1) as f32
        } else {
            1.0
        })
        .compare_enable(sampler.comparison.is_some())
        .compare_op(
            sampler
                .comparison
                .map(convert_compare_function)
                .unwrap_or(vk::CompareOp::NEVER),
        )
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

    unsafe { shared.device.create_sampler(&create_info, None) }
        .map_err(vk_error("failed to create static sampler"))
}

/// A compiled binding layout.
pub struct VulkanPipelineLayout {
    shared: Arc<VulkanShared>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    layout: vk::PipelineLayout,
    samplers: Vec<vk::Sampler>,
}

impl VulkanPipelineLayout {
    pub(crate) fn new(
        shared: &Arc<VulkanShared>,
        desc: &RootSignatureDesc,
    ) -> Result<Self, GraphicsError> {
        let mut this = Self {
            shared: shared.clone(),
            set_layouts: Vec::with_capacity(desc.parameters.len() + 1),
            layout: vk::PipelineLayout::null(),
            samplers: Vec::with_capacity(desc.static_samplers.len()),
        };
        // Partially built objects are released by Drop on early return.

        for (index, parameter) in desc.parameters.iter().enumerate() {
            let bindings = parameter_bindings(index, parameter)?;
            let set_layout = create_set_layout(shared, &bindings)?;
            this.set_layouts.push(set_layout);
        }

        if !desc.static_samplers.is_empty() {
            for sampler in &desc.static_samplers {
                let created = create_sampler(shared, sampler)?;
                this.samplers.push(created);
            }
            let bindings: Vec<_> = desc
                .static_samplers
                .iter()
                .zip(&this.samplers)
                .map(|(sampler, created)| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(sampler.register)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .descriptor_count(1)
                        .stage_flags(convert_visibility(sampler.visibility))
                        .immutable_samplers(std::slice::from_ref(created))
                })
                .collect();
            let set_layout = create_set_layout(shared, &bindings)?;
            this.set_layouts.push(set_layout);
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&this.set_layouts);
        this.layout = unsafe { shared.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GraphicsError::RootSignature(format!("vkCreatePipelineLayout: {e:?}")))?;

        log::debug!(
            "Vulkan: created pipeline layout with {} sets and {} static samplers",
            this.set_layouts.len(),
            this.samplers.len()
        );
        Ok(this)
    }

    pub(crate) fn raw(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(crate) fn is_null(&self) -> bool {
        self.layout == vk::PipelineLayout::null()
    }
}

fn create_set_layout(
    shared: &VulkanShared,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    unsafe { shared.device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| GraphicsError::RootSignature(format!("vkCreateDescriptorSetLayout: {e:?}")))
}

impl Drop for VulkanPipelineLayout {
    fn drop(&mut self) {
        let device = &self.shared.device;
        unsafe {
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            for &set_layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(set_layout, None);
            }
            for &sampler in &self.samplers {
                device.destroy_sampler(sampler, None);
            }
        }
    }
}

/// A compiled graphics pipeline.
pub struct VulkanPipeline {
    shared: Arc<VulkanShared>,
    pipeline: vk::Pipeline,
}

impl VulkanPipeline {
    pub(crate) fn new(
        shared: &Arc<VulkanShared>,
        layout: &VulkanPipelineLayout,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<Self, GraphicsError> {
        let vertex_module = create_shader_module(shared, desc.vertex_shader.bytecode)?;
        let pixel_module = match create_shader_module(shared, desc.pixel_shader.bytecode) {
            Ok(module) => module,
            Err(e) => {
                unsafe { shared.device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        let result = build_pipeline(shared, layout, desc, vertex_module, pixel_module);

        unsafe {
            shared.device.destroy_shader_module(vertex_module, None);
            shared.device.destroy_shader_module(pixel_module, None);
        }

        let pipeline = result?;
        log::debug!("Vulkan: created pipeline '{}'", desc.label);
        Ok(Self {
            shared: shared.clone(),
            pipeline,
        })
    }

    pub(crate) fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub(crate) fn is_null(&self) -> bool {
        self.pipeline == vk::Pipeline::null()
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        if !self.is_null() {
            unsafe { self.shared.device.destroy_pipeline(self.pipeline, None) };
        }
    }
}

fn create_shader_module(
    shared: &VulkanShared,
    code: &[u32],
) -> Result<vk::ShaderModule, GraphicsError> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { shared.device.create_shader_module(&create_info, None) }.map_err(|e| {
        GraphicsError::PipelineCreationFailed(format!("failed to create shader module: {e:?}"))
    })
}

/// Vertex buffer bindings derived from the input layout, one per slot.
fn vertex_bindings(desc: &GraphicsPipelineDesc<'_>) -> Vec<vk::VertexInputBindingDescription> {
    let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
    for element in desc.input_layout {
        let end = element.aligned_byte_offset + element.format.size();
        let input_rate = match element.classification {
            InputClassification::PerVertex => vk::VertexInputRate::VERTEX,
            InputClassification::PerInstance => vk::VertexInputRate::INSTANCE,
        };
        match bindings.iter_mut().find(|b| b.binding == element.input_slot) {
            Some(binding) => binding.stride = binding.stride.max(end),
            None => bindings.push(
                vk::VertexInputBindingDescription::default()
                    .binding(element.input_slot)
                    .stride(end)
                    .input_rate(input_rate),
            ),
        }
    }
    bindings
}

/// Attribute locations follow the order of the input layout.
fn vertex_attributes(desc: &GraphicsPipelineDesc<'_>) -> Vec<vk::VertexInputAttributeDescription> {
    desc.input_layout
        .iter()
        .enumerate()
        .map(|(location, element)| {
            vk::VertexInputAttributeDescription::default()
                .location(location as u32)
                .binding(element.input_slot)
                .format(convert_vertex_format(element.format))
                .offset(element.aligned_byte_offset)
        })
        .collect()
}

fn build_pipeline(
    shared: &VulkanShared,
    layout: &VulkanPipelineLayout,
    desc: &GraphicsPipelineDesc<'_>,
    vertex_module: vk::ShaderModule,
    pixel_module: vk::ShaderModule,
) -> Result<vk::Pipeline, GraphicsError> {
    let entry_name = |name: &str| {
        CString::new(name).map_err(|e| {
            GraphicsError::InvalidParameter(format!("entry point name contains a NUL byte: {e}"))
        })
    };
    let vertex_entry = entry_name(desc.vertex_shader.entry_point)?;
    let pixel_entry = entry_name(desc.pixel_shader.entry_point)?;

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&vertex_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(pixel_module)
            .name(&pixel_entry),
    ];

    let binding_descriptions = vertex_bindings(desc);
    let attribute_descriptions = vertex_attributes(desc);
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(desc.topology))
        .primitive_restart_enable(false);

    // Dynamic viewport and scissor
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = &desc.rasterizer;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(!rasterizer.depth_clip)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_fill_mode(rasterizer.fill_mode))
        .line_width(1.0)
        .cull_mode(convert_cull_mode(rasterizer.cull_mode))
        .front_face(convert_front_face(rasterizer.front_face))
        .depth_bias_enable(false);

    let sample_mask = [desc.sample_mask];
    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(convert_sample_count(desc.sample_count))
        .sample_mask(&sample_mask);

    let depth = &desc.depth_stencil;
    let has_depth = desc.depth_stencil_format.is_some();
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(has_depth && depth.depth_test_enabled)
        .depth_write_enable(has_depth && depth.depth_write_enabled)
        .depth_compare_op(convert_compare_function(depth.depth_compare))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend = &desc.blend;
    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .render_target_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(blend.enabled)
                .src_color_blend_factor(convert_blend_factor(blend.color.src_factor))
                .dst_color_blend_factor(convert_blend_factor(blend.color.dst_factor))
                .color_blend_op(convert_blend_operation(blend.color.operation))
                .src_alpha_blend_factor(convert_blend_factor(blend.alpha.src_factor))
                .dst_alpha_blend_factor(convert_blend_factor(blend.alpha.dst_factor))
                .alpha_blend_op(convert_blend_operation(blend.alpha.operation))
                .color_write_mask(convert_color_writes(blend.write_mask))
        })
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    // Attachment formats as the device actually backs them.
    let color_attachment_formats: Vec<vk::Format> = desc
        .render_target_formats
        .iter()
        .map(|&format| shared.native_format(format))
        .collect();
    let depth_attachment_format = desc
        .depth_stencil_format
        .map(|format| shared.native_format(format))
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_attachment_format = match desc.depth_stencil_format {
        Some(format) if format.has_stencil() => depth_attachment_format,
        _ => vk::Format::UNDEFINED,
    };

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format)
        .stencil_attachment_format(stencil_attachment_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout.raw())
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        shared
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| {
        GraphicsError::PipelineCreationFailed(format!(
            "vkCreateGraphicsPipelines for '{}': {e:?}",
            desc.label
        ))
    })?;

    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::PipelineCreationFailed(format!("no pipeline returned for '{}'", desc.label))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root_signature::DescriptorRange;
    use crate::types::ShaderVisibility;

    #[test]
    fn test_table_bindings_follow_registers() {
        let parameter = RootParameter::DescriptorTable {
            ranges: vec![
                DescriptorRange::new(DescriptorRangeType::Srv, 0, 2),
                DescriptorRange::new(DescriptorRangeType::Cbv, 4, 1),
            ],
            visibility: ShaderVisibility::Pixel,
        };
        let bindings = parameter_bindings(0, &parameter).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_count, 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[1].binding, 4);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_cross_kind_register_collision_rejected() {
        let parameter = RootParameter::DescriptorTable {
            ranges: vec![
                DescriptorRange::new(DescriptorRangeType::Srv, 0, 1),
                DescriptorRange::new(DescriptorRangeType::Cbv, 0, 1),
            ],
            visibility: ShaderVisibility::All,
        };
        assert!(matches!(
            parameter_bindings(3, &parameter),
            Err(GraphicsError::RootSignature(_))
        ));
    }
}
