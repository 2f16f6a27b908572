//! Graphics pipelines and their layouts
//!
//! Pipelines built here leave viewport and scissor dynamic; the frame loop
//! sets both when it records each command buffer, so a resize never forces
//! pipeline recreation.

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Create a layout from its bindings
    pub fn new(device: &Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let layout = unsafe {
            device.handle().create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device: Arc::clone(device), layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pipeline layout with RAII cleanup
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// Create a layout from set layouts and push constant ranges
    pub fn new(
        device: &Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe {
            device.handle().create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device: Arc::clone(device),
            layout,
            push_constant_ranges: push_constant_ranges.to_vec(),
        })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Push constant ranges the layout was created with
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Fixed-function and shader state for [`Pipeline::graphics`]
#[derive(Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    /// Render pass the pipeline draws in
    pub render_pass: vk::RenderPass,
    /// Subpass index within `render_pass`
    pub subpass: u32,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Shader stages
    pub stages: &'a [vk::PipelineShaderStageCreateInfo],
    /// Vertex buffer bindings
    pub bindings: &'a [vk::VertexInputBindingDescription],
    /// Vertex attributes
    pub attributes: &'a [vk::VertexInputAttributeDescription],
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Enable depth testing and writing
    pub depth_test: bool,
    /// Enable standard alpha blending
    pub blend: bool,
}

impl<'a> GraphicsPipelineDesc<'a> {
    /// Triangle list, back-face culling, counter-clockwise front faces and depth testing
    pub fn new(
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        stages: &'a [vk::PipelineShaderStageCreateInfo],
    ) -> Self {
        Self {
            render_pass,
            subpass: 0,
            layout,
            stages,
            bindings: &[],
            attributes: &[],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            blend: false,
        }
    }

    /// Set the vertex input layout
    pub fn with_vertex_input(
        mut self,
        bindings: &'a [vk::VertexInputBindingDescription],
        attributes: &'a [vk::VertexInputAttributeDescription],
    ) -> Self {
        self.bindings = bindings;
        self.attributes = attributes;
        self
    }

    /// Set the primitive topology
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cull mode
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set the subpass index
    pub fn with_subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    /// Enable or disable depth testing
    pub fn with_depth_test(mut self, enabled: bool) -> Self {
        self.depth_test = enabled;
        self
    }

    /// Enable or disable alpha blending
    pub fn with_blend(mut self, enabled: bool) -> Self {
        self.blend = enabled;
        self
    }
}

/// Pipeline with RAII cleanup
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Create a graphics pipeline through the device pipeline cache
    pub fn graphics(device: &Arc<Device>, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<Self> {
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.bindings)
            .vertex_attribute_descriptions(desc.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(desc.blend)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();
        let color_blend_attachments = [color_blend_attachment];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(desc.stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(desc.subpass)
            .build();

        let cache = device.pipeline_cache()?;
        let pipeline = unsafe {
            device.handle()
                .create_graphics_pipelines(cache, &[pipeline_info], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        }
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InvalidOperation {
            reason: "pipeline creation returned nothing".to_string(),
        })?;

        log::debug!("Created graphics pipeline ({:?}, cull {:?})", desc.topology, desc.cull_mode);
        Ok(Self {
            device: Arc::clone(device),
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Bind point the pipeline is used at
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
    }
}
