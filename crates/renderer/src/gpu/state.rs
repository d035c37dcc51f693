use std::sync::Arc;
use std::time::{Duration, Instant};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::compile::compile_program;
use crate::error::{StartError, UploadError};
use crate::runtime::FrameBackend;
use crate::types::{AdapterProfile, RendererConfig, SourceImage, TargetSize};

use super::context::GpuContext;
use super::pipeline::{create_distortion_pipeline, PipelineLayouts};
use super::resources::{create_quad_buffer, SourceTexture, QUAD_VERTICES};
use super::uniforms::DistortionUniforms;

/// Every GPU object one renderer instance owns. Dropping it releases them all.
pub(crate) struct GpuState {
    context: GpuContext,
    layouts: PipelineLayouts,
    pipeline: wgpu::RenderPipeline,
    quad: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    source: SourceTexture,
    source_bind_group: wgpu::BindGroup,
    frames_since_last_update: u32,
    last_fps_update: Instant,
    frame_count: u64,
}

impl GpuState {
    pub fn new<W>(target: Arc<W>, config: &RendererConfig) -> Result<Self, StartError>
    where
        W: HasDisplayHandle + HasWindowHandle + Send + Sync + 'static,
    {
        let context = GpuContext::new(target, config).map_err(StartError::context)?;
        let device = &context.device;

        let modules = compile_program(device)?;
        let layouts = PipelineLayouts::new(device);
        let pipeline =
            create_distortion_pipeline(device, &layouts, &modules, context.surface_format)?;

        let quad = create_quad_buffer(device);
        let uniforms = DistortionUniforms::from_parameters(&Default::default(), context.size);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("distortion uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let source = SourceTexture::new(device);
        let source_bind_group = layouts.source_bind_group(device, &source);

        debug!(
            size = %context.size,
            format = ?context.surface_format,
            "renderer resources ready"
        );

        Ok(Self {
            context,
            layouts,
            pipeline,
            quad,
            uniform_buffer,
            uniform_bind_group,
            source,
            source_bind_group,
            frames_since_last_update: 0,
            last_fps_update: Instant::now(),
            frame_count: 0,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.context.adapter_profile
    }

    fn record_frame(&mut self) {
        self.frame_count += 1;
        self.frames_since_last_update += 1;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_fps_update);
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames_since_last_update as f32 / elapsed.as_secs_f32();
            self.frames_since_last_update = 0;
            self.last_fps_update = now;
            debug!(fps = fps.round(), frame_count = self.frame_count, "render stats");
        }
    }
}

impl FrameBackend for GpuState {
    fn upload_source(&mut self, image: &SourceImage) -> Result<(), UploadError> {
        let max_dimension = self.context.max_texture_dimension();
        let reallocated = self.source.upload(
            &self.context.device,
            &self.context.queue,
            image,
            max_dimension,
        )?;
        if reallocated {
            self.source_bind_group = self
                .layouts
                .source_bind_group(&self.context.device, &self.source);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        target: TargetSize,
        uniforms: &DistortionUniforms,
    ) -> Result<(), wgpu::SurfaceError> {
        let frame = self.context.surface.get_current_texture()?;
        if frame.suboptimal {
            debug!("surface frame is suboptimal");
        }

        self.context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("render encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("distortion pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_viewport(
                0.0,
                0.0,
                target.width as f32,
                target.height as f32,
                0.0,
                1.0,
            );
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            render_pass.set_bind_group(1, &self.source_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.quad.slice(..));
            render_pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
        }

        self.context.queue.submit(Some(encoder.finish()));
        frame.present();
        self.record_frame();
        Ok(())
    }

    fn reconfigure(&mut self) {
        self.context.reconfigure();
    }
}
