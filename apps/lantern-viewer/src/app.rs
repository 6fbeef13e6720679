//! Viewer application.

use crate::args::ViewerArgs;
use ash::vk;
use glam::Mat4;
use lantern_app::{AppContext, FrameInfo, LanternApp};
use lantern_gpu::{
    push_pod, DescriptorPool, DescriptorSetLayoutBuilder, DeviceContext, DrawSurface, Drawable,
    GraphicsPipeline, GraphicsPipelineConfig, PerFrameUniforms,
};
use lantern_scene::{
    model_push_constant_range, Camera, CameraUniforms, Mesh, MeshData, Model, Texture, Vertex,
    TEXTURE_BINDING, TEXTURE_SET,
};
use tracing::{info, warn};

const CAMERA_SET: u32 = 0;
const CAMERA_BINDING: u32 = 0;
const MAX_TEXTURES: u32 = 256;
/// Radians per second around the Z axis.
const SPIN_SPEED: f32 = std::f32::consts::FRAC_PI_2;

/// What the viewer draws.
enum Content {
    Quad {
        mesh: Mesh,
        texture: Texture,
        transform: Mat4,
    },
    Model(Model),
}

impl Content {
    fn quad(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> anyhow::Result<Self> {
        let data = MeshData {
            vertices: vec![
                Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]),
                Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
                Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
                Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        };
        let mut texture = Texture::white(ctx, pool, layout)?;
        let mesh = match Mesh::upload(ctx, &data, "quad") {
            Ok(mesh) => mesh,
            Err(e) => {
                if let Err(cleanup) = texture.destroy(ctx, pool) {
                    warn!("Failed to release quad texture: {cleanup}");
                }
                return Err(e.into());
            }
        };
        Ok(Self::Quad {
            mesh,
            texture,
            transform: Mat4::IDENTITY,
        })
    }

    fn set_transform(&mut self, value: Mat4) {
        match self {
            Self::Quad { transform, .. } => *transform = value,
            Self::Model(model) => model.set_transform(value),
        }
    }

    fn destroy(&mut self, ctx: &DeviceContext, pool: &DescriptorPool) -> anyhow::Result<()> {
        match self {
            Self::Quad { mesh, texture, .. } => {
                let released = mesh.destroy(ctx);
                texture.destroy(ctx, pool)?;
                released?;
            }
            Self::Model(model) => model.destroy(ctx, pool)?,
        }
        Ok(())
    }
}

impl Drawable for Content {
    fn record(&self, surface: &mut dyn DrawSurface) -> lantern_gpu::Result<()> {
        match self {
            Self::Quad {
                mesh,
                texture,
                transform,
            } => {
                surface.bind_descriptor_sets(TEXTURE_SET, &[texture.descriptor_set()])?;
                push_pod(
                    surface,
                    vk::ShaderStageFlags::VERTEX,
                    &transform.to_cols_array(),
                )?;
                mesh.record(surface)
            }
            Self::Model(model) => model.record(surface),
        }
    }
}

pub struct Viewer {
    camera: Camera,
    camera_layout: vk::DescriptorSetLayout,
    texture_layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    uniforms: PerFrameUniforms<CameraUniforms>,
    pipeline: GraphicsPipeline,
    content: Content,
}

impl LanternApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let args = ViewerArgs::from_env()?;
        let device = ctx.device();
        let slots = ctx.frames_in_flight();

        let camera_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(CAMERA_BINDING, vk::ShaderStageFlags::VERTEX)
                .build(device.device())
        }?;
        let texture_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .combined_image_sampler(TEXTURE_BINDING, vk::ShaderStageFlags::FRAGMENT)
                .build(device.device())
        }?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slots as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_TEXTURES,
            },
        ];
        let pool = unsafe {
            DescriptorPool::new(device.device(), slots as u32 + MAX_TEXTURES, &pool_sizes)
        }?;

        let uniforms = PerFrameUniforms::new(device, &pool, camera_layout, CAMERA_BINDING, slots)?;

        let config = GraphicsPipelineConfig {
            vertex_shader: lantern_shaders::mesh_vertex_shader().to_vec(),
            fragment_shader: lantern_shaders::mesh_fragment_shader().to_vec(),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: ctx.engine().config().depth,
            depth_write: ctx.engine().config().depth,
            ..Default::default()
        };
        let pipeline = unsafe {
            GraphicsPipeline::new(
                device.device(),
                ctx.engine().render_pass(),
                &config,
                &[camera_layout, texture_layout],
                &[model_push_constant_range()],
            )
        }?;

        let content = match &args.model {
            Some(path) => {
                info!("Loading {}", path.display());
                Content::Model(Model::load(device, &pool, texture_layout, path)?)
            }
            None => Content::quad(device, &pool, texture_layout)?,
        };

        ctx.engine_mut().set_pipeline(pipeline.binding());

        let mut camera = Camera::default();
        let extent = ctx.extent();
        camera.set_aspect_from_extent(extent.width, extent.height);
        camera.far = 100.0;

        Ok(Self {
            camera,
            camera_layout,
            texture_layout,
            pool,
            uniforms,
            pipeline,
            content,
        })
    }

    fn update(&mut self, ctx: &AppContext, _dt: f32) {
        self.content
            .set_transform(Mat4::from_rotation_z(ctx.elapsed() * SPIN_SPEED));
    }

    fn render(&mut self, _frame: &FrameInfo, surface: &mut dyn DrawSurface) -> anyhow::Result<()> {
        let extent = surface.extent();
        self.camera.set_aspect_from_extent(extent.width, extent.height);

        let slot = surface.slot_index();
        self.uniforms.write(slot, &self.camera.uniforms())?;
        surface.bind_descriptor_sets(CAMERA_SET, &[self.uniforms.descriptor_set(slot)?])?;
        self.content.record(surface)?;
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        ctx.engine_mut().clear_pipeline();
        let device = ctx.device();
        if let Err(e) = self.content.destroy(device, &self.pool) {
            warn!("Failed to release viewer content: {e:#}");
        }
        if let Err(e) = self.uniforms.destroy(device, &self.pool) {
            warn!("Failed to release camera uniforms: {e}");
        }
        unsafe {
            self.pipeline.destroy(device.device());
            self.pool.destroy(device.device());
            device
                .device()
                .destroy_descriptor_set_layout(self.texture_layout, None);
            device
                .device()
                .destroy_descriptor_set_layout(self.camera_layout, None);
        }
    }
}
