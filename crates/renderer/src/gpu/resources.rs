use bytemuck::{Pod, Zeroable};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::error::UploadError;
use crate::types::SourceImage;

const SOURCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const BYTES_PER_PIXEL: u32 = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

const fn vertex(x: f32, y: f32, u: f32, v: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y],
        tex_coord: [u, v],
    }
}

/// Two triangles covering clip space, texcoords spanning the unit square.
pub(crate) const QUAD_VERTICES: [QuadVertex; 6] = [
    vertex(-1.0, -1.0, 0.0, 0.0),
    vertex(1.0, -1.0, 1.0, 0.0),
    vertex(-1.0, 1.0, 0.0, 1.0),
    vertex(-1.0, 1.0, 0.0, 1.0),
    vertex(1.0, -1.0, 1.0, 0.0),
    vertex(1.0, 1.0, 1.0, 1.0),
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

pub(crate) fn quad_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

/// Uploads the static quad. Never rewritten afterwards.
pub(crate) fn create_quad_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("fullscreen quad"),
        contents: bytemuck::cast_slice(&QUAD_VERTICES),
        usage: wgpu::BufferUsages::VERTEX,
    })
}

/// Converts a source frame to tightly packed RGBA8 rows, bottom row first.
pub(crate) fn stage_pixels(
    source: &SourceImage,
    max_dimension: u32,
) -> Result<RgbaImage, UploadError> {
    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(UploadError::Empty);
    }
    if width > max_dimension || height > max_dimension {
        return Err(UploadError::TooLarge {
            width,
            height,
            max: max_dimension,
        });
    }
    let mut rgba = source.image().to_rgba8();
    flip_vertical_in_place(&mut rgba);
    Ok(rgba)
}

struct StagedPixels {
    generation: u64,
    pixels: RgbaImage,
}

/// The single source texture sampled by the fragment stage.
///
/// Storage is reallocated only when the incoming frame's dimensions differ from
/// the current ones; otherwise every upload overwrites the whole texture in place.
pub(crate) struct SourceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    extent: (u32, u32),
    staged: Option<StagedPixels>,
}

impl SourceTexture {
    /// Starts with 1x1 transparent storage so the bind group is always valid.
    pub fn new(device: &wgpu::Device) -> Self {
        let (texture, view) = create_storage(device, 1, 1);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("source sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            texture,
            view,
            sampler,
            extent: (1, 1),
            staged: None,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Writes `source` into the texture.
    ///
    /// Returns `true` when storage was reallocated, meaning bind groups holding the
    /// old view must be rebuilt. Conversion is cached per source generation.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &SourceImage,
        max_dimension: u32,
    ) -> Result<bool, UploadError> {
        let stale = self
            .staged
            .as_ref()
            .map_or(true, |staged| staged.generation != source.generation());
        if stale {
            let pixels = stage_pixels(source, max_dimension)?;
            self.staged = Some(StagedPixels {
                generation: source.generation(),
                pixels,
            });
        }
        let Some(staged) = self.staged.as_ref() else {
            return Err(UploadError::Empty);
        };

        let (width, height) = staged.pixels.dimensions();
        let reallocated = self.extent != (width, height);
        if reallocated {
            let (texture, view) = create_storage(device, width, height);
            self.texture = texture;
            self.view = view;
            self.extent = (width, height);
            tracing::debug!(width, height, "reallocated source texture");
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            staged.pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * BYTES_PER_PIXEL),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(reallocated)
    }
}

fn create_storage(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("source texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SOURCE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};

    #[test]
    fn quad_covers_clip_space_with_matching_texcoords() {
        for vertex in QUAD_VERTICES {
            let [x, y] = vertex.position;
            assert_eq!(vertex.tex_coord, [(x + 1.0) / 2.0, (y + 1.0) / 2.0]);
        }
        let corners: Vec<[f32; 2]> = QUAD_VERTICES.iter().map(|v| v.position).collect();
        for corner in [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]] {
            assert!(corners.contains(&corner));
        }
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
        assert_eq!(QUAD_ATTRIBUTES[1].offset, 8);
        assert_eq!(QUAD_ATTRIBUTES[1].shader_location, 1);
    }

    #[test]
    fn staging_converts_to_rgba_bottom_row_first() {
        let gray = GrayImage::from_fn(2, 3, |_, y| Luma([(y * 100) as u8]));
        let source = SourceImage::new(DynamicImage::ImageLuma8(gray));
        let staged = stage_pixels(&source, 4096).unwrap();
        assert_eq!(staged.dimensions(), (2, 3));
        assert_eq!(staged.get_pixel(0, 0).0, [200, 200, 200, 255]);
        assert_eq!(staged.get_pixel(1, 2).0, [0, 0, 0, 255]);
        assert_eq!(staged.as_raw().len(), 2 * 3 * 4);
    }

    #[test]
    fn staging_rejects_empty_and_oversized_sources() {
        let empty = SourceImage::new(DynamicImage::ImageRgba8(RgbaImage::new(0, 5)));
        assert_eq!(stage_pixels(&empty, 4096), Err(UploadError::Empty));

        let wide = SourceImage::new(DynamicImage::ImageRgba8(RgbaImage::new(9, 2)));
        assert_eq!(
            stage_pixels(&wide, 8),
            Err(UploadError::TooLarge {
                width: 9,
                height: 2,
                max: 8
            })
        );
    }
}
