//! Sampled textures used by the billboard, image and text primitives.

use crate::context::DeviceSession;
use crate::error::Result;
use crate::resource::{GpuObject, TrackedResource};
use image::RgbaImage;
use std::sync::OnceLock;

/// Number of mip levels of the particle billboard texture.
pub const BILLBOARD_TEXTURE_LEVELS: u32 = 8;

/// A GPU texture with its view, sampler and the bind group exposing them.
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub bind_group: wgpu::BindGroup,
    /// Texture dimensions (width, height).
    pub size: (u32, u32),
    _tracking: TrackedResource,
}

impl Texture {
    /// Creates an RGBA8 texture from explicit mip levels, level 0 first.
    ///
    /// # Arguments
    /// * `session` - The device session owning the texture
    /// * `label` - Debug label
    /// * `levels` - `(width, height, rgba bytes)` of every mip level
    /// * `sampler` - Sampler state
    pub fn from_levels(
        session: &DeviceSession,
        label: &str,
        levels: &[(u32, u32, &[u8])],
        sampler: &wgpu::SamplerDescriptor,
    ) -> Result<Texture> {
        let (width, height) = levels.first().map_or((1, 1), |l| (l.0.max(1), l.1.max(1)));
        let texture = session.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len().max(1) as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })?;

        for (mip_level, (w, h, data)) in levels.iter().enumerate() {
            session.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: mip_level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(w * 4),
                    rows_per_image: Some(*h),
                },
                wgpu::Extent3d {
                    width: *w,
                    height: *h,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = session.create_sampler(sampler);
        let bind_group = session.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: session.layouts().texture(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });
        let tracking = session.track(GpuObject::Texture(texture.clone()));

        Ok(Texture {
            texture,
            view,
            sampler,
            bind_group,
            size: (width, height),
            _tracking: tracking,
        })
    }

    /// Uploads an image as a single-level texture with linear filtering.
    pub fn from_image(session: &DeviceSession, label: &str, image: &RgbaImage) -> Result<Texture> {
        let (w, h) = image.dimensions();
        let blank = [0u8; 4];
        let level: (u32, u32, &[u8]) = if w == 0 || h == 0 {
            (1, 1, &blank)
        } else {
            (w, h, image.as_raw())
        };
        Self::from_levels(
            session,
            label,
            &[level],
            &wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            },
        )
    }

    /// Creates a texture instance of the shared particle billboard.
    pub fn billboard(session: &DeviceSession) -> Result<Texture> {
        let images = billboard_images();
        let levels: Vec<(u32, u32, &[u8])> = images
            .iter()
            .map(|(res, data)| (*res, *res, bytemuck::cast_slice::<[u8; 4], u8>(data)))
            .collect();
        Self::from_levels(
            session,
            "particle_billboard",
            &levels,
            &wgpu::SamplerDescriptor {
                label: Some("particle_billboard_sampler"),
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                lod_max_clamp: (BILLBOARD_TEXTURE_LEVELS - 3) as f32,
                ..Default::default()
            },
        )
    }
}

/// The mip pyramid of the billboard texture, generated once per process.
///
/// Channel 0 holds the diffuse brightness of a lit sphere seen head-on,
/// channel 1 the specular highlight (zero outside the unit disk), channels 2
/// and 3 are saturated.
pub fn billboard_images() -> &'static [(u32, Vec<[u8; 4]>)] {
    static IMAGES: OnceLock<Vec<(u32, Vec<[u8; 4]>)>> = OnceLock::new();
    IMAGES.get_or_init(|| {
        (0..BILLBOARD_TEXTURE_LEVELS)
            .map(|level| {
                let resolution = 1u32 << (BILLBOARD_TEXTURE_LEVELS - level - 1);
                let texels = (0..resolution * resolution)
                    .map(|i| billboard_texel(i % resolution, i / resolution, resolution))
                    .collect();
                (resolution, texels)
            })
            .collect()
    })
}

fn billboard_texel(x: u32, y: u32, resolution: u32) -> [u8; 4] {
    // The smallest level has a single texel: integer halving keeps it at the center.
    let half = (resolution / 2).max(1) as f32;
    let rx = (x as f32 - (resolution / 2) as f32 + 0.5) / half;
    let ry = (y as f32 - (resolution / 2) as f32 + 0.5) / half;
    let r2 = rx * rx + ry * ry;
    let r2_clamped = r2.min(1.0);
    let diffuse = (1.0 - r2_clamped).sqrt() * 0.6 + 0.4;

    let specular = if r2 < 1.0 {
        let sx = rx + 0.6883;
        let sy = ry + 0.982;
        let mut s = (1.0 - (sx * sx + sy * sy)).max(0.0);
        s *= s;
        s *= s * (1.0 - r2_clamped * r2_clamped);
        (s.min(1.0) * 255.0) as u8
    } else {
        0
    };

    [(diffuse.min(1.0) * 255.0) as u8, specular, 255, 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pyramid_has_power_of_two_levels() {
        let images = billboard_images();
        assert_eq!(images.len(), BILLBOARD_TEXTURE_LEVELS as usize);
        assert_eq!(images[0].0, 128);
        assert_eq!(images.last().map(|l| l.0), Some(1));
        for (res, texels) in images {
            assert_eq!(texels.len(), (res * res) as usize);
        }
    }

    #[test]
    fn center_is_bright_and_rim_is_dim() {
        let (res, texels) = &billboard_images()[0];
        let center = texels[(res / 2 * res + res / 2) as usize];
        assert!(center[0] >= 250);
        assert_eq!(center[3], 255);

        let corner = texels[0];
        assert_eq!(corner[0], (0.4f32 * 255.0) as u8);
        assert_eq!(corner[1], 0);
        assert_eq!(&corner[2..], &[255, 255]);
    }

    #[test]
    fn highlight_sits_in_one_quadrant() {
        let (res, texels) = &billboard_images()[0];
        let at = |x: u32, y: u32| texels[(y * res + x) as usize][1];
        // The highlight is centered near (-0.69, -0.98) in normalized coordinates.
        let lit = at(res / 4, res / 8);
        let unlit = at(3 * res / 4, 7 * res / 8);
        assert!(lit > unlit);
        assert_eq!(unlit, 0);
    }
}
