//! Rasterizing Task
//!
//! Turns a traced ray buffer into the flare image. Four kernels run back
//! to back on the queue: primitive shader (bounds + spectral intensity),
//! vertex shader, tile binner and the binned per-pixel rasterizer with
//! spectral integration. Binning keeps the per-pixel cost sublinear in
//! primitive count; batches of 255 primitives share one 256-bit mask per
//! tile so the inner loop walks set bits instead of branching per
//! primitive.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, DeviceImage, ShaderDefines};
use crate::data::Render;
use crate::errors::Result;
use crate::fingerprint::FingerprintBuilder;
use crate::spectrum::{LAMBDA_MAX, LAMBDA_MIN, light_spectrum};
use crate::tasks::raytracing::RayBuffer;
use crate::tasks::{GpuVertex, workgroups_2d};
use crate::utils::timing::scope_timer;
use crate::worker::CancelToken;

/// Primitives per bitmask batch; bit 0 of each mask is the non-empty flag.
pub const BATCH_PRIMITIVE_COUNT: u32 = 255;
const BATCH_WORDS: u64 = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RasterParams {
    resolution: [i32; 2],
    bin_dims: [i32; 2],
    ghost_size: [u32; 2],
    grid_count: u32,
    wavelength_count: u32,
    wavelength_sub_count: u32,
    batch_count: u32,
    path_count: u32,
    sub_steps: u32,
    spectrum_len: u32,
    ghost_layers: u32,
    area_orig: f32,
    rel_min_area: f32,
    screen_transform: f32,
    intensity: f32,
    fstop_scale: f32,
    pad0: f32,
    pad1: f32,
    pad2: f32,
}

/// y offsets of the n-rook sub-sample patterns, per anti-aliasing factor.
fn sub_offsets(sub_steps: u32) -> &'static [u32] {
    match sub_steps {
        2 => &[1, 0],
        4 => &[1, 2, 0, 3],
        8 => &[4, 1, 6, 2, 5, 0, 3, 7],
        _ => &[0],
    }
}

pub struct RasterizingTask {
    images: MemoCache<DeviceImage>,
}

impl RasterizingTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: MemoCache::new(1),
        }
    }

    /// Rasterizes the traced ghosts against the ghost ringing image.
    /// A missing ray buffer yields a black image without error.
    pub fn run(
        &self,
        ctx: &ComputeContext,
        render: &Render,
        rays: Option<&Arc<RayBuffer>>,
        ghost: &Arc<DeviceImage>,
        sensor_size: [f32; 2],
        min_area: f32,
        intensity: f32,
        fstop: f32,
        cancel: &CancelToken,
    ) -> Result<Arc<DeviceImage>> {
        let _t = scope_timer("rasterizing");

        let [width, height] = render.resolution;
        let Some(rays) = rays else {
            let key = FingerprintBuilder::new().with(&render.resolution).finish();
            return self
                .images
                .get_or_try_insert_with(key, || ctx.alloc_image("Flare", width, height, 4));
        };

        let sub_steps = match render.anti_aliasing {
            2 | 4 | 8 => render.anti_aliasing,
            _ => 1,
        };
        let bin_size = render.bin_size.max(8);
        let offsets: Vec<String> = sub_offsets(sub_steps)
            .iter()
            .map(|o| format!("{o}.0"))
            .collect();

        let defines = ShaderDefines::new()
            .with("bin_size", bin_size)
            .with("lambda_min", LAMBDA_MIN as u32)
            .with("lambda_max", LAMBDA_MAX as u32)
            .with("sub_steps", sub_steps)
            .with("sub_offsets", offsets.join(", ").as_str());

        let (prim_shader, kernel_hash) =
            ctx.compute_pipeline("rasterizing", &defines, "prim_shader")?;
        let (vertex_shader, _) = ctx.compute_pipeline("rasterizing", &defines, "vertex_shader")?;
        let (binner, _) = ctx.compute_pipeline("rasterizing", &defines, "binner")?;
        let (rasterizer, _) = ctx.compute_pipeline("rasterizing", &defines, "rasterizer")?;

        let ghost_host = ghost.to_host(ctx)?;
        let key = FingerprintBuilder::new()
            .with(&rays.fingerprint)
            .with(render)
            .with(&sensor_size)
            .with(&min_area)
            .with(&intensity)
            .with(&fstop)
            .with(&ghost_host.content_hash())
            .with(&kernel_hash)
            .finish();

        if let Some(cached) = self.images.get(key) {
            return Ok(cached);
        }
        cancel.check()?;

        // geometry of the launch
        let grid_count = rays.grid_count;
        let path_count = rays.path_count();
        let wavelength_count = rays.wavelength_count;
        let ray_count = rays.ray_count();
        let quad_count = (grid_count - 1) * (grid_count - 1);
        let primitive_count = path_count * quad_count;
        let batch_count = primitive_count.div_ceil(BATCH_PRIMITIVE_COUNT);
        let bin_dims = [
            width.div_ceil(bin_size) as i32,
            height.div_ceil(bin_size) as i32,
        ];
        let bin_count = (bin_dims[0] * bin_dims[1]) as u64;

        let quad_length = render.grid_length / (grid_count - 1) as f32;
        let area_orig = quad_length * quad_length;
        let sensor_half_diagonal = sensor_size[0].hypot(sensor_size[1]) / 2.0;
        let screen_transform = width as f32 / sensor_half_diagonal;

        let spectrum = light_spectrum();
        let params = RasterParams {
            resolution: [width as i32, height as i32],
            bin_dims,
            ghost_size: [ghost.width, ghost.height],
            grid_count,
            wavelength_count,
            wavelength_sub_count: render.wavelength_sub_count.max(1),
            batch_count,
            path_count,
            sub_steps,
            spectrum_len: spectrum.len() as u32,
            ghost_layers: ghost.layers.max(1),
            area_orig,
            rel_min_area: min_area * area_orig,
            screen_transform,
            intensity: intensity * 1e3,
            fstop_scale: (1.0 - fstop / 32.0).max(0.0),
            pad0: 0.0,
            pad1: 0.0,
            pad2: 0.0,
        };
        let params_buffer = ctx.uniform_buffer("Raster Params", &params);
        let spectrum_buffer = ctx.storage_buffer_init("Light Spectrum", &spectrum);

        let bounds = ctx.storage_buffer_zeroed("Prim Bounds", u64::from(primitive_count) * 16)?;
        let intensity_buffer = ctx.storage_buffer_zeroed(
            "Prim Intensity",
            u64::from(primitive_count) * u64::from(wavelength_count) * 4,
        )?;
        let vertexes = ctx.storage_buffer_zeroed(
            "Vertexes",
            u64::from(path_count)
                * u64::from(ray_count)
                * u64::from(wavelength_count)
                * std::mem::size_of::<GpuVertex>() as u64,
        )?;
        let bin_queues =
            ctx.storage_buffer_zeroed("Bin Queues", bin_count * u64::from(batch_count) * BATCH_WORDS * 4)?;

        let image = ctx.alloc_image("Flare", width, height, 4)?;

        // Stage A: primitive shader
        ctx.dispatch(
            "prim_shader",
            &prim_shader,
            &[
                (0, params_buffer.binding()),
                (1, rays.buffer.binding()),
                (2, bounds.binding()),
                (3, intensity_buffer.binding()),
            ],
            [quad_count.div_ceil(64), path_count, 1],
        );
        cancel.check()?;

        // Stage B: vertex shader
        ctx.dispatch(
            "vertex_shader",
            &vertex_shader,
            &[
                (0, params_buffer.binding()),
                (1, rays.buffer.binding()),
                (3, intensity_buffer.binding()),
                (4, vertexes.binding()),
            ],
            [ray_count.div_ceil(64), wavelength_count, path_count],
        );
        cancel.check()?;

        // Stage C: binner, one workgroup per batch
        ctx.dispatch(
            "binner",
            &binner,
            &[
                (0, params_buffer.binding()),
                (2, bounds.binding()),
                (5, bin_queues.binding()),
            ],
            [batch_count, 1, 1],
        );
        cancel.check()?;

        // Stage D: rasterizer
        ctx.dispatch(
            "rasterizer",
            &rasterizer,
            &[
                (0, params_buffer.binding()),
                (4, vertexes.binding()),
                (5, bin_queues.binding()),
                (6, ghost.buffer.binding()),
                (7, spectrum_buffer.binding()),
                (8, image.buffer.binding()),
            ],
            workgroups_2d(width, height),
        );

        self.images.get_or_try_insert_with(key, || Ok(image))
    }
}

impl Default for RasterizingTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rook_patterns_permute_their_range() {
        for steps in [1u32, 2, 4, 8] {
            let offsets = sub_offsets(steps);
            assert_eq!(offsets.len(), steps as usize);
            let mut sorted: Vec<u32> = offsets.to_vec();
            sorted.sort_unstable();
            let expected: Vec<u32> = (0..steps).collect();
            assert_eq!(sorted, expected);
        }
    }

    #[test]
    fn batch_counts_round_up() {
        assert_eq!(255u32.div_ceil(BATCH_PRIMITIVE_COUNT), 1);
        assert_eq!(256u32.div_ceil(BATCH_PRIMITIVE_COUNT), 2);
    }
}
