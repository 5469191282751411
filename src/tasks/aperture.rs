//! Aperture Task
//!
//! Renders the single-channel aperture mask: a smooth bladed polygon plus
//! optional grating, scratch, dust and image-overlay layers, composed
//! additively by one kernel launch each. The ghost variant runs with zero
//! parallax; the starburst variant shifts the wear layers with the light
//! position.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, DeviceImage, ImageData, ShaderDefines};
use crate::data::Aperture;
use crate::errors::{FlareError, Result};
use crate::fingerprint::FingerprintBuilder;
use crate::tasks::workgroups_2d;
use crate::utils::timing::scope_timer;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ApertureParams {
    resolution: [i32; 2],
    parallax: [f32; 2],

    size: f32,
    blades: f32,
    roundness: f32,
    rotation: f32,

    softness: f32,
    grating_strength: f32,
    grating_density: f32,
    grating_length: f32,

    grating_width: f32,
    grating_softness: f32,
    scratch_strength: f32,
    scratch_density: f32,

    scratch_length: f32,
    scratch_width: f32,
    scratch_rotation: f32,
    scratch_rotation_var: f32,

    scratch_softness: f32,
    dust_strength: f32,
    dust_density: f32,
    dust_radius: f32,

    dust_softness: f32,
    image_strength: f32,
    image_size: f32,
    scratch_parallax: f32,

    overlay_dims: [i32; 2],
    dust_parallax: f32,
    pad0: f32,
}

pub struct ApertureTask {
    images: MemoCache<DeviceImage>,
    files: MemoCache<ImageData>,
}

impl ApertureTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: MemoCache::new(10),
            files: MemoCache::new(10),
        }
    }

    /// Loads an external mask image: single channel, resized to the mask
    /// resolution, thresholded to a binary mask unless `threshold == 1`.
    fn load_file(
        &self,
        path: &str,
        resolution: [u32; 2],
        threshold: f32,
    ) -> Result<Arc<ImageData>> {
        let key = FingerprintBuilder::new()
            .with(&path)
            .with(&resolution)
            .with(&threshold)
            .finish();
        self.files.get_or_try_insert_with(key, || {
            let image = image::open(path)
                .map_err(|e| FlareError::BadApertureImage(format!("{path}: {e}")))?
                .to_luma32f();
            let resized = image::imageops::resize(
                &image,
                resolution[0],
                resolution[1],
                image::imageops::FilterType::Triangle,
            );
            let mut data: Vec<f32> = resized.into_raw();
            if threshold != 1.0 {
                for value in &mut data {
                    *value = if *value >= threshold { 1.0 } else { 0.0 };
                }
            }
            Ok(ImageData {
                data,
                width: resolution[0],
                height: resolution[1],
                channels: 1,
                layers: 1,
            })
        })
    }

    /// Renders the mask at `resolution`. `parallax` is the per-layer
    /// sample offset: zero for the ghost mask, `light.position * parallax`
    /// for the starburst mask.
    pub fn run(
        &self,
        ctx: &ComputeContext,
        config: &Aperture,
        resolution: [u32; 2],
        parallax: [f32; 2],
    ) -> Result<Arc<DeviceImage>> {
        let _t = scope_timer("aperture");

        let has_overlay = config.image.strength > 0.0 && !config.image.file.is_empty();
        let overlay = if has_overlay {
            Some(self.load_file(&config.image.file, resolution, config.image.threshold)?)
        } else {
            None
        };

        let defines = ShaderDefines::new();
        let (shape, kernel_hash) = ctx.compute_pipeline("aperture", &defines, "shape")?;

        let key = FingerprintBuilder::new()
            .with(config)
            .with(&resolution)
            .with(&parallax)
            .with(&kernel_hash)
            .finish();

        self.images.get_or_try_insert_with(key, || {
            let [width, height] = resolution;
            let mask = ctx.alloc_image("Aperture Mask", width, height, 1)?;

            let overlay_dims = overlay
                .as_ref()
                .map_or([1, 1], |o| [o.width as i32, o.height as i32]);
            let overlay_buffer = match &overlay {
                Some(data) => ctx.storage_buffer_init("Aperture Overlay", &data.data),
                // kernels with unused overlay bindings still want a buffer
                None => ctx.storage_buffer_init("Aperture Overlay", &[0.0f32]),
            };

            let params = ApertureParams {
                resolution: [width as i32, height as i32],
                parallax,
                size: config.shape.size,
                blades: config.shape.blades as f32,
                roundness: config.shape.roundness,
                rotation: config.shape.rotation,
                softness: config.shape.softness,
                grating_strength: config.grating.strength,
                grating_density: config.grating.density,
                grating_length: config.grating.length,
                grating_width: config.grating.width,
                grating_softness: config.grating.softness,
                scratch_strength: config.scratches.strength,
                scratch_density: config.scratches.density,
                scratch_length: config.scratches.length,
                scratch_width: config.scratches.width,
                scratch_rotation: config.scratches.rotation,
                scratch_rotation_var: config.scratches.rotation_variation,
                scratch_softness: config.scratches.softness,
                dust_strength: config.dust.strength,
                dust_density: config.dust.density,
                dust_radius: config.dust.radius,
                dust_softness: config.dust.softness,
                image_strength: config.image.strength,
                image_size: config.image.size,
                scratch_parallax: config.scratches.parallax,
                overlay_dims,
                dust_parallax: config.dust.parallax,
                pad0: 0.0,
            };
            let params_buffer = ctx.uniform_buffer("Aperture Params", &params);
            let workgroups = workgroups_2d(width, height);

            let base_bindings = [
                (0, mask.buffer.binding()),
                (1, params_buffer.binding()),
            ];
            ctx.dispatch("aperture shape", &shape, &base_bindings, workgroups);

            if config.grating.strength > 0.0 {
                let (pipeline, _) = ctx.compute_pipeline("aperture", &defines, "grating")?;
                ctx.dispatch("aperture grating", &pipeline, &base_bindings, workgroups);
            }
            if config.scratches.strength > 0.0 {
                let (pipeline, _) = ctx.compute_pipeline("aperture", &defines, "scratches")?;
                ctx.dispatch("aperture scratches", &pipeline, &base_bindings, workgroups);
            }
            if config.dust.strength > 0.0 {
                let (pipeline, _) = ctx.compute_pipeline("aperture", &defines, "dust")?;
                ctx.dispatch("aperture dust", &pipeline, &base_bindings, workgroups);
            }
            if overlay.is_some() {
                let (pipeline, _) = ctx.compute_pipeline("aperture", &defines, "image_overlay")?;
                let bindings = [
                    (0, mask.buffer.binding()),
                    (1, params_buffer.binding()),
                    (2, overlay_buffer.binding()),
                ];
                ctx.dispatch("aperture overlay", &pipeline, &bindings, workgroups);
            }

            Ok(mask)
        })
    }
}

impl Default for ApertureTask {
    fn default() -> Self {
        Self::new()
    }
}
