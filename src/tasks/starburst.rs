//! Starburst Task
//!
//! Far-field (Fraunhofer) diffraction of the aperture, the radial streak
//! pattern around a bright light. The power spectrum
//! `|FFT2(aperture * E)|²` with the quadratic pupil phase `E` is computed
//! host-side at the reference wavelength and sampled chromatically on the
//! device ([Ritschel et al. 2009] §4).

use std::f64::consts::PI;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use num_complex::Complex;

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, DeviceImage, ImageData, ShaderDefines};
use crate::data::Starburst;
use crate::errors::Result;
use crate::fingerprint::FingerprintBuilder;
use crate::fourier::{fft2, fftshift};
use crate::spectrum::{LAMBDA_MAX, LAMBDA_MID, LAMBDA_MIN, light_spectrum};
use crate::tasks::workgroups_2d;
use crate::utils::timing::scope_timer;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct StarburstParams {
    resolution: [i32; 2],
    spectrum_size: [i32; 2],
    offset: [f32; 2],
    scale: [f32; 2],
    vignetting: [f32; 2],
    samples: u32,
    spectrum_len: u32,
    blur: f32,
    rotation: f32,
    rotation_weight: f32,
    intensity: f32,
    vignetting_enabled: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

pub struct StarburstTask {
    spectra: MemoCache<DeviceImage>,
    images: MemoCache<DeviceImage>,
}

impl StarburstTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            spectra: MemoCache::new(1),
            images: MemoCache::new(1),
        }
    }

    /// The diffraction power spectrum of the aperture at the reference
    /// wavelength for a pupil-to-sensor distance in metres.
    fn fourier_spectrum(
        &self,
        ctx: &ComputeContext,
        aperture: &Arc<DeviceImage>,
        distance: f32,
    ) -> Result<Arc<DeviceImage>> {
        let mask = aperture.to_host(ctx)?;
        let key = FingerprintBuilder::new()
            .with(&mask.content_hash())
            .with(&distance)
            .finish();

        self.spectra.get_or_try_insert_with(key, || {
            let width = mask.width as usize;
            let height = mask.height as usize;

            // reference wavelength in mm; distance m -> mm with an epsilon
            // against the 1/d pole
            let wavelength = f64::from(LAMBDA_MID) * 1e-6;
            let clamped = f64::from(distance.max(0.0)) * 1e3;
            let distance_mm = clamped.max(1e-9);

            let mut field = Vec::with_capacity(width * height);
            for y in 0..height {
                for x in 0..width {
                    let amplitude = f64::from(mask.data[y * width + x]);
                    // drop the phase factor for a collapsed pupil distance
                    let value = if distance == 0.0 {
                        Complex::new(amplitude, 0.0)
                    } else {
                        let u = x as f64 / (width - 1) as f64 * 2.0 - 1.0;
                        let v = y as f64 / (height - 1) as f64 * 2.0 - 1.0;
                        let phase = PI / (wavelength * distance_mm) * (u * u + v * v);
                        Complex::new(0.0, phase).exp() * amplitude
                    };
                    field.push(value);
                }
            }

            fft2(&mut field, width, height);
            fftshift(&mut field, width, height);

            // |F|^2; the 1/(lambda*d)^2 constant folds into the intensity
            let power = ImageData {
                data: field.iter().map(|v| v.norm_sqr() as f32).collect(),
                width: mask.width,
                height: mask.height,
                channels: 1,
                layers: 1,
            };
            Ok(ctx.upload_image("Starburst Spectrum", &power))
        })
    }

    pub fn run(
        &self,
        ctx: &ComputeContext,
        config: &Starburst,
        resolution: [u32; 2],
        samples: u32,
        aperture: &Arc<DeviceImage>,
        light_position: [f32; 2],
        light_intensity: f32,
    ) -> Result<Arc<DeviceImage>> {
        let _t = scope_timer("starburst");

        let spectrum = self.fourier_spectrum(ctx, aperture, config.distance)?;
        let defines = ShaderDefines::new()
            .with("lambda_min", LAMBDA_MIN as u32)
            .with("lambda_max", LAMBDA_MAX as u32)
            .with("lambda_mid", LAMBDA_MID as u32);
        let (pipeline, kernel_hash) = ctx.compute_pipeline("starburst", &defines, "starburst")?;

        let spectrum_host_hash = spectrum.to_host(ctx)?.content_hash();
        let key = FingerprintBuilder::new()
            .with(config)
            .with(&resolution)
            .with(&samples)
            .with(&spectrum_host_hash)
            .with(&light_position)
            .with(&light_intensity)
            .with(&kernel_hash)
            .finish();

        self.images.get_or_try_insert_with(key, || {
            let [width, height] = resolution;
            let image = ctx.alloc_image("Starburst", width, height, 4)?;

            let xyz = light_spectrum();
            let xyz_buffer = ctx.storage_buffer_init("Light Spectrum", &xyz);

            let aspect = width as f32 / height.max(1) as f32;
            let params = StarburstParams {
                resolution: [width as i32, height as i32],
                spectrum_size: [spectrum.width as i32, spectrum.height as i32],
                offset: light_position,
                scale: [config.scale[0], config.scale[1] * aspect],
                vignetting: config.vignetting.unwrap_or([0.0, 0.0]),
                samples: samples.max(1),
                spectrum_len: xyz.len() as u32,
                blur: config.blur / 100.0,
                rotation: config.rotation.to_radians(),
                rotation_weight: config.rotation_weight,
                intensity: config.intensity * light_intensity * 1e-6,
                vignetting_enabled: u32::from(config.vignetting.is_some()),
                pad0: 0,
                pad1: 0,
                pad2: 0,
            };
            let params_buffer = ctx.uniform_buffer("Starburst Params", &params);

            ctx.dispatch(
                "starburst",
                &pipeline,
                &[
                    (0, image.buffer.binding()),
                    (1, spectrum.buffer.binding()),
                    (2, xyz_buffer.binding()),
                    (3, params_buffer.binding()),
                ],
                workgroups_2d(width, height),
            );
            Ok(image)
        })
    }
}

impl Default for StarburstTask {
    fn default() -> Self {
        Self::new()
    }
}
