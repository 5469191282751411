//! Ghost Task
//!
//! The internal ringing pattern a ghost carries across its face: the
//! fractional Fourier transform of the aperture at an order derived from
//! the f-stop ([Ritschel et al. 2009], §3.3). One wavelength suffices for
//! the geometry; chromatic variation comes back in at raster time through
//! the spectrum lookup.

use std::sync::Arc;

use num_complex::Complex;

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, DeviceImage, ImageData};
use crate::errors::Result;
use crate::fingerprint::FingerprintBuilder;
use crate::fourier::{fftshift, frft2};
use crate::spectrum::LAMBDA_MID;
use crate::utils::timing::scope_timer;

pub struct GhostTask {
    images: MemoCache<DeviceImage>,
}

impl GhostTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: MemoCache::new(1),
        }
    }

    /// Computes the ringing pattern for an aperture mask at the given
    /// f-stop. The result has the mask's resolution.
    pub fn run(
        &self,
        ctx: &ComputeContext,
        aperture: &DeviceImage,
        fstop: f32,
    ) -> Result<Arc<DeviceImage>> {
        let _t = scope_timer("ghost");

        let mask = aperture.to_host(ctx)?;
        let key = FingerprintBuilder::new()
            .with(&mask.content_hash())
            .with(&fstop)
            .finish();

        self.images.get_or_try_insert_with(key, || {
            // TODO: per-wavelength ghost stack (layers > 1); the rasterizer
            // already samples layers, this only computes the mid-band one
            let spectrum = Self::ringing(&mask, fstop);
            Ok(ctx.upload_image("Ghost", &spectrum))
        })
    }

    fn ringing(mask: &ImageData, fstop: f32) -> ImageData {
        let width = mask.width as usize;
        let height = mask.height as usize;

        let alpha = f64::from(0.15 * (LAMBDA_MID / 400.0) * (fstop / 18.0));

        let mut field: Vec<Complex<f64>> = mask
            .data
            .iter()
            .map(|v| Complex::new(f64::from(*v), 0.0))
            .collect();

        fftshift(&mut field, width, height);
        let mut field = frft2(&field, width, height, alpha);
        fftshift(&mut field, width, height);

        // amplitude normalization rescaled by sqrt(W*H); the feature
        // switches to energy-preserving output
        let scale = if cfg!(feature = "energy-normalization") {
            1.0
        } else {
            ((width * height) as f64).sqrt()
        };

        ImageData {
            data: field.iter().map(|v| (v.norm() * scale) as f32).collect(),
            width: mask.width,
            height: mask.height,
            channels: 1,
            layers: 1,
        }
    }
}

impl Default for GhostTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ringing_preserves_resolution_and_stays_finite() {
        let mut mask = ImageData::new(16, 16, 1);
        for y in 4..12 {
            for x in 4..12 {
                mask.data[(y * 16 + x) as usize] = 1.0;
            }
        }
        let out = GhostTask::ringing(&mask, 8.0);
        assert_eq!((out.width, out.height), (16, 16));
        assert!(out.data.iter().all(|v| v.is_finite()));
        assert!(out.data.iter().any(|v| *v > 0.0));
    }
}
