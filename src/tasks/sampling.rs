//! Image Sampling Task
//!
//! When the light source is an image, only its brightest pixels become
//! individual flares. The image is resized to the sampling grid, the top
//! `samples` pixels by mean intensity survive a percentile threshold and
//! everything else is zeroed. The engine renders one flare per surviving
//! sample in the top-left quadrant and mirrors the result.

use std::sync::Arc;

use crate::cache::MemoCache;
use crate::compute::ImageData;
use crate::data::LightImage;
use crate::errors::{FlareError, Result};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::storage::Storage;
use crate::utils::timing::scope_timer;

pub struct ImageSamplingTask {
    samples: MemoCache<ImageData>,
    files: MemoCache<ImageData>,
}

impl ImageSamplingTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: MemoCache::new(1),
            files: MemoCache::new(1),
        }
    }

    fn load_file(&self, path: &str) -> Result<Arc<ImageData>> {
        let key = path.fingerprint();
        self.files.get_or_try_insert_with(key, || {
            let image = image::open(path)
                .map_err(|e| FlareError::BadApertureImage(format!("{path}: {e}")))?
                .to_rgb32f();
            Ok(ImageData {
                width: image.width(),
                height: image.height(),
                data: image.into_raw(),
                channels: 3,
                layers: 1,
            })
        })
    }

    /// The sampling grid resolution: the configured width (forced even so
    /// quadrant mirroring stays exact) and a height following the output
    /// aspect ratio.
    #[must_use]
    pub fn sample_resolution(config: &LightImage, output_resolution: [u32; 2]) -> [u32; 2] {
        let mut width = config.sample_resolution.max(1);
        if width % 2 != 0 {
            width += 1;
        }
        let ratio = output_resolution[1] as f32 / output_resolution[0].max(1) as f32;
        let mut height = ((width as f32) * ratio).round() as u32;
        if height % 2 != 0 {
            height += 1;
        }
        [width, height.max(2)]
    }

    pub fn run(
        &self,
        storage: &Storage,
        config: &LightImage,
        output_resolution: [u32; 2],
    ) -> Result<Arc<ImageData>> {
        let _t = scope_timer("image sampling");

        let path = storage.decode_path(&config.file);
        let resolution = Self::sample_resolution(config, output_resolution);

        let key = FingerprintBuilder::new()
            .with(config)
            .with(&resolution)
            .finish();
        self.samples.get_or_try_insert_with(key, || {
            let source = self.load_file(&path.to_string_lossy())?;

            let buffer: image::Rgb32FImage = image::ImageBuffer::from_raw(
                source.width,
                source.height,
                source.data.clone(),
            )
            .ok_or_else(|| FlareError::BadApertureImage("light image has no pixels".into()))?;
            let resized = image::imageops::resize(
                &buffer,
                resolution[0],
                resolution[1],
                image::imageops::FilterType::Triangle,
            );
            let mut data = resized.into_raw();

            // percentile threshold keeping the top `samples` pixels
            let pixel_count = (resolution[0] * resolution[1]) as usize;
            let mut intensities: Vec<f32> = (0..pixel_count)
                .map(|i| (data[i * 3] + data[i * 3 + 1] + data[i * 3 + 2]) / 3.0)
                .collect();
            let keep = (config.samples as usize).min(pixel_count).max(1);
            let mut sorted = intensities.clone();
            sorted.sort_by(f32::total_cmp);
            let threshold = sorted[pixel_count - keep];

            for (i, intensity) in intensities.iter_mut().enumerate() {
                if *intensity <= threshold && threshold > 0.0 {
                    data[i * 3] = 0.0;
                    data[i * 3 + 1] = 0.0;
                    data[i * 3 + 2] = 0.0;
                }
            }

            Ok(ImageData {
                data,
                width: resolution[0],
                height: resolution[1],
                channels: 3,
                layers: 1,
            })
        })
    }
}

impl Default for ImageSamplingTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_resolution_is_even_and_aspect_scaled() {
        let config = LightImage {
            sample_resolution: 31,
            ..LightImage::default()
        };
        let resolution = ImageSamplingTask::sample_resolution(&config, [512, 256]);
        assert_eq!(resolution[0] % 2, 0);
        assert_eq!(resolution[1] % 2, 0);
        assert_eq!(resolution[0], 32);
        assert_eq!(resolution[1], 16);
    }
}
