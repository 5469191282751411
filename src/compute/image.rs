//! Device Images
//!
//! Images are buffer-backed float grids: a [`DeviceImage`] owns the device
//! storage and a lazy host mirror ([`ImageData`]) materialised on first
//! readback. `layers > 1` is the 3-D variant used for per-wavelength
//! stacks.

use std::sync::Arc;

use parking_lot::Mutex;
use xxhash_rust::xxh3::Xxh3;

use crate::compute::ComputeContext;
use crate::compute::buffer::GpuBuffer;
use crate::errors::Result;

/// Host-resident pixel data, row-major, `channels` floats per pixel and
/// `layers` stacked planes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub layers: u32,
}

impl ImageData {
    #[must_use]
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            data: vec![0.0; (width * height * channels) as usize],
            width,
            height,
            channels,
            layers: 1,
        }
    }

    /// First channel of a pixel in layer 0.
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.data[((y * self.width + x) * self.channels) as usize]
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let start = ((y * self.width + x) * self.channels) as usize;
        &self.data[start..start + self.channels as usize]
    }

    /// Content hash over the raw bytes; drives the engine's emit debounce.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        h.update(bytemuck::cast_slice(&self.data));
        h.update(&self.width.to_le_bytes());
        h.update(&self.height.to_le_bytes());
        h.update(&self.channels.to_le_bytes());
        h.digest()
    }
}

/// A device-resident 2-D (or layered 3-D) float grid with a lazy host
/// mirror.
pub struct DeviceImage {
    pub buffer: GpuBuffer,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub layers: u32,
    host: Mutex<Option<Arc<ImageData>>>,
}

impl DeviceImage {
    pub(crate) fn from_buffer(
        buffer: GpuBuffer,
        width: u32,
        height: u32,
        channels: u32,
        layers: u32,
    ) -> Self {
        Self {
            buffer,
            width,
            height,
            channels,
            layers,
            host: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.layers)
    }

    /// Reads the image back to the host. The mirror is cached: a committed
    /// image is never mutated on the device, so the first readback is
    /// authoritative.
    pub fn to_host(&self, ctx: &ComputeContext) -> Result<Arc<ImageData>> {
        if let Some(host) = self.host.lock().as_ref() {
            return Ok(Arc::clone(host));
        }
        let data = ctx.read_buffer::<f32>(&self.buffer)?;
        let image = Arc::new(ImageData {
            data,
            width: self.width,
            height: self.height,
            channels: self.channels,
            layers: self.layers,
        });
        *self.host.lock() = Some(Arc::clone(&image));
        Ok(image)
    }
}

impl ComputeContext {
    /// Allocates a zero-filled device image.
    pub fn alloc_image(
        &self,
        label: &str,
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<DeviceImage> {
        self.alloc_image_array(label, width, height, channels, 1)
    }

    /// Allocates a zero-filled layered device image.
    pub fn alloc_image_array(
        &self,
        label: &str,
        width: u32,
        height: u32,
        channels: u32,
        layers: u32,
    ) -> Result<DeviceImage> {
        let size = u64::from(width) * u64::from(height) * u64::from(channels) * u64::from(layers) * 4;
        let buffer = self.storage_buffer_zeroed(label, size)?;
        Ok(DeviceImage::from_buffer(buffer, width, height, channels, layers))
    }

    /// Uploads host pixel data as a read-only device image. The host
    /// mirror is seeded from the source so no readback is ever needed.
    pub fn upload_image(&self, label: &str, image: &ImageData) -> DeviceImage {
        let buffer = self.storage_buffer_init(label, &image.data);
        let device_image = DeviceImage::from_buffer(
            buffer,
            image.width,
            image.height,
            image.channels,
            image.layers,
        );
        *device_image.host.lock() = Some(Arc::new(image.clone()));
        device_image
    }
}
