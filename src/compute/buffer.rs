//! Device Buffers
//!
//! Thin wrapper over `wgpu::Buffer` carrying the size and label, plus the
//! typed upload/readback helpers the tasks use. All task data lives in
//! storage buffers; layouts are fixed by `bytemuck::Pod` mirrors of the
//! WGSL structs, never by the native ABI.

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use crate::compute::ComputeContext;
use crate::errors::{FlareError, Result};

pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
    pub label: String,
}

impl GpuBuffer {
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

impl ComputeContext {
    /// Read-only storage buffer initialised from host data.
    pub fn storage_buffer_init<T: Pod>(&self, label: &str, data: &[T]) -> GpuBuffer {
        let contents = bytemuck::cast_slice(data);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            });
        GpuBuffer {
            buffer,
            size: contents.len() as u64,
            label: label.to_string(),
        }
    }

    /// Zero-filled read-write storage buffer. Allocation runs inside an
    /// out-of-memory error scope so the binner/rasterizer can report a
    /// usable error instead of a device loss.
    pub fn storage_buffer_zeroed(&self, label: &str, size: u64) -> Result<GpuBuffer> {
        let size = size.max(4);
        self.device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FlareError::OutOfDeviceMemory(error.to_string()));
        }
        Ok(GpuBuffer {
            buffer,
            size,
            label: label.to_string(),
        })
    }

    /// Uniform buffer holding one `Pod` value.
    pub fn uniform_buffer<T: Pod>(&self, label: &str, value: &T) -> GpuBuffer {
        let contents = bytemuck::bytes_of(value);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        GpuBuffer {
            buffer,
            size: contents.len() as u64,
            label: label.to_string(),
        }
    }

    /// Resets a buffer to zeros without a host-side staging copy.
    pub fn clear_buffer(&self, buffer: &GpuBuffer) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        encoder.clear_buffer(&buffer.buffer, 0, None);
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copies a device buffer back to the host. This is the only blocking
    /// wait in the pipeline: the queue is in submission order, so mapping
    /// the staging copy fences everything before it.
    pub fn read_buffer<T: Pod>(&self, buffer: &GpuBuffer) -> Result<Vec<T>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: buffer.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, buffer.size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.wait();
        rx.recv()
            .map_err(|_| FlareError::OutOfDeviceMemory("device disconnected".into()))?
            .map_err(|e| FlareError::OutOfDeviceMemory(e.to_string()))?;

        let data = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&view).to_vec()
        };
        staging.unmap();
        Ok(data)
    }
}
