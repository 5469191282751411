//! Compute Context
//!
//! Owns the chosen device and its single in-order queue, the kernel
//! template registry and the compute pipeline cache. Every task dispatches
//! through [`ComputeContext::dispatch`]; dependent stages rely on wgpu's
//! submission-order guarantee, and the host blocks only in
//! [`ComputeContext::read_buffer`].

pub mod buffer;
pub mod image;
pub mod shaders;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{FlareError, Result};
pub use buffer::GpuBuffer;
pub use image::{DeviceImage, ImageData};
pub use shaders::{ShaderDefines, ShaderManager};

fn is_gpu(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

/// Names of the adapters a context could be created on, GPU-class first.
#[must_use]
pub fn available_devices() -> Vec<String> {
    let instance = wgpu::Instance::default();
    let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
    adapters.sort_by_key(|a| !is_gpu(a.get_info().device_type));
    adapters.into_iter().map(|a| a.get_info().name).collect()
}

pub struct ComputeContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub shaders: ShaderManager,
    /// (rendered source hash, entry point) -> pipeline
    pipelines: Mutex<FxHashMap<(u64, String), Arc<wgpu::ComputePipeline>>>,
}

impl ComputeContext {
    /// Acquires the first GPU-class adapter whose name contains
    /// `device_name` (empty matches the first GPU). With an empty filter
    /// and no GPU present, a software adapter is accepted as a last
    /// resort so headless hosts still render.
    pub fn new(device_name: &str) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());

        let matches_name = |info: &wgpu::AdapterInfo| {
            device_name.is_empty()
                || info
                    .name
                    .to_lowercase()
                    .contains(&device_name.to_lowercase())
        };

        let adapter = adapters
            .iter()
            .find(|a| {
                let info = a.get_info();
                is_gpu(info.device_type) && matches_name(&info)
            })
            .or_else(|| {
                device_name
                    .is_empty()
                    .then(|| {
                        adapters.first().inspect(|a| {
                            log::warn!(
                                "no GPU adapter available, falling back to {}",
                                a.get_info().name
                            );
                        })
                    })
                    .flatten()
            })
            .ok_or_else(|| FlareError::DeviceUnavailable(device_name.to_string()))?;

        let adapter_info = adapter.get_info();
        log::debug!("compute device: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lensflare"),
            required_features: wgpu::Features::empty(),
            // take whatever the adapter offers so software devices work too
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            shaders: ShaderManager::new(),
            pipelines: Mutex::new(FxHashMap::default()),
        })
    }

    /// Renders + compiles a kernel template and returns the pipeline for
    /// one entry point along with the rendered-source hash (tasks fold the
    /// hash into their fingerprints so kernel edits invalidate caches).
    pub fn compute_pipeline(
        &self,
        template: &str,
        defines: &ShaderDefines,
        entry_point: &str,
    ) -> Result<(Arc<wgpu::ComputePipeline>, u64)> {
        let (module, source_hash) = self.shaders.get_or_compile(&self.device, template, defines)?;

        let key = (source_hash, entry_point.to_string());
        if let Some(pipeline) = self.pipelines.lock().get(&key) {
            return Ok((Arc::clone(pipeline), source_hash));
        }

        self.device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{template}::{entry_point}")),
                layout: None,
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FlareError::KernelBuildFailed {
                name: format!("{template}::{entry_point}"),
                log: error.to_string(),
            });
        }

        let pipeline = Arc::new(pipeline);
        self.pipelines.lock().insert(key, Arc::clone(&pipeline));
        Ok((pipeline, source_hash))
    }

    /// Binds the given `(binding index, resource)` pairs to group 0 and
    /// launches the kernel. Pass exactly the bindings the entry point uses;
    /// the layout is derived from the shader.
    pub fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bindings: &[(u32, wgpu::BindingResource)],
        workgroups: [u32; 3],
    ) {
        let entries: Vec<wgpu::BindGroupEntry> = bindings
            .iter()
            .map(|(index, resource)| wgpu::BindGroupEntry {
                binding: *index,
                resource: resource.clone(),
            })
            .collect();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Blocks until all submitted work completed.
    pub fn wait(&self) {
        let _ = self.device.poll(wgpu::PollType::Wait);
    }
}
