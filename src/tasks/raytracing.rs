//! Raytracing Task
//!
//! Traces the ray grid of every requested ghost path through the lens
//! stack on the device. The output is a `(path, wavelength, ray)` buffer
//! of [`GpuRay`]s; a variant launch with `store_intersections` also
//! records every surface hit for the diagram view.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use parking_lot::Mutex;

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, GpuBuffer, ShaderDefines};
use crate::data::Lens;
use crate::errors::{FlareError, Result};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::lens::{
    GhostPath, GlassLibrary, LensElementGpu, LensModel, PathSelector, glass, lens_elements_gpu,
    ray_paths,
};
use crate::spectrum::{LAMBDA_MIN, wavelength_array};
use crate::storage::Storage;
use crate::tasks::GpuIntersection;
use crate::tasks::GpuRay;
use crate::utils::timing::scope_timer;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TraceParams {
    direction: [f32; 4],
    element_count: u32,
    grid_count: u32,
    grid_length: f32,
    intersection_count: u32,
}

/// The traced rays of one fingerprint, shaped
/// `(path_count, wavelength_count, grid_count²)`.
pub struct RayBuffer {
    pub buffer: GpuBuffer,
    /// The input fingerprint this buffer was built under.
    pub fingerprint: u64,
    pub paths: Vec<GhostPath>,
    pub wavelength_count: u32,
    pub grid_count: u32,
    host: Mutex<Option<Arc<Vec<GpuRay>>>>,
}

impl RayBuffer {
    #[must_use]
    pub fn path_count(&self) -> u32 {
        self.paths.len() as u32
    }

    #[must_use]
    pub fn ray_count(&self) -> u32 {
        self.grid_count * self.grid_count
    }

    /// Lazy host mirror of the ray buffer.
    pub fn to_host(&self, ctx: &ComputeContext) -> Result<Arc<Vec<GpuRay>>> {
        if let Some(host) = self.host.lock().as_ref() {
            return Ok(Arc::clone(host));
        }
        let rays = Arc::new(ctx.read_buffer::<GpuRay>(&self.buffer)?);
        *self.host.lock() = Some(Arc::clone(&rays));
        Ok(rays)
    }
}

/// Per-step surface hits for the diagram, shaped
/// `(path, wavelength, row, column, step)`.
pub struct IntersectionBuffer {
    pub buffer: GpuBuffer,
    pub grid_count: u32,
    pub step_count: u32,
}

impl IntersectionBuffer {
    pub fn to_host(&self, ctx: &ComputeContext) -> Result<Vec<GpuIntersection>> {
        ctx.read_buffer::<GpuIntersection>(&self.buffer)
    }
}

pub struct RaytracingTask {
    models: MemoCache<LensModel>,
    glasses: MemoCache<GlassLibrary>,
    elements: MemoCache<Vec<LensElementGpu>>,
    paths: MemoCache<Vec<GhostPath>>,
    rays: MemoCache<RayBuffer>,
    intersections: MemoCache<(RayBuffer, IntersectionBuffer)>,
}

impl RaytracingTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            models: MemoCache::new(1),
            glasses: MemoCache::new(1),
            elements: MemoCache::new(1),
            paths: MemoCache::new(10),
            rays: MemoCache::new(1),
            intersections: MemoCache::new(1),
        }
    }

    /// Loads the lens model behind a (possibly `$MODEL`-encoded) path,
    /// memoized on `(path, mtime)`.
    pub fn lens_model(&self, storage: &Storage, model_path: &str) -> Result<Arc<LensModel>> {
        if model_path.is_empty() {
            return Err(FlareError::BadLensModel("no lens model set".into()));
        }
        let path: PathBuf = storage.decode_path(model_path);
        let mtime = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0u64, |d| d.as_nanos() as u64);

        let key = FingerprintBuilder::new()
            .with(&path.to_string_lossy().as_ref())
            .with(&mtime)
            .finish();
        self.models
            .get_or_try_insert_with(key, || LensModel::load(&path))
    }

    fn glass_library(&self, storage: &Storage, glasses_path: &str) -> Result<Arc<GlassLibrary>> {
        let path = storage.decode_path(glasses_path);
        let key = path.to_string_lossy().fingerprint();
        self.glasses
            .get_or_try_insert_with(key, || glass::glasses_from_path(&path))
    }

    /// The GPU element buffer for a model + lens configuration, with the
    /// sensor appended as terminal element.
    pub fn lens_elements(
        &self,
        storage: &Storage,
        model: &Arc<LensModel>,
        lens: &Lens,
    ) -> Result<Arc<Vec<LensElementGpu>>> {
        let glasses = self.glass_library(storage, &lens.glasses_path)?;
        let key = FingerprintBuilder::new()
            .with(model.as_ref())
            .with(lens)
            .finish();
        self.elements.get_or_try_insert_with(key, || {
            Ok(lens_elements_gpu(
                model,
                lens.sensor_size,
                &glasses,
                lens.abbe_nr_adjustment,
                &lens.coating_lens_elements,
                lens.coating_min_ior,
            ))
        })
    }

    /// Ghost path enumeration for a model, filtered by the selector.
    pub fn ghost_paths(
        &self,
        model: &Arc<LensModel>,
        selector: &PathSelector,
    ) -> Result<Arc<Vec<GhostPath>>> {
        let key = FingerprintBuilder::new()
            .with(model.as_ref())
            .with(selector)
            .finish();
        self.paths
            .get_or_try_insert_with(key, || Ok(ray_paths(model, selector)))
    }

    fn direction(light_position: [f32; 2], lens: &Lens, resolution: [u32; 2], focal_length: f32) -> [f32; 4] {
        let sensor_half = lens.sensor_size[0] / 2.0;
        let ratio = resolution[1] as f32 / resolution[0].max(1) as f32;
        let direction = Vec3::new(
            light_position[0] * sensor_half,
            light_position[1] * ratio * sensor_half,
            focal_length,
        )
        .normalize_or_zero();
        [direction.x, direction.y, direction.z, 0.0]
    }

    /// Traces all requested paths. Returns `None` when the configuration
    /// produces no rays (`grid_count <= 1`, no lens elements, or an empty
    /// path set): downstream stages emit black without error.
    pub fn trace(
        &self,
        ctx: &ComputeContext,
        storage: &Storage,
        light_position: [f32; 2],
        lens: &Lens,
        grid_count: u32,
        grid_length: f32,
        resolution: [u32; 2],
        wavelength_count: u32,
        selector: &PathSelector,
    ) -> Result<Option<Arc<RayBuffer>>> {
        let _t = scope_timer("raytracing");
        let setup = self.setup(ctx, storage, light_position, lens, grid_count, grid_length, resolution, wavelength_count, selector, false)?;
        let Some(setup) = setup else {
            return Ok(None);
        };

        let buffer = self.rays.get_or_try_insert_with(setup.key, || {
            let (rays, _) = Self::launch(ctx, &setup, None)?;
            Ok(rays)
        })?;
        Ok(Some(buffer))
    }

    /// Variant launch that additionally records every surface hit, sized
    /// `3 * element_count - 1` steps per ray.
    pub fn trace_intersections(
        &self,
        ctx: &ComputeContext,
        storage: &Storage,
        light_position: [f32; 2],
        lens: &Lens,
        grid_count: u32,
        grid_length: f32,
        resolution: [u32; 2],
        selector: &PathSelector,
    ) -> Result<Option<Arc<(RayBuffer, IntersectionBuffer)>>> {
        let _t = scope_timer("raytracing intersections");
        let setup = self.setup(ctx, storage, light_position, lens, grid_count, grid_length, resolution, 1, selector, true)?;
        let Some(setup) = setup else {
            return Ok(None);
        };

        let step_count = setup.elements.len() as u32 * 3 - 1;
        let buffer = self.intersections.get_or_try_insert_with(setup.key, || {
            let (rays, intersections) = Self::launch(ctx, &setup, Some(step_count))?;
            let intersections =
                intersections.expect("intersection launch must produce a buffer");
            Ok((rays, intersections))
        })?;
        Ok(Some(buffer))
    }

    fn setup(
        &self,
        ctx: &ComputeContext,
        storage: &Storage,
        light_position: [f32; 2],
        lens: &Lens,
        grid_count: u32,
        grid_length: f32,
        resolution: [u32; 2],
        wavelength_count: u32,
        selector: &PathSelector,
        store_intersections: bool,
    ) -> Result<Option<TraceSetup>> {
        if grid_count <= 1 {
            return Ok(None);
        }

        let model = self.lens_model(storage, &lens.model_path)?;
        let elements = self.lens_elements(storage, &model, lens)?;
        if elements.len() <= 1 {
            return Ok(None);
        }
        let paths = self.ghost_paths(&model, selector)?;
        if paths.is_empty() {
            return Ok(None);
        }

        let defines = ShaderDefines::new()
            .with("lambda_min", LAMBDA_MIN as u32)
            .with("store_intersections", store_intersections);
        let (pipeline, kernel_hash) = ctx.compute_pipeline("raytracing", &defines, "raytrace")?;

        let wavelength_count = wavelength_count.max(1);
        let key = FingerprintBuilder::new()
            .with(&light_position)
            .with(lens)
            .with(model.as_ref())
            .with(&grid_count)
            .with(&grid_length)
            .with(&resolution)
            .with(&wavelength_count)
            .with(selector)
            .with(&kernel_hash)
            .finish();

        Ok(Some(TraceSetup {
            key,
            pipeline,
            elements,
            paths,
            direction: Self::direction(light_position, lens, resolution, model.focal_length),
            grid_count,
            grid_length,
            wavelength_count,
        }))
    }

    fn launch(
        ctx: &ComputeContext,
        setup: &TraceSetup,
        step_count: Option<u32>,
    ) -> Result<(RayBuffer, Option<IntersectionBuffer>)> {
        let path_count = setup.paths.len() as u32;
        let ray_count = setup.grid_count * setup.grid_count;
        let total_rays =
            u64::from(path_count) * u64::from(setup.wavelength_count) * u64::from(ray_count);

        let ray_buffer = ctx.storage_buffer_zeroed(
            "Rays",
            total_rays * std::mem::size_of::<GpuRay>() as u64,
        )?;

        let element_buffer = ctx.storage_buffer_init("Lens Elements", &setup.elements);
        let path_data: Vec<[i32; 2]> = setup.paths.iter().map(|p| [p.bounce1, p.bounce2]).collect();
        let path_buffer = ctx.storage_buffer_init("Ghost Paths", &path_data);
        let wavelengths = wavelength_array(setup.wavelength_count);
        let wavelength_buffer = ctx.storage_buffer_init("Wavelengths", &wavelengths);

        let params = TraceParams {
            direction: setup.direction,
            element_count: setup.elements.len() as u32,
            grid_count: setup.grid_count,
            grid_length: setup.grid_length,
            intersection_count: step_count.unwrap_or(0),
        };
        let params_buffer = ctx.uniform_buffer("Trace Params", &params);

        let intersections = match step_count {
            Some(steps) => Some(IntersectionBuffer {
                buffer: ctx.storage_buffer_zeroed(
                    "Intersections",
                    total_rays * u64::from(steps) * std::mem::size_of::<GpuIntersection>() as u64,
                )?,
                grid_count: setup.grid_count,
                step_count: steps,
            }),
            None => None,
        };

        let mut bindings = vec![
            (0, ray_buffer.binding()),
            (1, element_buffer.binding()),
            (2, path_buffer.binding()),
            (3, wavelength_buffer.binding()),
            (4, params_buffer.binding()),
        ];
        if let Some(inter) = &intersections {
            bindings.push((5, inter.buffer.binding()));
        }

        ctx.dispatch(
            "raytrace",
            &setup.pipeline,
            &bindings,
            [ray_count.div_ceil(64), setup.wavelength_count, path_count],
        );

        Ok((
            RayBuffer {
                buffer: ray_buffer,
                fingerprint: setup.key,
                paths: setup.paths.as_ref().clone(),
                wavelength_count: setup.wavelength_count,
                grid_count: setup.grid_count,
                host: Mutex::new(None),
            },
            intersections,
        ))
    }
}

impl Default for RaytracingTask {
    fn default() -> Self {
        Self::new()
    }
}

struct TraceSetup {
    key: u64,
    pipeline: Arc<wgpu::ComputePipeline>,
    elements: Arc<Vec<LensElementGpu>>,
    paths: Arc<Vec<GhostPath>>,
    direction: [f32; 4],
    grid_count: u32,
    grid_length: f32,
    wavelength_count: u32,
}
