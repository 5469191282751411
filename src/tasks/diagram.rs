//! Diagram Task
//!
//! 2-D cross-section of the lens stack with the traced rays of one grid
//! column drawn through it. Purely diagnostic: lens outlines come from
//! the element buffer, ray polylines from the stored per-step
//! intersections of the centre column.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::cache::MemoCache;
use crate::compute::{ComputeContext, DeviceImage, ShaderDefines};
use crate::data::{Diagram, Lens};
use crate::errors::Result;
use crate::fingerprint::FingerprintBuilder;
use crate::lens::LensModel;
use crate::storage::Storage;
use crate::tasks::raytracing::RaytracingTask;
use crate::tasks::{GpuIntersection, workgroups_2d};
use crate::utils::timing::scope_timer;

/// Pixels kept free at the image edge.
const PADDING: u32 = 10;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DiagramParams {
    resolution: [i32; 2],
    element_count: u32,
    aperture_index: u32,
    scale: f32,
    ray_count: u32,
    step_count: u32,
    pad0: u32,
}

pub struct DiagramTask {
    images: MemoCache<DeviceImage>,
}

impl DiagramTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: MemoCache::new(1),
        }
    }

    fn scale(resolution: [u32; 2], model: &LensModel) -> f32 {
        let distance: f32 = model.lens_elements.iter().map(|e| e.distance).sum();
        if distance == 0.0 {
            1.0
        } else {
            (resolution[0].saturating_sub(PADDING)) as f32 / distance
        }
    }

    pub fn run(
        &self,
        ctx: &ComputeContext,
        storage: &Storage,
        raytracing: &RaytracingTask,
        lens: &Lens,
        diagram: &Diagram,
    ) -> Result<Arc<DeviceImage>> {
        let _t = scope_timer("diagram");

        let model = raytracing.lens_model(storage, &lens.model_path)?;
        let elements = raytracing.lens_elements(storage, &model, lens)?;

        let selector = crate::lens::PathSelector::from_debug_ghost(Some(diagram.debug_ghost));
        let traced = raytracing.trace_intersections(
            ctx,
            storage,
            [0.0, diagram.light_position],
            lens,
            diagram.grid_count,
            diagram.grid_length,
            diagram.resolution,
            &selector,
        )?;

        let defines = ShaderDefines::new();
        let (lenses, kernel_hash) = ctx.compute_pipeline("diagram", &defines, "lenses")?;
        let (intersections, _) = ctx.compute_pipeline("diagram", &defines, "intersections")?;

        let key = FingerprintBuilder::new()
            .with(lens)
            .with(diagram)
            .with(model.as_ref())
            .with(&kernel_hash)
            .finish();

        self.images.get_or_try_insert_with(key, || {
            let [width, height] = diagram.resolution;
            let image = ctx.alloc_image("Diagram", width, height, 4)?;
            let scale = Self::scale(diagram.resolution, &model);

            // rays of the centre column, offset by the configured amount
            let column_slice = match &traced {
                Some(buffers) => {
                    let (_, intersections) = buffers.as_ref();
                    let host = intersections.to_host(ctx)?;
                    let n = intersections.grid_count as usize;
                    let steps = intersections.step_count as usize;
                    let column = ((n - 1) / 2)
                        .saturating_add_signed(diagram.column_offset as isize)
                        .min(n - 1);
                    let mut slice = Vec::with_capacity(n * steps);
                    for row in 0..n {
                        let base = (row * n + column) * steps;
                        slice.extend_from_slice(&host[base..base + steps]);
                    }
                    slice
                }
                None => vec![GpuIntersection::default()],
            };
            let trace_buffer = ctx.storage_buffer_init("Diagram Trace", &column_slice);
            let element_buffer = ctx.storage_buffer_init("Lens Elements", &elements);

            let (ray_count, step_count) = match &traced {
                Some(buffers) => {
                    let (_, inter) = buffers.as_ref();
                    (inter.grid_count, inter.step_count)
                }
                None => (0, 0),
            };

            let params = DiagramParams {
                resolution: [width as i32, height as i32],
                element_count: elements.len() as u32,
                aperture_index: model.aperture_index as u32,
                scale,
                ray_count,
                step_count,
                pad0: 0,
            };
            let params_buffer = ctx.uniform_buffer("Diagram Params", &params);
            let workgroups = workgroups_2d(width, height);

            ctx.dispatch(
                "diagram lenses",
                &lenses,
                &[
                    (0, image.buffer.binding()),
                    (1, element_buffer.binding()),
                    (3, params_buffer.binding()),
                ],
                workgroups,
            );
            if ray_count > 0 {
                ctx.dispatch(
                    "diagram rays",
                    &intersections,
                    &[
                        (0, image.buffer.binding()),
                        (2, trace_buffer.binding()),
                        (3, params_buffer.binding()),
                    ],
                    workgroups,
                );
            }
            Ok(image)
        })
    }
}

impl Default for DiagramTask {
    fn default() -> Self {
        Self::new()
    }
}
