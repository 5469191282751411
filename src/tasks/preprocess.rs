//! Preprocess Task
//!
//! Cheap per-path brightness estimate used to cull the dimmest ghosts
//! before committing to a full-quality trace: a tiny 3×3 grid at 1% of
//! the grid length, one wavelength, light at the optical centre. The
//! screen area of the top-left quad approximates how thin a ghost spreads
//! its energy, so the largest-area (dimmest) paths are dropped.

use std::sync::Arc;

use crate::cache::MemoCache;
use crate::compute::ComputeContext;
use crate::data::{Flare, Render};
use crate::errors::Result;
use crate::fingerprint::FingerprintBuilder;
use crate::lens::PathSelector;
use crate::storage::Storage;
use crate::tasks::raytracing::RaytracingTask;
use crate::utils::timing::scope_timer;

pub struct PreprocessTask {
    indices: MemoCache<Vec<usize>>,
}

impl PreprocessTask {
    #[must_use]
    pub fn new() -> Self {
        Self {
            indices: MemoCache::new(1),
        }
    }

    /// Returns the enumeration indices of the ghost paths that survive
    /// culling, ascending. With `cull_percentage == 0` every path stays.
    pub fn run(
        &self,
        ctx: &ComputeContext,
        storage: &Storage,
        raytracing: &RaytracingTask,
        flare: &Flare,
        render: &Render,
    ) -> Result<Arc<Vec<usize>>> {
        let _t = scope_timer("preprocess");

        let grid_length = render.grid_length * 0.01;
        let rays = raytracing.trace(
            ctx,
            storage,
            [0.0, 0.0],
            &flare.lens,
            3,
            grid_length,
            render.resolution,
            1,
            &PathSelector::All,
        )?;
        let Some(rays) = rays else {
            return Ok(Arc::new(Vec::new()));
        };

        let key = FingerprintBuilder::new()
            .with(&flare.lens)
            .with(&grid_length)
            .with(&render.cull_percentage)
            .finish();

        self.indices.get_or_try_insert_with(key, || {
            let host = rays.to_host(ctx)?;
            let ray_count = rays.ray_count() as usize;
            let wavelength_stride = rays.wavelength_count as usize * ray_count;

            // screen area of the top-left quad, per path
            let mut areas: Vec<(usize, f32)> = (0..rays.path_count() as usize)
                .map(|path| {
                    let ray = &host[path * wavelength_stride];
                    (path, ray.pos[0].abs() * ray.pos[0].abs())
                })
                .collect();
            areas.sort_by(|a, b| a.1.total_cmp(&b.1));

            let keep = ((areas.len() as f32) * (1.0 - render.cull_percentage.clamp(0.0, 1.0)))
                as usize;
            let mut indices: Vec<usize> = areas[..keep].iter().map(|(i, _)| *i).collect();
            indices.sort_unstable();
            Ok(indices)
        })
    }
}

impl Default for PreprocessTask {
    fn default() -> Self {
        Self::new()
    }
}
