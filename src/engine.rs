//! Engine
//!
//! Orchestrates the task DAG for one render request: expands the
//! requested elements with their dependencies, runs each task in
//! topological order, debounces duplicate emissions by image hash and
//! keeps going past recoverable per-element failures.
//!
//! A render call walks `Idle -> Running -> {Completed, Cancelled,
//! Failed}`: progress is strictly monotone while running and no partial
//! image is ever observable — observers see a finished element or
//! nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compute::{ComputeContext, DeviceImage, ImageData};
use crate::data::{Project, RenderElement};
use crate::errors::{FlareError, Result};
use crate::lens::PathSelector;
use crate::storage::{Storage, parse_output_path};
use crate::tasks::aperture::ApertureTask;
use crate::tasks::diagram::DiagramTask;
use crate::tasks::ghost::GhostTask;
use crate::tasks::preprocess::PreprocessTask;
use crate::tasks::rasterizing::RasterizingTask;
use crate::tasks::raytracing::RaytracingTask;
use crate::tasks::sampling::ImageSamplingTask;
use crate::tasks::starburst::StarburstTask;
use crate::utils::timing::scope_timer;
use crate::worker::CancelToken;

/// The colorspace the engine's pixel data is defined in; conversion is the
/// caller's concern.
pub const COLORSPACE_TAG: &str = "ACES - ACEScg";

/// A finished element forwarded to observers.
#[derive(Clone)]
pub struct RenderImage {
    pub element: RenderElement,
    pub image: Arc<ImageData>,
    pub colorspace: &'static str,
    /// Content hash used for the emission debounce.
    pub hash: u64,
}

pub struct Engine {
    ctx: ComputeContext,
    storage: Arc<Storage>,

    aperture_task: ApertureTask,
    ghost_task: GhostTask,
    starburst_task: StarburstTask,
    raytracing_task: RaytracingTask,
    preprocess_task: PreprocessTask,
    rasterizing_task: RasterizingTask,
    diagram_task: DiagramTask,
    sampling_task: ImageSamplingTask,

    /// Device-resident intermediates of the current render graph.
    device_images: FxHashMap<RenderElement, Arc<DeviceImage>>,
    /// Host mirrors of every element rendered so far.
    images: FxHashMap<RenderElement, Arc<ImageData>>,
    /// Last emitted hash per element, for the debounce.
    emitted: FxHashMap<RenderElement, u64>,
}

impl Engine {
    pub fn new(device: &str, storage: Arc<Storage>) -> Result<Self> {
        let ctx = ComputeContext::new(device)?;
        log::debug!("engine initialized on: {}", ctx.adapter_info.name);
        Ok(Self {
            ctx,
            storage,
            aperture_task: ApertureTask::new(),
            ghost_task: GhostTask::new(),
            starburst_task: StarburstTask::new(),
            raytracing_task: RaytracingTask::new(),
            preprocess_task: PreprocessTask::new(),
            rasterizing_task: RasterizingTask::new(),
            diagram_task: DiagramTask::new(),
            sampling_task: ImageSamplingTask::new(),
            device_images: FxHashMap::default(),
            images: FxHashMap::default(),
            emitted: FxHashMap::default(),
        })
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The host image of an already rendered element.
    #[must_use]
    pub fn image(&self, element: RenderElement) -> Option<Arc<ImageData>> {
        self.images.get(&element).cloned()
    }

    /// Renders the requested elements. Recoverable per-element errors are
    /// logged and independent elements still render; `Cancelled` and
    /// engine-fatal errors abort.
    pub fn render(
        &mut self,
        project: &Project,
        elements: &[RenderElement],
        cancel: &CancelToken,
        on_image: &mut dyn FnMut(RenderImage),
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<()> {
        let _t = scope_timer("render");
        on_progress(0.0);

        // expand the request with its dependencies
        let mut queue: BTreeSet<RenderElement> = elements.iter().copied().collect();
        if queue.contains(&RenderElement::FlareStarburst) {
            queue.insert(RenderElement::Flare);
            queue.insert(RenderElement::Starburst);
        }
        if queue.contains(&RenderElement::Flare) {
            queue.insert(RenderElement::Ghost);
        }
        if queue.contains(&RenderElement::Ghost) {
            queue.insert(RenderElement::GhostAperture);
        }
        if queue.contains(&RenderElement::Starburst) {
            queue.insert(RenderElement::StarburstAperture);
        }

        let total = queue.len();
        let mut done = 0usize;
        let mut failed: Vec<RenderElement> = Vec::new();

        for element in RenderElement::ALL {
            if !queue.contains(&element) {
                continue;
            }
            cancel.check()?;

            match self.render_element(project, element, cancel) {
                Ok(image) => {
                    self.images.insert(element, Arc::clone(&image));
                    if elements.contains(&element) {
                        let hash = image.content_hash();
                        if self.emitted.get(&element) != Some(&hash) {
                            self.emitted.insert(element, hash);
                            on_image(RenderImage {
                                element,
                                image,
                                colorspace: COLORSPACE_TAG,
                                hash,
                            });
                        }
                    }
                }
                Err(e @ (FlareError::Cancelled | FlareError::OutOfDeviceMemory(_))) => {
                    return Err(e);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::error!("{}: {e}", element.name());
                    failed.push(element);
                }
            }
            done += 1;
            on_progress(done as f32 / total as f32);
        }

        on_progress(1.0);
        if !failed.is_empty() {
            log::warn!(
                "render finished with invalid elements: {}",
                failed
                    .iter()
                    .map(|e| e.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(())
    }

    fn render_element(
        &mut self,
        project: &Project,
        element: RenderElement,
        cancel: &CancelToken,
    ) -> Result<Arc<ImageData>> {
        match element {
            RenderElement::StarburstAperture => self.starburst_aperture(project),
            RenderElement::Starburst => self.starburst(project),
            RenderElement::GhostAperture => self.ghost_aperture(project),
            RenderElement::Ghost => self.ghost(project),
            RenderElement::Flare => self.flare(project, cancel),
            RenderElement::FlareStarburst => self.flare_starburst(),
            RenderElement::Diagram => self.diagram(project),
        }
    }

    fn device_image(&self, element: RenderElement) -> Result<Arc<DeviceImage>> {
        self.device_images.get(&element).cloned().ok_or_else(|| {
            FlareError::BadProject(format!(
                "no image rendered for element: {}",
                element.name()
            ))
        })
    }

    fn starburst_aperture(&mut self, project: &Project) -> Result<Arc<ImageData>> {
        let flare = &project.flare;
        let image = self.aperture_task.run(
            &self.ctx,
            &flare.starburst.aperture,
            project.render.starburst.resolution,
            flare.light.position,
        )?;
        self.device_images
            .insert(RenderElement::StarburstAperture, Arc::clone(&image));
        image.to_host(&self.ctx)
    }

    fn ghost_aperture(&mut self, project: &Project) -> Result<Arc<ImageData>> {
        let image = self.aperture_task.run(
            &self.ctx,
            &project.flare.ghost.aperture,
            project.render.ghost.resolution,
            [0.0, 0.0],
        )?;
        self.device_images
            .insert(RenderElement::GhostAperture, Arc::clone(&image));
        image.to_host(&self.ctx)
    }

    fn ghost(&mut self, project: &Project) -> Result<Arc<ImageData>> {
        let aperture = self.device_image(RenderElement::GhostAperture)?;
        let image = self
            .ghost_task
            .run(&self.ctx, &aperture, project.flare.ghost.fstop)?;
        self.device_images
            .insert(RenderElement::Ghost, Arc::clone(&image));
        image.to_host(&self.ctx)
    }

    fn starburst(&mut self, project: &Project) -> Result<Arc<ImageData>> {
        let flare = &project.flare;
        let aperture = self.device_image(RenderElement::StarburstAperture)?;
        let image = self.starburst_task.run(
            &self.ctx,
            &flare.starburst,
            project.render.resolution,
            project.render.starburst.samples,
            &aperture,
            flare.light.position,
            flare.light.intensity,
        )?;
        self.device_images
            .insert(RenderElement::Starburst, Arc::clone(&image));
        image.to_host(&self.ctx)
    }

    fn path_selector(&self, project: &Project) -> Result<PathSelector> {
        if let Some(debug_ghost) = project.render.debug_ghost {
            return Ok(PathSelector::from_debug_ghost(Some(debug_ghost)));
        }
        if project.render.cull_percentage > 0.0 {
            let indices = self.preprocess_task.run(
                &self.ctx,
                &self.storage,
                &self.raytracing_task,
                &project.flare,
                &project.render,
            )?;
            return Ok(PathSelector::Indices(indices.as_ref().clone()));
        }
        Ok(PathSelector::All)
    }

    fn render_flare_at(
        &self,
        project: &Project,
        light_position: [f32; 2],
        selector: &PathSelector,
        ghost: &Arc<DeviceImage>,
        cancel: &CancelToken,
    ) -> Result<Arc<ImageData>> {
        let flare = &project.flare;
        let render = &project.render;
        let rays = self.raytracing_task.trace(
            &self.ctx,
            &self.storage,
            light_position,
            &flare.lens,
            render.grid_count,
            render.grid_length,
            render.resolution,
            render.wavelength_count.max(1),
            selector,
        )?;
        let image = self.rasterizing_task.run(
            &self.ctx,
            render,
            rays.as_ref(),
            ghost,
            flare.lens.sensor_size,
            flare.lens.min_area,
            flare.light.intensity,
            flare.lens.fstop,
            cancel,
        )?;
        image.to_host(&self.ctx)
    }

    fn flare(&mut self, project: &Project, cancel: &CancelToken) -> Result<Arc<ImageData>> {
        let flare = &project.flare;
        let selector = self.path_selector(project)?;
        let ghost = self.device_image(RenderElement::Ghost)?;

        if let Some(light_image) = &flare.light.image
            && !light_image.file.is_empty()
        {
            let samples =
                self.sampling_task
                    .run(&self.storage, light_image, project.render.resolution)?;
            if light_image.show_samples {
                return Ok(samples);
            }
            return self.flare_from_samples(project, &samples, &selector, &ghost, cancel);
        }

        self.render_flare_at(project, flare.light.position, &selector, &ghost, cancel)
    }

    /// Image-driven light: renders one flare per surviving sample of the
    /// top-left quadrant and accumulates the four mirrored copies,
    /// weighted by the sample colors.
    fn flare_from_samples(
        &self,
        project: &Project,
        samples: &Arc<ImageData>,
        selector: &PathSelector,
        ghost: &Arc<DeviceImage>,
        cancel: &CancelToken,
    ) -> Result<Arc<ImageData>> {
        let [width, height] = project.render.resolution;
        let half_w = samples.width / 2;
        let half_h = samples.height / 2;
        let mut accumulated = ImageData::new(width, height, 4);

        for y in 0..half_h {
            for x in 0..half_w {
                let values = [
                    sample_rgb(samples, x, y),
                    sample_rgb(samples, x, samples.height - y - 1),
                    sample_rgb(
                        samples,
                        samples.width - x - 1,
                        samples.height - y - 1,
                    ),
                    sample_rgb(samples, samples.width - x - 1, y),
                ];
                if values.iter().flatten().sum::<f32>() == 0.0 {
                    continue;
                }
                cancel.check()?;

                let position = [
                    (x as f32 + 0.5) / half_w as f32 - 1.0,
                    1.0 - (y as f32 + 0.5) / half_h as f32,
                ];
                let flare = self.render_flare_at(project, position, selector, ghost, cancel)?;

                let mut mirrored = flare.as_ref().clone();
                accumulate_weighted(&mut accumulated, &mirrored, values[0]);
                flip_vertical(&mut mirrored);
                accumulate_weighted(&mut accumulated, &mirrored, values[1]);
                flip_horizontal(&mut mirrored);
                accumulate_weighted(&mut accumulated, &mirrored, values[2]);
                flip_vertical(&mut mirrored);
                accumulate_weighted(&mut accumulated, &mirrored, values[3]);
            }
        }

        let norm = 1.0 / (samples.width * samples.height) as f32;
        for value in &mut accumulated.data {
            *value *= norm;
        }
        Ok(Arc::new(accumulated))
    }

    fn flare_starburst(&mut self) -> Result<Arc<ImageData>> {
        let flare = self
            .images
            .get(&RenderElement::Flare)
            .ok_or_else(|| FlareError::BadProject("FLARE has not been rendered".into()))?;
        let starburst = self
            .images
            .get(&RenderElement::Starburst)
            .ok_or_else(|| FlareError::BadProject("STARBURST has not been rendered".into()))?;

        if flare.width != starburst.width || flare.height != starburst.height {
            return Err(FlareError::BadProject(
                "FLARE and STARBURST resolutions differ".into(),
            ));
        }
        let mut composite = flare.as_ref().clone();
        for (out, value) in composite.data.iter_mut().zip(&starburst.data) {
            *out += value;
        }
        Ok(Arc::new(composite))
    }

    fn diagram(&mut self, project: &Project) -> Result<Arc<ImageData>> {
        let image = self.diagram_task.run(
            &self.ctx,
            &self.storage,
            &self.raytracing_task,
            &project.flare.lens,
            &project.diagram,
        )?;
        image.to_host(&self.ctx)
    }

    /// Writes a rendered element to the project's output path. Write
    /// failures are logged and swallowed: the render stays successful for
    /// the other elements.
    pub fn write_output(&self, project: &Project, element: RenderElement, frame: i32) {
        if project.output.path.is_empty() {
            log::warn!("no output path specified");
            return;
        }
        let Some(image) = self.image(element) else {
            log::warn!("element {} has not been rendered yet", element.name());
            return;
        };
        let path = parse_output_path(&project.output.path, frame);
        if let Err(e) = self.storage.write_image(std::path::Path::new(&path), &image) {
            log::error!("{e}");
        }
    }
}

fn sample_rgb(image: &ImageData, x: u32, y: u32) -> [f32; 3] {
    let pixel = image.pixel(x, y);
    [pixel[0], pixel[1], pixel[2]]
}

fn accumulate_weighted(target: &mut ImageData, source: &ImageData, weight: [f32; 3]) {
    let luminance = (weight[0] + weight[1] + weight[2]) / 3.0;
    let weight = [weight[0], weight[1], weight[2], luminance];
    for (out, value) in target.data.chunks_exact_mut(4).zip(source.data.chunks_exact(4)) {
        for c in 0..4 {
            out[c] += weight[c] * value[c];
        }
    }
}

fn flip_vertical(image: &mut ImageData) {
    let row = (image.width * image.channels) as usize;
    let mut top = 0usize;
    let mut bottom = image.height as usize - 1;
    while top < bottom {
        let (a, b) = image.data.split_at_mut(bottom * row);
        a[top * row..top * row + row].swap_with_slice(&mut b[..row]);
        top += 1;
        bottom -= 1;
    }
}

fn flip_horizontal(image: &mut ImageData) {
    let channels = image.channels as usize;
    let width = image.width as usize;
    for y in 0..image.height as usize {
        let row = &mut image.data[y * width * channels..(y + 1) * width * channels];
        for x in 0..width / 2 {
            for c in 0..channels {
                row.swap(x * channels + c, (width - x - 1) * channels + c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> ImageData {
        let mut image = ImageData::new(width, height, 4);
        for y in 0..height {
            for x in 0..width {
                let base = ((y * width + x) * 4) as usize;
                image.data[base] = x as f32;
                image.data[base + 1] = y as f32;
                image.data[base + 3] = 1.0;
            }
        }
        image
    }

    #[test]
    fn flips_are_involutions() {
        let original = gradient(6, 4);
        let mut image = original.clone();
        flip_vertical(&mut image);
        assert_ne!(image.data, original.data);
        flip_vertical(&mut image);
        assert_eq!(image.data, original.data);
        flip_horizontal(&mut image);
        flip_horizontal(&mut image);
        assert_eq!(image.data, original.data);
    }

    #[test]
    fn flip_vertical_moves_rows() {
        let mut image = gradient(2, 3);
        flip_vertical(&mut image);
        assert_eq!(image.pixel(0, 0)[1], 2.0);
        assert_eq!(image.pixel(0, 2)[1], 0.0);
    }
}
