//! End-to-End Engine Tests
//!
//! Full-pipeline scenarios on a real compute device. Every test acquires
//! its own engine and skips (with a note) when the host has no usable
//! adapter, so the suite stays green on headless machines.
//!
//! The test lens is a plane-surface slab stack: plane elements keep ray
//! positions analytic (no focusing), which makes the expected images easy
//! to reason about while still exercising reflection bookkeeping,
//! coatings, the aperture crossing and the whole raster pipeline.

use std::sync::Arc;

use lensflare::data::{Project, RenderElement};
use lensflare::engine::{Engine, RenderImage};
use lensflare::errors::FlareError;
use lensflare::lens::PathSelector;
use lensflare::storage::Storage;
use lensflare::worker::{
    CancelToken, EngineEvent, RenderRequest, RenderStatus, RenderWorker,
};
use lensflare::{ComputeContext, ImageData};

// ============================================================================
// Fixtures
// ============================================================================

/// Alternating glass/air plane surfaces, 5 mm apart, aperture last.
fn slab_model_json(element_count: usize) -> String {
    let elements: Vec<String> = (0..element_count)
        .map(|i| {
            // air gaps carry no abbe number so no glass gets matched
            let (ior, abbe) = if i % 2 == 0 { (1.5168, 64.17) } else { (1.0, 0.0) };
            let height = if i == element_count - 1 { 10.0 } else { 20.0 };
            format!(
                r#"{{ "radius": 0.0, "distance": 5.0, "refractive_index": {ior}, "abbe_nr": {abbe}, "height": {height} }}"#
            )
        })
        .collect();
    format!(
        r#"{{
            "name": "slab-{element_count}",
            "focal_length": 50,
            "aperture_index": {},
            "lens_elements": [{}]
        }}"#,
        element_count - 1,
        elements.join(", ")
    )
}

const BK7_YML: &str = "SPECS:\n  nd: 1.5168\n  vd: 64.17\nDATA:\n  - type: \"formula 2\"\n    coefficients: \"0 1.03961212 0.00600069867 0.23179234 0.02001791 1.01046945 103.560653\"\n";

struct World {
    engine: Engine,
    dir: tempfile::TempDir,
}

impl World {
    fn model_path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }
}

fn world() -> Option<World> {
    let dir = tempfile::tempdir().expect("tempdir");
    for count in [2usize, 3, 4] {
        std::fs::write(
            dir.path().join(format!("slab{count}.json")),
            slab_model_json(count),
        )
        .expect("write model");
    }
    let glass_dir = dir.path().join("glass").join("schott");
    std::fs::create_dir_all(&glass_dir).expect("glass dir");
    std::fs::write(glass_dir.join("N-BK7.yml"), BK7_YML).expect("write glass");

    let storage = Storage::with_root(dir.path().to_path_buf());
    match Engine::new("", Arc::new(storage)) {
        Ok(engine) => Some(World { engine, dir }),
        Err(e @ (FlareError::DeviceUnavailable(_) | FlareError::DeviceCreateFailed(_))) => {
            eprintln!("skipping: no usable compute device ({e})");
            None
        }
        Err(e) => panic!("engine init failed: {e}"),
    }
}

fn test_project(world: &World, model: &str) -> Project {
    let mut project = Project::default();
    project.flare.lens.model_path = world.model_path(model);
    project.render.resolution = [64, 64];
    project.render.bin_size = 32;
    project.render.grid_count = 9;
    project.render.grid_length = 50.0;
    project.render.wavelength_count = 1;
    project.render.ghost.resolution = [64, 64];
    project.render.starburst.resolution = [64, 64];
    project.render.starburst.samples = 8;
    project
}

fn render_one(
    engine: &mut Engine,
    project: &Project,
    element: RenderElement,
) -> Option<Arc<ImageData>> {
    let mut images: Vec<RenderImage> = Vec::new();
    engine
        .render(
            project,
            &[element],
            &CancelToken::none(),
            &mut |image| images.push(image),
            &mut |_| {},
        )
        .expect("render");
    images.pop().map(|r| r.image)
}

fn luminance_sum(image: &ImageData) -> f64 {
    let channel = if image.channels > 1 { 1 } else { 0 };
    image
        .data
        .chunks_exact(image.channels as usize)
        .map(|p| f64::from(p[channel]))
        .sum()
}

fn centroid(image: &ImageData, channel: usize) -> Option<(f64, f64)> {
    let mut total = 0.0f64;
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for y in 0..image.height {
        for x in 0..image.width {
            let value = f64::from(image.pixel(x, y)[channel]);
            total += value;
            cx += value * f64::from(x);
            cy += value * f64::from(y);
        }
    }
    (total > 0.0).then(|| (cx / total, cy / total))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn smoke_two_element_lens_renders_black() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab2.json");
    let image = render_one(&mut world.engine, &project, RenderElement::Flare)
        .expect("flare image emitted");
    assert_eq!((image.width, image.height), (64, 64));
    let peak = image.data.iter().fold(0.0f32, |a, v| a.max(v.abs()));
    assert!(peak <= 1e-6, "expected black image, peak {peak}");
}

#[test]
fn single_ghost_centers_on_the_optical_axis() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab3.json");
    let image = render_one(&mut world.engine, &project, RenderElement::Flare)
        .expect("flare image emitted");

    // alpha accumulates luminance; the slab lens keeps the single ghost
    // symmetric around the centre
    let (cx, cy) = centroid(&image, 3).expect("ghost contributes energy");
    assert!((cx - 32.0).abs() <= 2.0, "centroid x {cx}");
    assert!((cy - 32.0).abs() <= 2.0, "centroid y {cy}");
}

#[test]
fn ghost_aperture_mask_is_bright_inside_and_dark_outside() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab3.json");
    let image = render_one(&mut world.engine, &project, RenderElement::GhostAperture)
        .expect("aperture image emitted");
    assert_eq!(image.channels, 1);
    assert!(image.value(32, 32) > 0.9, "centre {}", image.value(32, 32));
    assert!(image.value(0, 0) < 1e-3, "corner {}", image.value(0, 0));
}

#[test]
fn starburst_concentrates_energy_at_the_light() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab3.json");
    let image = render_one(&mut world.engine, &project, RenderElement::Starburst)
        .expect("starburst image emitted");
    let total = luminance_sum(&image);
    assert!(total > 0.0, "starburst is black");
    // the DC peak of the power spectrum lands at the light position
    let (cx, cy) = centroid(&image, 1).expect("nonzero");
    assert!((cx - 32.0).abs() < 8.0 && (cy - 32.0).abs() < 8.0, "centroid ({cx}, {cy})");
}

#[test]
fn dispersion_shifts_ray_exit_positions() {
    let Some(world) = world() else { return };
    let dir = world.dir.path();

    let ctx = match ComputeContext::new("") {
        Ok(ctx) => ctx,
        Err(_) => return,
    };
    let storage = Storage::with_root(dir.to_path_buf());
    let task = lensflare::tasks::raytracing::RaytracingTask::new();

    let mut lens = lensflare::data::Lens::default();
    lens.model_path = dir.join("slab3.json").to_string_lossy().to_string();
    lens.glasses_path = dir.join("glass").join("schott").to_string_lossy().to_string();

    let rays = task
        .trace(
            &ctx,
            &storage,
            [0.8, 0.0],
            &lens,
            5,
            10.0,
            [64, 64],
            3,
            &PathSelector::All,
        )
        .expect("trace")
        .expect("rays");
    let host = rays.to_host(&ctx).expect("readback");

    // centre ray of the grid, bluest vs reddest traced band
    let ray_count = rays.ray_count() as usize;
    let centre = ray_count / 2;
    let blue = host[centre];
    let red = host[2 * ray_count + centre];
    assert!(blue.reflectance > 0.0 || red.reflectance > 0.0, "rays died");
    let spread = (blue.pos[0] - red.pos[0]).abs();
    assert!(spread > 1e-4, "chromatic spread {spread} mm");
}

#[test]
fn culling_never_adds_energy() {
    let Some(mut world) = world() else { return };
    let mut full = test_project(&world, "slab4.json");
    full.render.cull_percentage = 0.0;
    let full_image = render_one(&mut world.engine, &full, RenderElement::Flare)
        .expect("full render");

    let mut culled = full.clone();
    culled.render.cull_percentage = 0.5;
    let culled_image = render_one(&mut world.engine, &culled, RenderElement::Flare)
        .expect("culled render");

    let full_sum = luminance_sum(&full_image);
    let culled_sum = luminance_sum(&culled_image);
    assert!(
        culled_sum <= full_sum + full_sum.abs() * 1e-6 + 1e-9,
        "culled {culled_sum} > full {full_sum}"
    );
}

#[test]
fn identical_renders_debounce_the_second_emit() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab3.json");

    let first = render_one(&mut world.engine, &project, RenderElement::Flare);
    assert!(first.is_some(), "first render emits");
    let second = render_one(&mut world.engine, &project, RenderElement::Flare);
    assert!(second.is_none(), "unchanged render must not re-emit");
}

#[test]
fn superseding_render_cancels_the_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("slab3.json"), slab_model_json(3)).expect("model");
    let model_path = dir.path().join("slab3.json").to_string_lossy().to_string();

    let worker = RenderWorker::spawn(Storage::with_root(dir.path().to_path_buf()));

    let mut project = Project::default();
    project.flare.lens.model_path = model_path;
    project.render.resolution = [64, 64];
    project.render.grid_count = 9;
    project.render.ghost.resolution = [64, 64];

    let mut first = project.clone();
    first.flare.light.position = [-0.3, 0.0];
    let mut second = project;
    second.flare.light.position = [0.3, 0.0];

    let generation_one = worker.submit(RenderRequest {
        project: first,
        elements: vec![RenderElement::Flare],
    });
    let generation_two = worker.submit(RenderRequest {
        project: second,
        elements: vec![RenderElement::Flare],
    });

    let mut statuses = Vec::new();
    let mut flare_images = 0usize;
    while statuses.len() < 2 {
        match worker
            .events()
            .recv_timeout(std::time::Duration::from_secs(120))
        {
            Ok(EngineEvent::Finished {
                generation,
                status,
                message,
            }) => {
                if status == RenderStatus::Failed {
                    // no device on this host: nothing to assert
                    eprintln!("skipping: {message:?}");
                    return;
                }
                statuses.push((generation, status));
            }
            Ok(EngineEvent::ImageRendered(image)) => {
                if image.element == RenderElement::Flare {
                    flare_images += 1;
                }
            }
            Ok(EngineEvent::Progress { .. }) => {}
            Err(_) => panic!("worker timed out"),
        }
    }

    let last = statuses.last().unwrap();
    assert_eq!(last.0, generation_two);
    assert_eq!(last.1, RenderStatus::Completed);

    let first_status = statuses.iter().find(|(g, _)| *g == generation_one);
    if let Some((_, RenderStatus::Cancelled)) = first_status {
        assert_eq!(flare_images, 1, "cancelled render must not emit FLARE");
    }
}

#[test]
fn animated_light_mirrors_the_image() {
    let Some(mut world) = world() else { return };

    let doc = serde_json::json!({
        "flare": {
            "light": { "position": [[-0.5, 0.0], [0.5, 0.0]] },
            "lens": { "model_path": world.model_path("slab3.json") }
        },
        "render": {
            "resolution": [64, 64],
            "grid_count": 9,
            "ghost": { "resolution": [64, 64] }
        }
    });
    let frame0 = lensflare::animation::project_for_frame(&doc, 0).expect("frame 0");
    let frame1 = lensflare::animation::project_for_frame(&doc, 1).expect("frame 1");

    let image0 = render_one(&mut world.engine, &frame0, RenderElement::Flare).expect("frame 0");
    let image1 = render_one(&mut world.engine, &frame1, RenderElement::Flare).expect("frame 1");

    let peak = image0
        .data
        .iter()
        .chain(&image1.data)
        .fold(0.0f32, |a, v| a.max(v.abs()));
    let tolerance = (peak * 1e-3).max(1e-6);

    let mut worst = 0.0f32;
    for y in 0..64u32 {
        for x in 0..64u32 {
            let mirrored = image0.pixel(63 - x, y);
            let actual = image1.pixel(x, y);
            for c in 0..4 {
                worst = worst.max((mirrored[c] - actual[c]).abs());
            }
        }
    }
    assert!(
        worst <= tolerance,
        "mirror mismatch {worst} exceeds {tolerance}"
    );
}

#[test]
fn diagram_draws_the_lens_stack() {
    let Some(mut world) = world() else { return };
    let mut project = test_project(&world, "slab3.json");
    project.diagram.resolution = [256, 128];
    project.diagram.grid_count = 4;
    project.diagram.debug_ghost = 0;
    let image = render_one(&mut world.engine, &project, RenderElement::Diagram)
        .expect("diagram image emitted");
    assert!(
        image.data.iter().any(|v| *v > 0.0),
        "diagram should draw something"
    );
}

#[test]
fn flare_starburst_composites_both_layers() {
    let Some(mut world) = world() else { return };
    let project = test_project(&world, "slab3.json");
    let composite = render_one(&mut world.engine, &project, RenderElement::FlareStarburst)
        .expect("composite emitted");
    let flare = world
        .engine
        .image(RenderElement::Flare)
        .expect("flare dependency rendered");
    assert!(luminance_sum(&composite) >= luminance_sum(&flare) - 1e-6);
}
