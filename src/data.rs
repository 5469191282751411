//! Project Data Model
//!
//! The value types a caller hands to the engine. Everything here is a plain
//! immutable record: mutation replaces the whole subtree, the engine never
//! mutates what it is given. All records deserialize from JSON with
//! documented defaults for missing keys; unknown keys are ignored.
//!
//! Every record implements [`Fingerprint`] so tasks can derive cache keys
//! from exactly the inputs that affect their result. Floats are fingerprinted
//! by bit pattern, never by value.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::errors::{FlareError, Result};
use crate::fingerprint::Fingerprint;

/// The render outputs a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderElement {
    StarburstAperture,
    Starburst,
    GhostAperture,
    Ghost,
    Flare,
    FlareStarburst,
    Diagram,
}

impl RenderElement {
    /// All elements in DAG-topological emission order.
    pub const ALL: [RenderElement; 7] = [
        RenderElement::StarburstAperture,
        RenderElement::Starburst,
        RenderElement::GhostAperture,
        RenderElement::Ghost,
        RenderElement::Flare,
        RenderElement::FlareStarburst,
        RenderElement::Diagram,
    ];

    /// The CLI spelling, e.g. `GHOST_APERTURE`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RenderElement::StarburstAperture => "STARBURST_APERTURE",
            RenderElement::Starburst => "STARBURST",
            RenderElement::GhostAperture => "GHOST_APERTURE",
            RenderElement::Ghost => "GHOST",
            RenderElement::Flare => "FLARE",
            RenderElement::FlareStarburst => "FLARE_STARBURST",
            RenderElement::Diagram => "DIAGRAM",
        }
    }
}

impl std::str::FromStr for RenderElement {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        RenderElement::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FlareError::BadProject(format!("unknown render element: {s}")))
    }
}

impl Fingerprint for RenderElement {
    fn update(&self, h: &mut Xxh3) {
        (*self as u32).update(h);
    }
}

// ============================================================================
// Light
// ============================================================================

/// An image standing in for the light source: its brightest pixels become
/// individual flare samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LightImage {
    pub file: String,
    /// Number of sample positions kept after thresholding.
    pub samples: u32,
    /// Width of the sampling grid in pixels; height follows the output
    /// aspect ratio. Forced even so quadrant mirroring stays exact.
    pub sample_resolution: u32,
    /// Emit the thresholded sample map instead of rendering flares.
    pub show_samples: bool,
}

impl Fingerprint for LightImage {
    fn update(&self, h: &mut Xxh3) {
        self.file.update(h);
        self.samples.update(h);
        self.sample_resolution.update(h);
        self.show_samples.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Light {
    pub intensity: f32,
    /// NDC position of the light, both axes in [-1, 1].
    pub position: [f32; 2],
    pub image: Option<LightImage>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            position: [0.0, 0.0],
            image: None,
        }
    }
}

impl Fingerprint for Light {
    fn update(&self, h: &mut Xxh3) {
        self.intensity.update(h);
        self.position.update(h);
        self.image.update(h);
    }
}

// ============================================================================
// Lens
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lens {
    /// Sensor dimensions in millimetres.
    pub sensor_size: [f32; 2],
    pub fstop: f32,
    /// Path to a lens model file (`$MODEL/...` encoded or absolute).
    pub model_path: String,
    /// Path to a glass manufacturer directory of Sellmeier files.
    pub glasses_path: String,
    /// Creative offset applied to every element's Abbe number before the
    /// closest-glass lookup.
    pub abbe_nr_adjustment: f32,
    /// Per-element anti-reflective coating reference wavelengths in nm.
    /// Elements beyond the list take the default coating (537 nm, 1.38).
    pub coating_lens_elements: Vec<i32>,
    /// Lower bound for the coating refractive index.
    pub coating_min_ior: f32,
    /// Minimum screen area of a primitive relative to its source area;
    /// bounds how much a caustic fold can concentrate energy.
    pub min_area: f32,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            sensor_size: [36.0, 24.0],
            fstop: 8.0,
            model_path: String::new(),
            glasses_path: String::new(),
            abbe_nr_adjustment: 0.0,
            coating_lens_elements: Vec::new(),
            coating_min_ior: 1.38,
            min_area: 0.01,
        }
    }
}

impl Fingerprint for Lens {
    fn update(&self, h: &mut Xxh3) {
        self.sensor_size.update(h);
        self.fstop.update(h);
        self.model_path.update(h);
        self.glasses_path.update(h);
        self.abbe_nr_adjustment.update(h);
        self.coating_lens_elements.update(h);
        self.coating_min_ior.update(h);
        self.min_area.update(h);
    }
}

// ============================================================================
// Aperture
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureShape {
    pub size: f32,
    pub blades: u32,
    /// Positive values round the polygon outward toward a circle.
    pub roundness: f32,
    /// Rotation in degrees.
    pub rotation: f32,
    /// Edge gradient half-width in normalized units.
    pub softness: f32,
}

impl Default for ApertureShape {
    fn default() -> Self {
        Self {
            size: 0.8,
            blades: 8,
            roundness: 0.0,
            rotation: 0.0,
            softness: 0.01,
        }
    }
}

impl Fingerprint for ApertureShape {
    fn update(&self, h: &mut Xxh3) {
        self.size.update(h);
        self.blades.update(h);
        self.roundness.update(h);
        self.rotation.update(h);
        self.softness.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grating {
    pub strength: f32,
    pub density: f32,
    pub length: f32,
    pub width: f32,
    pub softness: f32,
}

impl Default for Grating {
    fn default() -> Self {
        Self {
            strength: 0.0,
            density: 12.0,
            length: 0.1,
            width: 0.05,
            softness: 0.5,
        }
    }
}

impl Fingerprint for Grating {
    fn update(&self, h: &mut Xxh3) {
        self.strength.update(h);
        self.density.update(h);
        self.length.update(h);
        self.width.update(h);
        self.softness.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scratches {
    pub strength: f32,
    pub density: f32,
    pub length: f32,
    pub width: f32,
    /// Base orientation in degrees.
    pub rotation: f32,
    pub rotation_variation: f32,
    pub softness: f32,
    /// Layers shift with the light position by this factor.
    pub parallax: f32,
}

impl Default for Scratches {
    fn default() -> Self {
        Self {
            strength: 0.0,
            density: 32.0,
            length: 0.2,
            width: 0.004,
            rotation: 0.0,
            rotation_variation: 0.2,
            softness: 0.5,
            parallax: 0.0,
        }
    }
}

impl Fingerprint for Scratches {
    fn update(&self, h: &mut Xxh3) {
        self.strength.update(h);
        self.density.update(h);
        self.length.update(h);
        self.width.update(h);
        self.rotation.update(h);
        self.rotation_variation.update(h);
        self.softness.update(h);
        self.parallax.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dust {
    pub strength: f32,
    pub density: f32,
    pub radius: f32,
    pub softness: f32,
    pub parallax: f32,
}

impl Default for Dust {
    fn default() -> Self {
        Self {
            strength: 0.0,
            density: 32.0,
            radius: 0.01,
            softness: 0.5,
            parallax: 0.0,
        }
    }
}

impl Fingerprint for Dust {
    fn update(&self, h: &mut Xxh3) {
        self.strength.update(h);
        self.density.update(h);
        self.radius.update(h);
        self.softness.update(h);
        self.parallax.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureImage {
    pub strength: f32,
    pub file: String,
    pub size: f32,
    /// Values above this load as 1, the rest as 0; 1 disables thresholding.
    pub threshold: f32,
}

impl Default for ApertureImage {
    fn default() -> Self {
        Self {
            strength: 0.0,
            file: String::new(),
            size: 1.0,
            threshold: 1.0,
        }
    }
}

impl Fingerprint for ApertureImage {
    fn update(&self, h: &mut Xxh3) {
        self.strength.update(h);
        self.file.update(h);
        self.size.update(h);
        self.threshold.update(h);
    }
}

/// The full procedural aperture description. Shared by the ghost and
/// starburst pipelines; only the parallax handling differs between them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Aperture {
    pub shape: ApertureShape,
    pub grating: Grating,
    pub scratches: Scratches,
    pub dust: Dust,
    pub image: ApertureImage,
}

impl Fingerprint for Aperture {
    fn update(&self, h: &mut Xxh3) {
        self.shape.update(h);
        self.grating.update(h);
        self.scratches.update(h);
        self.dust.update(h);
        self.image.update(h);
    }
}

// ============================================================================
// Starburst & Ghost
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Starburst {
    pub aperture: Aperture,
    pub intensity: f32,
    pub scale: [f32; 2],
    /// Pupil-to-sensor distance in metres; controls the pattern size.
    pub distance: f32,
    pub blur: f32,
    /// Maximum rotation jitter in degrees.
    pub rotation: f32,
    /// Radial weighting exponent for the rotation jitter.
    pub rotation_weight: f32,
    /// Radial fadeout start/end in normalized radius, or None to disable.
    pub vignetting: Option<[f32; 2]>,
}

impl Default for Starburst {
    fn default() -> Self {
        Self {
            aperture: Aperture::default(),
            intensity: 1.0,
            scale: [1.0, 1.0],
            distance: 0.1,
            blur: 0.0,
            rotation: 0.0,
            rotation_weight: 1.0,
            vignetting: Some([0.75, 1.0]),
        }
    }
}

impl Fingerprint for Starburst {
    fn update(&self, h: &mut Xxh3) {
        self.aperture.update(h);
        self.intensity.update(h);
        self.scale.update(h);
        self.distance.update(h);
        self.blur.update(h);
        self.rotation.update(h);
        self.rotation_weight.update(h);
        self.vignetting.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ghost {
    pub aperture: Aperture,
    pub fstop: f32,
}

impl Default for Ghost {
    fn default() -> Self {
        Self {
            aperture: Aperture::default(),
            fstop: 8.0,
        }
    }
}

impl Fingerprint for Ghost {
    fn update(&self, h: &mut Xxh3) {
        self.aperture.update(h);
        self.fstop.update(h);
    }
}

/// Everything describing the flare itself, independent of render quality.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Flare {
    pub light: Light,
    pub lens: Lens,
    pub starburst: Starburst,
    pub ghost: Ghost,
}

impl Fingerprint for Flare {
    fn update(&self, h: &mut Xxh3) {
        self.light.update(h);
        self.lens.update(h);
        self.starburst.update(h);
        self.ghost.update(h);
    }
}

// ============================================================================
// Render quality
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarburstQuality {
    pub resolution: [u32; 2],
    pub samples: u32,
}

impl Default for StarburstQuality {
    fn default() -> Self {
        Self {
            resolution: [256, 256],
            samples: 100,
        }
    }
}

impl Fingerprint for StarburstQuality {
    fn update(&self, h: &mut Xxh3) {
        self.resolution.update(h);
        self.samples.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostQuality {
    pub resolution: [u32; 2],
}

impl Default for GhostQuality {
    fn default() -> Self {
        Self {
            resolution: [256, 256],
        }
    }
}

impl Fingerprint for GhostQuality {
    fn update(&self, h: &mut Xxh3) {
        self.resolution.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Render {
    pub resolution: [u32; 2],
    /// Tile edge length in pixels for the binned rasterizer.
    pub bin_size: u32,
    /// Sub-samples per pixel: 1, 2, 4 or 8.
    pub anti_aliasing: u32,
    pub wavelength_count: u32,
    /// Sub-wavelengths interpolated between traced wavelengths at raster
    /// time.
    pub wavelength_sub_count: u32,
    /// Rays per ghost path are `grid_count²`.
    pub grid_count: u32,
    /// Extent of the source sampling plane in millimetres.
    pub grid_length: f32,
    /// Fraction of the dimmest ghost paths dropped before full tracing.
    pub cull_percentage: f32,
    /// Restrict the render to a single ghost path by enumeration index;
    /// `-1` selects the pass-through path.
    pub debug_ghost: Option<i32>,
    pub starburst: StarburstQuality,
    pub ghost: GhostQuality,
    /// Device name filter; empty picks the first GPU.
    pub device: String,
}

impl Default for Render {
    fn default() -> Self {
        Self {
            resolution: [512, 512],
            bin_size: 64,
            anti_aliasing: 1,
            wavelength_count: 1,
            wavelength_sub_count: 1,
            grid_count: 33,
            grid_length: 50.0,
            cull_percentage: 0.0,
            debug_ghost: None,
            starburst: StarburstQuality::default(),
            ghost: GhostQuality::default(),
            device: String::new(),
        }
    }
}

impl Fingerprint for Render {
    fn update(&self, h: &mut Xxh3) {
        self.resolution.update(h);
        self.bin_size.update(h);
        self.anti_aliasing.update(h);
        self.wavelength_count.update(h);
        self.wavelength_sub_count.update(h);
        self.grid_count.update(h);
        self.grid_length.update(h);
        self.cull_percentage.update(h);
        self.debug_ghost.update(h);
        self.starburst.update(h);
        self.ghost.update(h);
        self.device.update(h);
    }
}

// ============================================================================
// Diagram & Output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagram {
    pub resolution: [u32; 2],
    pub debug_ghost: i32,
    /// Vertical NDC position of the light for the cross-section.
    pub light_position: f32,
    pub grid_count: u32,
    pub grid_length: f32,
    /// Which grid column of rays to draw, offset from the centre column.
    pub column_offset: i32,
}

impl Default for Diagram {
    fn default() -> Self {
        Self {
            resolution: [2048, 1024],
            debug_ghost: 0,
            light_position: 0.0,
            grid_count: 8,
            grid_length: 50.0,
            column_offset: 0,
        }
    }
}

impl Fingerprint for Diagram {
    fn update(&self, h: &mut Xxh3) {
        self.resolution.update(h);
        self.debug_ghost.update(h);
        self.light_position.update(h);
        self.grid_count.update(h);
        self.grid_length.update(h);
        self.column_offset.update(h);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    /// Destination path; `$F`, `$F2`..`$F4` expand to frame numbers.
    pub path: String,
    /// Colorspace tag the caller converts to; the engine itself emits
    /// "ACES - ACEScg"-tagged data.
    pub colorspace: String,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            path: String::new(),
            colorspace: "ACES - ACEScg".to_string(),
        }
    }
}

impl Fingerprint for Output {
    fn update(&self, h: &mut Xxh3) {
        self.path.update(h);
        self.colorspace.update(h);
    }
}

// ============================================================================
// Project
// ============================================================================

/// The root description of a render: one value in, images out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub output: Output,
    pub flare: Flare,
    pub render: Render,
    pub diagram: Diagram,
}

impl Fingerprint for Project {
    fn update(&self, h: &mut Xxh3) {
        self.output.update(h);
        self.flare.update(h);
        self.render.update(h);
        self.diagram.update(h);
    }
}

impl Project {
    /// Parses a project from a JSON document. Missing keys take their
    /// defaults; unknown keys are ignored; the first type mismatch fails.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| FlareError::BadProject(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
