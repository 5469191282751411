//! Lens Prescriptions
//!
//! Loading of lens model files, assembly of the GPU element buffer and
//! enumeration of ghost paths.
//!
//! A lens model is an ordered stack of refractive elements, front to
//! sensor. The buffer handed to the GPU appends the sensor itself as a
//! synthetic terminal element (radius 0, height = half the sensor
//! diagonal) so the trace kernel always ends on a plane.

pub mod glass;
pub mod paths;

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::errors::{FlareError, Result};
use crate::fingerprint::Fingerprint;

pub use glass::{Glass, GlassLibrary, closest_glass, sellmeier};
pub use paths::{GhostPath, PathSelector, ray_paths};

/// Default anti-reflective coating: quarter-wave at 537 nm, MgF2.
pub const DEFAULT_COATING: (i32, f32) = (537, 1.38);

/// One refractive element of a lens prescription.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LensElement {
    /// Signed surface radius in mm; 0 means a plane.
    pub radius: f32,
    /// Axial distance from the previous element in mm.
    pub distance: f32,
    pub refractive_index: f32,
    pub abbe_nr: f32,
    /// Mechanical half-height in mm; rays beyond it leave the system.
    pub height: f32,
}

impl Fingerprint for LensElement {
    fn update(&self, h: &mut Xxh3) {
        self.radius.update(h);
        self.distance.update(h);
        self.refractive_index.update(h);
        self.abbe_nr.update(h);
        self.height.update(h);
    }
}

/// A lens prescription as stored on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LensModel {
    pub name: String,
    pub year: u32,
    pub patent_number: String,
    pub notes: String,
    /// Focal length in mm.
    pub focal_length: f32,
    /// Index of the aperture stop within `lens_elements`.
    pub aperture_index: usize,
    pub lens_elements: Vec<LensElement>,
}

impl Fingerprint for LensModel {
    fn update(&self, h: &mut Xxh3) {
        self.name.update(h);
        self.year.update(h);
        self.patent_number.update(h);
        self.notes.update(h);
        self.focal_length.update(h);
        self.aperture_index.update(h);
        self.lens_elements.update(h);
    }
}

impl LensModel {
    /// Parses a model from JSON and validates its internal consistency.
    pub fn from_json(text: &str) -> Result<Self> {
        let model: LensModel =
            serde_json::from_str(text).map_err(|e| FlareError::BadLensModel(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    /// Loads a model file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlareError::BadLensModel(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        let count = self.lens_elements.len();
        if self.aperture_index >= count.max(1) {
            return Err(FlareError::BadLensModel(format!(
                "aperture index {} out of range for {count} elements",
                self.aperture_index
            )));
        }
        Ok(())
    }
}

// ============================================================================
// GPU element buffer
// ============================================================================

/// Device mirror of one lens interface; must match the WGSL `LensElement`
/// struct field for field.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LensElementGpu {
    pub radius: f32,
    pub distance: f32,
    pub ior: f32,
    pub height: f32,
    /// Axial position of the sphere centre (accumulated offset + radius).
    pub center: f32,
    pub is_aperture: u32,
    /// (reference wavelength nm, minimum refractive index) of the coating.
    pub coating: [f32; 2],
    /// Sellmeier B1,C1,B2,C2,B3,C3 plus two padding floats; B1 == 0 marks
    /// "no dispersion data" and the kernel falls back to the fixed ior.
    pub coefficients: [f32; 8],
}

/// Builds the element buffer for the trace kernel: the stored prescription
/// plus the sensor as a terminal plane, each element matched to the
/// closest glass of the library.
#[must_use]
pub fn lens_elements_gpu(
    model: &LensModel,
    sensor_size: [f32; 2],
    glasses: &[Glass],
    abbe_nr_adjustment: f32,
    coating_wavelengths: &[i32],
    coating_min_ior: f32,
) -> Vec<LensElementGpu> {
    let sensor_height = glam::Vec2::from(sensor_size).length() / 2.0;
    let sensor = LensElement {
        height: sensor_height,
        ..LensElement::default()
    };

    let elements = model.lens_elements.iter().copied().chain([sensor]);

    let mut array = Vec::with_capacity(model.lens_elements.len() + 1);
    let mut offset = 0.0f32;
    for (i, element) in elements.enumerate() {
        let coating_wavelength = coating_wavelengths
            .get(i)
            .copied()
            .unwrap_or(DEFAULT_COATING.0);

        let mut coefficients = [0.0f32; 8];
        if let Some(glass) = closest_glass(
            glasses,
            element.refractive_index,
            element.abbe_nr,
            abbe_nr_adjustment,
        ) {
            coefficients[..6].copy_from_slice(&glass.coefficients);
        }

        array.push(LensElementGpu {
            radius: element.radius,
            distance: element.distance,
            ior: element.refractive_index,
            height: element.height,
            center: offset + element.radius,
            is_aperture: u32::from(i == model.aperture_index),
            coating: [coating_wavelength as f32, coating_min_ior.max(1.0)],
            coefficients,
        });

        offset += element.distance;
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_struct_layout_matches_wgsl() {
        // WGSL: six scalars, one vec2, two vec4 -> 64 bytes, align 16
        assert_eq!(std::mem::size_of::<LensElementGpu>(), 64);
        assert_eq!(std::mem::offset_of!(LensElementGpu, coating), 24);
        assert_eq!(std::mem::offset_of!(LensElementGpu, coefficients), 32);
    }
}
