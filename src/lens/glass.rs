//! Glass Catalogues
//!
//! Sellmeier dispersion data loaded from manufacturer directories of
//! refractiveindex.info-style YAML files, and the closest-match lookup that
//! assigns a real glass to each prescription element.

use std::path::Path;

use serde::Deserialize;
use xxhash_rust::xxh3::Xxh3;

use crate::errors::{FlareError, Result};
use crate::fingerprint::Fingerprint;

/// One glass: its catalogue identity and the three-term Sellmeier
/// coefficients `B1, C1, B2, C2, B3, C3`.
#[derive(Debug, Clone, PartialEq)]
pub struct Glass {
    pub name: String,
    pub manufacturer: String,
    /// Refractive index at the d line.
    pub n: f32,
    /// Abbe number.
    pub v: f32,
    pub coefficients: [f32; 6],
}

impl Fingerprint for Glass {
    fn update(&self, h: &mut Xxh3) {
        self.name.update(h);
        self.manufacturer.update(h);
        self.n.update(h);
        self.v.update(h);
        self.coefficients.update(h);
    }
}

/// A finite set of glasses loaded from one manufacturer directory.
pub type GlassLibrary = Vec<Glass>;

#[derive(Deserialize)]
struct GlassFile {
    #[serde(rename = "DATA", default)]
    data: Vec<GlassData>,
    #[serde(rename = "SPECS", default)]
    specs: GlassSpecs,
}

#[derive(Deserialize)]
struct GlassData {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    coefficients: String,
}

#[derive(Deserialize, Default)]
struct GlassSpecs {
    #[serde(default, alias = "Nd")]
    nd: Option<f32>,
    #[serde(default, alias = "Vd")]
    vd: Option<f32>,
}

fn parse_glass(text: &str, name: &str, manufacturer: &str) -> Option<Glass> {
    let file: GlassFile = serde_yaml::from_str(text).ok()?;

    // "formula 2" is the Sellmeier form; the leading constant is dropped
    let raw = file
        .data
        .iter()
        .find(|d| d.kind == "formula 2")?
        .coefficients
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<std::result::Result<Vec<f32>, _>>()
        .ok()?;
    if raw.len() < 6 {
        return None;
    }
    let mut coefficients = [0.0f32; 6];
    coefficients.copy_from_slice(&raw[..6]);

    Some(Glass {
        name: name.to_string(),
        manufacturer: manufacturer.to_string(),
        n: file.specs.nd?,
        v: file.specs.vd?,
        coefficients,
    })
}

/// Loads every parseable glass from a manufacturer directory. Files that
/// are not Sellmeier records are skipped silently; an unreadable directory
/// is an error, and an empty path yields an empty library (no dispersion).
pub fn glasses_from_path(path: &Path) -> Result<GlassLibrary> {
    if path.as_os_str().is_empty() {
        return Ok(Vec::new());
    }
    let manufacturer = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let entries = std::fs::read_dir(path)
        .map_err(|e| FlareError::BadGlassLibrary(format!("{}: {e}", path.display())))?;

    let mut glasses = Vec::new();
    for entry in entries.flatten() {
        let file_path = entry.path();
        let is_yaml = file_path
            .extension()
            .is_some_and(|ext| ext == "yml" || ext == "yaml");
        if !file_path.is_file() || !is_yaml {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file_path) else {
            continue;
        };
        let name = file_path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(glass) = parse_glass(&text, &name, &manufacturer) {
            glasses.push(glass);
        }
    }
    Ok(glasses)
}

/// Finds the glass closest to a requested `(n, v)` pair, measured in
/// percentage-normalized Euclidean distance so the two units compare.
/// Ties resolve to the first candidate in library order.
#[must_use]
pub fn closest_glass<'a>(
    glasses: &'a [Glass],
    n: f32,
    v: f32,
    v_offset: f32,
) -> Option<&'a Glass> {
    if n == 0.0 || v + v_offset == 0.0 {
        return None;
    }
    let v = v + v_offset;

    let mut best: Option<(&Glass, f32)> = None;
    for glass in glasses {
        let n_diff = 1.0 - glass.n / n;
        let v_diff = 1.0 - glass.v / v;
        let distance = n_diff * n_diff + v_diff * v_diff;
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((glass, distance));
        }
    }
    best.map(|(glass, _)| glass)
}

/// Refractive index at a wavelength (nm) from three-term Sellmeier
/// coefficients; the equation expects micrometres.
#[must_use]
pub fn sellmeier(coefficients: &[f32; 6], wavelength: f32) -> f32 {
    let l = f64::from(wavelength) * 1e-3;
    let l2 = l * l;
    let c = coefficients.map(f64::from);
    let d0 = c[0] * l2 / (l2 - c[1]);
    let d1 = c[2] * l2 / (l2 - c[3]);
    let d2 = c[4] * l2 / (l2 - c[5]);
    (1.0 + d0 + d1 + d2).sqrt() as f32
}
