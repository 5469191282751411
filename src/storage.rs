//! Storage
//!
//! The engine's only door to the filesystem: resource roots, relocatable
//! path variables, project/animation JSON and output image writing. The
//! root defaults to `~/.lensflare` and can be moved with the
//! `LENSFLARE_PATH` environment variable.
//!
//! Layout under the root:
//! - `resources/model/**.json` — lens prescriptions
//! - `resources/glass/<vendor>/*.yml` — Sellmeier libraries
//! - `resources/aperture/*.png` — mask textures
//! - `resources/preset/{flare,ghost,starburst}/*.json` — presets

use std::path::{Path, PathBuf};

use crate::compute::ImageData;
use crate::data::Project;
use crate::errors::{FlareError, Result};

/// Environment variable overriding the resource root.
pub const PATH_ENV: &str = "LENSFLARE_PATH";

pub struct Storage {
    root: PathBuf,
    path_vars: Vec<(&'static str, PathBuf)>,
}

impl Storage {
    #[must_use]
    pub fn new() -> Self {
        let root = std::env::var_os(PATH_ENV).map_or_else(
            || {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".lensflare")
            },
            PathBuf::from,
        );
        Self::with_root(root)
    }

    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        let resources = root.join("resources");
        let path_vars = vec![
            ("$MODEL", resources.join("model")),
            ("$GLASS", resources.join("glass")),
            ("$APT", resources.join("aperture")),
            ("$PRESET", resources.join("preset")),
            ("$RES", resources),
        ];
        Self { root, path_vars }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expands a `$VAR`-prefixed path into an absolute one.
    #[must_use]
    pub fn decode_path(&self, path: &str) -> PathBuf {
        for (var, target) in &self.path_vars {
            if let Some(rest) = path.strip_prefix(var) {
                let rest = rest.trim_start_matches(['/', '\\']);
                return target.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Replaces a resource-root prefix with its `$VAR` so project files
    /// stay relocatable.
    #[must_use]
    pub fn encode_path(&self, path: &Path) -> String {
        for (var, target) in &self.path_vars {
            if let Ok(rest) = path.strip_prefix(target) {
                return format!("{var}/{}", rest.to_string_lossy().replace('\\', "/"));
            }
        }
        path.to_string_lossy().to_string()
    }

    pub fn read_json(&self, path: &Path) -> Result<serde_json::Value> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlareError::BadProject(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| FlareError::BadProject(e.to_string()))
    }

    pub fn load_project(&self, path: &Path) -> Result<Project> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlareError::BadProject(format!("{}: {e}", path.display())))?;
        Project::from_json(&text)
    }

    pub fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    /// Writes a rendered image: EXR for float data, PNG for 8-bit. Any
    /// failure maps to [`FlareError::WriteFailed`] which the engine treats
    /// as non-fatal.
    pub fn write_image(&self, path: &Path, image: &ImageData) -> Result<()> {
        let fail = |reason: String| FlareError::WriteFailed {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }

        let is_exr = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));

        let rgba = to_rgba(image);
        if is_exr {
            let buffer: image::Rgba32FImage =
                image::ImageBuffer::from_raw(image.width, image.height, rgba)
                    .ok_or_else(|| fail("image dimensions do not match data".into()))?;
            buffer.save(path).map_err(|e| fail(e.to_string()))?;
        } else {
            let bytes: Vec<u8> = rgba
                .iter()
                .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect();
            let buffer: image::RgbaImage =
                image::ImageBuffer::from_raw(image.width, image.height, bytes)
                    .ok_or_else(|| fail("image dimensions do not match data".into()))?;
            buffer.save(path).map_err(|e| fail(e.to_string()))?;
        }
        log::info!("output written: {}", path.display());
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

fn to_rgba(image: &ImageData) -> Vec<f32> {
    let pixels = (image.width * image.height) as usize;
    let mut rgba = Vec::with_capacity(pixels * 4);
    for i in 0..pixels {
        match image.channels {
            1 => {
                let v = image.data[i];
                rgba.extend_from_slice(&[v, v, v, 1.0]);
            }
            3 => {
                let base = i * 3;
                rgba.extend_from_slice(&[
                    image.data[base],
                    image.data[base + 1],
                    image.data[base + 2],
                    1.0,
                ]);
            }
            _ => {
                let base = i * 4;
                rgba.extend_from_slice(&image.data[base..base + 4]);
            }
        }
    }
    rgba
}

/// Expands `$F`, `$F2`..`$F4` into (zero-padded) frame numbers.
#[must_use]
pub fn parse_output_path(path: &str, frame: i32) -> String {
    path.replace("$F4", &format!("{frame:04}"))
        .replace("$F3", &format!("{frame:03}"))
        .replace("$F2", &format!("{frame:02}"))
        .replace("$F", &format!("{frame}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_patterns_zero_pad() {
        assert_eq!(parse_output_path("out.$F.exr", 7), "out.7.exr");
        assert_eq!(parse_output_path("out.$F2.exr", 7), "out.07.exr");
        assert_eq!(parse_output_path("out.$F4.exr", 42), "out.0042.exr");
        assert_eq!(parse_output_path("plain.exr", 1), "plain.exr");
    }

    #[test]
    fn path_vars_round_trip() {
        let storage = Storage::with_root(PathBuf::from("/tmp/flare-root"));
        let decoded = storage.decode_path("$MODEL/vintage/lens.json");
        assert_eq!(
            decoded,
            PathBuf::from("/tmp/flare-root/resources/model/vintage/lens.json")
        );
        assert_eq!(storage.encode_path(&decoded), "$MODEL/vintage/lens.json");
    }

    #[test]
    fn unprefixed_paths_pass_through() {
        let storage = Storage::with_root(PathBuf::from("/tmp/flare-root"));
        assert_eq!(storage.decode_path("/abs/file.json"), PathBuf::from("/abs/file.json"));
    }
}
