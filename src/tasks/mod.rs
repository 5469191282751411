//! Pipeline Tasks
//!
//! One module per pipeline stage. Every task owns its memoization caches
//! and pulls dependencies through the [`ComputeContext`] it is handed;
//! results are cached device images or buffers keyed by input
//! fingerprints.
//!
//! The `shaders/` directory holds the WGSL kernel templates; the structs
//! below are their byte-exact host mirrors.

pub mod aperture;
pub mod diagram;
pub mod ghost;
pub mod preprocess;
pub mod rasterizing;
pub mod raytracing;
pub mod sampling;
pub mod starburst;

use bytemuck::{Pod, Zeroable};

/// Host mirror of the WGSL `Ray` struct (48 bytes).
///
/// `rrel` tracks the maximum radial position over the traversal relative
/// to each element's mechanical height; above 1 the ray left the system.
/// `pos_apt` is the normalized position where the ray crossed the
/// aperture plane.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuRay {
    pub pos: [f32; 3],
    pub _pad0: f32,
    pub dir: [f32; 3],
    pub _pad1: f32,
    pub pos_apt: [f32; 2],
    pub rrel: f32,
    pub reflectance: f32,
}

/// Host mirror of the WGSL `Vertex` struct (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub rrel: f32,
    pub reflectance: f32,
    pub intensity: f32,
    pub _pad: f32,
}

/// Host mirror of the WGSL `Intersection` struct (32 bytes):
/// position + incident angle, normal + hit flag.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuIntersection {
    pub pos_theta: [f32; 4],
    pub normal_hit: [f32; 4],
}

pub(crate) fn workgroups_2d(width: u32, height: u32) -> [u32; 3] {
    [width.div_ceil(8), height.div_ceil(8), 1]
}
