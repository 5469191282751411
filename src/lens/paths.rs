//! Ghost Path Enumeration
//!
//! A ghost is produced by exactly two internal reflections. A path is the
//! ordered pair of element indices `(bounce1, bounce2)` where those
//! reflections happen, with `bounce1 > bounce2` (the ray reflects back,
//! then forward again) and both bounces on the same side of the aperture
//! or bracketing it from the rear.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::fingerprint::Fingerprint;
use crate::lens::LensModel;

/// The two reflection indices of a ghost; `(-1, -1)` is the pass-through
/// path with no reflections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostPath {
    pub bounce1: i32,
    pub bounce2: i32,
}

impl GhostPath {
    pub const PASS_THROUGH: GhostPath = GhostPath {
        bounce1: -1,
        bounce2: -1,
    };
}

impl Fingerprint for GhostPath {
    fn update(&self, h: &mut Xxh3) {
        self.bounce1.update(h);
        self.bounce2.update(h);
    }
}

/// Which ghost paths of the full enumeration a render traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSelector {
    /// Every enumerated path.
    All,
    /// A subset by enumeration index.
    Indices(Vec<usize>),
    /// Only the bounce-free pass-through path.
    PassThrough,
}

impl PathSelector {
    /// Maps the project's debug-ghost setting to a selector: `None` keeps
    /// everything, `-1` is the pass-through sentinel.
    #[must_use]
    pub fn from_debug_ghost(debug_ghost: Option<i32>) -> Self {
        match debug_ghost {
            None => PathSelector::All,
            Some(-1) => PathSelector::PassThrough,
            Some(index) => PathSelector::Indices(vec![index.max(0) as usize]),
        }
    }
}

impl Fingerprint for PathSelector {
    fn update(&self, h: &mut Xxh3) {
        match self {
            PathSelector::All => 0u8.update(h),
            PathSelector::Indices(indices) => {
                1u8.update(h);
                indices.update(h);
            }
            PathSelector::PassThrough => 2u8.update(h),
        }
    }
}

/// Enumerates the ghost paths of a lens model, optionally filtered.
///
/// `bounce1` runs over `1 ..= element_count - 2` (the sensor never
/// reflects) and `bounce2` over `0 .. bounce1`; once `bounce1` passes the
/// aperture, `bounce2` must too — a ray cannot reflect forward through the
/// stop.
#[must_use]
pub fn ray_paths(model: &LensModel, selector: &PathSelector) -> Vec<GhostPath> {
    if *selector == PathSelector::PassThrough {
        return vec![GhostPath::PASS_THROUGH];
    }

    let element_count = model.lens_elements.len();
    let mut paths = Vec::new();
    let mut index_min = 0usize;
    for bounce1 in 1..element_count.saturating_sub(1) {
        if bounce1 == model.aperture_index {
            index_min = bounce1 + 1;
        }
        for bounce2 in index_min..bounce1 {
            paths.push(GhostPath {
                bounce1: bounce1 as i32,
                bounce2: bounce2 as i32,
            });
        }
    }

    if let PathSelector::Indices(indices) = selector {
        paths = paths
            .into_iter()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .map(|(_, p)| p)
            .collect();
    }
    paths
}
