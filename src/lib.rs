#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]

pub mod animation;
pub mod cache;
pub mod compute;
pub mod data;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod fourier;
pub mod lens;
pub mod spectrum;
pub mod storage;
pub mod tasks;
pub mod utils;
pub mod worker;

pub use compute::{ComputeContext, DeviceImage, ImageData};
pub use data::{Aperture, Flare, Lens, Light, Project, Render, RenderElement};
pub use engine::{COLORSPACE_TAG, Engine, RenderImage};
pub use errors::{FlareError, Result};
pub use lens::{Glass, GlassLibrary, GhostPath, LensElement, LensModel, PathSelector};
pub use storage::Storage;
pub use worker::{CancelToken, EngineEvent, RenderRequest, RenderStatus, RenderWorker};
