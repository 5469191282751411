//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! The main error type [`FlareError`] covers all failure modes including:
//! - GPU device acquisition and kernel compilation failures
//! - Project, lens model and glass library loading errors
//! - Device memory exhaustion in the rasterizer
//! - Output writing errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, FlareError>`.
//!
//! Two variants deserve special handling by callers:
//! [`FlareError::DeviceUnavailable`] and [`FlareError::KernelBuildFailed`]
//! are fatal for the engine (restart with another device), while
//! [`FlareError::Cancelled`] is a cooperative outcome, not a failure.

use thiserror::Error;

/// The main error type for the lensflare renderer.
#[derive(Error, Debug)]
pub enum FlareError {
    // ========================================================================
    // GPU & Kernel Errors (fatal for the engine)
    // ========================================================================
    /// No GPU-class adapter matched the requested device name.
    #[error("No compatible GPU device found: {0:?}")]
    DeviceUnavailable(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// A WGSL kernel failed to compile or validate. The message contains
    /// the compiler log.
    #[error("Kernel build failed for {name}:\n{log}")]
    KernelBuildFailed {
        /// Template name of the kernel that failed.
        name: String,
        /// Compiler/validation log.
        log: String,
    },

    /// The device ran out of memory, typically in the binner/rasterizer.
    /// Lower the resolution, bin size or grid count and restart the render.
    #[error("Out of device memory ({0}); lower resolution, bin_size or grid_count")]
    OutOfDeviceMemory(String),

    // ========================================================================
    // Input Errors (fatal for the current render, recoverable)
    // ========================================================================
    /// A project or animation document failed to parse.
    #[error("Invalid project: {0}")]
    BadProject(String),

    /// A lens model file failed to parse or is internally inconsistent.
    #[error("Invalid lens model: {0}")]
    BadLensModel(String),

    /// A glass manufacturer directory could not be read.
    #[error("Invalid glass library: {0}")]
    BadGlassLibrary(String),

    /// An aperture or light-source image could not be loaded.
    #[error("Invalid aperture image: {0}")]
    BadApertureImage(String),

    // ========================================================================
    // Output & Control
    // ========================================================================
    /// Writing an output image failed. Non-fatal: the render is still
    /// considered successful for other elements.
    #[error("Failed to write output {path}: {reason}")]
    WriteFailed {
        /// Destination path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// The render was superseded by a newer request. Cooperative, not an
    /// error in the outer API.
    #[error("Render cancelled")]
    Cancelled,

    // ========================================================================
    // I/O & Parsing passthrough
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<image::ImageError> for FlareError {
    fn from(err: image::ImageError) -> Self {
        FlareError::BadApertureImage(err.to_string())
    }
}

impl FlareError {
    /// Whether the engine must be rebuilt (new device) before it can serve
    /// further renders.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlareError::DeviceUnavailable(_)
                | FlareError::DeviceCreateFailed(_)
                | FlareError::KernelBuildFailed { .. }
        )
    }
}

/// Alias for `Result<T, FlareError>`.
pub type Result<T> = std::result::Result<T, FlareError>;
