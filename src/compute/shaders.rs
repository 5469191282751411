//! Kernel Template Manager
//!
//! WGSL compute kernels live as minijinja templates embedded in the binary.
//! A template plus a [`ShaderDefines`] set renders to concrete WGSL which is
//! compiled once and cached by content hash. Setting the
//! `LENSFLARE_REBUILD` environment variable forces re-rendering and
//! recompilation, which is handy while editing kernels with an external
//! watcher.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Error};
use parking_lot::Mutex;
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;
use serde::Serialize;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::errors::{FlareError, Result};
use crate::fingerprint::Fingerprint;

/// Environment variable that forces kernel recompilation.
pub const REBUILD_ENV: &str = "LENSFLARE_REBUILD";

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/tasks/shaders"]
struct ShaderAssets;

fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure template syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);
        env.set_loader(shader_loader);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        env
    })
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    #[cfg(debug_assertions)]
    {
        let path = std::path::Path::new("src/tasks/shaders").join(filename.as_ref());
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(source) => return Ok(Some(source)),
                Err(e) => {
                    return Err(Error::new(
                        minijinja::ErrorKind::TemplateNotFound,
                        format!("Failed to read file: {e}"),
                    ));
                }
            }
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

// ============================================================================
// Defines
// ============================================================================

/// A value substituted into a kernel template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefineValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for DefineValue {
    fn from(v: bool) -> Self {
        DefineValue::Bool(v)
    }
}
impl From<i64> for DefineValue {
    fn from(v: i64) -> Self {
        DefineValue::Int(v)
    }
}
impl From<u32> for DefineValue {
    fn from(v: u32) -> Self {
        DefineValue::Int(i64::from(v))
    }
}
impl From<f64> for DefineValue {
    fn from(v: f64) -> Self {
        DefineValue::Float(v)
    }
}
impl From<&str> for DefineValue {
    fn from(v: &str) -> Self {
        DefineValue::Str(v.to_string())
    }
}

impl Fingerprint for DefineValue {
    fn update(&self, h: &mut Xxh3) {
        match self {
            DefineValue::Bool(v) => {
                0u8.update(h);
                v.update(h);
            }
            DefineValue::Int(v) => {
                1u8.update(h);
                v.update(h);
            }
            DefineValue::Float(v) => {
                2u8.update(h);
                v.update(h);
            }
            DefineValue::Str(v) => {
                3u8.update(h);
                v.update(h);
            }
        }
    }
}

/// An ordered macro set for one kernel compilation; identical sets hash
/// identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ShaderDefines {
    values: BTreeMap<String, DefineValue>,
}

impl ShaderDefines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<DefineValue>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<DefineValue>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        for (key, value) in &self.values {
            key.update(&mut h);
            value.update(&mut h);
        }
        h.digest()
    }
}

// ============================================================================
// Manager
// ============================================================================

struct RenderedKernel {
    source_hash: u64,
    module: Arc<wgpu::ShaderModule>,
}

/// Renders kernel templates and caches compiled modules.
pub struct ShaderManager {
    /// (template, defines hash) -> compiled module
    kernels: Mutex<FxHashMap<(String, u64), RenderedKernel>>,
    rebuild: bool,
}

impl ShaderManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kernels: Mutex::new(FxHashMap::default()),
            rebuild: std::env::var_os(REBUILD_ENV).is_some(),
        }
    }

    /// Renders `template` with `defines` and compiles it, returning the
    /// module and the hash of the rendered source (a fingerprint component
    /// that changes with the kernel version).
    pub fn get_or_compile(
        &self,
        device: &wgpu::Device,
        template: &str,
        defines: &ShaderDefines,
    ) -> Result<(Arc<wgpu::ShaderModule>, u64)> {
        let key = (template.to_string(), defines.compute_hash());

        if !self.rebuild
            && let Some(kernel) = self.kernels.lock().get(&key)
        {
            return Ok((Arc::clone(&kernel.module), kernel.source_hash));
        }

        let source = get_env()
            .get_template(&format!("{template}.wgsl"))
            .and_then(|t| t.render(defines))
            .map_err(|e| FlareError::KernelBuildFailed {
                name: template.to_string(),
                log: e.to_string(),
            })?;
        let source_hash = xxh3_64(source.as_bytes());

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(template),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FlareError::KernelBuildFailed {
                name: template.to_string(),
                log: error.to_string(),
            });
        }

        let module = Arc::new(module);
        self.kernels.lock().insert(
            key,
            RenderedKernel {
                source_hash,
                module: Arc::clone(&module),
            },
        );
        Ok((module, source_hash))
    }
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new()
    }
}
