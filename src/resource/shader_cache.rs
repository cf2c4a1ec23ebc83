//! Compilation and caching of shader programs.
//!
//! Programs are built once per device session and looked up by identifier
//! afterwards. Every stage goes through the version preprocessor before it is
//! handed to the driver, so the same source serves all shader tiers.

use crate::builtin;
use crate::error::{RenderError, Result};
use crate::resource::shader_preprocessor::preprocess;
use std::collections::HashMap;
use std::rc::Rc;

/// The stages making up a program, given as virtual paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgramDesc<'a> {
    pub id: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
    /// Per-element expansion stage. When present it takes the place of the
    /// vertex stage, and the program draws instanced.
    pub expansion: Option<&'a str>,
}

/// A compiled stage: a module and the entry point to run.
#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub module: wgpu::ShaderModule,
    pub entry: String,
    pub path: String,
}

/// A vertex/fragment stage pair ready for pipeline creation.
#[derive(Debug)]
pub struct ShaderProgram {
    pub id: String,
    pub vertex: ShaderStage,
    pub fragment: ShaderStage,
    /// Whether the vertex stage expands one instance into an element.
    pub expanded: bool,
}

/// Programs and modules compiled for one device.
pub struct ShaderCache {
    tier: u32,
    modules: HashMap<String, wgpu::ShaderModule>,
    programs: HashMap<String, Rc<ShaderProgram>>,
}

impl ShaderCache {
    /// Creates an empty cache compiling for the given shader tier.
    pub fn new(tier: u32) -> Self {
        ShaderCache {
            tier,
            modules: HashMap::new(),
            programs: HashMap::new(),
        }
    }

    #[inline]
    pub fn tier(&self) -> u32 {
        self.tier
    }

    /// The program registered under `id`, if it was loaded before.
    pub fn program(&self, id: &str) -> Option<Rc<ShaderProgram>> {
        self.programs.get(id).cloned()
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Returns the program registered under `desc.id`, compiling it first if
    /// needed. Once an identifier is cached its stages are never looked at
    /// again.
    pub fn load(&mut self, device: &wgpu::Device, desc: &ProgramDesc) -> Result<Rc<ShaderProgram>> {
        if let Some(program) = self.programs.get(desc.id) {
            return Ok(program.clone());
        }

        let vertex_path = desc.expansion.unwrap_or(desc.vertex);
        let vertex = self.stage(device, vertex_path)?;
        let fragment = self.stage(device, desc.fragment)?;

        let program = Rc::new(ShaderProgram {
            id: desc.id.to_string(),
            vertex,
            fragment,
            expanded: desc.expansion.is_some(),
        });
        log::debug!(
            "loaded shader program `{}` ({} + {}, tier {})",
            desc.id,
            vertex_path,
            desc.fragment,
            self.tier
        );
        self.programs.insert(desc.id.to_string(), program.clone());
        Ok(program)
    }

    fn stage(&mut self, device: &wgpu::Device, path: &str) -> Result<ShaderStage> {
        let (file, entry) = builtin::split_path(path);
        let module = match self.modules.get(file) {
            Some(module) => {
                // The file compiled before; only the entry point is new.
                if !builtin::has_entry(path) {
                    return Err(RenderError::ShaderNotFound(path.to_string()));
                }
                module.clone()
            }
            None => {
                let module = compile(device, path, self.tier)?;
                self.modules.insert(file.to_string(), module.clone());
                module
            }
        };
        Ok(ShaderStage {
            module,
            entry: entry.to_string(),
            path: path.to_string(),
        })
    }
}

/// Preprocesses and compiles the module containing `path`.
///
/// Compilation runs inside a validation error scope, so a rejected module
/// surfaces as [`RenderError::ShaderCompile`] carrying the exact text that
/// was compiled.
pub fn compile(device: &wgpu::Device, path: &str, tier: u32) -> Result<wgpu::ShaderModule> {
    let (file, entry) = builtin::split_path(path);
    let text = builtin::source(path).ok_or_else(|| RenderError::ShaderNotFound(path.to_string()))?;
    if !builtin::defines_function(&text, entry) {
        return Err(RenderError::ShaderNotFound(path.to_string()));
    }
    let processed = preprocess(&text, tier);

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(file),
        source: wgpu::ShaderSource::Wgsl(processed.as_str().into()),
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        log::error!("shader `{}` failed to compile at tier {}", file, tier);
        return Err(RenderError::ShaderCompile {
            path: path.to_string(),
            log: err.to_string(),
            source_text: processed,
        });
    }
    Ok(module)
}
