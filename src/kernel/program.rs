//! Programs: compiled WGSL modules.
//!
//! A [`Program`] is one immutable shader module bound to one device, built
//! from a source text with a block of compile-time constants ([`Defines`])
//! prepended. Size-parametric kernels get their loop bounds and lookup tables
//! this way; WGSL has no preprocessor, so every "macro" is a module-scope
//! `const`.
//!
//! Kernels are created from a program by entry-point name. The workgroup shape
//! of an entry point is read from its `@workgroup_size` attribute, which must
//! use integer literals.

#[cfg(feature = "wgpu")]
use std::rc::Rc;

#[cfg(feature = "wgpu")]
use super::{Kernel, MAX_BUFFER_ARGS};
#[cfg(feature = "wgpu")]
use crate::device::Device;
#[cfg(feature = "wgpu")]
use crate::error::DeviceError;

/// Value of one compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefineValue {
    /// A `u32` scalar.
    U32(u32),
    /// A non-empty `array<u32, N>`.
    U32Array(Vec<u32>),
}

/// Ordered compile-time constants prepended to a program's source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Defines {
    entries: Vec<(String, DefineValue)>,
}

impl Defines {
    /// No constants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a `u32` constant.
    pub fn with_u32(mut self, name: impl Into<String>, value: u32) -> Self {
        self.set(name, DefineValue::U32(value));
        self
    }

    /// Adds (or replaces) a `u32` array constant.
    ///
    /// # Panics
    /// If `values` is empty; WGSL arrays need at least one element.
    pub fn with_u32_array(mut self, name: impl Into<String>, values: Vec<u32>) -> Self {
        self.set(name, DefineValue::U32Array(values));
        self
    }

    /// Adds a constant, replacing any earlier one with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: DefineValue) {
        let name = name.into();
        if let DefineValue::U32Array(values) = &value {
            assert!(!values.is_empty(), "array constant `{name}` must not be empty");
        }
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Looks a constant up by name.
    pub fn get(&self, name: &str) -> Option<&DefineValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether no constants are defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// WGSL declarations for every constant, one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            match value {
                DefineValue::U32(v) => out.push_str(&format!("const {name}: u32 = {v}u;\n")),
                DefineValue::U32Array(values) => {
                    let items: Vec<String> = values.iter().map(|v| format!("{v}u")).collect();
                    out.push_str(&format!(
                        "const {name} = array<u32, {}>({});\n",
                        values.len(),
                        items.join(", ")
                    ));
                }
            }
        }
        out
    }
}

/// Workgroup shape declared on entry point `entry`, padded to three extents.
///
/// Returns `None` when the function is missing, has no `@workgroup_size`, or
/// the attribute uses anything but integer literals.
pub fn workgroup_size_of(source: &str, entry: &str) -> Option<[usize; 3]> {
    let needle = format!("fn {entry}(");
    let fn_pos = source.match_indices(&needle).map(|(i, _)| i).find(|&i| {
        let line_start = source[..i].rfind('\n').map_or(0, |p| p + 1);
        !source[line_start..i].contains("//")
    })?;

    let head = &source[..fn_pos];
    let attr = head.rfind("@workgroup_size(")?;
    if head[attr..].contains("fn ") {
        return None;
    }

    let args_start = attr + "@workgroup_size(".len();
    let args_end = args_start + head[args_start..].find(')')?;
    let mut dims = [1usize; 3];
    let mut count = 0;
    for arg in head[args_start..args_end].split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if count == 3 {
            return None;
        }
        dims[count] = arg.trim_end_matches(['u', 'i']).parse().ok()?;
        count += 1;
    }
    (count > 0).then_some(dims)
}

#[cfg(feature = "wgpu")]
struct ProgramInner {
    device: Device,
    label: String,
    source: String,
    module: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// A compiled shader module and the binding layout all its kernels share.
#[cfg(feature = "wgpu")]
#[derive(Clone)]
pub struct Program {
    inner: Rc<ProgramInner>,
}

#[cfg(feature = "wgpu")]
fn binding_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(feature = "wgpu")]
impl Program {
    pub(crate) fn compile(
        device: Device,
        label: &str,
        source: &str,
        defines: &Defines,
    ) -> Result<Self, DeviceError> {
        let source = format!("{}{}", defines.render(), source);
        let raw = device.raw();

        raw.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = raw.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
        });
        if let Some(err) = pollster::block_on(raw.pop_error_scope()) {
            let log = err.to_string();
            log::error!("program `{label}` failed to build:\n{log}");
            return Err(DeviceError::Compile {
                label: label.to_string(),
                log,
            });
        }

        // binding 0: scalar arguments and buffer offsets; 1..: storage buffers
        let mut entries = vec![binding_entry(0, wgpu::BufferBindingType::Uniform)];
        for slot in 0..MAX_BUFFER_ARGS {
            entries.push(binding_entry(
                slot as u32 + 1,
                wgpu::BufferBindingType::Storage { read_only: false },
            ));
        }
        let bind_group_layout = raw.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = raw.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        log::debug!("compiled program `{label}`");
        Ok(Self {
            inner: Rc::new(ProgramInner {
                device,
                label: label.to_string(),
                source,
                module,
                pipeline_layout,
                bind_group_layout,
            }),
        })
    }

    /// Label given at compilation.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Full compiled source, constants included.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Device the program was compiled for.
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub(crate) fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.inner.bind_group_layout
    }

    /// Creates the kernel for entry point `entry`.
    pub fn create_kernel(&self, entry: &str) -> Result<Kernel, DeviceError> {
        let workgroup = workgroup_size_of(&self.inner.source, entry).ok_or_else(|| {
            DeviceError::MissingWorkgroupSize {
                program: self.inner.label.clone(),
                entry: entry.to_string(),
            }
        })?;

        let raw = self.inner.device.raw();
        raw.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = raw.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(&self.inner.pipeline_layout),
            module: &self.inner.module,
            entry_point: Some(entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(raw.pop_error_scope()) {
            log::error!("kernel `{entry}` in `{}` failed: {err}", self.inner.label);
            return Err(DeviceError::Kernel {
                program: self.inner.label.clone(),
                entry: entry.to_string(),
                message: err.to_string(),
            });
        }

        Ok(Kernel::new(self.clone(), entry, pipeline, workgroup))
    }
}
