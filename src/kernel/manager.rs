//! Kernel registry and cache.
//!
//! Fixed kernels are listed in [`REGISTRY`] and compiled eagerly by
//! [`KernelManager::load`]; every program is compiled once and shared by all
//! of its entry points. The convolution family is size-parametric: its loop
//! bounds and halo lookup table are compile-time constants, so
//! [`KernelManager::convolution`] compiles one program per kernel extent on
//! first use and caches it.

/// Identifier of a fixed (size-independent) kernel.
///
/// The discriminant is the kernel's position in [`REGISTRY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    Mse,
    Add,
    ScaledAdd,
    ScalarAdd,
    Sub,
    ScalarSub,
    Mul,
    ScalarMul,
    Div,
    ScalarDiv,
    Exp,
    Log,
    Sigmoid,
    SigmoidDerivative,
    Relu,
    ReluDerivative,
    MatVecMul,
    MatVecMulReduce,
    TransposedMatVecMul,
    TransposedVecMul,
    MaxPool2d,
    MaxPool2dGradients,
}

/// One row of the kernel registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub id: KernelId,
    /// Hosting program (the shader file stem).
    pub program: &'static str,
    /// Entry point inside the program.
    pub entry: &'static str,
}

const fn entry(id: KernelId, program: &'static str, entry: &'static str) -> RegistryEntry {
    RegistryEntry { id, program, entry }
}

/// Every fixed kernel, in [`KernelId`] order.
pub const REGISTRY: &[RegistryEntry] = &[
    entry(KernelId::Mse, "misc", "mse"),
    entry(KernelId::Add, "arithmetic", "add"),
    entry(KernelId::ScaledAdd, "arithmetic", "scaled_add"),
    entry(KernelId::ScalarAdd, "arithmetic", "scalar_add"),
    entry(KernelId::Sub, "arithmetic", "sub"),
    entry(KernelId::ScalarSub, "arithmetic", "scalar_sub"),
    entry(KernelId::Mul, "arithmetic", "mul"),
    entry(KernelId::ScalarMul, "arithmetic", "scalar_mul"),
    entry(KernelId::Div, "arithmetic", "div"),
    entry(KernelId::ScalarDiv, "arithmetic", "scalar_div"),
    entry(KernelId::Exp, "arithmetic", "elementwise_exp"),
    entry(KernelId::Log, "arithmetic", "elementwise_log"),
    entry(KernelId::Sigmoid, "activations", "sigmoid"),
    entry(KernelId::SigmoidDerivative, "activations", "sigmoid_derivative"),
    entry(KernelId::Relu, "activations", "relu"),
    entry(KernelId::ReluDerivative, "activations", "relu_derivative"),
    entry(KernelId::MatVecMul, "linear_algebra", "mat_vec_mul"),
    entry(KernelId::MatVecMulReduce, "linear_algebra", "mat_vec_mul_reduce"),
    entry(KernelId::TransposedMatVecMul, "linear_algebra", "transposed_mat_vec_mul"),
    entry(KernelId::TransposedVecMul, "linear_algebra", "transposed_vec_mul"),
    entry(KernelId::MaxPool2d, "pooling", "max_pool_2d"),
    entry(KernelId::MaxPool2dGradients, "pooling", "max_pool_2d_gradients"),
];

/// Program hosting the size-parametric convolution kernels.
pub const CONVOLUTION_PROGRAM: &str = "convolution";

/// Width of the pixel tile one convolution workgroup processes.
pub const TILE_WIDTH: usize = 16;
/// Height of the pixel tile one convolution workgroup processes.
pub const TILE_HEIGHT: usize = 16;
/// Largest supported kernel extent along either axis.
pub const MAX_CONVOLUTION_EXTENT: usize = 11;

/// Coordinates, in the halo-expanded tile, that lie outside its interior.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HaloTable {
    /// Column of each halo entry.
    pub xs: Vec<u32>,
    /// Row of each halo entry, paired with `xs`.
    pub ys: Vec<u32>,
}

impl HaloTable {
    /// Number of halo coordinates.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}

/// Builds the halo lookup table for a kernel of half extents `half_width`
/// and `half_height`, scanning the expanded tile row by row.
///
/// The table size is `(16 + 2hw) * (16 + 2hh) - 256` and depends on the
/// kernel size only; the tile itself is fixed.
pub fn halo_lookup_table(half_width: usize, half_height: usize) -> HaloTable {
    let expanded_width = TILE_WIDTH + 2 * half_width;
    let expanded_height = TILE_HEIGHT + 2 * half_height;
    let mut table = HaloTable::default();
    for y in 0..expanded_height {
        for x in 0..expanded_width {
            let interior = (half_width..TILE_WIDTH + half_width).contains(&x)
                && (half_height..TILE_HEIGHT + half_height).contains(&y);
            if !interior {
                table.xs.push(x as u32);
                table.ys.push(y as u32);
            }
        }
    }
    table
}

#[cfg(feature = "wgpu")]
pub use self::device_manager::{ConvolutionKernels, KernelManager};

#[cfg(feature = "wgpu")]
mod device_manager {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::{
        CONVOLUTION_PROGRAM, KernelId, MAX_CONVOLUTION_EXTENT, REGISTRY, TILE_HEIGHT, TILE_WIDTH,
        halo_lookup_table,
    };
    use crate::config::KernelSource;
    use crate::device::Device;
    use crate::error::DeviceError;
    use crate::kernel::Kernel;
    use crate::kernel::program::{Defines, Program};

    const COMMON: &str = include_str!("shaders/common.wgsl");

    fn embedded(program: &str) -> Option<&'static str> {
        Some(match program {
            "misc" => include_str!("shaders/misc.wgsl"),
            "arithmetic" => include_str!("shaders/arithmetic.wgsl"),
            "activations" => include_str!("shaders/activations.wgsl"),
            "linear_algebra" => include_str!("shaders/linear_algebra.wgsl"),
            "pooling" => include_str!("shaders/pooling.wgsl"),
            "convolution" => include_str!("shaders/convolution.wgsl"),
            _ => return None,
        })
    }

    /// Reads the shared prelude and one program's source.
    struct Sources {
        source: KernelSource,
        common: String,
    }

    impl Sources {
        fn open(source: &KernelSource) -> Result<Self, DeviceError> {
            let common = match source {
                KernelSource::Embedded => COMMON.to_string(),
                KernelSource::Directory(dir) => read(&dir.join("common.wgsl"))?,
            };
            Ok(Self {
                source: source.clone(),
                common,
            })
        }

        fn program(&self, name: &str) -> Result<String, DeviceError> {
            let body = match &self.source {
                KernelSource::Embedded => match embedded(name) {
                    Some(body) => body.to_string(),
                    None => {
                        return Err(DeviceError::Source {
                            path: format!("{name}.wgsl").into(),
                            source: std::io::Error::from(std::io::ErrorKind::NotFound),
                        });
                    }
                },
                KernelSource::Directory(dir) => read(&dir.join(format!("{name}.wgsl")))?,
            };
            Ok(format!("{}\n{}", self.common, body))
        }
    }

    fn read(path: &std::path::Path) -> Result<String, DeviceError> {
        std::fs::read_to_string(path).map_err(|source| DeviceError::Source {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The three convolution-family kernels compiled for one kernel extent.
    #[derive(Debug)]
    pub struct ConvolutionKernels {
        pub half_width: usize,
        pub half_height: usize,
        pub convolution: Kernel,
        pub cross_correlation: Kernel,
        pub gradients: Kernel,
    }

    impl ConvolutionKernels {
        /// Kernel extent as `(width, height)`.
        pub fn extent(&self) -> (usize, usize) {
            (2 * self.half_width + 1, 2 * self.half_height + 1)
        }
    }

    /// Owns every compiled kernel for one device.
    pub struct KernelManager {
        device: Device,
        fixed: Vec<Kernel>,
        convolution_source: String,
        convolutions: RefCell<HashMap<(usize, usize), Rc<ConvolutionKernels>>>,
        compiled_programs: Cell<usize>,
    }

    impl KernelManager {
        /// Compiles every registry program and creates all fixed kernels.
        ///
        /// Any failure aborts the whole load.
        pub fn load(device: &Device, source: &KernelSource) -> Result<Self, DeviceError> {
            let sources = Sources::open(source)?;
            let mut programs: HashMap<&str, Program> = HashMap::new();
            let mut fixed = Vec::with_capacity(REGISTRY.len());

            for (position, entry) in REGISTRY.iter().enumerate() {
                debug_assert_eq!(entry.id as usize, position);
                let program = match programs.get(entry.program) {
                    Some(program) => program.clone(),
                    None => {
                        let text = sources.program(entry.program)?;
                        let program = device.create_program(entry.program, &text, &Defines::new())?;
                        programs.insert(entry.program, program.clone());
                        program
                    }
                };
                fixed.push(program.create_kernel(entry.entry)?);
            }

            let convolution_source = sources.program(CONVOLUTION_PROGRAM)?;
            log::info!(
                "loaded {} kernels from {} programs",
                fixed.len(),
                programs.len()
            );
            Ok(Self {
                device: device.clone(),
                fixed,
                convolution_source,
                convolutions: RefCell::new(HashMap::new()),
                compiled_programs: Cell::new(programs.len()),
            })
        }

        /// A fixed kernel by identifier.
        pub fn kernel(&self, id: KernelId) -> &Kernel {
            &self.fixed[id as usize]
        }

        /// Number of programs compiled so far, fixed and size-specialized.
        pub fn compiled_program_count(&self) -> usize {
            self.compiled_programs.get()
        }

        /// Number of convolution extents compiled so far.
        pub fn cached_convolution_count(&self) -> usize {
            self.convolutions.borrow().len()
        }

        /// Convolution kernels for a `width` x `height` filter, compiled on
        /// first request and cached afterwards.
        ///
        /// Extents must be odd and at most [`MAX_CONVOLUTION_EXTENT`].
        pub fn convolution(
            &self,
            width: usize,
            height: usize,
        ) -> Result<Rc<ConvolutionKernels>, DeviceError> {
            let supported = |e: usize| e % 2 == 1 && e <= MAX_CONVOLUTION_EXTENT;
            if !supported(width) || !supported(height) {
                return Err(DeviceError::UnsupportedKernelExtent {
                    width,
                    height,
                    max: MAX_CONVOLUTION_EXTENT,
                });
            }

            let key = (width / 2, height / 2);
            if let Some(kernels) = self.convolutions.borrow().get(&key) {
                return Ok(Rc::clone(kernels));
            }

            let kernels = Rc::new(self.compile_convolution(key.0, key.1)?);
            self.convolutions.borrow_mut().insert(key, Rc::clone(&kernels));
            Ok(kernels)
        }

        fn compile_convolution(
            &self,
            half_width: usize,
            half_height: usize,
        ) -> Result<ConvolutionKernels, DeviceError> {
            let table = halo_lookup_table(half_width, half_height);
            let expanded_width = TILE_WIDTH + 2 * half_width;
            let expanded_height = TILE_HEIGHT + 2 * half_height;
            let kernel_width = 2 * half_width + 1;
            let kernel_height = 2 * half_height + 1;

            // WGSL arrays need one element even when the halo is empty
            let pad = |v: &Vec<u32>| if v.is_empty() { vec![0] } else { v.clone() };
            let defines = Defines::new()
                .with_u32("KERNEL_WIDTH", kernel_width as u32)
                .with_u32("KERNEL_HEIGHT", kernel_height as u32)
                .with_u32("HALF_WIDTH", half_width as u32)
                .with_u32("HALF_HEIGHT", half_height as u32)
                .with_u32("KERNEL_AREA", (kernel_width * kernel_height) as u32)
                .with_u32("TILE_WIDTH", TILE_WIDTH as u32)
                .with_u32("TILE_HEIGHT", TILE_HEIGHT as u32)
                .with_u32("TILE_PIXELS", (TILE_WIDTH * TILE_HEIGHT) as u32)
                .with_u32("EXPANDED_WIDTH", expanded_width as u32)
                .with_u32("EXPANDED_HEIGHT", expanded_height as u32)
                .with_u32("TILE_AREA", (expanded_width * expanded_height) as u32)
                .with_u32("HALO_COUNT", table.len() as u32)
                .with_u32_array("LOOKUP_TABLE_X", pad(&table.xs))
                .with_u32_array("LOOKUP_TABLE_Y", pad(&table.ys));

            let label = format!("{CONVOLUTION_PROGRAM}_{kernel_width}x{kernel_height}");
            log::debug!("compiling {label} ({} halo cells)", table.len());
            let program = self
                .device
                .create_program(&label, &self.convolution_source, &defines)?;
            self.compiled_programs.set(self.compiled_programs.get() + 1);

            Ok(ConvolutionKernels {
                half_width,
                half_height,
                convolution: program.create_kernel("convolution_2d")?,
                cross_correlation: program.create_kernel("cross_correlation_2d")?,
                gradients: program.create_kernel("convolution_2d_gradients")?,
            })
        }

        /// Device the kernels were compiled for.
        pub fn device(&self) -> &Device {
            &self.device
        }
    }

    impl std::fmt::Debug for KernelManager {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("KernelManager")
                .field("fixed", &self.fixed.len())
                .field("convolutions", &self.cached_convolution_count())
                .field("compiled_programs", &self.compiled_program_count())
                .finish()
        }
    }
}
