//! Kernels and dispatch.
//!
//! A [`Kernel`] is one entry point of a [`Program`](program::Program). Its
//! arguments are bound positionally with [`Kernel::bind`]; each call advances
//! a cursor, and [`Kernel::run`] submits the dispatch and resets the cursor so
//! the kernel can be reused.
//!
//! # Argument passing
//!
//! Every kernel shares the binding layout declared in `shaders/common.wgsl`:
//!
//! - binding 0: a uniform block of [`PARAM_WORDS`] 32-bit words. Words 0..4
//!   hold the element offset of each bound buffer; scalar arguments follow in
//!   bind order.
//! - bindings 1..=4: the bound buffers, in bind order, as read-write storage.
//!
//! Buffers always bind whole, so a sub-tensor view is just a different element
//! offset into the same base allocation.

pub mod manager;
pub mod program;
pub mod work;

pub use work::WorkSize;

/// Storage-buffer slots available to one kernel.
pub const MAX_BUFFER_ARGS: usize = 4;

/// Size of the uniform argument block in 32-bit words.
pub const PARAM_WORDS: usize = 32;

#[cfg(feature = "wgpu")]
pub use self::device_kernel::{Kernel, KernelArg};

#[cfg(feature = "wgpu")]
mod device_kernel {
    use std::cell::RefCell;
    use std::fmt;
    use std::rc::Rc;

    use wgpu::util::DeviceExt;

    use super::program::Program;
    use super::{MAX_BUFFER_ARGS, PARAM_WORDS, WorkSize};
    use crate::buffer::DeviceBuffer;
    use crate::buffer::device::DeviceAllocation;
    use crate::error::DeviceError;

    /// One positional kernel argument.
    pub enum KernelArg {
        /// An unsigned integer.
        Uint(u32),
        /// A float.
        Float(f32),
        /// A buffer range (whole base allocation plus element offset).
        Buffer {
            /// Base allocation.
            alloc: Rc<DeviceAllocation>,
            /// Offset of the range's first element.
            element_offset: u32,
        },
        /// A request for this many bytes of workgroup memory.
        Local(usize),
    }

    impl From<u32> for KernelArg {
        fn from(v: u32) -> Self {
            KernelArg::Uint(v)
        }
    }

    impl From<f32> for KernelArg {
        fn from(v: f32) -> Self {
            KernelArg::Float(v)
        }
    }

    impl From<usize> for KernelArg {
        /// # Panics
        /// If the value does not fit in 32 bits.
        fn from(v: usize) -> Self {
            assert!(v <= u32::MAX as usize, "kernel argument {v} does not fit in u32");
            KernelArg::Uint(v as u32)
        }
    }

    impl From<&DeviceBuffer> for KernelArg {
        fn from(buffer: &DeviceBuffer) -> Self {
            KernelArg::Buffer {
                alloc: Rc::clone(buffer.allocation()),
                element_offset: buffer.element_offset(),
            }
        }
    }

    /// A callable entry point with its bound-argument cursor.
    pub struct Kernel {
        program: Program,
        entry: String,
        pipeline: wgpu::ComputePipeline,
        workgroup: [usize; 3],
        args: RefCell<Vec<KernelArg>>,
    }

    impl Kernel {
        pub(crate) fn new(
            program: Program,
            entry: &str,
            pipeline: wgpu::ComputePipeline,
            workgroup: [usize; 3],
        ) -> Self {
            Self {
                program,
                entry: entry.to_string(),
                pipeline,
                workgroup,
                args: RefCell::new(Vec::new()),
            }
        }

        /// Entry point name.
        pub fn entry(&self) -> &str {
            &self.entry
        }

        /// Program hosting this entry point.
        pub fn program(&self) -> &Program {
            &self.program
        }

        /// Workgroup shape compiled into the entry point.
        pub fn workgroup(&self) -> [usize; 3] {
            self.workgroup
        }

        /// Number of arguments bound since the last dispatch.
        pub fn cursor(&self) -> usize {
            self.args.borrow().len()
        }

        /// Binds the next positional argument.
        pub fn bind(&self, arg: impl Into<KernelArg>) -> &Self {
            self.args.borrow_mut().push(arg.into());
            self
        }

        /// Requests `bytes` of workgroup memory for the next dispatch.
        pub fn bind_local(&self, bytes: usize) -> &Self {
            self.bind(KernelArg::Local(bytes))
        }

        /// Workgroup shape to use for a global size of `rank` dimensions.
        fn local_for(&self, global: &WorkSize, local: Option<WorkSize>) -> WorkSize {
            let compiled = WorkSize::from_slice(&self.workgroup[..global.rank()]);
            assert!(
                self.workgroup[global.rank()..].iter().all(|&d| d == 1),
                "kernel `{}` has a {:?} workgroup but was dispatched over {global:?}",
                self.entry,
                self.workgroup
            );
            if let Some(local) = local {
                assert_eq!(
                    local, compiled,
                    "kernel `{}` is compiled for local size {compiled:?}",
                    self.entry
                );
            }
            compiled
        }

        /// Submits the kernel over `global` lanes and resets the argument cursor.
        ///
        /// `local` defaults to the compiled workgroup shape; if given it must
        /// match it. The global size is padded up to a multiple of the local
        /// size. Submission does not wait for the kernel to finish.
        ///
        /// # Panics
        /// On more than [`MAX_BUFFER_ARGS`] buffers, more scalars than fit the
        /// argument block, or a mismatched local size.
        pub fn run(&self, global: WorkSize, local: Option<WorkSize>) -> Result<(), DeviceError> {
            let args = std::mem::take(&mut *self.args.borrow_mut());
            let local = self.local_for(&global, local);
            let groups = global.workgroups(&local);
            if groups.iter().any(|&g| g == 0) {
                return Ok(());
            }

            let device = self.program.device();
            let limits = device.limits();
            let max_groups = limits.max_compute_workgroups_per_dimension as usize;
            assert!(
                groups.iter().all(|&g| g <= max_groups),
                "dispatch of {groups:?} workgroups exceeds the device limit of {max_groups}"
            );

            let mut words = [0u32; PARAM_WORDS];
            let mut scalars = MAX_BUFFER_ARGS;
            let mut buffers: Vec<Rc<DeviceAllocation>> = Vec::with_capacity(MAX_BUFFER_ARGS);
            let mut local_bytes = 0;
            for arg in args {
                let word = match arg {
                    KernelArg::Uint(v) => v,
                    KernelArg::Float(v) => v.to_bits(),
                    KernelArg::Buffer { alloc, element_offset } => {
                        assert!(
                            buffers.len() < MAX_BUFFER_ARGS,
                            "kernel `{}` takes at most {MAX_BUFFER_ARGS} buffers",
                            self.entry
                        );
                        words[buffers.len()] = element_offset;
                        buffers.push(alloc);
                        continue;
                    }
                    KernelArg::Local(bytes) => {
                        local_bytes += bytes;
                        continue;
                    }
                };
                assert!(scalars < PARAM_WORDS, "too many scalar arguments for `{}`", self.entry);
                words[scalars] = word;
                scalars += 1;
            }
            assert!(
                local_bytes <= limits.max_compute_workgroup_storage_size as usize,
                "kernel `{}` requested {local_bytes} bytes of workgroup memory, the device has {}",
                self.entry,
                limits.max_compute_workgroup_storage_size
            );

            let raw = device.raw();
            let params = raw.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel arguments"),
                contents: bytemuck::cast_slice(&words),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let mut entries = vec![wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            }];
            for slot in 0..MAX_BUFFER_ARGS {
                let buffer = buffers
                    .get(slot)
                    .map_or(device.placeholder(), |alloc| &alloc.buffer);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot as u32 + 1,
                    resource: buffer.as_entire_binding(),
                });
            }
            let bind_group = raw.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&self.entry),
                layout: self.program.bind_group_layout(),
                entries: &entries,
            });

            let mut encoder = raw.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.entry),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&self.entry),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0] as u32, groups[1] as u32, groups[2] as u32);
            }
            device.queue().submit(Some(encoder.finish()));

            log::trace!(
                "dispatched `{}` over {global:?} in {:?} groups of {local:?}",
                self.entry,
                groups
            );
            Ok(())
        }
    }

    impl fmt::Debug for Kernel {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Kernel")
                .field("program", &self.program.label())
                .field("entry", &self.entry)
                .field("workgroup", &self.workgroup)
                .field("cursor", &self.cursor())
                .finish()
        }
    }
}
