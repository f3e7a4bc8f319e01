//! Execution backends.
//!
//! Every tensor type lives on exactly one backend and reports it through
//! [`Shaped::BACKEND`](crate::tensors::Shaped::BACKEND). There is no global
//! backend switch: the type of a tensor decides where its operations run.
//!
//! # Supported Backends
//!
//! - `Host`: host memory, parallel loops via [`rayon`](https://docs.rs/rayon).
//! - `Device`: a compute device driven through `wgpu` (requires the `wgpu` feature).

use std::fmt;

/// Enumeration of computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Host memory.
    Host,
    /// An attached compute device.
    Device,
}

impl Backend {
    /// Backends compiled into this build.
    pub fn compiled() -> &'static [Backend] {
        #[cfg(feature = "wgpu")]
        {
            &[Backend::Host, Backend::Device]
        }
        #[cfg(not(feature = "wgpu"))]
        {
            &[Backend::Host]
        }
    }

    /// Short lowercase name, used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Host => "host",
            Backend::Device => "device",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_is_always_compiled() {
        assert!(Backend::compiled().contains(&Backend::Host));
        assert_eq!(Backend::Host.to_string(), "host");
        #[cfg(feature = "wgpu")]
        assert!(Backend::compiled().contains(&Backend::Device));
    }
}
