//! Device configuration.
//!
//! [`DeviceConfig`] carries the knobs the device backend reads at
//! initialization. Defaults suit most machines; [`DeviceConfig::from_env`]
//! layers `TANDEM_*` environment overrides on top of them.

use std::env;
use std::path::PathBuf;

/// Adapter selection hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    /// Prefer a discrete, high-performance adapter.
    #[default]
    HighPerformance,
    /// Prefer an integrated, low-power adapter.
    LowPower,
    /// No preference.
    None,
}

/// Where device kernel sources come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KernelSource {
    /// WGSL compiled into the crate.
    #[default]
    Embedded,
    /// A directory holding `common.wgsl` and one `<program>.wgsl` per registry program.
    Directory(PathBuf),
}

/// Options for opening the compute device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    /// Adapter selection hint.
    pub power_preference: PowerPreference,
    /// Only accept a software fallback adapter.
    pub force_fallback_adapter: bool,
    /// Kernel source location.
    pub kernel_source: KernelSource,
    /// Clear buffers with the device's fill command instead of chunked zero writes.
    pub native_clear: bool,
}

impl DeviceConfig {
    /// Defaults overridden by `TANDEM_KERNEL_DIR`, `TANDEM_POWER_PREFERENCE`
    /// (`high`, `low`, `none`), `TANDEM_FORCE_FALLBACK` and `TANDEM_NATIVE_CLEAR`.
    /// Flags take `1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`.
    ///
    /// Unrecognized values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env::var_os("TANDEM_KERNEL_DIR") {
            config.kernel_source = KernelSource::Directory(PathBuf::from(dir));
        }
        if let Ok(pref) = env::var("TANDEM_POWER_PREFERENCE") {
            match parse_power_preference(&pref) {
                Some(p) => config.power_preference = p,
                None => log::warn!("ignoring TANDEM_POWER_PREFERENCE={pref}"),
            }
        }
        if let Some(flag) = env_flag("TANDEM_FORCE_FALLBACK") {
            config.force_fallback_adapter = flag;
        }
        if let Some(flag) = env_flag("TANDEM_NATIVE_CLEAR") {
            config.native_clear = flag;
        }

        config
    }
}

fn parse_power_preference(value: &str) -> Option<PowerPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "high" | "high-performance" => Some(PowerPreference::HighPerformance),
        "low" | "low-power" => Some(PowerPreference::LowPower),
        "none" => Some(PowerPreference::None),
        _ => None,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    let flag = parse_flag(&value);
    if flag.is_none() {
        log::warn!("ignoring {name}={value}");
    }
    flag
}
