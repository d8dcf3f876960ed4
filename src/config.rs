//! Runtime configuration
//!
//! Populated from the command line only; there is no config file and no
//! environment lookup beyond `RUST_LOG`.

use crate::constants::{DEFAULT_MAX_SAMPLE_RATE, DEFAULT_PLAYER_NAME, SLIMPROTO_PORT};

/// Sink transfer mode requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Auto,
    VarMax,
    VarAuto,
    FixAuto,
    Random,
}

impl TransferMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "varmax" => Some(Self::VarMax),
            "varauto" => Some(Self::VarAuto),
            "fixauto" => Some(Self::FixAuto),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::VarMax => "varmax",
            Self::VarAuto => "varauto",
            Self::FixAuto => "fixauto",
            Self::Random => "random",
        }
    }
}

/// Tuning knobs handed opaquely to the sink adapter
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// 1-based output target index; 0 = default device
    pub target: usize,
    pub thread_mode: i32,
    /// Microseconds between transfer cycles; 0 = auto
    pub cycle_time_us: u32,
    /// MTU override; 0 = auto
    pub mtu: u32,
    pub info_cycle_us: u32,
    pub cycle_min_time_us: u32,
    pub target_profile_limit_time_us: u32,
    pub transfer_mode: TransferMode,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            target: 0,
            thread_mode: 1,
            cycle_time_us: 0,
            mtu: 0,
            info_cycle_us: 100_000,
            cycle_min_time_us: 0,
            target_profile_limit_time_us: 200,
            transfer_mode: TransferMode::Auto,
        }
    }
}

/// Player configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server address; `None` triggers UDP discovery
    pub server: Option<String>,
    pub port: u16,
    pub player_name: String,
    /// MAC override in `aa:bb:cc:dd:ee:ff` form; `None` = derive from name
    pub mac_address: Option<String>,

    pub sink: SinkConfig,

    /// Max sample rate advertised in HELO capabilities
    pub max_sample_rate: u32,
    pub dsd_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            port: SLIMPROTO_PORT,
            player_name: DEFAULT_PLAYER_NAME.to_string(),
            mac_address: None,
            sink: SinkConfig::default(),
            max_sample_rate: DEFAULT_MAX_SAMPLE_RATE,
            dsd_enabled: true,
        }
    }
}
