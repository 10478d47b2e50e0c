use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Video timing of the emulated display
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum VideoStandard {
    /// 262 lines of 228 CPU cycles (~59.92 Hz)
    #[default]
    Ntsc,
    /// 313 lines of 228 CPU cycles (~50.16 Hz)
    Pal,
}

impl VideoStandard {
    /// Frame rate as a `numerator / denominator` Hz ratio.
    pub fn frame_rate(self) -> (u64, u64) {
        match self {
            Self::Ntsc => (3_579_545, 228 * 262),
            Self::Pal => (3_579_545, 228 * 313),
        }
    }
}

/// Machine configuration, loadable from a JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MachineConfig {
    /// CPU clock (Hz)
    pub cpu_freq: u64,
    /// CPU cycles per emulated instruction
    pub cycles_per_instr: u64,
    pub video: VideoStandard,
    /// Serial port bit rate
    pub baud: u64,
    /// Data sent over the serial port at power-on
    pub message: String,
    /// Audio output rate (Hz)
    pub sample_rate: u64,
    /// Samples generated per audio wake-up
    pub audio_batch: u64,
    /// Emulated run time in milliseconds
    pub run_msec: u64,
    /// Input events injected from a separate thread while running
    pub hotplug_events: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_freq: 3_579_545,
            cycles_per_instr: 12,
            video: VideoStandard::Ntsc,
            baud: 9600,
            message: "HELLO".to_string(),
            sample_rate: 96_000,
            audio_batch: 512,
            run_msec: 1000,
            hotplug_events: 0,
        }
    }
}

impl MachineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .with_context(|| format!("Cannot open config {}", path.display()))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Cannot parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpu_freq == 0 || self.baud == 0 || self.sample_rate == 0 {
            bail!("Clock frequencies must be non-zero");
        }
        if self.cycles_per_instr == 0 || self.audio_batch == 0 {
            bail!("cycles_per_instr and audio_batch must be non-zero");
        }
        Ok(())
    }
}
