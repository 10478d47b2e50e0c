pub mod config;
pub mod devices;
pub mod machine;

use std::fmt;

use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineReport {
    pub name: String,
    pub emulated_ticks: u64,
    pub emulated_secs: f64,
    pub wall_secs: f64,
    pub cpu_instructions: u64,
    pub frames: u64,
    pub serial_bits: u64,
    pub serial_output: String,
    pub audio_samples: u64,
    pub audio_samples_expected: u64,
    pub input_events: usize,
    pub pending_sync_points: usize,
    pub debug: Vec<(String, String)>,
}

impl fmt::Display for MachineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {:.3}s emulated in {:.3}s",
            self.name, self.emulated_secs, self.wall_secs
        )?;
        writeln!(f, "  instructions: {}", self.cpu_instructions)?;
        writeln!(f, "  frames:       {}", self.frames)?;
        writeln!(
            f,
            "  serial:       {} bits {:?}",
            self.serial_bits, self.serial_output
        )?;
        writeln!(
            f,
            "  audio:        {} samples ({} expected)",
            self.audio_samples, self.audio_samples_expected
        )?;
        writeln!(f, "  input:        {} events", self.input_events)?;
        write!(
            f,
            "  {}",
            self.debug
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .join(", ")
        )
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RunReport {
    pub started: DateTime<Local>,
    pub machines: Vec<MachineReport>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            started: Local::now(),
            machines: vec![],
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run started {}", self.started.format("%Y-%m-%d %H:%M:%S"))?;
        write!(
            f,
            "{}",
            self.machines
                .iter()
                .sorted_by(|a, b| a.name.cmp(&b.name))
                .join("\n")
        )
    }
}
