use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Receiver;
use log::*;

use emutime_core::debuggable::{Debuggable, flatten_properties};
use emutime_core::emulator::Emulator;
use emutime_core::scheduler::Scheduler;
use emutime_core::time::{EmuDuration, EmuTime};

use crate::MachineReport;
use crate::config::MachineConfig;
use crate::devices::{AudioSampler, DemoCpu, FrameTimer, InputPort, Uart};

/// A complete demo machine: CPU, scheduler and peripherals.
pub struct Machine {
    emulator: Emulator<DemoCpu>,
    frames: Arc<FrameTimer>,
    uart: Arc<Uart>,
    audio: Arc<AudioSampler>,
    input: Arc<InputPort>,
    serial_rx: Receiver<u8>,
    serial_out: Vec<u8>,
}

impl Machine {
    pub fn new(config: &MachineConfig) -> Result<Self> {
        config.validate()?;

        let scheduler = Arc::new(Scheduler::new());
        let (serial_tx, serial_rx) = crossbeam_channel::unbounded();

        let frames = FrameTimer::new(&scheduler, config.video.frame_rate())?;
        let uart = Uart::new(&scheduler, config.baud, serial_tx)?;
        let audio = AudioSampler::new(&scheduler, config.sample_rate, config.audio_batch)?;
        let input = InputPort::new(&scheduler);
        uart.send(config.message.as_bytes());

        let cpu = DemoCpu::new(
            scheduler.get_current_time(),
            config.cpu_freq,
            config.cycles_per_instr,
        )?;
        debug!(
            "Machine created: {} video, {} baud, {} Hz audio, {} pending sync points",
            config.video,
            config.baud,
            config.sample_rate,
            scheduler.len()
        );

        Ok(Self {
            emulator: Emulator::new(cpu, scheduler),
            frames,
            uart,
            audio,
            input,
            serial_rx,
            serial_out: vec![],
        })
    }

    pub fn input(&self) -> Arc<InputPort> {
        Arc::clone(&self.input)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.emulator.scheduler()
    }

    pub fn get_time(&self) -> EmuTime {
        self.emulator.get_time()
    }

    pub fn run_for(&mut self, duration: EmuDuration) -> Result<()> {
        self.emulator.run_for(duration)?;
        self.serial_out.extend(self.serial_rx.try_iter());
        Ok(())
    }

    /// Runs one more step so events injected from other threads get latched.
    pub fn settle(&mut self) -> Result<()> {
        self.emulator.step()?;
        self.serial_out.extend(self.serial_rx.try_iter());
        Ok(())
    }

    pub fn report(&self, name: String, wall_secs: f64) -> MachineReport {
        let time = self.get_time();
        self.audio.update(self.scheduler().get_current_time());

        MachineReport {
            name,
            emulated_ticks: time.ticks(),
            emulated_secs: time.as_secs_f64(),
            wall_secs,
            cpu_instructions: self.emulator.cpu().instructions(),
            frames: self.frames.frames(),
            serial_bits: self.uart.bits_sent(),
            serial_output: String::from_utf8_lossy(&self.serial_out).into_owned(),
            audio_samples: self.audio.samples(),
            audio_samples_expected: self
                .scheduler()
                .get_current_time()
                .get_ticks_at(self.audio.rate()),
            input_events: self.input.latched().len(),
            pending_sync_points: self.scheduler().len(),
            debug: flatten_properties(&self.emulator.get_debug_properties()),
        }
    }
}
