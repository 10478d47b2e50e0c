//! The CPU-stepping loop that drives the scheduler.

use std::sync::Arc;

use anyhow::{Result, bail};
use log::*;

use crate::debuggable::{Debuggable, DebuggableProperties, DebuggableProperty, DebuggablePropertyValue};
use crate::scheduler::Scheduler;
use crate::tickable::{Tickable, Ticks};
use crate::time::{EmuDuration, EmuTime};
use crate::{dbgprop_nest, dbgprop_time, dbgprop_udec};

/// Runs a CPU against a scheduler.
///
/// The emulator is the only authority over emulated time: it runs the CPU up
/// to the next sync point, then lets the scheduler dispatch whatever is due.
pub struct Emulator<C: Tickable> {
    cpu: C,
    scheduler: Arc<Scheduler>,
    /// CPU time, may run ahead of the scheduler by one instruction.
    time: EmuTime,
    steps: u64,
}

impl<C: Tickable> Emulator<C> {
    pub fn new(cpu: C, scheduler: Arc<Scheduler>) -> Self {
        let time = scheduler.get_current_time();
        Self {
            cpu,
            scheduler,
            time,
            steps: 0,
        }
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn get_time(&self) -> EmuTime {
        self.time
    }

    fn run_cpu(&mut self, budget: Ticks) -> Result<()> {
        let used = self.cpu.tick(budget.max(1))?;
        if used == 0 {
            bail!("CPU made no progress at {}", self.time);
        }
        self.time = self.time.checked_add(EmuDuration::from_ticks(used as i64))?;
        self.steps += 1;
        Ok(())
    }

    /// Runs until emulated time reaches `limit`.
    ///
    /// The CPU executes whole instructions, so on return the time may be
    /// slightly past `limit`.
    pub fn run_until(&mut self, limit: EmuTime) -> Result<()> {
        if limit.is_asap() || limit == EmuTime::infinity() {
            bail!("Cannot run until {}", limit);
        }

        loop {
            self.scheduler.schedule(self.time);
            if self.time >= limit {
                break;
            }

            let target = self.scheduler.get_next().min(limit);
            let budget = (target - self.time).ticks().max(1) as Ticks;
            self.run_cpu(budget)?;
        }
        trace!("Ran until {}", self.time);
        Ok(())
    }

    pub fn run_for(&mut self, duration: EmuDuration) -> Result<()> {
        let limit = self.time.checked_add(duration)?;
        self.run_until(limit)
    }

    /// Executes a single CPU step and dispatches what became due.
    pub fn step(&mut self) -> Result<()> {
        self.run_cpu(1)?;
        self.scheduler.schedule(self.time);
        Ok(())
    }
}

impl<C: Tickable> Debuggable for Emulator<C> {
    fn get_debug_properties(&self) -> DebuggableProperties {
        vec![
            dbgprop_time!("CPU time", self.time),
            dbgprop_udec!("CPU steps", self.steps),
            dbgprop_nest!("Scheduler", self.scheduler),
        ]
    }
}
