//! Minimal stand-in devices that exercise the scheduler the way real
//! peripherals do.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use crossbeam_channel::Sender;
use log::*;

use emutime_core::clock::{DynamicClock, FrequencyConverter};
use emutime_core::schedulable::{Schedulable, SyncPoints, SyncTag};
use emutime_core::scheduler::Scheduler;
use emutime_core::tickable::{Tickable, Ticks};
use emutime_core::time::{EmuDuration, EmuTime};

/// CPU that executes fixed-length instructions on its own clock
pub struct DemoCpu {
    clock: DynamicClock,
    cycles_per_instr: u64,
    instructions: u64,
}

impl DemoCpu {
    pub fn new(time: EmuTime, freq: u64, cycles_per_instr: u64) -> Result<Self> {
        Ok(Self {
            clock: DynamicClock::new(time, freq)?,
            cycles_per_instr: cycles_per_instr.max(1),
            instructions: 0,
        })
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }
}

impl Tickable for DemoCpu {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        let start = self.clock.get_time();
        let target = start.checked_add(EmuDuration::from_ticks(ticks as i64))?;
        let instrs = (self.clock.get_ticks_till(target) / self.cycles_per_instr).max(1);
        self.clock.fast_forward(instrs * self.cycles_per_instr);
        self.instructions += instrs;
        Ok((self.clock.get_time() - start).ticks() as Ticks)
    }
}

const TAG_FRAME_END: SyncTag = 0;

struct FrameState {
    clock: DynamicClock,
    frames: u64,
}

/// Video chip end-of-frame interrupt
pub struct FrameTimer {
    sync: SyncPoints,
    state: Mutex<FrameState>,
}

impl FrameTimer {
    pub fn new(scheduler: &Arc<Scheduler>, rate: (u64, u64)) -> Result<Arc<Self>> {
        let mut clock = DynamicClock::new(scheduler.get_current_time(), 1)?;
        clock.set_freq_ratio(rate.0, rate.1)?;
        let first = clock.get_time_after(1);

        let dev = Arc::new_cyclic(|me| Self {
            sync: SyncPoints::new(Arc::clone(scheduler), me),
            state: Mutex::new(FrameState { clock, frames: 0 }),
        });
        dev.sync.set(first, TAG_FRAME_END);
        Ok(dev)
    }

    pub fn frames(&self) -> u64 {
        self.state.lock().unwrap().frames
    }
}

impl Schedulable for FrameTimer {
    fn execute_until(&self, time: EmuTime, _tag: SyncTag) {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.clock.fast_forward(1);
            debug_assert_eq!(state.clock.get_time(), time);
            state.frames += 1;
            state.clock.get_time_after(1)
        };
        self.sync.set(next, TAG_FRAME_END);
    }

    fn sched_name(&self) -> &str {
        "frame timer"
    }
}

const TAG_TX_START: SyncTag = 0;
const TAG_TX_BIT: SyncTag = 1;

/// Start bit, 8 data bits, stop bit
const BITS_PER_FRAME: u8 = 10;

struct UartState {
    clock: DynamicClock,
    queue: VecDeque<u8>,
    current: u8,
    bits_left: u8,
    busy: bool,
    bits_sent: u64,
}

impl UartState {
    fn load_next(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(b) => {
                self.current = b;
                self.bits_left = BITS_PER_FRAME;
                true
            }
            None => {
                self.busy = false;
                false
            }
        }
    }
}

/// Serial transmitter clocked at the baud rate
pub struct Uart {
    sync: SyncPoints,
    state: Mutex<UartState>,
    output: Sender<u8>,
}

impl Uart {
    pub fn new(scheduler: &Arc<Scheduler>, baud: u64, output: Sender<u8>) -> Result<Arc<Self>> {
        let clock = DynamicClock::new(scheduler.get_current_time(), baud)?;
        Ok(Arc::new_cyclic(|me| Self {
            sync: SyncPoints::new(Arc::clone(scheduler), me),
            state: Mutex::new(UartState {
                clock,
                queue: VecDeque::new(),
                current: 0,
                bits_left: 0,
                busy: false,
                bits_sent: 0,
            }),
            output,
        }))
    }

    /// Queues data for transmission. May be called from any thread.
    pub fn send(&self, data: &[u8]) {
        let start = {
            let mut state = self.state.lock().unwrap();
            state.queue.extend(data);
            !std::mem::replace(&mut state.busy, true)
        };
        if start {
            self.sync.set_asap(TAG_TX_START);
        }
    }

    /// Aborts transmission and drops queued data.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.bits_left = 0;
        state.busy = false;
        drop(state);

        self.sync.remove(TAG_TX_START);
        self.sync.remove(TAG_TX_BIT);
    }

    pub fn bits_sent(&self) -> u64 {
        self.state.lock().unwrap().bits_sent
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().busy
    }
}

impl Schedulable for Uart {
    fn execute_until(&self, time: EmuTime, tag: SyncTag) {
        let next = {
            let mut state = self.state.lock().unwrap();
            match tag {
                TAG_TX_START => {
                    state.clock.reset(time);
                    if !state.load_next() {
                        return;
                    }
                }
                TAG_TX_BIT => {
                    if state.bits_left == 0 {
                        // Reset while this wake-up was already being dispatched
                        trace!("Stale UART bit at {}", time);
                        return;
                    }
                    state.clock.fast_forward(1);
                    state.bits_sent += 1;
                    state.bits_left -= 1;
                    if state.bits_left == 0 {
                        trace!("UART sent {:02X} at {}", state.current, time);
                        if self.output.send(state.current).is_err() {
                            trace!("UART output disconnected");
                        }
                        if !state.load_next() {
                            return;
                        }
                    }
                }
                _ => unreachable!(),
            }
            state.clock.get_time_after(1)
        };
        self.sync.set(next, TAG_TX_BIT);
    }

    fn sched_name(&self) -> &str {
        "uart"
    }
}

const TAG_AUDIO: SyncTag = 0;

struct AudioState {
    conv: FrequencyConverter,
    last: EmuTime,
    samples: u64,
}

/// Sound output generating samples in batches
pub struct AudioSampler {
    sync: SyncPoints,
    state: Mutex<AudioState>,
    rate: u64,
    batch_period: EmuDuration,
}

impl AudioSampler {
    pub fn new(scheduler: &Arc<Scheduler>, rate: u64, batch: u64) -> Result<Arc<Self>> {
        let conv = FrequencyConverter::from_master(rate)?;
        let batch_period = EmuDuration::try_hz(rate)?.checked_mul(batch as i64)?;
        let now = scheduler.get_current_time();

        let dev = Arc::new_cyclic(|me| Self {
            sync: SyncPoints::new(Arc::clone(scheduler), me),
            state: Mutex::new(AudioState {
                conv,
                last: now,
                samples: 0,
            }),
            rate,
            batch_period,
        });
        dev.sync.set(now + batch_period, TAG_AUDIO);
        Ok(dev)
    }

    /// Accounts for samples generated up to `time`.
    pub fn update(&self, time: EmuTime) {
        let mut state = self.state.lock().unwrap();
        if time <= state.last {
            return;
        }
        let elapsed = time - state.last;
        state.samples += state.conv.convert_duration(elapsed);
        state.last = time;
    }

    pub fn samples(&self) -> u64 {
        self.state.lock().unwrap().samples
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }
}

impl Schedulable for AudioSampler {
    fn execute_until(&self, time: EmuTime, _tag: SyncTag) {
        self.update(time);
        self.sync.set(time + self.batch_period, TAG_AUDIO);
    }

    fn sched_name(&self) -> &str {
        "audio"
    }
}

const TAG_INPUT: SyncTag = 0;

/// Input port fed from outside the emulation thread
pub struct InputPort {
    sync: SyncPoints,
    pending: Mutex<VecDeque<u8>>,
    latched: Mutex<Vec<(EmuTime, u8)>>,
}

impl InputPort {
    pub fn new(scheduler: &Arc<Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            sync: SyncPoints::new(Arc::clone(scheduler), me),
            pending: Mutex::new(VecDeque::new()),
            latched: Mutex::new(vec![]),
        })
    }

    /// Injects an input event. May be called from any thread; the event is
    /// latched by the emulation at its next opportunity.
    pub fn inject(&self, value: u8) {
        self.pending.lock().unwrap().push_back(value);
        self.sync.set_asap(TAG_INPUT);
    }

    pub fn latched(&self) -> Vec<(EmuTime, u8)> {
        self.latched.lock().unwrap().clone()
    }
}

impl Schedulable for InputPort {
    fn execute_until(&self, time: EmuTime, _tag: SyncTag) {
        if let Some(value) = self.pending.lock().unwrap().pop_front() {
            debug!("Input {:02X} latched at {}", value, time);
            self.latched.lock().unwrap().push((time, value));
        }
    }

    fn sched_name(&self) -> &str {
        "input"
    }
}
