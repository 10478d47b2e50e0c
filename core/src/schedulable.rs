//! The contract between devices and the [`Scheduler`].

use std::sync::{Arc, Weak};

use log::*;

use crate::scheduler::Scheduler;
use crate::time::EmuTime;

/// Opaque value passed back to the device, to tell its sync points apart.
pub type SyncTag = u32;

/// Non-owning reference to a device, as stored in the scheduler's queue.
pub type DeviceHandle = Weak<dyn Schedulable>;

/// A device that can be woken up by the scheduler at a point in emulated time.
pub trait Schedulable: Send + Sync {
    /// Called when a sync point registered by this device is reached.
    ///
    /// `time` is the instant the sync point was registered for (or the current
    /// time for ASAP sync points). This runs on the emulation hot path and
    /// must not call [`Scheduler::schedule`]. Registering or removing sync
    /// points from here is fine.
    ///
    /// The scheduler does not re-arm: a periodic device registers its next
    /// sync point from this callback.
    fn execute_until(&self, time: EmuTime, tag: SyncTag);

    /// Name used in log messages.
    fn sched_name(&self) -> &str {
        "device"
    }
}

/// Sync point bookkeeping embedded in a device.
///
/// Holds the scheduler and the device's own handle, so that the device can
/// (re-)register itself without passing itself around. Dropping this removes
/// every sync point the device still has pending.
///
/// ```ignore
/// let dev = Arc::new_cyclic(|me| Timer {
///     sync: SyncPoints::new(Arc::clone(&scheduler), me),
/// });
/// ```
pub struct SyncPoints {
    scheduler: Arc<Scheduler>,
    device: DeviceHandle,
}

impl SyncPoints {
    pub fn new<T: Schedulable + 'static>(scheduler: Arc<Scheduler>, device: &Weak<T>) -> Self {
        let device: DeviceHandle = device.clone();
        Self { scheduler, device }
    }

    /// Wakes the device at `time` with `tag`.
    pub fn set(&self, time: EmuTime, tag: SyncTag) {
        self.scheduler.set_sync_point(time, &self.device, tag);
    }

    /// Wakes the device as soon as possible with `tag`.
    pub fn set_asap(&self, tag: SyncTag) {
        self.scheduler.set_sync_point(EmuTime::ASAP, &self.device, tag);
    }

    /// Removes one pending sync point with `tag`. See [`Scheduler::remove_sync_point`].
    pub fn remove(&self, tag: SyncTag) -> bool {
        self.scheduler.remove_sync_point(&self.device, tag)
    }

    /// Removes all pending sync points of this device.
    pub fn remove_all(&self) -> usize {
        self.scheduler.remove_sync_points(&self.device)
    }

    pub fn pending(&self, tag: SyncTag) -> bool {
        self.scheduler.pending_sync_point(&self.device, tag)
    }

    pub fn current_time(&self) -> EmuTime {
        self.scheduler.get_current_time()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.device
    }
}

impl Drop for SyncPoints {
    fn drop(&mut self) {
        let removed = self.remove_all();
        if removed > 0 {
            debug!("Removed {} pending sync point(s) of dropped device", removed);
        }
    }
}
