//! Discrete-event scheduler for emulated devices.
//!
//! Devices register sync points: "call my [`Schedulable::execute_until`] with
//! this tag once emulated time reaches this instant". The emulation thread
//! alternates between running the CPU up to [`Scheduler::get_next`] and calling
//! [`Scheduler::schedule`] to dispatch whatever became due.
//!
//! Ordering:
//! - Earlier instants are dispatched first.
//! - [`EmuTime::ASAP`] sync points are dispatched before any finite instant,
//!   including one equal to the current time, in the order they were registered.
//! - Sync points for the same finite instant are currently dispatched in
//!   registration order. Do not rely on this.
//!
//! Threading: one thread (the first one to call [`Scheduler::schedule`] or
//! [`Scheduler::set_current_time`]) owns time. Any thread may register and
//! remove sync points. The queue lock is never held while a device callback
//! runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::fmt;
use std::sync::atomic::{self, AtomicBool, AtomicU64};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{self, ThreadId};

use log::*;
use serde::{Deserialize, Serialize};

use crate::debuggable::{Debuggable, DebuggableProperties, DebuggableProperty, DebuggablePropertyValue};
use crate::schedulable::{DeviceHandle, SyncTag};
use crate::time::{EmuTime, TimeError};
use crate::{dbgprop_bool, dbgprop_time, dbgprop_udec};

/// A pending wake-up of a device.
struct SyncPoint {
    time: EmuTime,
    device: DeviceHandle,
    tag: SyncTag,
    /// Registration order, makes the queue order total.
    seq: u64,
}

impl SyncPoint {
    fn is_for(&self, device: &DeviceHandle) -> bool {
        Weak::ptr_eq(&self.device, device)
    }
}

// BinaryHeap is a max-heap: the earliest sync point must compare greatest.
impl Ord for SyncPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SyncPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SyncPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SyncPoint {}

struct Queue {
    sync_points: BinaryHeap<SyncPoint>,
    next_seq: u64,
}

/// Persistent part of the scheduler state.
///
/// Pending sync points are not part of it; devices register theirs again
/// after a restore.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerState {
    pub current_time: EmuTime,
}

/// Resets the dispatch flag, also when a callback panics.
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, atomic::Ordering::Release);
    }
}

pub struct Scheduler {
    queue: Mutex<Queue>,
    /// Ticks of the current time. Only written by the owner thread.
    current_time: AtomicU64,
    /// Order key (see [`EmuTime::key`]) of the earliest sync point,
    /// `u64::MAX` if there is none. Updated under the queue lock.
    next_key: AtomicU64,
    owner: OnceLock<ThreadId>,
    dispatching: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::starting_at(EmuTime::zero())
    }

    /// Creates a scheduler continuing from a saved state, with no sync points.
    pub fn from_state(state: SchedulerState) -> Result<Self, TimeError> {
        let time = state.current_time;
        if time.is_asap() || time == EmuTime::infinity() {
            return Err(TimeError::InvalidTime(time));
        }
        Ok(Self::starting_at(time))
    }

    fn starting_at(time: EmuTime) -> Self {
        debug!("Scheduler created at {}", time);
        Self {
            queue: Mutex::new(Queue {
                sync_points: BinaryHeap::new(),
                next_seq: 0,
            }),
            current_time: AtomicU64::new(time.ticks()),
            next_key: AtomicU64::new(u64::MAX),
            owner: OnceLock::new(),
            dispatching: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            current_time: self.get_current_time(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // No callback ever runs with the lock held, so a poisoned queue is
        // still consistent.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_next(&self, queue: &Queue) {
        let key = queue.sync_points.peek().map_or(u64::MAX, |sp| sp.time.key());
        self.next_key.store(key, atomic::Ordering::Release);
    }

    fn check_owner(&self, op: &str) {
        let me = thread::current().id();
        let owner = *self.owner.get_or_init(|| {
            debug!("Scheduler time owned by thread {:?}", me);
            me
        });
        assert_eq!(
            owner, me,
            "Scheduler::{} called from a thread other than the emulation thread",
            op
        );
    }

    /// Registers a sync point: `device` gets its `execute_until` called with
    /// `tag` once emulated time reaches `time`.
    ///
    /// `time` must not be before the current time, unless it is
    /// [`EmuTime::ASAP`]. A device may have any number of sync points pending,
    /// also with the same tag.
    pub fn set_sync_point(&self, time: EmuTime, device: &DeviceHandle, tag: SyncTag) {
        let mut queue = self.lock();
        let current = self.get_current_time();
        assert!(
            time.is_asap() || time >= current,
            "Sync point at {} is before current time {}",
            time,
            current
        );

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.sync_points.push(SyncPoint {
            time,
            device: device.clone(),
            tag,
            seq,
        });
        self.update_next(&queue);
    }

    /// Removes one pending sync point of `device` with `tag`.
    ///
    /// If several match, it is unspecified which one is removed. Returns
    /// whether one was found; not finding one is not an error.
    ///
    /// This scans the whole queue. Devices that cancel often should rather
    /// ignore stale wake-ups in their callback.
    pub fn remove_sync_point(&self, device: &DeviceHandle, tag: SyncTag) -> bool {
        let mut queue = self.lock();
        let mut removed = false;
        queue.sync_points.retain(|sp| {
            if !removed && sp.tag == tag && sp.is_for(device) {
                removed = true;
                false
            } else {
                true
            }
        });
        if removed {
            self.update_next(&queue);
        } else {
            trace!("No sync point with tag {} to remove", tag);
        }
        removed
    }

    /// Removes all pending sync points of `device`, returns how many.
    pub fn remove_sync_points(&self, device: &DeviceHandle) -> usize {
        let mut queue = self.lock();
        let before = queue.sync_points.len();
        queue.sync_points.retain(|sp| !sp.is_for(device));
        let removed = before - queue.sync_points.len();
        if removed > 0 {
            self.update_next(&queue);
        }
        removed
    }

    /// Whether `device` has a sync point with `tag` pending.
    pub fn pending_sync_point(&self, device: &DeviceHandle, tag: SyncTag) -> bool {
        self.lock()
            .sync_points
            .iter()
            .any(|sp| sp.tag == tag && sp.is_for(device))
    }

    pub fn get_current_time(&self) -> EmuTime {
        EmuTime::from_ticks(self.current_time.load(atomic::Ordering::Acquire))
    }

    /// Instant of the earliest pending sync point.
    ///
    /// Reports the current time for a pending ASAP sync point and
    /// [`EmuTime::infinity`] when nothing is pending.
    #[inline]
    pub fn get_next(&self) -> EmuTime {
        let next = EmuTime::from_key(self.next_key.load(atomic::Ordering::Acquire));
        if next.is_asap() {
            self.get_current_time()
        } else {
            next
        }
    }

    /// Advances the current time without dispatching anything.
    ///
    /// Only the emulation thread may call this, and never with a time before
    /// the current time.
    pub fn set_current_time(&self, time: EmuTime) {
        self.check_owner("set_current_time");
        let current = self.get_current_time();
        assert!(
            !time.is_asap() && time >= current,
            "Current time cannot go back from {} to {}",
            current,
            time
        );
        self.current_time.store(time.ticks(), atomic::Ordering::Release);
    }

    /// Dispatches every sync point up to and including `limit`, in time order,
    /// and advances the current time to `limit`.
    ///
    /// Sync points registered by callbacks are picked up in the same call if
    /// they are due. Must not be called from a callback.
    ///
    /// The first call binds the calling thread as owner of time. After that,
    /// the path taken when nothing is due verifies the owner only in debug
    /// builds; dispatching always verifies it.
    #[inline]
    pub fn schedule(&self, limit: EmuTime) {
        if !limit.is_asap() && limit.key() < self.next_key.load(atomic::Ordering::Acquire) {
            if cfg!(debug_assertions) || self.owner.get().is_none() {
                self.check_owner("schedule");
            }
            debug_assert!(
                !self.dispatching.load(atomic::Ordering::Acquire),
                "Scheduler::schedule called from a device callback"
            );

            self.current_time
                .fetch_max(limit.ticks(), atomic::Ordering::AcqRel);
            return;
        }
        self.schedule_helper(limit);
    }

    #[cold]
    #[inline(never)]
    fn schedule_helper(&self, limit: EmuTime) {
        self.check_owner("schedule");
        assert!(!limit.is_asap(), "Cannot schedule up to ASAP");
        let reentered = self.dispatching.swap(true, atomic::Ordering::AcqRel);
        assert!(!reentered, "Scheduler::schedule called from a device callback");
        let _guard = DispatchGuard(&self.dispatching);

        loop {
            let (sp, time) = {
                let mut queue = self.lock();
                let sp = match queue.sync_points.peek_mut() {
                    Some(top) if top.time <= limit => PeekMut::pop(top),
                    _ => break,
                };
                self.update_next(&queue);

                // A sync point registered from another thread may have lost
                // the race against the time advance; it fires late rather
                // than moving time backwards.
                let current = self.get_current_time();
                let time = if sp.time.is_asap() {
                    current
                } else {
                    sp.time.max(current)
                };
                self.current_time
                    .store(time.ticks(), atomic::Ordering::Release);
                (sp, time)
            };

            match sp.device.upgrade() {
                Some(device) => {
                    trace!(
                        "Dispatch {} tag {} at {}",
                        device.sched_name(),
                        sp.tag,
                        time
                    );
                    device.execute_until(time, sp.tag);
                }
                None => {
                    warn!(
                        "Skipping sync point (tag {}) at {} of a destroyed device",
                        sp.tag, time
                    );
                }
            }
        }

        self.current_time
            .fetch_max(limit.ticks(), atomic::Ordering::AcqRel);
    }

    /// Number of pending sync points.
    pub fn len(&self) -> usize {
        self.lock().sync_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sync_points.is_empty()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("current_time", &self.get_current_time())
            .field("next", &self.get_next())
            .field("pending", &self.len())
            .finish()
    }
}

impl Debuggable for Scheduler {
    fn get_debug_properties(&self) -> DebuggableProperties {
        vec![
            dbgprop_time!("Current time", self.get_current_time()),
            dbgprop_time!("Next sync point", self.get_next()),
            dbgprop_udec!("Pending sync points", self.len()),
            dbgprop_bool!(
                "Dispatching",
                self.dispatching.load(atomic::Ordering::Acquire)
            ),
        ]
    }
}
