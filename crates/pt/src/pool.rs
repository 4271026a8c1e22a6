//! Bounded event pool.
//!
//! Every event posted for asynchronous delivery occupies one slot from the
//! moment it is posted until the receiving process has consumed it. Slots are
//! addressed through [`EventHandle`]s that pair the slot index with a
//! generation counter, so releasing a handle twice or reading it after release
//! is reported instead of silently aliasing a newer event.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind, Payload};

/// Default pool capacity.
pub const DEFAULT_MAX_EVENTS: usize = 32;

/// Ownership-checked reference to an occupied pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: u16,
    generation: u32,
}

impl EventHandle {
    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("event pool exhausted ({capacity} slots in flight)")]
    Exhausted { capacity: usize },
    #[error("stale event handle {0}")]
    StaleHandle(EventHandle),
}

/// Occupancy figures for a pool.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub used: usize,
    /// Lowest number of free slots ever observed.
    pub min_free: usize,
}

impl PoolStats {
    const fn new(total: usize) -> Self {
        Self {
            total,
            free: total,
            used: 0,
            min_free: total,
        }
    }

    fn on_alloc(&mut self) {
        self.used += 1;
        self.free -= 1;
        if self.free < self.min_free {
            self.min_free = self.free;
        }
    }

    fn on_release(&mut self) {
        self.used -= 1;
        self.free += 1;
    }

    pub const fn is_exhausted(&self) -> bool {
        self.free == 0
    }

    /// Percentage of slots in use.
    pub fn utilization(&self) -> u8 {
        ((self.used * 100) / self.total) as u8
    }
}

struct Slot {
    generation: u32,
    event: Option<Event>,
}

struct Slots {
    slots: Vec<Slot>,
    stats: PoolStats,
}

impl Slots {
    fn occupied(&mut self, handle: EventHandle) -> Result<&mut Slot, PoolError> {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.generation == handle.generation && slot.event.is_some() => Ok(slot),
            _ => Err(PoolError::StaleHandle(handle)),
        }
    }
}

pub struct EventPool {
    inner: Mutex<RefCell<Slots>>,
    capacity: usize,
}

impl EventPool {
    /// Creates a pool with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or does not fit a 16-bit slot index.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event pool needs at least one slot");
        assert!(
            capacity <= usize::from(u16::MAX) + 1,
            "event pool capacity {capacity} exceeds slot index range"
        );

        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                event: None,
            })
            .collect();

        Self {
            inner: Mutex::new(RefCell::new(Slots {
                slots,
                stats: PoolStats::new(capacity),
            })),
            capacity,
        }
    }

    /// Claims the first free slot and stores the event in it.
    pub fn allocate(&self, kind: EventKind, payload: Payload) -> Result<EventHandle, PoolError> {
        critical_section::with(|cs| {
            let mut pool = self.inner.borrow_ref_mut(cs);
            let index = pool
                .slots
                .iter()
                .position(|slot| slot.event.is_none())
                .ok_or(PoolError::Exhausted {
                    capacity: self.capacity,
                })?;

            let slot = &mut pool.slots[index];
            slot.event = Some(Event::new(kind, payload));
            let handle = EventHandle {
                index: index as u16,
                generation: slot.generation,
            };
            pool.stats.on_alloc();
            Ok(handle)
        })
    }

    /// Returns a copy of the event held by `handle`.
    pub fn read(&self, handle: EventHandle) -> Result<Event, PoolError> {
        critical_section::with(|cs| {
            let mut pool = self.inner.borrow_ref_mut(cs);
            let slot = pool.occupied(handle)?;
            slot.event.clone().ok_or(PoolError::StaleHandle(handle))
        })
    }

    /// Frees the slot behind `handle`. Must be called exactly once per
    /// successful [`allocate`](Self::allocate).
    pub fn release(&self, handle: EventHandle) -> Result<(), PoolError> {
        let released = critical_section::with(|cs| {
            let mut pool = self.inner.borrow_ref_mut(cs);
            let slot = pool.occupied(handle)?;
            let event = slot.event.take();
            slot.generation = slot.generation.wrapping_add(1);
            pool.stats.on_release();
            Ok(event)
        })?;
        // Payload destructors run outside the critical section.
        drop(released);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.stats().used
    }

    pub fn stats(&self) -> PoolStats {
        critical_section::with(|cs| self.inner.borrow_ref(cs).stats)
    }
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
