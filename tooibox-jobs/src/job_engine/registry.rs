// SPDX-License-Identifier: MIT

//! Handle -> job lookup.
//!
//! A generational slot map: a handle packs a slot index (low 32 bits) and
//! the slot's generation (high 32 bits). Removing an entry bumps the slot's
//! generation, so any handle minted for the previous occupant stops matching
//! and resolves to "not found". Generations start at 1, which keeps every
//! minted handle distinct from the invalid handle (raw value 0).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::handle::Handle;
use crate::job_engine::job::Completion;
use crate::job_engine::lock;

/// Tag type for [`JobHandle`].
#[derive(Debug)]
pub enum JobTag {}

pub type JobHandle = Handle<JobTag, u64>;

/// Which executor a job was queued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Index into the engine's worker pool.
    Worker(usize),
    Foreground,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub completion: Arc<Completion>,
    pub placement: Placement,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Slots>,
}

fn pack(index: u32, generation: u32) -> JobHandle {
    JobHandle::from_raw((u64::from(generation) << 32) | u64::from(index))
}

fn unpack(handle: JobHandle) -> (usize, u32) {
    let raw = handle.into_raw();
    ((raw & u64::from(u32::MAX)) as usize, (raw >> 32) as u32)
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, completion: Arc<Completion>, placement: Placement) -> JobHandle {
        let mut inner = lock(&self.inner);
        let entry = Some(Entry {
            completion,
            placement,
        });
        inner.live += 1;
        let reused = inner.free.pop();
        match reused {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.entry = entry;
                pack(index, slot.generation)
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 1,
                    entry,
                });
                pack(index, 1)
            }
        }
    }

    pub(crate) fn get(&self, handle: JobHandle) -> Option<Entry> {
        if !handle.is_valid() {
            return None;
        }
        let (index, generation) = unpack(handle);
        let inner = lock(&self.inner);
        inner
            .slots
            .get(index)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.entry.clone())
    }

    /// Reclaims the slot. Returns the entry only to the first caller.
    pub(crate) fn remove(&self, handle: JobHandle) -> Option<Entry> {
        if !handle.is_valid() {
            return None;
        }
        let (index, generation) = unpack(handle);
        let mut inner = lock(&self.inner);
        let slot = inner.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = next_generation(slot.generation);
        inner.free.push(index as u32);
        inner.live -= 1;
        Some(entry)
    }

    /// Reclaims every finished job that completed at least `grace` ago.
    pub(crate) fn remove_expired(&self, grace: Duration, now: Instant) -> usize {
        let mut inner = lock(&self.inner);
        let Slots { slots, free, live } = &mut *inner;
        let mut reclaimed = 0;
        for (index, slot) in slots.iter_mut().enumerate() {
            let expired = slot
                .entry
                .as_ref()
                .and_then(|e| e.completion.finished_at())
                .is_some_and(|at| now.saturating_duration_since(at) >= grace);
            if expired {
                slot.entry = None;
                slot.generation = next_generation(slot.generation);
                free.push(index as u32);
                *live -= 1;
                reclaimed += 1;
            }
        }
        reclaimed
    }

    pub(crate) fn clear(&self) -> usize {
        let mut inner = lock(&self.inner);
        let Slots { slots, free, live } = &mut *inner;
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = next_generation(slot.generation);
                free.push(index as u32);
            }
        }
        std::mem::take(live)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_generation(generation: u32) -> u32 {
    generation.wrapping_add(1).max(1)
}
