//! Buffer Ring Manager
//!
//! Keeps at most [`BUFFER_RING_SLOTS`] stream buffers resident. Descriptors
//! are fetched round-robin, one request in flight at a time, each
//! completion chaining the next load while a slot is free. Descriptor 0 is
//! the fallback buffer: it is fetched once, held outside the ring and
//! skipped on every later pass.

use std::collections::VecDeque;
use std::sync::Arc;

use super::fetch::{FetchError, FetchHandle, Fetcher};
use crate::constants::pools::BUFFER_RING_SLOTS;
use crate::manifest::BufferSpec;
use crate::mesh::FrameBytes;

/// Outcome of a completed fetch.
#[derive(Debug, Clone)]
pub enum RingEvent {
    FallbackCaptured,
    Loaded { descriptor: usize, slot: usize },
    Failed { descriptor: usize, error: FetchError },
}

#[derive(Debug)]
struct Resident {
    descriptor: usize,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct PendingLoad {
    descriptor: usize,
    /// `None` for the fallback buffer
    slot: Option<usize>,
    handle: FetchHandle,
}

pub struct BufferRing {
    fetcher: Arc<dyn Fetcher>,
    url_root: String,
    specs: Vec<BufferSpec>,

    slots: Vec<Option<Resident>>,
    free: VecDeque<usize>,
    /// Descriptor -> slot it was loaded into
    location: Vec<Option<usize>>,

    next_load: usize,
    pending: Option<PendingLoad>,
    fallback: Option<Vec<u8>>,

    /// Slot backing the frame currently being decoded; never handed out
    current: Option<usize>,
    buffers_loaded: usize,
}

impl BufferRing {
    pub fn new(fetcher: Arc<dyn Fetcher>, url_root: impl Into<String>, specs: Vec<BufferSpec>) -> Self {
        let capacity = BUFFER_RING_SLOTS.min(specs.len().saturating_sub(1));
        let location = vec![None; specs.len()];
        Self {
            fetcher,
            url_root: url_root.into(),
            specs,
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).collect(),
            location,
            next_load: 0,
            pending: None,
            fallback: None,
            current: None,
            buffers_loaded: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn descriptor_count(&self) -> usize {
        self.specs.len()
    }

    /// Stream buffers loaded since open (or the last rewind).
    pub fn buffers_loaded(&self) -> usize {
        self.buffers_loaded
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn fallback_bytes(&self) -> Option<&[u8]> {
        self.fallback.as_deref()
    }

    pub fn resident_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn resident_descriptors(&self) -> Vec<usize> {
        self.slots.iter().flatten().map(|r| r.descriptor).collect()
    }

    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    /// Start fetching the next descriptor if a slot is free and nothing is
    /// in flight. Returns whether a request was issued.
    pub fn load_next(&mut self) -> bool {
        if self.pending.is_some() || self.specs.is_empty() {
            return false;
        }
        if self.free.is_empty() {
            log::debug!("[BufferRing] No free buffer slot available");
            return false;
        }

        if self.fallback.is_some() && self.next_load == 0 {
            self.next_load = 1 % self.specs.len();
        }
        let descriptor = self.next_load;
        self.next_load = (self.next_load + 1) % self.specs.len();

        let slot = if descriptor == 0 {
            log::info!("[BufferRing] Loading fallback frame buffer");
            None
        } else {
            let Some(slot) = self.free.pop_front() else {
                return false;
            };
            // Whatever the slot held before is gone from here on
            if let Some(old) = self.slots[slot].take() {
                self.location[old.descriptor] = None;
            }
            log::info!(
                "[BufferRing] Loading buffer {} ({}) into slot {}",
                descriptor,
                self.specs[descriptor].uri,
                slot
            );
            Some(slot)
        };

        let url = format!("{}{}", self.url_root, self.specs[descriptor].uri);
        let handle = self.fetcher.fetch(&url);
        self.pending = Some(PendingLoad {
            descriptor,
            slot,
            handle,
        });
        true
    }

    /// Collect a finished fetch, if any, and chain the next load.
    pub fn poll(&mut self) -> Option<RingEvent> {
        let result = self.pending.as_ref()?.handle.try_complete()?;
        let PendingLoad {
            descriptor, slot, ..
        } = self.pending.take()?;

        let event = match (result, slot) {
            (Ok(bytes), None) => {
                log::info!("[BufferRing] Fallback frame buffer downloaded ({} bytes)", bytes.len());
                self.fallback = Some(bytes);
                RingEvent::FallbackCaptured
            }
            (Ok(bytes), Some(slot)) => {
                log::info!(
                    "[BufferRing] Buffer {} loaded into slot {} ({} bytes)",
                    descriptor,
                    slot,
                    bytes.len()
                );
                self.slots[slot] = Some(Resident { descriptor, bytes });
                self.location[descriptor] = Some(slot);
                self.buffers_loaded += 1;
                RingEvent::Loaded { descriptor, slot }
            }
            (Err(error), slot) => {
                log::warn!("[BufferRing] Buffer {} failed: {}", descriptor, error);
                if let Some(slot) = slot {
                    self.free.push_front(slot);
                }
                // Retry the same descriptor on the next load_next()
                self.next_load = descriptor;
                return Some(RingEvent::Failed { descriptor, error });
            }
        };

        self.load_next();
        Some(event)
    }

    /// Resident bytes of `descriptor`, checked against the slot's tag.
    pub fn bytes_for(&self, descriptor: usize) -> Option<&[u8]> {
        let slot = (*self.location.get(descriptor)?)?;
        match &self.slots[slot] {
            Some(r) if r.descriptor == descriptor => Some(&r.bytes),
            _ => None,
        }
    }

    pub fn slot_of(&self, descriptor: usize) -> Option<usize> {
        self.bytes_for(descriptor)?;
        self.location[descriptor]
    }

    /// Playback moved onto `descriptor`. The previously pinned slot returns
    /// to the free list and the next load is kicked off. Returns whether the
    /// pinned slot changed.
    pub fn advance_current(&mut self, descriptor: usize) -> bool {
        let Some(slot) = self.slot_of(descriptor) else {
            return false;
        };
        if self.current == Some(slot) {
            return false;
        }
        log::debug!("[BufferRing] Current buffer -> {} (slot {})", descriptor, slot);
        if let Some(previous) = self.current.replace(slot) {
            self.free_slot(previous);
        }
        self.load_next();
        true
    }

    /// Return `descriptor`'s slot to the free list. The pinned slot is
    /// never released.
    pub fn release(&mut self, descriptor: usize) -> bool {
        match self.slot_of(descriptor) {
            Some(slot) if Some(slot) != self.current => {
                self.free_slot(slot);
                true
            }
            Some(_) => {
                log::debug!("[BufferRing] Buffer {} is in use, not releasing", descriptor);
                false
            }
            None => false,
        }
    }

    fn free_slot(&mut self, slot: usize) {
        if !self.free.contains(&slot) {
            self.free.push_back(slot);
        }
    }

    /// Back to the state right after the manifest loaded. The fallback
    /// buffer survives.
    pub fn rewind(&mut self) {
        self.abort_pending();
        for slot in &mut self.slots {
            *slot = None;
        }
        self.location.iter_mut().for_each(|l| *l = None);
        self.free = (0..self.slots.len()).collect();
        self.current = None;
        self.buffers_loaded = 0;
        self.next_load = if self.fallback.is_some() { 1 } else { 0 };
    }

    /// Abort any request in flight and drop every buffer.
    pub fn close(&mut self) {
        self.rewind();
        self.fallback = None;
        self.next_load = 0;
    }

    fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::debug!("[BufferRing] Aborting load of buffer {}", pending.descriptor);
            pending.handle.abort();
        }
    }
}

impl FrameBytes for BufferRing {
    fn buffer_bytes(&self, buffer: usize) -> Option<&[u8]> {
        self.bytes_for(buffer)
    }
}
