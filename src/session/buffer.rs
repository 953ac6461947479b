use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{MediaError, MediaResult};
use crate::models::{BufferIndex, BufferInfo};

/// Fixed-capacity byte region shared between the caller and the session
#[derive(Clone)]
pub struct SharedMemory {
    bytes: Arc<Mutex<Vec<u8>>>,
    capacity: usize,
}

impl SharedMemory {
    /// Allocate a zeroed region, failing with `OutOfMemory` instead of aborting
    pub fn allocate(capacity: usize) -> MediaResult<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|e| MediaError::OutOfMemory(format!("cannot allocate {} byte buffer: {}", capacity, e)))?;
        bytes.resize(capacity, 0);
        Ok(Self {
            bytes: Arc::new(Mutex::new(bytes)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `data` in at `offset`
    pub fn write(&self, offset: usize, data: &[u8]) -> MediaResult<usize> {
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.capacity)
            .ok_or_else(|| {
                MediaError::invalid_argument(format!(
                    "{} bytes at offset {} exceed the {} byte buffer",
                    data.len(),
                    offset,
                    self.capacity
                ))
            })?;
        let mut bytes = self.lock()?;
        bytes[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    /// Copy `len` bytes out from `offset`
    pub fn read(&self, offset: usize, len: usize) -> MediaResult<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.capacity)
            .ok_or_else(|| {
                MediaError::invalid_argument(format!(
                    "region {}+{} is outside the {} byte buffer",
                    offset, len, self.capacity
                ))
            })?;
        let bytes = self.lock()?;
        Ok(bytes[offset..end].to_vec())
    }

    fn lock(&self) -> MediaResult<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.bytes
            .lock()
            .map_err(|_| MediaError::Unknown("shared buffer lock poisoned".to_string()))
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory").field("capacity", &self.capacity).finish()
    }
}

/// Who may touch a slot right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Session,
    Caller,
}

#[derive(Debug)]
struct Slot {
    memory: SharedMemory,
    owner: Owner,
    info: BufferInfo,
}

impl Slot {
    fn new(capacity: usize) -> MediaResult<Self> {
        Ok(Self {
            memory: SharedMemory::allocate(capacity)?,
            owner: Owner::Session,
            info: BufferInfo::default(),
        })
    }
}

/// Buffer traffic counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub inputs_granted: u64,
    pub inputs_queued: u64,
    pub outputs_produced: u64,
    pub outputs_released: u64,
    pub outputs_rendered: u64,
    pub pending_outputs: usize,
    pub inputs_held_by_caller: usize,
    pub outputs_held_by_caller: usize,
}

/// Input and output slots of one session with their ownership
#[derive(Debug)]
pub struct BufferPool {
    inputs: Vec<Slot>,
    outputs: Vec<Slot>,
    free_inputs: VecDeque<u32>,
    free_outputs: VecDeque<u32>,
    stats: BufferStats,
}

impl BufferPool {
    pub fn allocate(input_count: usize, output_count: usize, capacity: usize) -> MediaResult<Self> {
        if capacity == 0 && input_count + output_count > 0 {
            return Err(MediaError::invalid_argument("buffer capacity must be positive"));
        }
        let inputs = (0..input_count).map(|_| Slot::new(capacity)).collect::<MediaResult<Vec<_>>>()?;
        let outputs = (0..output_count).map(|_| Slot::new(capacity)).collect::<MediaResult<Vec<_>>>()?;

        log::debug!(
            "Allocated buffer pool: {} inputs, {} outputs, {} bytes each",
            input_count,
            output_count,
            capacity
        );

        Ok(Self {
            free_inputs: (0..input_count as u32).collect(),
            free_outputs: (0..output_count as u32).collect(),
            inputs,
            outputs,
            stats: BufferStats::default(),
        })
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn free_output_slots(&self) -> usize {
        self.free_outputs.len()
    }

    /// Hand the next free input slot to the caller
    pub fn grant_input(&mut self) -> Option<(BufferIndex, SharedMemory)> {
        let index = self.free_inputs.pop_front()?;
        let slot = &mut self.inputs[index as usize];
        slot.owner = Owner::Caller;
        slot.info = BufferInfo::default();
        self.stats.inputs_granted += 1;
        Some((BufferIndex(index), slot.memory.clone()))
    }

    /// Take back a caller-owned input slot and read the region it describes.
    /// The slot stays session-owned until `recycle_input`.
    pub fn take_input(&mut self, index: BufferIndex, info: BufferInfo) -> MediaResult<Vec<u8>> {
        let slot = caller_slot(&mut self.inputs, index, "input")?;
        let end = info.end().filter(|end| *end <= slot.memory.capacity()).ok_or_else(|| {
            MediaError::BufferOwnership {
                index: index.0,
                reason: format!(
                    "region {}+{} does not fit the {} byte buffer",
                    info.offset,
                    info.size,
                    slot.memory.capacity()
                ),
            }
        })?;
        let data = slot.memory.read(info.offset, end - info.offset)?;
        slot.owner = Owner::Session;
        slot.info = info;
        self.stats.inputs_queued += 1;
        Ok(data)
    }

    /// Return a consumed input slot to the free list
    pub fn recycle_input(&mut self, index: BufferIndex) {
        if let Some(slot) = self.inputs.get_mut(index.as_usize()) {
            if slot.owner == Owner::Session && !self.free_inputs.contains(&index.0) {
                self.free_inputs.push_back(index.0);
            }
        }
    }

    /// Copy a produced frame into the next free output slot and hand it to
    /// the caller. `Ok(None)` means every output slot is held.
    pub fn fill_output(
        &mut self,
        data: &[u8],
        presentation_time_us: i64,
    ) -> MediaResult<Option<(BufferIndex, BufferInfo, SharedMemory)>> {
        let Some(index) = self.free_outputs.front().copied() else {
            return Ok(None);
        };
        let slot = &mut self.outputs[index as usize];
        if data.len() > slot.memory.capacity() {
            return Err(MediaError::OutOfMemory(format!(
                "{} byte frame does not fit the {} byte output buffer",
                data.len(),
                slot.memory.capacity()
            )));
        }
        slot.memory.write(0, data)?;
        self.free_outputs.pop_front();
        slot.owner = Owner::Caller;
        slot.info = BufferInfo::sized(data.len(), presentation_time_us);
        self.stats.outputs_produced += 1;
        Ok(Some((BufferIndex(index), slot.info, slot.memory.clone())))
    }

    /// Payload of a caller-owned output slot
    pub fn read_output(&mut self, index: BufferIndex) -> MediaResult<(Vec<u8>, BufferInfo)> {
        let slot = caller_slot(&mut self.outputs, index, "output")?;
        let data = slot.memory.read(slot.info.offset, slot.info.size)?;
        Ok((data, slot.info))
    }

    /// Take back a caller-owned output slot
    pub fn release_output(&mut self, index: BufferIndex) -> MediaResult<()> {
        let slot = caller_slot(&mut self.outputs, index, "output")?;
        slot.owner = Owner::Session;
        self.free_outputs.push_back(index.0);
        self.stats.outputs_released += 1;
        Ok(())
    }

    pub fn record_rendered(&mut self) {
        self.stats.outputs_rendered += 1;
    }

    /// Take every slot back from the caller, restoring index order.
    /// Indices the caller still holds become invalid.
    pub fn reclaim_all(&mut self) -> usize {
        let reclaimed =
            reclaim(&mut self.inputs, &mut self.free_inputs) + reclaim(&mut self.outputs, &mut self.free_outputs);
        self.free_inputs = (0..self.inputs.len() as u32).collect();
        self.free_outputs = (0..self.outputs.len() as u32).collect();
        reclaimed
    }

    pub fn input_owner(&self, index: BufferIndex) -> Option<Owner> {
        self.inputs.get(index.as_usize()).map(|slot| slot.owner)
    }

    pub fn output_owner(&self, index: BufferIndex) -> Option<Owner> {
        self.outputs.get(index.as_usize()).map(|slot| slot.owner)
    }

    pub fn stats(&self) -> BufferStats {
        let mut stats = self.stats.clone();
        stats.inputs_held_by_caller = self.inputs.iter().filter(|s| s.owner == Owner::Caller).count();
        stats.outputs_held_by_caller = self.outputs.iter().filter(|s| s.owner == Owner::Caller).count();
        stats
    }
}

fn caller_slot<'a>(slots: &'a mut [Slot], index: BufferIndex, direction: &str) -> MediaResult<&'a mut Slot> {
    let count = slots.len();
    let slot = slots.get_mut(index.as_usize()).ok_or_else(|| MediaError::BufferOwnership {
        index: index.0,
        reason: format!("no such {} buffer (pool has {})", direction, count),
    })?;
    if slot.owner != Owner::Caller {
        return Err(MediaError::BufferOwnership {
            index: index.0,
            reason: format!("{} buffer is not currently held by the caller", direction),
        });
    }
    Ok(slot)
}

fn reclaim(slots: &mut [Slot], free: &mut VecDeque<u32>) -> usize {
    let mut reclaimed = 0;
    for (index, slot) in slots.iter_mut().enumerate() {
        if slot.owner == Owner::Caller {
            slot.owner = Owner::Session;
            slot.info = BufferInfo::default();
            free.push_back(index as u32);
            reclaimed += 1;
        }
    }
    reclaimed
}
