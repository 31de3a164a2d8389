use log::{debug, trace};
use std::rc::Rc;

use crate::errors::{DosError, DosResult};
use crate::memory::{physical, BusPtr};
use crate::Services;

pub const MCB_TYPE_CHAIN: u8 = 0x4D; // 'M', another block follows
pub const MCB_TYPE_LAST: u8 = 0x5A; // 'Z', last block of the chain
pub const MCB_OWNER_FREE: u16 = 0x0000;

// MCB header, one paragraph at a paragraph boundary:
//   +0   type        'M' or 'Z'
//   +1   owner       PSP segment, 0 = free
//   +3   size        paragraphs of payload
//   +5   reserved
//   +8   owner filename, 8 bytes space padded
const OWNER_NAME_OFFSET: usize = 8;

/// View of one Memory Control Block header in guest memory.
#[derive(Clone)]
pub struct Mcb {
    bus: BusPtr,
    pub segment: u16,
}

impl Mcb {
    pub fn at(bus: &BusPtr, segment: u16) -> Self {
        Mcb { bus: Rc::clone(bus), segment }
    }

    fn base(&self) -> usize {
        physical(self.segment, 0)
    }

    pub fn type_byte(&self) -> u8 {
        self.bus.borrow().read_u8(self.base())
    }
    pub fn set_type_byte(&self, value: u8) {
        self.bus.borrow_mut().write_u8(self.base(), value);
    }

    pub fn owner(&self) -> u16 {
        self.bus.borrow().read_u16(self.base() + 1)
    }
    pub fn set_owner(&self, psp_segment: u16) {
        self.bus.borrow_mut().write_u16(self.base() + 1, psp_segment);
    }

    /// Payload size in paragraphs.
    pub fn size(&self) -> u16 {
        self.bus.borrow().read_u16(self.base() + 3)
    }
    pub fn set_size(&self, paragraphs: u16) {
        self.bus.borrow_mut().write_u16(self.base() + 3, paragraphs);
    }

    pub fn set_owner_name(&self, name: &str) {
        let mut bytes = [b' '; 8];
        for (i, b) in name.bytes().take(8).enumerate() {
            bytes[i] = b;
        }
        self.bus.borrow_mut().write_bytes(self.base() + OWNER_NAME_OFFSET, &bytes);
    }

    pub fn payload_segment(&self) -> u16 {
        self.segment.wrapping_add(1)
    }

    pub fn next_segment(&self) -> u16 {
        self.segment.wrapping_add(1).wrapping_add(self.size())
    }

    pub fn next(&self) -> Mcb {
        Mcb::at(&self.bus, self.next_segment())
    }

    pub fn is_free(&self) -> bool {
        self.owner() == MCB_OWNER_FREE
    }
    pub fn is_last(&self) -> bool {
        self.type_byte() == MCB_TYPE_LAST
    }
    pub fn is_valid(&self) -> bool {
        matches!(self.type_byte(), MCB_TYPE_CHAIN | MCB_TYPE_LAST)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    FirstFit,
    BestFit,
    LastFit,
}

/// INT 21h 58h strategy word. The two low bits select the fit, bits 6-7
/// select the high-memory policy; high memory is not implemented, the bits
/// are stored and handed back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStrategy {
    raw: u16,
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy { raw: 0 }
    }
}

impl AllocationStrategy {
    pub fn from_raw(raw: u16) -> DosResult<Self> {
        if raw & !0x00C3 != 0 || raw & 0x0003 == 3 {
            return Err(DosError::FunctionInvalid);
        }
        Ok(AllocationStrategy { raw })
    }

    pub fn raw(self) -> u16 {
        self.raw
    }

    pub fn fit(self) -> FitPolicy {
        match self.raw & 0x0003 {
            0 => FitPolicy::FirstFit,
            1 => FitPolicy::BestFit,
            _ => FitPolicy::LastFit,
        }
    }
}

/// An allocation request the chain could not satisfy; carries the largest
/// free block for the guest's BX diagnostic.
#[derive(Debug)]
pub struct AllocationFailure {
    pub error: DosError,
    pub largest_free: u16,
}

impl From<DosError> for AllocationFailure {
    fn from(error: DosError) -> Self {
        AllocationFailure { error, largest_free: 0 }
    }
}

/// The conventional-memory allocator. One chain of MCBs covers
/// `[start_segment, last_free_segment]`; free neighbours are coalesced
/// lazily before every placement decision.
pub struct MemoryManager {
    services: Services,
    start_segment: u16,
    last_free_segment: u16,
    strategy: AllocationStrategy,
}

impl MemoryManager {
    pub fn new(services: &Services, initial_psp_segment: u16, last_free_segment: u16) -> Self {
        let start_segment = initial_psp_segment - 1;
        let manager = MemoryManager {
            services: services.clone(),
            start_segment,
            last_free_segment,
            strategy: AllocationStrategy::default(),
        };
        let first = manager.first_mcb();
        first.set_type_byte(MCB_TYPE_LAST);
        first.set_owner(MCB_OWNER_FREE);
        first.set_size(last_free_segment - start_segment);
        first.set_owner_name("");
        debug!(
            "mcb chain initialized: {:04X}..{:04X} ({} paragraphs)",
            start_segment,
            last_free_segment,
            first.size()
        );
        manager
    }

    fn bus(&self) -> &BusPtr {
        &self.services.bus
    }

    fn first_mcb(&self) -> Mcb {
        Mcb::at(self.bus(), self.start_segment)
    }

    fn current_psp(&self) -> u16 {
        self.services.psps.borrow().current()
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: AllocationStrategy) {
        self.strategy = strategy;
    }

    /// Absorbs every free successor of `mcb` into it.
    fn join(&self, mcb: &Mcb) -> DosResult<()> {
        while !mcb.is_last() {
            let next = mcb.next();
            if !next.is_valid() {
                return Err(DosError::McbDestroyed);
            }
            if !next.is_free() {
                break;
            }
            mcb.set_size(mcb.size() + next.size() + 1);
            mcb.set_type_byte(next.type_byte());
        }
        Ok(())
    }

    /// Cuts `mcb` down to `paragraphs`, leaving the remainder as a free
    /// successor that inherits the chain position marker.
    fn split(&self, mcb: &Mcb, paragraphs: u16) {
        let original = mcb.size();
        if original == paragraphs {
            return;
        }
        mcb.set_size(paragraphs);
        let successor = mcb.next();
        successor.set_type_byte(mcb.type_byte());
        successor.set_owner(MCB_OWNER_FREE);
        successor.set_size(original - paragraphs - 1);
        successor.set_owner_name("");
        mcb.set_type_byte(MCB_TYPE_CHAIN);
    }

    /// One pass over the chain: coalesce free runs, collect the free blocks
    /// that can hold `wanted` paragraphs.
    fn free_candidates(&self, wanted: u16) -> DosResult<Vec<Mcb>> {
        let mut candidates = Vec::new();
        let mut current = self.first_mcb();
        loop {
            if !current.is_valid() {
                return Err(DosError::McbDestroyed);
            }
            if current.is_free() {
                self.join(&current)?;
                if current.size() >= wanted {
                    candidates.push(current.clone());
                }
            }
            if current.is_last() {
                break;
            }
            let next = current.next();
            // Next always advances; a wrapped size means a mangled header
            if next.segment <= current.segment {
                return Err(DosError::McbDestroyed);
            }
            current = next;
        }
        Ok(candidates)
    }

    /// Size of the largest free block, 0 when nothing is free.
    pub fn largest_free(&self) -> u16 {
        match self.free_candidates(1) {
            Ok(candidates) => candidates.iter().map(Mcb::size).max().unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn pick(&self, candidates: Vec<Mcb>) -> Option<Mcb> {
        match self.strategy.fit() {
            FitPolicy::FirstFit => candidates.into_iter().next(),
            FitPolicy::BestFit => candidates.into_iter().min_by_key(Mcb::size),
            // the walk runs low to high, so the last candidate wins
            FitPolicy::LastFit => candidates.into_iter().last(),
        }
    }

    fn allocate_block(&mut self, paragraphs: u16) -> Result<Mcb, AllocationFailure> {
        let candidates = self.free_candidates(paragraphs)?;
        let chosen = match self.pick(candidates) {
            Some(block) => block,
            None => {
                return Err(AllocationFailure {
                    error: DosError::InsufficientMemory,
                    largest_free: self.largest_free(),
                })
            }
        };
        self.split(&chosen, paragraphs);
        Ok(chosen)
    }

    /// INT 21h 48h. Returns the payload segment of the new block.
    pub fn allocate(&mut self, paragraphs: u16) -> Result<u16, AllocationFailure> {
        let block = self.allocate_block(paragraphs)?;
        block.set_owner(self.current_psp());
        trace!("allocated {} paragraphs at {:04X}", paragraphs, block.payload_segment());
        Ok(block.payload_segment())
    }

    /// INT 21h 4Ah. `block_segment` is the payload segment; its MCB sits one
    /// paragraph below.
    pub fn resize(&mut self, block_segment: u16, paragraphs: u16) -> Result<(), AllocationFailure> {
        let mcb = Mcb::at(self.bus(), block_segment.wrapping_sub(1));
        if !mcb.is_valid() {
            return Err(DosError::McbAddressInvalid.into());
        }
        let original = mcb.size();
        // grab every free successor first, even past the requested size
        self.join(&mcb)?;
        if mcb.size() < paragraphs {
            if mcb.size() > original {
                self.split(&mcb, original);
            }
            return Err(AllocationFailure {
                error: DosError::InsufficientMemory,
                largest_free: self.largest_free(),
            });
        }
        if mcb.size() > paragraphs {
            self.split(&mcb, paragraphs);
        }
        mcb.set_owner(self.current_psp());
        Ok(())
    }

    /// Carves `paragraphs` off the high end of the highest free block that
    /// fits. Environment blocks live here so the program load area below
    /// stays contiguous.
    pub fn allocate_environment(&mut self, paragraphs: u16) -> Result<u16, AllocationFailure> {
        let candidates = self.free_candidates(paragraphs)?;
        let chosen = match candidates.into_iter().last() {
            Some(block) => block,
            None => {
                return Err(AllocationFailure {
                    error: DosError::InsufficientMemory,
                    largest_free: self.largest_free(),
                })
            }
        };
        let block = if chosen.size() > paragraphs {
            // keep the head free, hand out the tail
            self.split(&chosen, chosen.size() - paragraphs - 1);
            chosen.next()
        } else {
            chosen
        };
        block.set_owner(self.current_psp());
        Ok(block.payload_segment())
    }

    /// INT 21h 49h.
    pub fn free(&mut self, block_segment: u16) -> DosResult<()> {
        let mcb = Mcb::at(self.bus(), block_segment.wrapping_sub(1));
        if !mcb.is_valid() {
            return Err(DosError::McbAddressInvalid);
        }
        mcb.set_owner(MCB_OWNER_FREE);
        Ok(())
    }

    /// Process-exit sweep: releases every block the PSP owns (its own block,
    /// its environment, anything it allocated), then coalesces.
    pub fn free_owned_by(&mut self, psp_segment: u16) {
        let mut current = self.first_mcb();
        loop {
            if !current.is_valid() {
                return;
            }
            if current.owner() == psp_segment {
                current.set_owner(MCB_OWNER_FREE);
            }
            if current.is_free() && self.join(&current).is_err() {
                return;
            }
            if current.is_last() {
                return;
            }
            let next = current.next();
            if next.segment <= current.segment {
                return;
            }
            current = next;
        }
    }

    /// Reserves the block a program will live in. `min`/`max` come from the
    /// EXE header plus one PSP paragraph block; `(0, 0)` means "the largest
    /// free block there is". When `at` names a payload segment the block
    /// there must be free and big enough (used to honor the configured load
    /// address of the first program). The block becomes its own owner.
    pub fn reserve_program_block(
        &mut self,
        min: u16,
        max: u16,
        at: Option<u16>,
    ) -> Result<(u16, u16), AllocationFailure> {
        let unbounded = min == 0 && max == 0;
        if let Some(segment) = at {
            let block = self.block_at(segment)?;
            if !block.is_free() {
                return Err(DosError::McbAddressInvalid.into());
            }
            self.join(&block)?;
            let want = if unbounded { block.size() } else { max.min(block.size()) };
            if want == 0 || (!unbounded && want < min) {
                return Err(AllocationFailure {
                    error: DosError::InsufficientMemory,
                    largest_free: self.largest_free(),
                });
            }
            self.split(&block, want);
            block.set_owner(block.payload_segment());
            return Ok((block.payload_segment(), want));
        }
        let largest = self.largest_free();
        let want = if unbounded { largest } else { max.min(largest) };
        if want == 0 || (!unbounded && want < min) {
            return Err(AllocationFailure {
                error: DosError::InsufficientMemory,
                largest_free: largest,
            });
        }
        let block = self.allocate_block(want)?;
        block.set_owner(block.payload_segment());
        Ok((block.payload_segment(), want))
    }

    fn block_at(&self, payload_segment: u16) -> DosResult<Mcb> {
        let mut current = self.first_mcb();
        loop {
            if !current.is_valid() {
                return Err(DosError::McbDestroyed);
            }
            if current.payload_segment() == payload_segment {
                return Ok(current);
            }
            if current.is_last() {
                return Err(DosError::McbAddressInvalid);
            }
            let next = current.next();
            if next.segment <= current.segment {
                return Err(DosError::McbDestroyed);
            }
            current = next;
        }
    }

    /// Walks the chain and verifies it is still well formed: valid type
    /// bytes, exactly one last marker, ending exactly at the heap top.
    pub fn check_chain(&self) -> bool {
        let mut current = self.first_mcb();
        loop {
            if !current.is_valid() || current.segment > self.last_free_segment {
                return false;
            }
            if current.is_last() {
                return current.next_segment() == self.last_free_segment + 1;
            }
            let next = current.next();
            if next.segment <= current.segment {
                return false;
            }
            current = next;
        }
    }
}
