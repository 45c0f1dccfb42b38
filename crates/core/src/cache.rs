//! Decoded-instruction cache
//!
//! Entries are keyed by linear address and stamped with the generation of
//! the 64 KiB block their first byte lives in. Each block keeps a bitmap of
//! the bytes covered by decoded instructions. A write that lands on a
//! covered byte bumps the block generation and clears its bitmap, which
//! makes every entry of that block miss on its next lookup. Invalidation is
//! per block rather than per instruction: one write can force a whole block
//! to re-decode, but tracking stays a bit test per written byte.
//!
//! An instruction that crosses into the next block marks its tail bytes
//! there and flags that block, so a write to the tail also invalidates the
//! block the instruction started in.

use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

const BLOCK_SHIFT: u32 = 16;
const BLOCK_WORDS: usize = (1 << BLOCK_SHIFT) / 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

struct CacheEntry {
    insn: Rc<Instruction>,
    generation: u32,
}

struct CodeBlock {
    generation: u32,
    covered: Box<[u64; BLOCK_WORDS]>,
    /// An instruction from the previous block ends inside this one
    spill_from_previous: bool,
}

impl CodeBlock {
    fn new() -> Self {
        Self {
            generation: 0,
            covered: Box::new([0; BLOCK_WORDS]),
            spill_from_previous: false,
        }
    }

    fn mark(&mut self, offset: u32) {
        self.covered[(offset / 64) as usize] |= 1 << (offset % 64);
    }

    fn is_covered(&self, offset: u32) -> bool {
        self.covered[(offset / 64) as usize] & (1 << (offset % 64)) != 0
    }

    /// Start a new generation with nothing covered
    fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.covered.fill(0);
        self.spill_from_previous = false;
    }
}

#[inline]
fn split(addr: u32) -> (u32, u32) {
    (addr >> BLOCK_SHIFT, addr & ((1 << BLOCK_SHIFT) - 1))
}

pub struct InstructionCache {
    enabled: bool,
    entries: HashMap<u32, CacheEntry>,
    blocks: HashMap<u32, CodeBlock>,
    stats: CacheStats,
}

impl InstructionCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
            blocks: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached instruction at `addr`, if still valid
    pub fn lookup(&mut self, addr: u32) -> Option<Rc<Instruction>> {
        if !self.enabled {
            self.stats.misses += 1;
            return None;
        }
        let (block, _) = split(addr);
        let current = self.blocks.get(&block).map(|b| b.generation);
        match self.entries.get(&addr) {
            Some(entry) if Some(entry.generation) == current => {
                self.stats.hits += 1;
                Some(Rc::clone(&entry.insn))
            }
            Some(_) => {
                self.entries.remove(&addr);
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Record a freshly decoded instruction and return the shared handle.
    ///
    /// `byte_addr(i)` is the linear address of the instruction's i-th byte.
    /// It differs from `addr + i` when the offset wraps inside the code
    /// segment.
    pub fn insert(
        &mut self,
        addr: u32,
        insn: Instruction,
        byte_addr: impl Fn(u32) -> u32,
    ) -> Rc<Instruction> {
        let insn = Rc::new(insn);
        if !self.enabled {
            return insn;
        }

        let (first_block, _) = split(addr);
        for i in 0..insn.length as u32 {
            let (block, offset) = split(byte_addr(i));
            let entry = self.blocks.entry(block).or_insert_with(CodeBlock::new);
            entry.mark(offset);
            if block != first_block {
                entry.spill_from_previous = true;
            }
        }

        let generation = self.blocks.get(&first_block).map_or(0, |b| b.generation);
        self.entries.insert(
            addr,
            CacheEntry {
                insn: Rc::clone(&insn),
                generation,
            },
        );
        insn
    }

    /// Invalidate blocks whose decoded bytes overlap `[addr, addr + len)`.
    ///
    /// Returns true when something was invalidated.
    pub fn notify_write(&mut self, addr: u32, len: u8) -> bool {
        if self.blocks.is_empty() {
            return false;
        }
        let mut hit = false;
        let mut last_bumped = None;
        for i in 0..len.max(1) as u32 {
            let (block, offset) = split(addr.wrapping_add(i));
            if last_bumped == Some(block) {
                continue;
            }
            let Some(code) = self.blocks.get_mut(&block) else {
                continue;
            };
            if !code.is_covered(offset) {
                continue;
            }
            let spill = code.spill_from_previous;
            code.invalidate();
            self.stats.invalidations += 1;
            last_bumped = Some(block);
            hit = true;

            if spill {
                if let Some(previous) = self.blocks.get_mut(&block.wrapping_sub(1)) {
                    previous.invalidate();
                    self.stats.invalidations += 1;
                }
            }
        }
        hit
    }

    /// Drop every entry and all coverage tracking
    pub fn clear(&mut self) {
        self.entries.clear();
        self.blocks.clear();
    }
}
