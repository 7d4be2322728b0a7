// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The two-slot reload ring the JPU reads compressed data from.
//!
//! The JPU raises a reload interrupt each time it is done with a slot. Both slots are refilled
//! together once every two reload interrupts, which keeps the ring in step with the JPU as long as
//! it consumes the slots in order.

use crate::decoder::DecodeError;
use crate::source::read_into;
use crate::source::read_padded;
use crate::source::DataSource;
use crate::source::SourceError;

const SLOTS: u8 = 2;

/// Counts reload interrupts until the ring must be refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadCadence {
    remaining: u8,
}

impl Default for ReloadCadence {
    fn default() -> Self {
        Self { remaining: SLOTS }
    }
}

impl ReloadCadence {
    /// Reload interrupts left before the next refill, in `1..=2`.
    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    fn reset(&mut self) {
        self.remaining = SLOTS;
    }

    /// Accounts for one reload interrupt. Returns `true` when both slots have been consumed.
    fn consume(&mut self) -> bool {
        self.remaining -= 1;
        if self.remaining == 0 {
            self.reset();
            true
        } else {
            false
        }
    }
}

/// Geometry of the reload ring. The memory itself belongs to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadRing {
    phys: u32,
    slot_size: u32,
    pad_short_reads: bool,
}

impl ReloadRing {
    /// Creates the ring for `memory_len` bytes of reload memory at physical address `phys`.
    pub fn new(phys: u32, memory_len: usize, pad_short_reads: bool) -> Result<Self, DecodeError> {
        if memory_len == 0 || memory_len % 2 != 0 {
            return Err(DecodeError::InvalidArgument(
                "reload memory must hold two equal slots",
            ));
        }
        let slot_size = u32::try_from(memory_len / 2)
            .map_err(|_| DecodeError::InvalidArgument("reload slot too large"))?;
        slot_size
            .checked_mul(2)
            .and_then(|len| phys.checked_add(len - 1))
            .ok_or(DecodeError::InvalidArgument("reload memory crosses the address space"))?;

        Ok(Self {
            phys,
            slot_size,
            pad_short_reads,
        })
    }

    /// Physical address of `slot` (0 or 1).
    pub fn slot_phys(&self, slot: usize) -> u32 {
        self.phys + self.slot_size * (slot as u32)
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    fn fill<S: DataSource + ?Sized>(
        &self,
        memory: &mut [u8],
        source: &mut S,
    ) -> Result<(), SourceError> {
        for slot in memory.chunks_exact_mut(self.slot_size as usize).take(SLOTS as usize) {
            if self.pad_short_reads {
                let got = read_padded(source, slot)?;
                if got < slot.len() {
                    log::debug!("end of stream, padded {} bytes", slot.len() - got);
                }
            } else {
                read_into(source, slot)?;
            }
        }

        Ok(())
    }

    /// Fills both slots before the decode starts.
    pub fn prime<S: DataSource + ?Sized>(
        &self,
        memory: &mut [u8],
        cadence: &mut ReloadCadence,
        source: &mut S,
    ) -> Result<(), SourceError> {
        self.fill(memory, source)?;
        cadence.reset();

        Ok(())
    }

    /// Accounts for one reload interrupt, refilling both slots when they have both been consumed.
    /// Returns whether a refill happened.
    pub fn refill_if_due<S: DataSource + ?Sized>(
        &self,
        memory: &mut [u8],
        cadence: &mut ReloadCadence,
        source: &mut S,
    ) -> Result<bool, SourceError> {
        if !cadence.consume() {
            return Ok(false);
        }

        self.fill(memory, source)?;

        Ok(true)
    }
}
