// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared code for JPU backends.
//!
//! A backend gives the decoder access to the JPU: its register window, the mirror of interrupt
//! status flags maintained by the interrupt handler, the DMA-visible reload memory and a way to
//! sleep until the next JPEG interrupt. The decoder itself never touches the hardware directly.

#[cfg(test)]
pub(crate) mod dummy;
#[cfg(feature = "sh7722")]
pub mod sh7722;

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bitflags::bitflags;
use nix::errno::Errno;
use thiserror::Error;

/// Default size of one reload slot, as reserved by the sh7722gfx kernel module.
pub const SH7722GFX_JPEG_RELOAD_SIZE: usize = 64 * 1024;

/// JPU registers used by the decoder, by offset from the start of the JPU register window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Register {
    /// Mode.
    Jcmod = 0x000,
    /// Command.
    Jccmd = 0x004,
    /// Status.
    Jcsts = 0x008,
    /// Interrupt enable.
    Jinte = 0x038,
    /// Interrupt status.
    Jints = 0x03c,
    /// Decode error detail.
    Jcderr = 0x040,
    /// Interface control.
    Jifcnt = 0x060,
    /// Encode interface control.
    Jifecnt = 0x070,
    /// Decode interface control.
    Jifdcnt = 0x0a0,
    /// Reload slot 1 source address.
    Jifdsa1 = 0x0a4,
    /// Reload slot 2 source address.
    Jifdsa2 = 0x0a8,
    /// Reload slot size.
    Jifddrsz = 0x0ac,
    /// Destination memory width (pitch).
    Jifddmw = 0x0b0,
    /// Decoded image height.
    Jifddvsz = 0x0b4,
    /// Decoded image width.
    Jifddhsz = 0x0b8,
    /// Destination luma address.
    Jifddya1 = 0x0bc,
    /// Destination chroma address.
    Jifddca1 = 0x0c0,
}

impl Register {
    pub const fn offset(self) -> usize {
        self as u32 as usize
    }
}

/// Size of the register window that covers every [`Register`].
pub const JPU_REGISTER_WINDOW: usize = 0x100;

bitflags! {
    /// Values written to [`Register::Jccmd`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JpuCommand: u32 {
        const START = 1 << 0;
        const RESTART = 1 << 1;
        const END = 1 << 2;
        const RESET = 1 << 7;
        const READ_RESTART = 1 << 10;
        const WRITE_RESTART = 1 << 11;
    }
}

bitflags! {
    /// Bits of [`Register::Jcmod`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JpuMode: u32 {
        /// Set by the JPU after header parsing when the image is 4:2:0, clear for 4:2:2.
        const SUBSAMPLING_420 = 1 << 1;
        const DSP_DECODE = 1 << 3;
        const INPUT_CTRL = 1 << 7;
    }
}

bitflags! {
    /// JPEG interrupt sources, as found in [`Register::Jints`] and in the shared mirror.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JpegInterrupts: u32 {
        /// The header has been parsed; image dimensions are available.
        const HEADER = 1 << 3;
        const ERROR = 1 << 5;
        const DONE = 1 << 6;
        const INS10 = 1 << 10;
        const INS11 = 1 << 11;
        const INS12 = 1 << 12;
        /// A reload slot has been consumed.
        const RELOAD = 1 << 14;
    }
}

/// [`Register::Jifcnt`]: route the interface to the JPU.
pub const JIFCNT_VJSEL_JPU: u32 = 0x0000_0002;
/// [`Register::Jifecnt`]: 32 bit byte swap.
pub const JIFECNT_SWAP_4321: u32 = 0x0000_0070;
/// [`Register::Jifdcnt`]: 32 bit byte swap.
pub const JIFDCNT_SWAP_4321: u32 = 0x0000_0007;
/// [`Register::Jifdcnt`]: read compressed data from the reload slots.
pub const JIFDCNT_RELOAD_ENABLE: u32 = 0x0001_0000;

/// Word shared with the interrupt handler, which ORs the JINTS bits of every JPEG interrupt into
/// it.
///
/// Bits are consumed with a single atomic swap, so an interrupt arriving while the decoder handles
/// a batch is never lost.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct InterruptMirror(AtomicU32);

impl InterruptMirror {
    /// Takes every pending interrupt bit, leaving the mirror empty.
    pub fn take(&self) -> JpegInterrupts {
        JpegInterrupts::from_bits_retain(self.0.swap(0, Ordering::AcqRel))
    }

    /// Discards all pending bits.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Marks `ints` as pending. This is what the interrupt handler does.
    pub fn raise(&self, ints: JpegInterrupts) {
        self.0.fetch_or(ints.bits(), Ordering::AcqRel);
    }

    /// Returns the pending bits without consuming them.
    #[cfg(test)]
    pub(crate) fn peek(&self) -> JpegInterrupts {
        JpegInterrupts::from_bits_retain(self.0.load(Ordering::Acquire))
    }
}

/// Error returned when waiting for a JPEG interrupt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait for JPEG interrupt was interrupted")]
    Interrupted,
    #[error("JPU device is gone")]
    DeviceGone,
    #[error("timed out waiting for JPEG interrupt")]
    TimedOut,
    #[error("wait for JPEG interrupt failed: {0}")]
    Os(Errno),
}

impl From<Errno> for WaitError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EINTR => WaitError::Interrupted,
            Errno::ENODEV | Errno::ENXIO | Errno::EBADF => WaitError::DeviceGone,
            Errno::ETIMEDOUT => WaitError::TimedOut,
            e => WaitError::Os(e),
        }
    }
}

/// Error returned when setting up a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to map {what}: {errno}")]
    Map { what: &'static str, errno: Errno },
    #[error("invalid backend option: {0}")]
    InvalidOption(&'static str),
}

/// Access to one JPU. A backend is owned by exactly one [`crate::decoder::jpeg::Jpu`], which makes
/// the register window and the reload memory exclusive to the decode session in flight.
pub trait JpuBackend {
    fn read_reg(&self, reg: Register) -> u32;

    fn write_reg(&mut self, reg: Register, value: u32);

    /// The interrupt status mirror maintained by the interrupt handler.
    fn interrupts(&self) -> &InterruptMirror;

    /// Blocks until the next JPEG interrupt arrives, or until `timeout` expires if given.
    ///
    /// Only interrupts arriving after the call wake it up: bits already in the mirror must be
    /// handled before waiting.
    ///
    /// The decoder checks the mirror and then waits, so an interrupt may land in between. The
    /// kernel side must count pending interrupts rather than only wake on new edges, otherwise
    /// such an interrupt is lost and the wait ends in a spurious timeout.
    fn wait_interrupt(&mut self, timeout: Option<Duration>) -> Result<(), WaitError>;

    /// CPU view of the reload memory, both slots back to back.
    fn reload_memory(&mut self) -> &mut [u8];

    /// Physical address of the start of the reload memory.
    fn reload_phys(&self) -> u32;
}
