// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy JPU whose only purpose is to let the decoder run so we can test it
//! in isolation.
//!
//! The dummy plays back a script of interrupt batches, one per wait, and records every register
//! access, source read and surface lock into a shared journal so tests can check the ordering of
//! operations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::backend::InterruptMirror;
use crate::backend::JpegInterrupts;
use crate::backend::JpuBackend;
use crate::backend::JpuCommand;
use crate::backend::JpuMode;
use crate::backend::Register;
use crate::backend::WaitError;
use crate::decoder::BufferLock;
use crate::decoder::LockAccess;
use crate::decoder::Surface as SurfaceTrait;
use crate::decoder::SurfaceArea;
use crate::source::BufferSource;
use crate::source::DataSource;
use crate::source::SourceError;
use crate::PixelFormat;
use crate::Rect;
use crate::Resolution;

/// Physical address of the dummy reload memory.
pub(crate) const RELOAD_PHYS: u32 = 0x0c00_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Access {
    Read(Register),
    Write(Register, u32),
    Wait,
    SourceRead(usize),
    Lock,
    Unlock,
}

pub(crate) type Journal = Rc<RefCell<Vec<Access>>>;

pub(crate) fn journal() -> Journal {
    Default::default()
}

/// Returns the position of the first entry matching `pred`.
pub(crate) fn position(journal: &Journal, pred: impl Fn(&Access) -> bool) -> Option<usize> {
    journal.borrow().iter().position(pred)
}

/// Whether any register was read or written.
pub(crate) fn touched_registers(journal: &Journal) -> bool {
    position(journal, |a| matches!(a, Access::Read(_) | Access::Write(..))).is_some()
}

pub(crate) fn is_command(access: &Access, cmd: JpuCommand) -> bool {
    *access == Access::Write(Register::Jccmd, cmd.bits())
}

/// What happens on a call to `wait_interrupt`.
pub(crate) enum Step {
    /// Set `regs`, then raise `ints`.
    Raise {
        ints: JpegInterrupts,
        regs: Vec<(Register, u32)>,
    },
    Fail(WaitError),
}

impl Step {
    pub(crate) fn raise(ints: JpegInterrupts) -> Self {
        Step::Raise { ints, regs: vec![] }
    }

    pub(crate) fn header(width: u32, height: u32, is_420: bool) -> Self {
        let mut mode = JpuMode::INPUT_CTRL | JpuMode::DSP_DECODE;
        mode.set(JpuMode::SUBSAMPLING_420, is_420);

        Step::Raise {
            ints: JpegInterrupts::HEADER,
            regs: vec![
                (Register::Jifddhsz, width),
                (Register::Jifddvsz, height),
                (Register::Jcmod, mode.bits()),
            ],
        }
    }

    pub(crate) fn reload() -> Self {
        Self::raise(JpegInterrupts::RELOAD)
    }

    pub(crate) fn done() -> Self {
        Self::raise(JpegInterrupts::DONE)
    }

    pub(crate) fn error(detail: u32) -> Self {
        Step::Raise {
            ints: JpegInterrupts::ERROR,
            regs: vec![(Register::Jcderr, detail)],
        }
    }
}

/// Dummy JPU.
pub(crate) struct Backend {
    regs: HashMap<Register, u32>,
    mirror: InterruptMirror,
    memory: Vec<u8>,
    script: VecDeque<Step>,
    journal: Journal,
    /// Contents of each reload slot at the time the JPU reported it consumed.
    consumed: Vec<u8>,
    next_slot: usize,
    /// Timeout of the last wait.
    pub(crate) last_timeout: Option<Duration>,
}

impl Backend {
    pub(crate) fn new(slot_size: usize, script: Vec<Step>, journal: Journal) -> Self {
        Self {
            regs: Default::default(),
            mirror: Default::default(),
            memory: vec![0; slot_size * 2],
            script: script.into(),
            journal,
            consumed: vec![],
            next_slot: 0,
            last_timeout: None,
        }
    }

    pub(crate) fn reg(&self, reg: Register) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    /// Bytes the JPU consumed so far, in order.
    pub(crate) fn consumed(&self) -> &[u8] {
        &self.consumed
    }

    /// Raises `ints` immediately, as if the interrupt handler ran.
    pub(crate) fn raise_now(&self, ints: JpegInterrupts) {
        self.mirror.raise(ints);
    }

    fn consume_slot(&mut self) {
        let slot_size = self.memory.len() / 2;
        let start = self.next_slot * slot_size;
        self.consumed
            .extend_from_slice(&self.memory[start..start + slot_size]);
        self.next_slot ^= 1;
    }
}

impl JpuBackend for Backend {
    fn read_reg(&self, reg: Register) -> u32 {
        self.journal.borrow_mut().push(Access::Read(reg));
        self.reg(reg)
    }

    fn write_reg(&mut self, reg: Register, value: u32) {
        self.journal.borrow_mut().push(Access::Write(reg, value));
        if reg == Register::Jccmd && JpuCommand::from_bits_retain(value).contains(JpuCommand::RESET)
        {
            self.next_slot = 0;
        }
        self.regs.insert(reg, value);
    }

    fn interrupts(&self) -> &InterruptMirror {
        &self.mirror
    }

    fn wait_interrupt(&mut self, timeout: Option<Duration>) -> Result<(), WaitError> {
        self.journal.borrow_mut().push(Access::Wait);
        self.last_timeout = timeout;

        match self.script.pop_front() {
            Some(Step::Raise { ints, regs }) => {
                self.regs.extend(regs);
                if ints.contains(JpegInterrupts::RELOAD) {
                    self.consume_slot();
                }
                self.mirror.raise(ints);
                Ok(())
            }
            Some(Step::Fail(e)) => Err(e),
            // A stalled JPU never interrupts again.
            None => Err(WaitError::TimedOut),
        }
    }

    fn reload_memory(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn reload_phys(&self) -> u32 {
        RELOAD_PHYS
    }
}

/// Source that records its reads and can fail on demand.
pub(crate) struct Source {
    inner: BufferSource,
    journal: Journal,
    reads: usize,
    /// Index of the read that fails with an IO error.
    pub(crate) fail_on_read: Option<usize>,
}

impl Source {
    pub(crate) fn new(data: Vec<u8>, journal: Journal) -> Self {
        Self {
            inner: BufferSource::new(data),
            journal,
            reads: 0,
            fail_on_read: None,
        }
    }
}

impl DataSource for Source {
    fn get_data(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let read = self.reads;
        self.reads += 1;
        self.journal.borrow_mut().push(Access::SourceRead(buf.len()));

        if self.fail_on_read == Some(read) {
            return Err(
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "dummy failure").into(),
            );
        }

        self.inner.get_data(buf)
    }
}

/// Destination surface with a fake physical address.
pub(crate) struct Surface {
    pub(crate) format: PixelFormat,
    pub(crate) size: Resolution,
    pub(crate) area: SurfaceArea,
    pub(crate) phys: u32,
    pub(crate) pitch: u32,
    pub(crate) locked: bool,
    pub(crate) unlocks: usize,
    pub(crate) fail_lock: bool,
    journal: Journal,
}

impl Surface {
    pub(crate) fn nv12(width: u32, height: u32, journal: Journal) -> Self {
        let full = Rect::new(0, 0, width as i32, height as i32);
        Self {
            format: PixelFormat::NV12,
            size: Resolution::from((width, height)),
            area: SurfaceArea {
                wanted: full,
                current: full,
            },
            phys: 0x0d00_0000,
            pitch: width,
            locked: false,
            unlocks: 0,
            fail_lock: false,
            journal,
        }
    }
}

impl SurfaceTrait for Surface {
    fn format(&self) -> PixelFormat {
        self.format
    }

    fn size(&self) -> Resolution {
        self.size
    }

    fn area(&self) -> SurfaceArea {
        self.area
    }

    fn lock(&mut self, _access: LockAccess) -> anyhow::Result<BufferLock> {
        if self.fail_lock {
            anyhow::bail!("dummy surface refuses to be locked");
        }
        assert!(!self.locked, "surface locked twice");

        self.journal.borrow_mut().push(Access::Lock);
        self.locked = true;

        Ok(BufferLock {
            phys: self.phys,
            pitch: self.pitch,
        })
    }

    fn unlock(&mut self, _lock: BufferLock) {
        assert!(self.locked, "surface unlocked while not locked");

        self.journal.borrow_mut().push(Access::Unlock);
        self.locked = false;
        self.unlocks += 1;
    }
}
