// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interrupt driven JPEG decoding on the JPU.
//!
//! A decode is a single blocking call. The compressed stream is fed through the reload ring while
//! the JPU writes NV12 data straight into the destination. Between interrupts the calling thread
//! sleeps in [`JpuBackend::wait_interrupt`], which gives about the same throughput as busy polling
//! for half the CPU load.

use std::sync::Arc;
use std::sync::Mutex;

use crate::backend::JpegInterrupts;
use crate::backend::JpuBackend;
use crate::backend::JpuCommand;
use crate::backend::JpuMode;
use crate::backend::Register;
use crate::backend::JIFCNT_VJSEL_JPU;
use crate::backend::JIFDCNT_RELOAD_ENABLE;
use crate::backend::JIFDCNT_SWAP_4321;
use crate::backend::JIFECNT_SWAP_4321;
use crate::decoder::reload::ReloadRing;
use crate::decoder::ChromaSubsampling;
use crate::decoder::DecodeError;
use crate::decoder::DecodeSession;
use crate::decoder::DecodeStatus;
use crate::decoder::FailureReason;
use crate::decoder::ImageInfo;
use crate::decoder::JpuOptions;
use crate::decoder::LockAccess;
use crate::decoder::Result;
use crate::decoder::SessionState;
use crate::decoder::SurfaceLock;
use crate::geometry::PlaneAddresses;
use crate::source::DataSource;
use crate::Resolution;

/// A JPU that may be shared between image providers. Only one of them can decode at a time.
pub type SharedJpu<B> = Arc<Mutex<Jpu<B>>>;

/// Interrupt sources enabled for a decode. INS10 to INS12 are enabled but carry nothing the
/// decoder acts on.
fn enabled_interrupts() -> JpegInterrupts {
    JpegInterrupts::HEADER
        | JpegInterrupts::ERROR
        | JpegInterrupts::DONE
        | JpegInterrupts::INS10
        | JpegInterrupts::INS11
        | JpegInterrupts::INS12
        | JpegInterrupts::RELOAD
}

/// Owner of a JPU backend. Holding a `&mut Jpu` is what allows a decode session to run.
pub struct Jpu<B: JpuBackend> {
    backend: B,
    options: JpuOptions,
}

impl<B: JpuBackend> Jpu<B> {
    pub fn new(backend: B, options: JpuOptions) -> Self {
        Self { backend, options }
    }

    pub fn into_shared(self) -> SharedJpu<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decodes the JPEG stream read from `source` into the destination of `session`.
    ///
    /// The destination is locked for the duration of the decode and unlocked on every exit path.
    /// On error nothing useful has been written to it.
    ///
    /// A session decodes a single image: passing one that already ran is an error and leaves it
    /// untouched.
    pub fn decode<S: DataSource + ?Sized>(
        &mut self,
        session: &mut DecodeSession<'_>,
        source: &mut S,
    ) -> Result<()> {
        if session.state.status != DecodeStatus::Idle {
            return Err(DecodeError::InvalidArgument("session was already used"));
        }

        let result = self.decode_inner(session, source);

        if let Err(e) = &result {
            session.state.status = DecodeStatus::Failed(FailureReason::from(e));
            log::debug!("decode failed: {}", e);
        }

        result
    }

    fn decode_inner<S: DataSource + ?Sized>(
        &mut self,
        session: &mut DecodeSession<'_>,
        source: &mut S,
    ) -> Result<()> {
        let ring = ReloadRing::new(
            self.backend.reload_phys(),
            self.backend.reload_memory().len(),
            self.options.pad_short_reads,
        )?;

        log::debug!("loading...");
        session.state.status = DecodeStatus::Loading;
        ring.prime(
            self.backend.reload_memory(),
            &mut session.state.reload,
            source,
        )?;

        let surface_height = session.destination.size().height;
        let lock = SurfaceLock::new(&mut *session.destination, LockAccess::GpuWrite)?;
        let planes = PlaneAddresses::new(&lock.buffer(), &session.target, surface_height)?;

        log::debug!("setting...");
        self.program(&ring, &planes);

        log::debug!("starting...");
        self.backend.interrupts().clear();
        self.command(JpuCommand::START);
        self.command(JpuCommand::READ_RESTART);
        session.state.status = DecodeStatus::Decoding;

        let result = self.run(&ring, &mut session.state, source);

        drop(lock);

        result
    }

    fn command(&mut self, cmd: JpuCommand) {
        self.backend.write_reg(Register::Jccmd, cmd.bits());
    }

    /// Programs the JPU from reset for decoding from the reload ring into `planes`.
    fn program(&mut self, ring: &ReloadRing, planes: &PlaneAddresses) {
        self.command(JpuCommand::RESET);

        let regs = [
            (Register::Jcmod, (JpuMode::INPUT_CTRL | JpuMode::DSP_DECODE).bits()),
            (Register::Jinte, enabled_interrupts().bits()),
            (Register::Jifcnt, JIFCNT_VJSEL_JPU),
            (Register::Jifecnt, JIFECNT_SWAP_4321),
            (Register::Jifdcnt, JIFDCNT_RELOAD_ENABLE | JIFDCNT_SWAP_4321),
            (Register::Jifdsa1, ring.slot_phys(0)),
            (Register::Jifdsa2, ring.slot_phys(1)),
            (Register::Jifddrsz, ring.slot_size()),
            (Register::Jifddmw, planes.pitch),
            (Register::Jifddya1, planes.luma),
            (Register::Jifddca1, planes.chroma),
        ];

        for (reg, value) in regs {
            self.backend.write_reg(reg, value);
        }
    }

    /// Reads the image parameters the JPU found in the header.
    fn image_info(&self) -> ImageInfo {
        let mode = JpuMode::from_bits_retain(self.backend.read_reg(Register::Jcmod));
        let subsampling = ChromaSubsampling::n((mode & JpuMode::SUBSAMPLING_420).bits())
            .unwrap_or(ChromaSubsampling::Yuv422);

        ImageInfo {
            resolution: Resolution {
                width: self.backend.read_reg(Register::Jifddhsz),
                height: self.backend.read_reg(Register::Jifddvsz),
            },
            subsampling,
        }
    }

    /// Services interrupts until the JPU is done or fails.
    fn run<S: DataSource + ?Sized>(
        &mut self,
        ring: &ReloadRing,
        state: &mut SessionState,
        source: &mut S,
    ) -> Result<()> {
        loop {
            let ints = self.backend.interrupts().take();

            if ints.is_empty() {
                log::trace!("waiting...");

                if let Err(e) = self.backend.wait_interrupt(self.options.wait_timeout) {
                    log::error!(
                        "waiting for JPEG interrupt failed: {} (JINTS {:#010x}, JCSTS {:#010x})",
                        e,
                        self.backend.read_reg(Register::Jints),
                        self.backend.read_reg(Register::Jcsts)
                    );
                    return Err(e.into());
                }

                continue;
            }

            log::debug!(
                "JCSTS {:#010x}, JINTS {:#010x}",
                self.backend.read_reg(Register::Jcsts),
                ints.bits()
            );

            if ints.contains(JpegInterrupts::ERROR) {
                let detail = self.backend.read_reg(Register::Jcderr);
                log::error!("JPU error {:#x}", detail);
                return Err(DecodeError::Device { detail });
            }

            if ints.contains(JpegInterrupts::DONE) {
                log::debug!("done");
                state.status = DecodeStatus::Done;
                return Ok(());
            }

            if ints.contains(JpegInterrupts::HEADER) {
                state.status = DecodeStatus::HeaderPending;

                let info = self.image_info();
                match state.info {
                    None => {
                        log::debug!(
                            "{}x{} ({:?})",
                            info.resolution.width,
                            info.resolution.height,
                            info.subsampling
                        );
                        state.info = Some(info);
                    }
                    Some(known) if known != info => {
                        log::warn!("ignoring second header {:?}, keeping {:?}", info, known)
                    }
                    Some(_) => (),
                }

                self.command(JpuCommand::RESTART | JpuCommand::END);
                state.status = DecodeStatus::Decoding;
            }

            if ints.contains(JpegInterrupts::RELOAD) {
                log::trace!("reloading...");

                let refilled = ring.refill_if_due(
                    self.backend.reload_memory(),
                    &mut state.reload,
                    source,
                )?;
                if refilled {
                    log::trace!("refilled reload ring");
                }

                self.command(JpuCommand::READ_RESTART);
            }
        }
    }
}
