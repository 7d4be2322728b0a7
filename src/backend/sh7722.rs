// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend for the JPU of the SH7722, driven through the sh7722gfx kernel module.
//!
//! The kernel module owns the interrupt line and ORs the JPEG interrupt status into a word of its
//! shared area, which is mapped from the gfx device node. The register window and the reload
//! memory are mapped from `/dev/mem`.

use std::ffi::c_void;
use std::fs::File;
use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::epoll::Epoll;
use nix::sys::epoll::EpollCreateFlags;
use nix::sys::epoll::EpollEvent;
use nix::sys::epoll::EpollFlags;
use nix::sys::epoll::EpollTimeout;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;

use crate::backend::BackendError;
use crate::backend::InterruptMirror;
use crate::backend::JpuBackend;
use crate::backend::Register;
use crate::backend::WaitError;
use crate::backend::JPU_REGISTER_WINDOW;
use crate::backend::SH7722GFX_JPEG_RELOAD_SIZE;

const SH7722GFX_IOCTL_TYPE: u8 = b'U';
const SH7722GFX_IOCTL_WAIT_JPEG: u8 = 5;

nix::ioctl_none!(sh7722gfx_wait_jpeg, SH7722GFX_IOCTL_TYPE, SH7722GFX_IOCTL_WAIT_JPEG);

/// Where to find the pieces of the JPU.
#[derive(Debug, Clone)]
pub struct Sh7722Options {
    /// Device node of the sh7722gfx kernel module.
    pub gfx_device: PathBuf,
    /// Physical memory device used to map registers and reload memory.
    pub mem_device: PathBuf,
    /// Physical address of the JPU register window.
    pub mmio_base: u32,
    /// Size of the shared area mapped from `gfx_device`.
    pub shared_size: usize,
    /// Offset of the JPEG interrupt status word inside the shared area.
    pub shared_ints_offset: usize,
    /// Physical address of the reload memory reserved by the kernel module.
    pub reload_phys: u32,
    /// Size of one reload slot.
    pub reload_size: usize,
}

impl Default for Sh7722Options {
    fn default() -> Self {
        Self {
            gfx_device: PathBuf::from("/dev/sh7722gfx"),
            mem_device: PathBuf::from("/dev/mem"),
            mmio_base: 0xfea0_0000,
            shared_size: 4096,
            shared_ints_offset: 0x20,
            reload_phys: 0x0fe0_0000,
            reload_size: SH7722GFX_JPEG_RELOAD_SIZE,
        }
    }
}

/// A shared read/write mapping, unmapped on drop.
struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    fn new<F: AsFd>(
        fd: F,
        offset: u64,
        len: usize,
        what: &'static str,
    ) -> Result<Self, BackendError> {
        let length = NonZeroUsize::new(len).ok_or(BackendError::InvalidOption("empty mapping"))?;
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| BackendError::InvalidOption("mapping offset out of range"))?;

        // SAFETY: a fresh shared mapping that nothing else references. The kernel checks the
        // range against the device.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }
        .map_err(|errno| BackendError::Map { what, errno })?;

        Ok(Self { ptr, len })
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `len` describe a mapping created by `Mapping::new`, and no reference
        // into it outlives `self`.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            log::warn!("failed to unmap {} bytes: {}", self.len, e);
        }
    }
}

fn open(path: &Path, flags: i32) -> Result<File, BackendError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(flags)
        .open(path)
        .map_err(|source| BackendError::Open {
            path: path.display().to_string(),
            source,
        })
}

pub struct Sh7722Backend {
    gfx: File,
    mmio: Mapping,
    shared: Mapping,
    shared_ints_offset: usize,
    reload: Mapping,
    reload_phys: u32,
    /// Present when the kernel module supports polling for JPEG interrupts, which is what allows
    /// bounded waits.
    epoll: Option<Epoll>,
}

// SAFETY: the mappings are owned by the backend and only accessed through `&self`/`&mut self`.
unsafe impl Send for Sh7722Backend {}

impl Sh7722Backend {
    pub fn open(options: &Sh7722Options) -> Result<Self, BackendError> {
        if options.reload_size == 0 {
            return Err(BackendError::InvalidOption("reload_size must not be zero"));
        }
        if options.shared_ints_offset % std::mem::align_of::<InterruptMirror>() != 0
            || options.shared_ints_offset + std::mem::size_of::<InterruptMirror>()
                > options.shared_size
        {
            return Err(BackendError::InvalidOption(
                "shared_ints_offset must be an aligned word inside the shared area",
            ));
        }

        let gfx = open(&options.gfx_device, libc::O_CLOEXEC)?;
        let mem = open(&options.mem_device, libc::O_CLOEXEC | libc::O_SYNC)?;

        let shared = Mapping::new(&gfx, 0, options.shared_size, "shared area")?;
        let mmio = Mapping::new(
            &mem,
            u64::from(options.mmio_base),
            JPU_REGISTER_WINDOW,
            "JPU registers",
        )?;
        let reload = Mapping::new(
            &mem,
            u64::from(options.reload_phys),
            options.reload_size * 2,
            "reload memory",
        )?;

        let epoll = match Self::jpeg_poller(&gfx) {
            Ok(epoll) => Some(epoll),
            Err(Errno::EPERM) => {
                log::warn!("sh7722gfx does not support polling, waits will not time out");
                None
            }
            Err(errno) => {
                return Err(BackendError::Map {
                    what: "epoll",
                    errno,
                })
            }
        };

        log::debug!(
            "opened JPU: registers at {:#010x}, reload memory at {:#010x} (2x{} bytes)",
            options.mmio_base,
            options.reload_phys,
            options.reload_size
        );

        Ok(Self {
            gfx,
            mmio,
            shared,
            shared_ints_offset: options.shared_ints_offset,
            reload,
            reload_phys: options.reload_phys,
            epoll,
        })
    }

    fn jpeg_poller(gfx: &File) -> Result<Epoll, Errno> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        epoll.add(gfx.as_fd(), EpollEvent::new(EpollFlags::EPOLLIN, 0))?;
        Ok(epoll)
    }

    fn reg_ptr(&self, reg: Register) -> *mut u32 {
        // SAFETY: every register offset is inside `JPU_REGISTER_WINDOW`, which is the size of the
        // mapping, and is word aligned.
        unsafe { self.mmio.as_ptr().add(reg.offset()).cast() }
    }
}

impl JpuBackend for Sh7722Backend {
    fn read_reg(&self, reg: Register) -> u32 {
        // SAFETY: see `reg_ptr`.
        unsafe { self.reg_ptr(reg).read_volatile() }
    }

    fn write_reg(&mut self, reg: Register, value: u32) {
        // SAFETY: see `reg_ptr`.
        unsafe { self.reg_ptr(reg).write_volatile(value) }
    }

    fn interrupts(&self) -> &InterruptMirror {
        // SAFETY: the offset was checked to be aligned and inside the shared area when opening,
        // and the mapping lives as long as `self`. The kernel only ever updates the word
        // atomically.
        unsafe {
            &*self
                .shared
                .as_ptr()
                .add(self.shared_ints_offset)
                .cast::<InterruptMirror>()
        }
    }

    fn wait_interrupt(&mut self, timeout: Option<Duration>) -> Result<(), WaitError> {
        match (&self.epoll, timeout) {
            (Some(epoll), Some(timeout)) => {
                let timeout = EpollTimeout::try_from(timeout).unwrap_or(EpollTimeout::NONE);
                let mut events = [EpollEvent::empty()];
                match epoll.wait(&mut events, timeout)? {
                    0 => Err(WaitError::TimedOut),
                    _ => Ok(()),
                }
            }
            _ => {
                // SAFETY: the ioctl takes no argument and `gfx` is a valid open descriptor.
                unsafe { sh7722gfx_wait_jpeg(self.gfx.as_raw_fd()) }?;
                Ok(())
            }
        }
    }

    fn reload_memory(&mut self) -> &mut [u8] {
        // SAFETY: the reload mapping is `len` bytes long and exclusively borrowed through
        // `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.reload.as_ptr(), self.reload.len) }
    }

    fn reload_phys(&self) -> u32 {
        self.reload_phys
    }
}
