// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mapping of render requests onto destination memory.

use crate::decoder::BufferLock;
use crate::decoder::DecodeError;
use crate::decoder::Result;
use crate::decoder::Surface;
use crate::PixelFormat;
use crate::Rect;
use crate::Region;

/// Works out where in `destination` a render request lands.
///
/// `requested` is relative to the wanted area of the surface; `None` stands for the whole wanted
/// area. Returns `Ok(None)` when the request lies entirely outside the visible area, in which case
/// there is nothing to decode.
pub fn project(destination: &dyn Surface, requested: Option<Rect>) -> Result<Option<Rect>> {
    if destination.format() != PixelFormat::NV12 {
        return Err(DecodeError::UnsupportedFormat);
    }

    let area = destination.area();

    let rect = match requested {
        Some(rect) => {
            if rect.width < 1 || rect.height < 1 {
                return Err(DecodeError::InvalidArgument("rectangle must not be empty"));
            }

            Rect::new(
                rect.x.saturating_add(area.wanted.x),
                rect.y.saturating_add(area.wanted.y),
                rect.width,
                rect.height,
            )
        }
        None => area.wanted,
    };

    let clip = Region::from(area.current);

    Ok(rect.intersect(&clip))
}

/// Destination addresses programmed into the JPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneAddresses {
    /// Physical address of the first luma sample of the target rectangle.
    pub luma: u32,
    /// Physical address of the corresponding chroma sample pair.
    pub chroma: u32,
    pub pitch: u32,
}

impl PlaneAddresses {
    /// Computes the plane addresses of `rect` in a locked NV12 buffer whose luma plane is
    /// `surface_height` lines high.
    pub fn new(lock: &BufferLock, rect: &Rect, surface_height: u32) -> Result<Self> {
        let x = u32::try_from(rect.x)
            .map_err(|_| DecodeError::InvalidArgument("negative target x"))?;
        let y = u32::try_from(rect.y)
            .map_err(|_| DecodeError::InvalidArgument("negative target y"))?;

        let overflow = DecodeError::InvalidArgument("target address out of range");

        let luma = y
            .checked_mul(lock.pitch)
            .and_then(|offset| offset.checked_add(x))
            .and_then(|offset| lock.phys.checked_add(offset))
            .ok_or(overflow)?;
        let chroma = lock
            .pitch
            .checked_mul(surface_height)
            .and_then(|plane| luma.checked_add(plane))
            .ok_or(DecodeError::InvalidArgument("chroma plane out of range"))?;

        Ok(Self {
            luma,
            chroma,
            pitch: lock.pitch,
        })
    }
}
