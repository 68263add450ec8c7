// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register and device memory access.

use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// Access to device registers and internal RAM, keyed by BAR0-relative
/// address.
///
/// Implemented outside this crate by whatever owns the BAR mapping (and, on
/// a PF, the PTT windows).
pub trait RegisterIo: Send + Sync {
    /// Reads `data.len()` bytes starting at `addr`.
    fn read(&self, addr: u32, data: &mut [u8]) -> anyhow::Result<()>;
    /// Writes `data` starting at `addr`.
    fn write(&self, addr: u32, data: &[u8]) -> anyhow::Result<()>;
}

/// Reads a `T` from `addr`, reading at most `len` bytes and leaving the rest
/// zeroed.
pub(crate) fn read_region<T: IntoBytes + FromBytes>(
    io: &dyn RegisterIo,
    addr: u32,
    len: u32,
) -> anyhow::Result<T> {
    let mut value = T::new_zeroed();
    let bytes = value.as_mut_bytes();
    let len = bytes.len().min(len as usize);
    io.read(addr, &mut bytes[..len])?;
    Ok(value)
}

/// Zeroes `len` bytes at `addr`, bounded by the size of `T`.
pub(crate) fn zero_region<T: IntoBytes + FromBytes + Immutable>(
    io: &dyn RegisterIo,
    addr: u32,
    len: u32,
) -> anyhow::Result<()> {
    let value = T::new_zeroed();
    let bytes = value.as_bytes();
    let len = bytes.len().min(len as usize);
    io.write(addr, &bytes[..len])
}
