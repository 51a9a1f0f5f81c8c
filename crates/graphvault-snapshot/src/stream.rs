//! Version-prefixed item framing
//!
//! Every item payload stored in a snapshot is prefixed with a
//! fixed-width little-endian `u32` serialization version. The backup
//! reader prepends it before any payload byte; the restore reader
//! verifies and strips it, tolerating short reads from the underlying
//! stream so the header never truncates at a read boundary.

use std::io::{self, Read};

use crate::SnapshotError;

/// Current item serialization version.
pub const SERIALIZATION_VERSION: u32 = 1;

/// Width of the version prefix in bytes.
pub const VERSION_SIZE: usize = 4;

/// Reader that emits a version header followed by the inner payload.
pub struct BackupStreamReader<R> {
    header: [u8; VERSION_SIZE],
    header_offset: usize,
    inner: R,
}

impl<R: Read> BackupStreamReader<R> {
    pub fn new(version: u32, inner: R) -> Self {
        Self {
            header: version.to_le_bytes(),
            header_offset: 0,
            inner,
        }
    }
}

impl<R: Read> Read for BackupStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return self.inner.read(buf);
        }

        let mut written = 0;
        while self.header_offset < VERSION_SIZE && written < buf.len() {
            buf[written] = self.header[self.header_offset];
            self.header_offset += 1;
            written += 1;
        }

        if written == buf.len() {
            return Ok(written);
        }

        match self.inner.read(&mut buf[written..]) {
            Ok(n) => Ok(written + n),
            // Header bytes were already produced; report them now and
            // let the next call surface the payload error.
            Err(_) if written > 0 => Ok(written),
            Err(err) => Err(err),
        }
    }
}

/// Reader that verifies and strips the version header.
pub struct RestoreStreamReader<R> {
    expected_version: u32,
    header_checked: bool,
    inner: R,
}

impl<R: Read> RestoreStreamReader<R> {
    pub fn new(expected_version: u32, inner: R) -> Self {
        Self {
            expected_version,
            header_checked: false,
            inner,
        }
    }

    fn check_header(&mut self) -> io::Result<()> {
        let mut header = [0u8; VERSION_SIZE];
        let mut filled = 0;

        // The underlying reader may return fewer than four bytes at a
        // time; keep reading until the header is complete.
        while filled < VERSION_SIZE {
            let n = self.inner.read(&mut header[filled..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside the version header",
                ));
            }
            filled += n;
        }

        let found = u32::from_le_bytes(header);
        if found != self.expected_version {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                SnapshotError::VersionMismatch {
                    expected: self.expected_version,
                    found,
                },
            ));
        }

        self.header_checked = true;
        Ok(())
    }
}

impl<R: Read> Read for RestoreStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.header_checked {
            self.check_header()?;
        }
        self.inner.read(buf)
    }
}
