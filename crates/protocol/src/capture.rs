//! Session capture files: the server-to-client byte stream, one chunk per
//! transport delivery, so a session can be replayed with its original
//! buffer boundaries.

use std::io::{ErrorKind, Read, Write};

use crate::error::CaptureError;

const MAGIC: &[u8; 8] = b"WVCAP001";

/// Largest single delivery a capture may hold.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

pub struct CaptureWriter<W: Write> {
    inner: W,
    chunks: usize,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(mut inner: W) -> Result<Self, CaptureError> {
        inner.write_all(MAGIC)?;
        Ok(Self { inner, chunks: 0 })
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if data.len() > MAX_CHUNK_SIZE {
            return Err(CaptureError::ChunkTooLarge {
                size: data.len(),
                max: MAX_CHUNK_SIZE,
            });
        }
        self.inner.write_all(&(data.len() as u32).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.chunks += 1;
        Ok(())
    }

    pub fn chunks_written(&self) -> usize {
        self.chunks
    }

    pub fn finish(mut self) -> Result<W, CaptureError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct CaptureReader<R: Read> {
    inner: R,
}

impl<R: Read> CaptureReader<R> {
    pub fn new(mut inner: R) -> Result<Self, CaptureError> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => CaptureError::BadMagic,
            _ => CaptureError::Io(e),
        })?;
        if &magic != MAGIC {
            return Err(CaptureError::BadMagic);
        }
        Ok(Self { inner })
    }

    /// Next delivery, or `None` at a clean end of file.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_CHUNK_SIZE {
            return Err(CaptureError::ChunkTooLarge {
                size: len,
                max: MAX_CHUNK_SIZE,
            });
        }
        let mut data = vec![0u8; len];
        self.inner.read_exact(&mut data)?;
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<Vec<u8>, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
