use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Memory-mapped random-access stream reader.
///
/// Cloning is cheap (the mapping is shared) and gives the clone an
/// independent cursor, so many enumerators can read the same segment file
/// concurrently without reopening it.
#[derive(Clone)]
pub struct IndexInput {
    data: Arc<Mmap>,
    pos: usize,
}

impl IndexInput {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let data = unsafe { Mmap::map(&file)? };
        Ok(Self {
            data: Arc::new(data),
            pos: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos as usize;
    }

    #[inline]
    pub fn skip(&mut self, n: u64) {
        self.pos += n as usize;
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(Error::CorruptIndex(format!(
                "unexpected end of stream: need {} bytes at position {}, length {}",
                n,
                self.pos,
                self.data.len()
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a variable-length u32.
    pub fn read_vint(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            if shift >= 32 {
                return Err(Error::CorruptIndex("vInt overflow".to_string()));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read a variable-length u64.
    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            if shift >= 64 {
                return Err(Error::CorruptIndex("vLong overflow".to_string()));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let src = self.take(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Length-prefixed byte string (vInt length + bytes).
    pub fn read_string(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vint()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// CRC32 over `[0, end)`, computed without moving the cursor.
    pub fn checksum_of(&self, end: u64) -> Result<u32> {
        let end = end as usize;
        if end > self.data.len() {
            return Err(Error::CorruptIndex(
                "checksum range exceeds stream length".to_string(),
            ));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..end]);
        Ok(hasher.finalize())
    }
}
