use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Buffered stream writer for one segment file.
///
/// Every byte written flows through a running CRC32 so the stream can be
/// sealed with a checksum footer. File pointers returned by
/// [`file_pointer`](IndexOutput::file_pointer) are logical positions from
/// the start of the file, independent of buffering.
pub struct IndexOutput {
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
    pos: u64,
}

impl IndexOutput {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            hasher: crc32fast::Hasher::new(),
            pos: 0,
        })
    }

    /// Logical position: number of bytes written so far.
    #[inline]
    pub fn file_pointer(&self) -> u64 {
        self.pos
    }

    /// CRC32 of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        WriteBytesExt::write_u8(self, value)?;
        Ok(())
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        WriteBytesExt::write_u32::<LittleEndian>(self, value)?;
        Ok(())
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        WriteBytesExt::write_u64::<LittleEndian>(self, value)?;
        Ok(())
    }

    /// Write a u32 as a variable-length integer.
    pub fn write_vint(&mut self, mut value: u32) -> Result<()> {
        loop {
            if value < 0x80 {
                self.write_u8(value as u8)?;
                return Ok(());
            }
            self.write_u8((value as u8) | 0x80)?;
            value >>= 7;
        }
    }

    /// Write a u64 as a variable-length integer.
    pub fn write_vlong(&mut self, mut value: u64) -> Result<()> {
        loop {
            if value < 0x80 {
                self.write_u8(value as u8)?;
                return Ok(());
            }
            self.write_u8((value as u8) | 0x80)?;
            value >>= 7;
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// Length-prefixed byte string (vInt length + bytes).
    pub fn write_string(&mut self, s: &[u8]) -> Result<()> {
        self.write_vint(s.len() as u32)?;
        self.write_bytes(s)
    }

    /// Flush buffered bytes to the OS and close the stream.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Write for IndexOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
