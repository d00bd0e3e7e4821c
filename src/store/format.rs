//! Codec header and footer helpers.
//!
//! Every segment stream starts with `[magic][name][version]` and ends with
//! `[footer magic][crc32 as u64]`. The footer checksum covers everything
//! before it and is verified on demand, not on every read.

use crate::error::{Error, Result};
use crate::store::{IndexInput, IndexOutput};

pub const CODEC_MAGIC: u32 = 0x5354_5241;
pub const FOOTER_MAGIC: u32 = !CODEC_MAGIC;

/// Bytes occupied by a stream footer.
pub const FOOTER_LEN: u64 = 4 + 8;

pub fn write_header(out: &mut IndexOutput, name: &str, version: u32) -> Result<()> {
    out.write_u32(CODEC_MAGIC)?;
    out.write_string(name.as_bytes())?;
    out.write_u32(version)?;
    Ok(())
}

/// Verify the stream header and return the version found.
pub fn check_header(
    input: &mut IndexInput,
    name: &str,
    min_version: u32,
    max_version: u32,
) -> Result<u32> {
    let magic = input.read_u32()?;
    if magic != CODEC_MAGIC {
        return Err(Error::CorruptIndex(format!(
            "bad codec magic: expected {CODEC_MAGIC:#x}, got {magic:#x}"
        )));
    }
    let actual = input.read_string()?;
    if actual != name.as_bytes() {
        return Err(Error::CorruptIndex(format!(
            "codec name mismatch: expected {:?}, got {:?}",
            name,
            String::from_utf8_lossy(&actual)
        )));
    }
    let version = input.read_u32()?;
    if version < min_version || version > max_version {
        return Err(Error::CorruptIndex(format!(
            "unsupported {name} version {version} (supported {min_version}..={max_version})"
        )));
    }
    Ok(version)
}

/// Seal the stream with the footer magic and the running checksum.
pub fn write_footer(out: &mut IndexOutput) -> Result<()> {
    out.write_u32(FOOTER_MAGIC)?;
    let crc = out.checksum();
    out.write_u64(crc as u64)?;
    Ok(())
}

/// Recompute the body checksum and compare it against the footer.
///
/// The cursor of `input` is not preserved; callers pass a clone.
pub fn verify_footer(input: &mut IndexInput) -> Result<()> {
    let len = input.len();
    if len < FOOTER_LEN {
        return Err(Error::CorruptIndex(format!(
            "stream too short for footer: {len} bytes"
        )));
    }
    let body_end = len - FOOTER_LEN;
    input.seek(body_end);
    let magic = input.read_u32()?;
    if magic != FOOTER_MAGIC {
        return Err(Error::CorruptIndex(format!(
            "bad footer magic: expected {FOOTER_MAGIC:#x}, got {magic:#x}"
        )));
    }
    let stored = input.read_u64()?;
    // The footer magic participates in the checksum; the checksum field does not.
    let actual = input.checksum_of(body_end + 4)? as u64;
    if stored != actual {
        return Err(Error::CorruptIndex(format!(
            "checksum mismatch: stored {stored:#x}, actual {actual:#x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdr.bin");
        let mut out = IndexOutput::create(&path).unwrap();
        write_header(&mut out, "strata.test", 2).unwrap();
        write_footer(&mut out).unwrap();
        out.close().unwrap();

        let mut input = IndexInput::open(&path).unwrap();
        let version = check_header(&mut input, "strata.test", 1, 3).unwrap();
        assert_eq!(version, 2);
        verify_footer(&mut input.clone()).unwrap();
    }

    #[test]
    fn test_wrong_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdr.bin");
        let mut out = IndexOutput::create(&path).unwrap();
        write_header(&mut out, "strata.doc", 1).unwrap();
        out.close().unwrap();

        let mut input = IndexInput::open(&path).unwrap();
        assert!(check_header(&mut input, "strata.pos", 1, 1).is_err());
    }

    #[test]
    fn test_corrupted_body_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crc.bin");
        let mut out = IndexOutput::create(&path).unwrap();
        write_header(&mut out, "strata.test", 1).unwrap();
        out.write_u32(0xDEAD_BEEF).unwrap();
        write_footer(&mut out).unwrap();
        out.close().unwrap();

        // Flip one body byte.
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() - FOOTER_LEN as usize - 1;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut input = IndexInput::open(&path).unwrap();
        assert!(verify_footer(&mut input).is_err());
    }
}
