//! TPM 1.2 Command Builder
//!
//! Commands are assembled into a fixed 768-byte buffer owned by the caller's
//! stack frame. The header is written last, once the size is known.

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use zeroize::Zeroize;

use crate::codec::{Marshal, Sink};
use crate::drivers::tis::HEADER_SIZE;
use crate::error::{Result, TpmError};

/// Largest command this driver will build.
pub const TPM_CMD_SIZE_MAX: usize = 768;

/// TPM 1.2 command tags
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// No authorization
    RquCommand = 0x00C1,
    /// One authorization trailer
    RquAuth1Command = 0x00C2,
    /// Two authorization trailers
    RquAuth2Command = 0x00C3,
}

/// TPM 1.2 ordinals used by the driver
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    Oiap = 0x0000_000A,
    Osap = 0x0000_000B,
    PcrExtend = 0x0000_0014,
    PcrRead = 0x0000_0015,
    Seal = 0x0000_0017,
    Unseal = 0x0000_0018,
    GetRandom = 0x0000_0046,
    GetCapability = 0x0000_0065,
    SaveState = 0x0000_0098,
    FlushSpecific = 0x0000_00BA,
    PcrReset = 0x0000_00C8,
    NvWriteValue = 0x0000_00CD,
    NvReadValue = 0x0000_00CF,
}

impl Marshal for Ordinal {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        (*self as u32).marshal(sink)
    }
}

/// tag ‖ paramSize ‖ ordinal
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct CommandHeader {
    pub tag: U16<BigEndian>,
    pub size: U32<BigEndian>,
    pub ordinal: U32<BigEndian>,
}

/// One command under construction. Wiped on drop, since authorized
/// commands carry encrypted usage secrets and NV payloads.
pub struct CommandBuffer {
    tag: Tag,
    ordinal: Ordinal,
    buf: [u8; TPM_CMD_SIZE_MAX],
    len: usize,
}

impl CommandBuffer {
    pub fn new(tag: Tag, ordinal: Ordinal) -> Self {
        Self {
            tag,
            ordinal,
            buf: [0; TPM_CMD_SIZE_MAX],
            len: HEADER_SIZE,
        }
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    /// Append a marshallable value.
    pub fn push<T: Marshal + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        value.marshal(self)?;
        Ok(self)
    }

    /// Bytes written after the header so far.
    pub fn args(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..self.len]
    }

    /// Write the header and return the complete command.
    pub fn finalize(&mut self) -> &[u8] {
        let header = CommandHeader {
            tag: U16::new(self.tag as u16),
            size: U32::new(self.len as u32),
            ordinal: U32::new(self.ordinal as u32),
        };
        self.buf[..HEADER_SIZE].copy_from_slice(header.as_bytes());
        &self.buf[..self.len]
    }
}

impl Zeroize for CommandBuffer {
    fn zeroize(&mut self) {
        self.buf.zeroize();
        self.len = HEADER_SIZE;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Sink for CommandBuffer {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.len + bytes.len();
        if end > TPM_CMD_SIZE_MAX {
            log::error!(
                "TPM: {:?} command exceeds {} bytes",
                self.ordinal,
                TPM_CMD_SIZE_MAX
            );
            return Err(TpmError::BadParameter);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}
