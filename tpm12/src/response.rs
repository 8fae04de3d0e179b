//! TPM 1.2 Response Parser

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use zeroize::Zeroize;

use crate::codec::Reader;
use crate::drivers::tis::HEADER_SIZE;
use crate::error::{Result, TpmError, TPM_SUCCESS};

/// Largest response this driver will accept.
pub const TPM_RSP_SIZE_MAX: usize = 768;

/// Response tags
pub const TPM_TAG_RSP_COMMAND: u16 = 0x00C4;
pub const TPM_TAG_RSP_AUTH1_COMMAND: u16 = 0x00C5;
pub const TPM_TAG_RSP_AUTH2_COMMAND: u16 = 0x00C6;

/// tag ‖ paramSize ‖ returnCode
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ResponseHeader {
    pub tag: U16<BigEndian>,
    pub size: U32<BigEndian>,
    pub return_code: U32<BigEndian>,
}

/// Receive buffer for one response. Responses carry unsealed secrets and
/// random bytes, so the buffer is wiped on drop.
pub struct ResponseBuffer {
    buf: [u8; TPM_RSP_SIZE_MAX],
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; TPM_RSP_SIZE_MAX],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Interpret the first `len` bytes as a response.
    pub fn parse(&self, len: usize) -> Result<Response<'_>> {
        Response::parse(self.buf.get(..len).ok_or(TpmError::Protocol)?)
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Zeroize for ResponseBuffer {
    fn zeroize(&mut self) {
        self.buf.zeroize();
    }
}

impl Drop for ResponseBuffer {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// A received response.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    header: ResponseHeader,
    body: &'a [u8],
}

impl<'a> Response<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = ResponseHeader::read_from_prefix(bytes).ok_or(TpmError::Protocol)?;
        if (header.size.get() as usize) < HEADER_SIZE {
            return Err(TpmError::Protocol);
        }
        Ok(Self {
            header,
            body: &bytes[HEADER_SIZE..],
        })
    }

    pub fn tag(&self) -> u16 {
        self.header.tag.get()
    }

    pub fn return_code(&self) -> u32 {
        self.header.return_code.get()
    }

    pub fn is_success(&self) -> bool {
        self.return_code() == TPM_SUCCESS
    }

    /// Everything after the header.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    pub fn params(&self) -> Reader<'a> {
        Reader::new(self.body)
    }
}
