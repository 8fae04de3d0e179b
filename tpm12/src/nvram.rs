//! TPM Non-Volatile Storage

use crate::commands::{CommandBuffer, Ordinal, Tag, TPM_CMD_SIZE_MAX};
use crate::drivers::{Locality, TisBus};
use crate::error::{Result, TpmError};
use crate::response::{ResponseBuffer, TPM_RSP_SIZE_MAX};
use crate::Tpm;

/// TPM_NV_INDEX
pub type NvIndex = u32;

/// Response header plus the dataSize field.
pub const TPM_NV_READ_VALUE_DATA_SIZE_MAX: usize = TPM_RSP_SIZE_MAX - 14;
/// Command header plus nvIndex, offset and dataSize.
pub const TPM_NV_WRITE_VALUE_DATA_SIZE_MAX: usize = TPM_CMD_SIZE_MAX - 22;

impl<B: TisBus> Tpm<B> {
    /// TPM_NV_ReadValue of up to `data.len()` bytes at `offset`.
    ///
    /// Requests larger than one response can carry are capped. Returns the
    /// number of bytes read.
    pub fn nv_read_value(
        &mut self,
        locality: Locality,
        index: NvIndex,
        offset: u32,
        data: &mut [u8],
    ) -> Result<usize> {
        if data.is_empty() {
            return Err(TpmError::BadParameter);
        }
        let wanted = data.len().min(TPM_NV_READ_VALUE_DATA_SIZE_MAX);

        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::NvReadValue);
        cmd.push(&index)?.push(&offset)?.push(&(wanted as u32))?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self
            .submit(locality, &mut cmd, &mut rsp)
            .map_err(|err| {
                log::warn!("TPM: read nv index {:08x} offset {:08x}: {}", index, offset, err);
                err
            })?
            .params();
        if params.is_empty() {
            return Ok(0);
        }
        let size = (params.read::<u32>()? as usize)
            .min(params.remaining())
            .min(wanted);
        data[..size].copy_from_slice(params.take(size)?);
        log::trace!("TPM: read {} bytes of nv index {:08x}", size, index);
        Ok(size)
    }

    /// TPM_NV_WriteValue of `data` at `offset`.
    pub fn nv_write_value(
        &mut self,
        locality: Locality,
        index: NvIndex,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() || data.len() > TPM_NV_WRITE_VALUE_DATA_SIZE_MAX {
            return Err(TpmError::BadParameter);
        }

        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::NvWriteValue);
        cmd.push(&index)?
            .push(&offset)?
            .push(&(data.len() as u32))?
            .push(data)?;

        let mut rsp = ResponseBuffer::new();
        self.submit(locality, &mut cmd, &mut rsp).map_err(|err| {
            log::warn!(
                "TPM: write nv {:08x}, offset {:08x}, {} bytes: {}",
                index,
                offset,
                data.len(),
                err
            );
            err
        })?;
        Ok(())
    }

    /// Read a whole NV index into `out` in `nv_read_segment`-sized chunks.
    ///
    /// Returns the index size. Fails with `NoSpace` if `out` is smaller.
    pub fn nv_read_index(&mut self, locality: Locality, index: NvIndex, out: &mut [u8]) -> Result<usize> {
        let size = self.get_nvindex_size(locality, index)? as usize;
        if size > out.len() {
            log::error!(
                "TPM: nv index {:08x} holds {} bytes, buffer has {}",
                index,
                size,
                out.len()
            );
            return Err(TpmError::NoSpace);
        }

        let segment = self
            .config()
            .nv_read_segment
            .clamp(1, TPM_NV_READ_VALUE_DATA_SIZE_MAX);
        let mut offset = 0;
        while offset < size {
            let end = size.min(offset + segment);
            let got = self.nv_read_value(locality, index, offset as u32, &mut out[offset..end])?;
            if got == 0 {
                log::error!("TPM: nv index {:08x} read stalled at {}", index, offset);
                return Err(TpmError::Protocol);
            }
            offset += got;
        }
        Ok(size)
    }
}
