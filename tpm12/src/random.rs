//! TPM Random Number Generator

use crate::commands::{CommandBuffer, Ordinal, Tag};
use crate::drivers::{Locality, TisBus};
use crate::error::{Result, TpmError};
use crate::response::{ResponseBuffer, TPM_RSP_SIZE_MAX};
use crate::Tpm;

/// Most bytes one TPM_GetRandom response can carry.
pub const TPM_RANDOM_MAX: usize = TPM_RSP_SIZE_MAX - 10 - 4;

/// A short reply is retried once for the missing bytes.
const MAX_ATTEMPTS: usize = 2;

impl<B: TisBus> Tpm<B> {
    /// Fill `out` from TPM_GetRandom.
    ///
    /// The TPM may return fewer bytes than asked. The shortfall is requested
    /// exactly once more; if that also comes back short, the count actually
    /// obtained is returned.
    pub fn get_random(&mut self, locality: Locality, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() || out.len() > TPM_RANDOM_MAX {
            return Err(TpmError::BadParameter);
        }

        let mut filled = 0;
        for attempt in 0..MAX_ATTEMPTS {
            let wanted = out.len() - filled;
            let got = self.get_random_once(locality, &mut out[filled..])?;
            filled += got;
            if filled == out.len() {
                break;
            }
            log::warn!(
                "TPM: GetRandom returned {} of {} bytes (attempt {})",
                got,
                wanted,
                attempt + 1
            );
        }
        Ok(filled)
    }

    fn get_random_once(&mut self, locality: Locality, out: &mut [u8]) -> Result<usize> {
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::GetRandom);
        cmd.push(&(out.len() as u32))?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();
        let size = params.read::<u32>()? as usize;
        if size > out.len() {
            log::error!("TPM: GetRandom returned {} bytes, asked {}", size, out.len());
            return Err(TpmError::Protocol);
        }
        out[..size].copy_from_slice(params.take(size)?);
        Ok(size)
    }
}
