//! Platform Configuration Registers
//!
//! PCR read, extend and reset, plus the selection bitmap and composite hash
//! used to bind sealed data to a set of register values.

use crate::codec::{self, Digest, Marshal, Reader, Sink, Unmarshal, DIGEST_SIZE};
use crate::commands::{CommandBuffer, Ordinal, Tag};
use crate::drivers::{Locality, TisBus};
use crate::error::{Result, TpmError};
use crate::response::ResponseBuffer;
use crate::Tpm;

/// Number of PCRs on a TPM 1.2.
pub const NR_PCRS: u32 = 24;
/// Bytes in a full PCR selection bitmap.
pub const PCR_SELECT_SIZE: usize = (NR_PCRS / 8) as usize;

/// TPM_PCR_SELECTION with a fixed 3-byte bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcrSelection {
    select: [u8; PCR_SELECT_SIZE],
}

impl PcrSelection {
    /// Marshalled size: sizeOfSelect + bitmap.
    pub const SIZE: usize = 2 + PCR_SELECT_SIZE;

    pub fn from_indices(indices: &[u8]) -> Result<Self> {
        let mut selection = Self::default();
        for &index in indices {
            selection.insert(u32::from(index))?;
        }
        Ok(selection)
    }

    pub fn insert(&mut self, index: u32) -> Result<()> {
        if index >= NR_PCRS {
            return Err(TpmError::BadParameter);
        }
        self.select[(index / 8) as usize] |= 1 << (index % 8);
        Ok(())
    }

    pub fn contains(&self, index: u32) -> bool {
        index < NR_PCRS && self.select[(index / 8) as usize] & (1 << (index % 8)) != 0
    }

    pub fn bitmap(&self) -> &[u8; PCR_SELECT_SIZE] {
        &self.select
    }

    pub fn len(&self) -> usize {
        self.select.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.select == [0; PCR_SELECT_SIZE]
    }
}

impl Marshal for PcrSelection {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        (PCR_SELECT_SIZE as u16).marshal(sink)?;
        sink.put(&self.select)
    }
}

impl Unmarshal for PcrSelection {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
        let size: u16 = reader.read()?;
        if usize::from(size) != PCR_SELECT_SIZE {
            return Err(TpmError::Protocol);
        }
        let mut select = [0u8; PCR_SELECT_SIZE];
        select.copy_from_slice(reader.take(PCR_SELECT_SIZE)?);
        Ok(Self { select })
    }
}

/// TPM_COMPOSITE_HASH over `values`.
///
/// Values are hashed in ascending register order, which is the order the TPM
/// uses, whatever order the caller lists them in. Duplicate or out-of-range
/// indices are rejected. An empty set yields the all-zero digest.
pub fn composite_digest(values: &[(u8, Digest)]) -> Result<(PcrSelection, Digest)> {
    let mut slots = [None::<Digest>; NR_PCRS as usize];
    let mut selection = PcrSelection::default();
    for (index, value) in values {
        let slot = slots
            .get_mut(usize::from(*index))
            .ok_or(TpmError::BadParameter)?;
        if slot.replace(*value).is_some() {
            return Err(TpmError::BadParameter);
        }
        selection.insert(u32::from(*index))?;
    }
    if selection.is_empty() {
        return Ok((selection, Digest::ZERO));
    }

    let mut state = codec::sha1_state();
    selection.marshal(&mut state)?;
    ((selection.len() * DIGEST_SIZE) as u32).marshal(&mut state)?;
    for value in slots.iter().flatten() {
        value.marshal(&mut state)?;
    }
    Ok((selection, codec::sha1_finish(state)))
}

impl<B: TisBus> Tpm<B> {
    /// TPM_PCRRead
    pub fn pcr_read(&mut self, locality: Locality, pcr: u32) -> Result<Digest> {
        if pcr >= NR_PCRS {
            return Err(TpmError::BadParameter);
        }
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::PcrRead);
        cmd.push(&pcr)?;

        let mut rsp = ResponseBuffer::new();
        let value = self.submit(locality, &mut cmd, &mut rsp)?.params().read()?;
        log::debug!("TPM: PCR{} = {:?}", pcr, value);
        Ok(value)
    }

    /// TPM_Extend. Returns the new register value.
    pub fn pcr_extend(&mut self, locality: Locality, pcr: u32, digest: &Digest) -> Result<Digest> {
        if pcr >= NR_PCRS {
            return Err(TpmError::BadParameter);
        }
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::PcrExtend);
        cmd.push(&pcr)?.push(digest)?;

        let mut rsp = ResponseBuffer::new();
        let value = self.submit(locality, &mut cmd, &mut rsp)?.params().read()?;
        log::debug!("TPM: extended PCR{} with {:?}", pcr, digest);
        Ok(value)
    }

    /// TPM_PCR_Reset on a single register from the resettable range.
    pub fn pcr_reset(&mut self, locality: Locality, pcr: u32) -> Result<()> {
        if pcr >= NR_PCRS || !self.config().resettable_pcrs.contains(&pcr) {
            log::error!("TPM: PCR{} is not resettable", pcr);
            return Err(TpmError::BadParameter);
        }
        let mut selection = PcrSelection::default();
        selection.insert(pcr)?;

        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::PcrReset);
        cmd.push(&selection)?;

        let mut rsp = ResponseBuffer::new();
        self.submit(locality, &mut cmd, &mut rsp)?;
        log::debug!("TPM: reset PCR{}", pcr);
        Ok(())
    }
}
