//! TPM Sealed Storage
//!
//! Seal binds a secret to the SRK and to a set of PCR values required at
//! release; Unseal gives it back only while those PCRs hold the same values.
//! Both use an OSAP session against the SRK, Unseal adds an OIAP session for
//! the blob itself. All well-known secrets are 20 zero bytes.

use crate::codec::{Digest, Marshal, Reader, Sink, Unmarshal, DIGEST_SIZE};
use crate::commands::{CommandBuffer, Ordinal, Tag, TPM_CMD_SIZE_MAX};
use crate::drivers::tis::HEADER_SIZE;
use crate::drivers::{Locality, LocalitySelection, TisBus};
use crate::error::{Result, TpmError};
use crate::pcr::{composite_digest, PcrSelection};
use crate::response::ResponseBuffer;
use crate::session::{
    in_param_digest, verify_response, AuthData, Authorization, ResponseTrailer, SRK_AUTH,
    TPM_ET_SRK, TPM_KH_SRK,
};
use crate::Tpm;

pub const TPM_TAG_PCR_INFO_LONG: u16 = 0x0006;
pub const TPM_TAG_STORED_DATA12: u16 = 0x0016;

/// Usage secret given to every blob this driver seals.
pub const BLOB_AUTH: AuthData = [0; DIGEST_SIZE];

/// Request trailer: handle ‖ nonceOdd ‖ continue ‖ authCode.
const AUTH_TRAILER_SIZE: usize = 4 + 20 + 1 + DIGEST_SIZE;

/// Largest payload that fits in one TPM_Seal command.
pub const TPM_SEAL_DATA_MAX: usize = TPM_CMD_SIZE_MAX
    - HEADER_SIZE
    - 4 // keyHandle
    - DIGEST_SIZE // encAuth
    - 4 // pcrInfoSize
    - PcrInfoLong::SIZE
    - 4 // inDataSize
    - AUTH_TRAILER_SIZE;

/// Largest blob that fits in one TPM_Unseal command next to the key handle
/// and two authorization trailers.
pub const TPM_UNSEAL_BLOB_MAX: usize =
    TPM_CMD_SIZE_MAX - HEADER_SIZE - 4 - 2 * AUTH_TRAILER_SIZE;

/// TPM_PCR_INFO_LONG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrInfoLong {
    pub locality_at_creation: LocalitySelection,
    pub locality_at_release: LocalitySelection,
    pub creation_pcr_selection: PcrSelection,
    pub release_pcr_selection: PcrSelection,
    pub digest_at_creation: Digest,
    pub digest_at_release: Digest,
}

impl PcrInfoLong {
    pub const SIZE: usize = 2 + 1 + 1 + 2 * PcrSelection::SIZE + 2 * DIGEST_SIZE;

    /// Binding info for a seal issued from `locality`. The creation digest is
    /// left zero for the TPM to fill in.
    pub fn for_seal(locality: Locality, req: &SealRequest<'_>) -> Result<Self> {
        let creation_pcr_selection = PcrSelection::from_indices(req.creation_pcrs)?;
        let (release_pcr_selection, digest_at_release) = composite_digest(req.release_pcrs)?;
        Ok(Self {
            locality_at_creation: locality.selection(),
            locality_at_release: req.release_localities,
            creation_pcr_selection,
            release_pcr_selection,
            digest_at_creation: Digest::ZERO,
            digest_at_release,
        })
    }
}

impl Marshal for PcrInfoLong {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        TPM_TAG_PCR_INFO_LONG.marshal(sink)?;
        self.locality_at_creation.bits().marshal(sink)?;
        self.locality_at_release.bits().marshal(sink)?;
        self.creation_pcr_selection.marshal(sink)?;
        self.release_pcr_selection.marshal(sink)?;
        self.digest_at_creation.marshal(sink)?;
        self.digest_at_release.marshal(sink)
    }
}

impl Unmarshal for PcrInfoLong {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
        if reader.read::<u16>()? != TPM_TAG_PCR_INFO_LONG {
            return Err(TpmError::Protocol);
        }
        Ok(Self {
            locality_at_creation: LocalitySelection::from_bits_retain(reader.read()?),
            locality_at_release: LocalitySelection::from_bits_retain(reader.read()?),
            creation_pcr_selection: reader.read()?,
            release_pcr_selection: reader.read()?,
            digest_at_creation: reader.read()?,
            digest_at_release: reader.read()?,
        })
    }
}

/// TPM_STORED_DATA12, borrowing its encrypted payload.
///
/// A zero sealInfoSize selects the short form, anything else the long form
/// carrying a [`PcrInfoLong`]. Encoding and decoding branch on the same rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealedBlob<'a> {
    Short {
        entity_type: u16,
        enc_data: &'a [u8],
    },
    Long {
        entity_type: u16,
        seal_info: PcrInfoLong,
        enc_data: &'a [u8],
    },
}

impl<'a> SealedBlob<'a> {
    /// tag ‖ et ‖ sealInfoSize
    pub const HEADER_SIZE: usize = 2 + 2 + 4;
    /// Short form with an empty payload.
    pub const SHORT_MIN: usize = Self::HEADER_SIZE + 4;
    /// Long form with an empty payload.
    pub const LONG_MIN: usize = Self::HEADER_SIZE + PcrInfoLong::SIZE + 4;

    /// Parse a complete blob. Every declared size must add up to exactly
    /// `bytes.len()`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let blob = Self::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(TpmError::Protocol);
        }
        Ok(blob)
    }

    /// Decode one blob from the front of `reader`.
    pub fn decode(reader: &mut Reader<'a>) -> Result<Self> {
        if reader.read::<u16>()? != TPM_TAG_STORED_DATA12 {
            return Err(TpmError::Protocol);
        }
        let entity_type: u16 = reader.read()?;
        let seal_info_size = reader.read::<u32>()? as usize;

        let seal_info = if seal_info_size == 0 {
            None
        } else {
            let mut info = Reader::new(reader.take(seal_info_size)?);
            let seal_info: PcrInfoLong = info.read()?;
            if !info.is_empty() {
                return Err(TpmError::Protocol);
            }
            Some(seal_info)
        };

        let enc_size = reader.read::<u32>()? as usize;
        let enc_data = reader.take(enc_size)?;

        Ok(match seal_info {
            None => Self::Short {
                entity_type,
                enc_data,
            },
            Some(seal_info) => Self::Long {
                entity_type,
                seal_info,
                enc_data,
            },
        })
    }

    pub fn entity_type(&self) -> u16 {
        match self {
            Self::Short { entity_type, .. } | Self::Long { entity_type, .. } => *entity_type,
        }
    }

    pub fn seal_info(&self) -> Option<&PcrInfoLong> {
        match self {
            Self::Short { .. } => None,
            Self::Long { seal_info, .. } => Some(seal_info),
        }
    }

    pub fn enc_data(&self) -> &'a [u8] {
        match self {
            Self::Short { enc_data, .. } | Self::Long { enc_data, .. } => *enc_data,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Short { enc_data, .. } => Self::SHORT_MIN + enc_data.len(),
            Self::Long { enc_data, .. } => Self::LONG_MIN + enc_data.len(),
        }
    }
}

impl Marshal for SealedBlob<'_> {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        TPM_TAG_STORED_DATA12.marshal(sink)?;
        self.entity_type().marshal(sink)?;
        match self.seal_info() {
            None => 0u32.marshal(sink)?,
            Some(info) => {
                (PcrInfoLong::SIZE as u32).marshal(sink)?;
                info.marshal(sink)?;
            }
        }
        (self.enc_data().len() as u32).marshal(sink)?;
        sink.put(self.enc_data())
    }
}

/// What to seal and what it is bound to.
#[derive(Debug, Clone, Copy)]
pub struct SealRequest<'a> {
    /// Localities allowed to unseal.
    pub release_localities: LocalitySelection,
    /// PCRs whose values at seal time are recorded in the blob.
    pub creation_pcrs: &'a [u8],
    /// PCRs and the values they must hold at unseal time.
    pub release_pcrs: &'a [(u8, Digest)],
    pub data: &'a [u8],
}

impl<B: TisBus> Tpm<B> {
    /// TPM_Seal under the SRK. Writes the blob to `out` and returns its size.
    pub fn seal(&mut self, locality: Locality, req: &SealRequest<'_>, out: &mut [u8]) -> Result<usize> {
        if req.data.is_empty()
            || req.data.len() > TPM_SEAL_DATA_MAX
            || out.len() < SealedBlob::LONG_MIN
            || req.release_localities.bits() & LocalitySelection::RESERVED != 0
        {
            log::error!("TPM: seal() bad parameter");
            return Err(TpmError::BadParameter);
        }
        let seal_info = PcrInfoLong::for_seal(locality, req).map_err(|err| {
            log::error!("TPM: seal() bad PCR selection");
            err
        })?;

        let osap = self.osap(locality, TPM_ET_SRK, TPM_KH_SRK, &SRK_AUTH)?;
        let nonce_odd = self.nonce(locality);
        let nonce_odd = self.or_abandon(locality, &[osap.handle], nonce_odd)?;
        let auth = Authorization::new(osap.handle, osap.nonce_even, nonce_odd, osap.shared_secret());
        let enc_auth = osap.encrypt_auth(&BLOB_AUTH);

        let cmd = seal_command(&enc_auth, &seal_info, req.data, &auth);
        let mut cmd = self.or_abandon(locality, &[osap.handle], cmd)?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();
        SealedBlob::decode(&mut params)?;
        let blob = params.consumed();
        let trailer: ResponseTrailer = params.read()?;
        verify_response(Ordinal::Seal, blob, &[&auth], &[trailer])?;

        let Some(dst) = out.get_mut(..blob.len()) else {
            log::error!("TPM: sealed blob of {} bytes does not fit", blob.len());
            return Err(TpmError::NoSpace);
        };
        dst.copy_from_slice(blob);
        log::debug!("TPM: sealed {} bytes into a {} byte blob", req.data.len(), blob.len());
        Ok(blob.len())
    }

    /// TPM_Unseal. Writes the secret to `secret` and returns its size.
    ///
    /// The blob is checked structurally, and against the command size, before
    /// the TPM is touched.
    pub fn unseal(&mut self, locality: Locality, blob: &[u8], secret: &mut [u8]) -> Result<usize> {
        if SealedBlob::parse(blob).is_err() {
            log::error!("TPM: unseal() blob invalid");
            return Err(TpmError::BadParameter);
        }
        if blob.len() > TPM_UNSEAL_BLOB_MAX {
            log::error!("TPM: unseal() blob of {} bytes exceeds one command", blob.len());
            return Err(TpmError::BadParameter);
        }

        let osap = self.osap(locality, TPM_ET_SRK, TPM_KH_SRK, &SRK_AUTH)?;
        let oiap = self.oiap(locality);
        let oiap = self.or_abandon(locality, &[osap.handle], oiap)?;
        let handles = [osap.handle, oiap.handle];

        let nonce_odd = self.nonce(locality);
        let parent_nonce = self.or_abandon(locality, &handles, nonce_odd)?;
        let nonce_odd = self.nonce(locality);
        let data_nonce = self.or_abandon(locality, &handles, nonce_odd)?;

        let parent = Authorization::new(osap.handle, osap.nonce_even, parent_nonce, osap.shared_secret());
        let data = Authorization::new(oiap.handle, oiap.nonce_even, data_nonce, &BLOB_AUTH);

        let cmd = unseal_command(blob, &parent, &data);
        let mut cmd = self.or_abandon(locality, &handles, cmd)?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();
        let size = params.read::<u32>()? as usize;
        let payload = params.take(size)?;
        let out_params = params.consumed();
        let parent_trailer: ResponseTrailer = params.read()?;
        let data_trailer: ResponseTrailer = params.read()?;
        verify_response(
            Ordinal::Unseal,
            out_params,
            &[&parent, &data],
            &[parent_trailer, data_trailer],
        )?;

        let Some(dst) = secret.get_mut(..size) else {
            log::error!("TPM: unsealed data of {} bytes does not fit", size);
            return Err(TpmError::NoSpace);
        };
        dst.copy_from_slice(payload);
        Ok(size)
    }
}

fn seal_command(
    enc_auth: &AuthData,
    seal_info: &PcrInfoLong,
    data: &[u8],
    auth: &Authorization<'_>,
) -> Result<CommandBuffer> {
    let mut cmd = CommandBuffer::new(Tag::RquAuth1Command, Ordinal::Seal);
    cmd.push(&TPM_KH_SRK)?
        .push(&enc_auth[..])?
        .push(&(PcrInfoLong::SIZE as u32))?
        .push(seal_info)?
        .push(&(data.len() as u32))?
        .push(data)?;
    // The key handle is not part of the authorized parameters.
    let in_digest = in_param_digest(Ordinal::Seal, &cmd.args()[4..]);
    cmd.push(&auth.trailer(&in_digest)?)?;
    Ok(cmd)
}

fn unseal_command(
    blob: &[u8],
    parent: &Authorization<'_>,
    data: &Authorization<'_>,
) -> Result<CommandBuffer> {
    let mut cmd = CommandBuffer::new(Tag::RquAuth2Command, Ordinal::Unseal);
    cmd.push(&TPM_KH_SRK)?.push(blob)?;
    let in_digest = in_param_digest(Ordinal::Unseal, blob);
    cmd.push(&parent.trailer(&in_digest)?)?
        .push(&data.trailer(&in_digest)?)?;
    Ok(cmd)
}

/// Check that `blob` was sealed while the listed PCRs held `creation`.
///
/// Recomputes the creation composite and compares it with the blob's
/// digestAtCreation. Short-form and malformed blobs never match.
pub fn cmp_creation_pcrs(creation: &[(u8, Digest)], blob: &[u8]) -> bool {
    let Ok(blob) = SealedBlob::parse(blob) else {
        log::error!("TPM: bad sealed blob");
        return false;
    };
    let Some(seal_info) = blob.seal_info() else {
        return false;
    };
    let Ok((_, composite)) = composite_digest(creation) else {
        return false;
    };
    if !composite.ct_eq(&seal_info.digest_at_creation) {
        log::warn!(
            "TPM: creation composite {:?} differs from blob's {:?}",
            composite,
            seal_info.digest_at_creation
        );
        return false;
    }
    true
}
