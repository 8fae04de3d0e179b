//! TPM capabilities, flags and lifecycle commands

use crate::codec::Reader;
use crate::commands::{CommandBuffer, Ordinal, Tag};
use crate::drivers::{Locality, TisBus};
use crate::error::{Result, TpmError};
use crate::nvram::NvIndex;
use crate::response::ResponseBuffer;
use crate::Tpm;

pub const TPM_CAP_FLAG: u32 = 0x0000_0004;
pub const TPM_CAP_NV_INDEX: u32 = 0x0000_0011;
pub const TPM_CAP_VERSION_VAL: u32 = 0x0000_001A;

pub const TPM_CAP_FLAG_PERMANENT: u32 = 0x0000_0108;
pub const TPM_CAP_FLAG_VOLATILE: u32 = 0x0000_0109;

/// Size of TPM_NV_DATA_PUBLIC for a 24-PCR TPM.
pub const NV_DATA_PUBLIC_SIZE: usize = 71;

/// TPM_CAP_VERSION_INFO, minus the vendor-specific tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u8,
    pub minor: u8,
    pub rev_major: u8,
    pub rev_minor: u8,
    pub spec_level: u16,
    pub errata_rev: u8,
    pub vendor_id: [u8; 4],
}

/// TPM_PERMANENT_FLAGS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermanentFlags {
    pub disable: bool,
    pub ownership: bool,
    pub deactivated: bool,
    pub read_pubek: bool,
    pub disable_owner_clear: bool,
    pub allow_maintenance: bool,
    pub physical_presence_lifetime_lock: bool,
    pub physical_presence_hw_enable: bool,
    pub physical_presence_cmd_enable: bool,
    pub cekp_used: bool,
    pub tpm_post: bool,
    pub tpm_post_lock: bool,
    pub fips: bool,
    pub operator: bool,
    pub enable_revoke_ek: bool,
    pub nv_locked: bool,
    pub read_srk_pub: bool,
    pub tpm_established: bool,
    pub maintenance_done: bool,
    pub disable_full_da_logic_info: bool,
}

impl PermanentFlags {
    /// Tag plus twenty flag bytes.
    pub const SIZE: usize = 22;

    fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let flag = |n: usize| raw[2 + n] != 0;
        Self {
            disable: flag(0),
            ownership: flag(1),
            deactivated: flag(2),
            read_pubek: flag(3),
            disable_owner_clear: flag(4),
            allow_maintenance: flag(5),
            physical_presence_lifetime_lock: flag(6),
            physical_presence_hw_enable: flag(7),
            physical_presence_cmd_enable: flag(8),
            cekp_used: flag(9),
            tpm_post: flag(10),
            tpm_post_lock: flag(11),
            fips: flag(12),
            operator: flag(13),
            enable_revoke_ek: flag(14),
            nv_locked: flag(15),
            read_srk_pub: flag(16),
            tpm_established: flag(17),
            maintenance_done: flag(18),
            disable_full_da_logic_info: flag(19),
        }
    }
}

/// TPM_STCLEAR_FLAGS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolatileFlags {
    pub deactivated: bool,
    pub disable_force_clear: bool,
    pub physical_presence: bool,
    pub physical_presence_lock: bool,
    pub global_lock: bool,
}

impl VolatileFlags {
    pub const SIZE: usize = 7;

    fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let flag = |n: usize| raw[2 + n] != 0;
        Self {
            deactivated: flag(0),
            disable_force_clear: flag(1),
            physical_presence: flag(2),
            physical_presence_lock: flag(3),
            global_lock: flag(4),
        }
    }
}

impl<B: TisBus> Tpm<B> {
    /// TPM_GetCapability. Copies the capability response into `resp` and
    /// returns its length.
    pub fn get_capability(
        &mut self,
        locality: Locality,
        cap_area: u32,
        sub_cap: &[u8],
        resp: &mut [u8],
    ) -> Result<usize> {
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::GetCapability);
        cmd.push(&cap_area)?
            .push(&(sub_cap.len() as u32))?
            .push(sub_cap)?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();
        let size = params.read::<u32>()? as usize;
        let Some(dst) = resp.get_mut(..size) else {
            log::error!("TPM: capability 0x{:X} response of {} bytes too large", cap_area, size);
            return Err(TpmError::Protocol);
        };
        dst.copy_from_slice(params.take(size)?);
        Ok(size)
    }

    pub fn get_version(&mut self, locality: Locality) -> Result<VersionInfo> {
        let mut raw = [0u8; 64];
        let len = self.get_capability(locality, TPM_CAP_VERSION_VAL, &[], &mut raw)?;

        let mut reader = Reader::new(&raw[..len]);
        let _tag: u16 = reader.read()?;
        let version = reader.take(4)?;
        let mut info = VersionInfo {
            major: version[0],
            minor: version[1],
            rev_major: version[2],
            rev_minor: version[3],
            spec_level: reader.read()?,
            errata_rev: reader.read()?,
            vendor_id: [0; 4],
        };
        info.vendor_id.copy_from_slice(reader.take(4)?);
        log::info!("TPM: version {}.{}", info.major, info.minor);
        Ok(info)
    }

    /// Read a TPM_CAP_FLAG structure into `flags`. Shorter answers are
    /// accepted, since older revisions have fewer permanent flags.
    fn get_flags(&mut self, locality: Locality, flag_id: u32, flags: &mut [u8]) -> Result<()> {
        self.get_capability(locality, TPM_CAP_FLAG, &flag_id.to_be_bytes(), flags)?;
        Ok(())
    }

    pub fn get_permanent_flags(&mut self, locality: Locality) -> Result<PermanentFlags> {
        let mut raw = [0u8; PermanentFlags::SIZE];
        self.get_flags(locality, TPM_CAP_FLAG_PERMANENT, &mut raw)?;
        Ok(PermanentFlags::from_bytes(&raw))
    }

    pub fn get_volatile_flags(&mut self, locality: Locality) -> Result<VolatileFlags> {
        let mut raw = [0u8; VolatileFlags::SIZE];
        self.get_flags(locality, TPM_CAP_FLAG_VOLATILE, &mut raw)?;
        Ok(VolatileFlags::from_bytes(&raw))
    }

    /// Declared data size of an NV index, from its TPM_NV_DATA_PUBLIC.
    pub fn get_nvindex_size(&mut self, locality: Locality, index: NvIndex) -> Result<u32> {
        let mut raw = [0u8; NV_DATA_PUBLIC_SIZE];
        let len = self.get_capability(locality, TPM_CAP_NV_INDEX, &index.to_be_bytes(), &mut raw)?;
        if len != NV_DATA_PUBLIC_SIZE {
            log::error!("TPM: nv index {:08x} public area is {} bytes", index, len);
            return Err(TpmError::Protocol);
        }
        let mut size = [0u8; 4];
        size.copy_from_slice(&raw[NV_DATA_PUBLIC_SIZE - 4..]);
        Ok(u32::from_be_bytes(size))
    }

    /// Whether the TPM can take commands at `locality`: the locality is valid
    /// and the TPM is neither disabled nor deactivated.
    pub fn is_ready(&mut self, locality: Locality) -> bool {
        if self.driver().validate_locality(locality).is_err() {
            log::error!("TPM: not available");
            return false;
        }

        let permanent = match self.get_permanent_flags(locality) {
            Ok(flags) => flags,
            Err(err) => {
                log::error!("TPM: cannot read permanent flags: {}", err);
                return false;
            }
        };
        if permanent.disable {
            log::error!("TPM: disabled");
            return false;
        }

        match self.get_volatile_flags(locality) {
            Ok(flags) if flags.deactivated => {
                log::error!("TPM: deactivated");
                return false;
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("TPM: cannot read volatile flags: {}", err);
                return false;
            }
        }

        log::info!("TPM: ready, nv_locked: {}", permanent.nv_locked);
        true
    }

    /// Make sure locality 0 is not left active before handing the platform on.
    pub fn prepare(&mut self) -> bool {
        self.release_locality(Locality::ZERO)
    }

    /// TPM_SaveState
    pub fn save_state(&mut self, locality: Locality) -> Result<()> {
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::SaveState);
        let mut rsp = ResponseBuffer::new();
        self.submit(locality, &mut cmd, &mut rsp)?;
        log::info!("TPM: state saved");
        Ok(())
    }
}
