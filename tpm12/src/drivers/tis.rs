//! TPM 1.2 TIS (TPM Interface Specification) Driver
//!
//! Locality arbitration and the FIFO command/response protocol. Every wait is
//! a bounded poll (see [`crate::timeout`]); a locality acquired for a command
//! is always released before [`TisDriver::transmit`] returns, on success and
//! on every failure path.

use bitflags::bitflags;

use super::TisBus;
use crate::error::{Result, TpmError};
use crate::timeout::{poll, TimeoutBudgets, Wait};

/// TIS Register Offsets (relative to the locality window)
pub const TIS_ACCESS: u32 = 0x00;
pub const TIS_STS: u32 = 0x18;
pub const TIS_DATA_FIFO: u32 = 0x24;
pub const TIS_DID_VID: u32 = 0xF00;

/// Number of hardware localities.
pub const NR_LOCALITIES: u8 = 5;

/// Size of the tag/size/code header shared by commands and responses.
pub const HEADER_SIZE: usize = 10;
/// The response size field is complete once this many bytes are in.
const RSP_SIZE_END: usize = 6;

bitflags! {
    /// ACCESS register (1 byte)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const TPM_ESTABLISHMENT = 1 << 0;
        const REQUEST_USE       = 1 << 1;
        const PENDING_REQUEST   = 1 << 2;
        const SEIZE             = 1 << 3;
        const BEEN_SEIZED       = 1 << 4;
        const ACTIVE_LOCALITY   = 1 << 5;
        const TPM_REG_VALID_STS = 1 << 7;
    }
}

bitflags! {
    /// Low byte of the STS register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const RESPONSE_RETRY = 1 << 1;
        const EXPECT         = 1 << 3;
        const DATA_AVAIL     = 1 << 4;
        const TPM_GO         = 1 << 5;
        const COMMAND_READY  = 1 << 6;
        const STS_VALID      = 1 << 7;
    }
}

/// Decoded STS register: flags byte followed by a little-endian burst count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub flags: StatusFlags,
    pub burst_count: u16,
}

impl Status {
    pub fn from_bytes(raw: [u8; 3]) -> Self {
        Self {
            flags: StatusFlags::from_bits_retain(raw[0]),
            burst_count: u16::from_le_bytes([raw[1], raw[2]]),
        }
    }

    fn data_ready(&self) -> bool {
        self.flags
            .contains(StatusFlags::STS_VALID | StatusFlags::DATA_AVAIL)
    }
}

/// Hardware locality, 0 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locality(u8);

impl Locality {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const TWO: Self = Self(2);
    pub const THREE: Self = Self(3);
    pub const FOUR: Self = Self(4);

    pub const fn new(index: u8) -> Option<Self> {
        if index < NR_LOCALITIES {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// The TPM_LOCALITY_SELECTION bit naming this locality.
    pub const fn selection(self) -> LocalitySelection {
        LocalitySelection::from_bits_retain(1 << self.0)
    }
}

impl TryFrom<u32> for Locality {
    type Error = TpmError;

    fn try_from(value: u32) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .and_then(Locality::new)
            .ok_or(TpmError::BadParameter)
    }
}

bitflags! {
    /// TPM_LOCALITY_SELECTION. Bits 5..7 are reserved and must be clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocalitySelection: u8 {
        const ZERO  = 1 << 0;
        const ONE   = 1 << 1;
        const TWO   = 1 << 2;
        const THREE = 1 << 3;
        const FOUR  = 1 << 4;
    }
}

impl LocalitySelection {
    pub const RESERVED: u8 = 0xE0;

    /// Parse a raw selection byte, rejecting reserved bits.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::from_bits(raw).ok_or(TpmError::BadParameter)
    }
}

/// Where the driver is in the command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalityState {
    Idle,
    RequestingUse,
    Active,
    AwaitingCommandReady,
    CommandReady,
    Executing,
    AwaitingResponse,
    ResponseReady,
}

pub struct TisDriver<B: TisBus> {
    bus: B,
    budgets: TimeoutBudgets,
    state: LocalityState,
}

impl<B: TisBus> TisDriver<B> {
    pub fn new(bus: B, budgets: TimeoutBudgets) -> Self {
        Self {
            bus,
            budgets,
            state: LocalityState::Idle,
        }
    }

    /// Check for a device behind `bus`: DID_VID must be neither 0 nor all-ones.
    pub fn probe(bus: B, budgets: TimeoutBudgets) -> Option<Self> {
        let mut driver = Self::new(bus, budgets);
        let did_vid = driver.did_vid();
        if did_vid == 0xFFFF_FFFF || did_vid == 0 {
            return None;
        }
        log::info!(
            "TPM: vendor 0x{:04X}, device 0x{:04X}",
            did_vid & 0xFFFF,
            did_vid >> 16
        );
        Some(driver)
    }

    pub fn did_vid(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        self.bus.read(Locality::ZERO, TIS_DID_VID, &mut raw);
        u32::from_le_bytes(raw)
    }

    pub fn state(&self) -> LocalityState {
        self.state
    }

    pub fn budgets(&self) -> &TimeoutBudgets {
        &self.budgets
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn access(&mut self, locality: Locality) -> Access {
        let mut raw = [0u8; 1];
        self.bus.read(locality, TIS_ACCESS, &mut raw);
        Access::from_bits_retain(raw[0])
    }

    fn write_access(&mut self, locality: Locality, access: Access) {
        self.bus.write(locality, TIS_ACCESS, &[access.bits()]);
    }

    pub fn status(&mut self, locality: Locality) -> Status {
        let mut raw = [0u8; 3];
        self.bus.read(locality, TIS_STS, &mut raw);
        Status::from_bytes(raw)
    }

    fn write_status(&mut self, locality: Locality, flags: StatusFlags) {
        self.bus.write(locality, TIS_STS, &[flags.bits()]);
    }

    /// Wait until the locality's register set is valid and not being seized.
    pub fn validate_locality(&mut self, locality: Locality) -> Result<()> {
        let budget = self.budgets.validate_locality;
        poll(Wait::ValidateLocality, budget, || {
            let access = self.access(locality);
            (access.contains(Access::TPM_REG_VALID_STS) && !access.contains(Access::SEIZE))
                .then_some(())
        })
    }

    /// Request use of `locality` and wait for it to become active.
    ///
    /// The returned guard releases the locality when dropped.
    pub fn request_locality(&mut self, locality: Locality) -> Result<ActiveLocality<'_, B>> {
        self.state = LocalityState::RequestingUse;
        self.write_access(locality, Access::REQUEST_USE);

        let budget = self.budgets.locality_active;
        let granted = poll(Wait::LocalityActive, budget, || {
            self.access(locality)
                .contains(Access::ACTIVE_LOCALITY)
                .then_some(())
        });
        // The request may still be pending in hardware; relinquish either way.
        let active = ActiveLocality {
            driver: self,
            locality,
        };
        granted?;
        active.driver.state = LocalityState::Active;
        Ok(active)
    }

    /// Relinquish `locality`.
    ///
    /// Idempotent: an inactive locality returns immediately. A release that
    /// does not complete within the locality budget is logged and reported as
    /// `false`, never as an error.
    pub fn release_locality(&mut self, locality: Locality) -> bool {
        self.state = LocalityState::Idle;
        if !self.access(locality).contains(Access::ACTIVE_LOCALITY) {
            return true;
        }

        log::trace!("TPM: releasing locality {}", locality.index());
        self.write_access(locality, Access::ACTIVE_LOCALITY);

        let budget = self.budgets.locality_active;
        for _ in 0..budget {
            if !self.access(locality).contains(Access::ACTIVE_LOCALITY) {
                return true;
            }
            core::hint::spin_loop();
        }
        log::error!(
            "TPM: timeout waiting for {} of locality {}",
            Wait::LocalityRelease,
            locality.index()
        );
        false
    }

    /// Run one command through the FIFO at `locality`.
    ///
    /// Returns the number of response bytes stored in `rsp`, which is the
    /// declared response size capped at `rsp.len()`. Excess response bytes are
    /// drained from the FIFO and dropped.
    pub fn transmit(&mut self, locality: Locality, cmd: &[u8], rsp: &mut [u8]) -> Result<usize> {
        if cmd.len() < HEADER_SIZE || rsp.len() < HEADER_SIZE {
            return Err(TpmError::BadParameter);
        }

        self.validate_locality(locality)?;

        log::trace!("TPM: cmd header {:02X?}", &cmd[..HEADER_SIZE]);

        let mut active = self.request_locality(locality)?;
        active.wait_command_ready()?;
        active.write_command(cmd)?;
        active.execute()?;
        let len = active.read_response(rsp)?;
        active.finish();

        log::trace!("TPM: rsp header {:02X?}", &rsp[..HEADER_SIZE]);
        Ok(len)
    }
}

/// A locality held for the duration of one command. Dropping it relinquishes
/// the locality.
pub struct ActiveLocality<'a, B: TisBus> {
    driver: &'a mut TisDriver<B>,
    locality: Locality,
}

impl<B: TisBus> ActiveLocality<'_, B> {
    pub fn locality(&self) -> Locality {
        self.locality
    }

    fn burst_count(&mut self, wait: Wait) -> Result<usize> {
        let locality = self.locality;
        let budget = self.driver.budgets.budget(wait);
        let driver = &mut *self.driver;
        poll(wait, budget, || {
            let burst = driver.status(locality).burst_count;
            (burst > 0).then_some(usize::from(burst))
        })
    }

    /// Ask the TPM to enter Ready, rewriting the request on every poll.
    pub fn wait_command_ready(&mut self) -> Result<()> {
        let locality = self.locality;
        let budget = self.driver.budgets.command_ready;
        let driver = &mut *self.driver;
        driver.state = LocalityState::AwaitingCommandReady;
        poll(Wait::CommandReady, budget, || {
            driver.write_status(locality, StatusFlags::COMMAND_READY);
            driver
                .status(locality)
                .flags
                .contains(StatusFlags::COMMAND_READY)
                .then_some(())
        })?;
        self.driver.state = LocalityState::CommandReady;
        Ok(())
    }

    /// Feed `cmd` into the FIFO, paced by the burst count.
    pub fn write_command(&mut self, cmd: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < cmd.len() {
            let burst = self.burst_count(Wait::CommandWrite)?;
            let end = cmd.len().min(offset + burst);
            for byte in &cmd[offset..end] {
                self.driver
                    .bus
                    .write(self.locality, TIS_DATA_FIFO, core::slice::from_ref(byte));
            }
            offset = end;
        }
        Ok(())
    }

    /// Start execution and wait for the response to become available.
    pub fn execute(&mut self) -> Result<()> {
        let locality = self.locality;
        self.driver.write_status(locality, StatusFlags::TPM_GO);
        self.driver.state = LocalityState::Executing;

        let budget = self.driver.budgets.data_available;
        let driver = &mut *self.driver;
        driver.state = LocalityState::AwaitingResponse;
        poll(Wait::DataAvailable, budget, || {
            driver.status(locality).data_ready().then_some(())
        })?;
        self.driver.state = LocalityState::ResponseReady;
        Ok(())
    }

    /// Drain the response from the FIFO into `rsp`.
    pub fn read_response(&mut self, rsp: &mut [u8]) -> Result<usize> {
        if rsp.len() < HEADER_SIZE {
            return Err(TpmError::BadParameter);
        }
        let mut offset = 0usize;
        let mut rsp_size = 0usize;
        let mut discarded = 0usize;

        while offset < HEADER_SIZE || offset < rsp_size {
            let mut burst = self.burst_count(Wait::ResponseRead)?;
            while burst > 0 && (offset < HEADER_SIZE || offset < rsp_size) {
                let mut byte = 0u8;
                self.driver.bus.read(
                    self.locality,
                    TIS_DATA_FIFO,
                    core::slice::from_mut(&mut byte),
                );
                match rsp.get_mut(offset) {
                    Some(slot) => *slot = byte,
                    None => discarded += 1,
                }
                offset += 1;
                burst -= 1;

                if offset == RSP_SIZE_END {
                    let mut size = [0u8; 4];
                    size.copy_from_slice(&rsp[2..RSP_SIZE_END]);
                    rsp_size = u32::from_be_bytes(size) as usize;
                }
            }
        }

        if rsp_size < HEADER_SIZE {
            log::error!("TPM: response declares {} bytes", rsp_size);
            return Err(TpmError::Protocol);
        }
        if discarded > 0 {
            log::warn!(
                "TPM: response of {} bytes truncated, {} discarded",
                rsp_size,
                discarded
            );
        }
        Ok(rsp_size.min(rsp.len()))
    }

    /// Return the TPM to Ready after a completed response.
    fn finish(&mut self) {
        self.driver
            .write_status(self.locality, StatusFlags::COMMAND_READY);
    }
}

impl<B: TisBus> Drop for ActiveLocality<'_, B> {
    fn drop(&mut self) {
        self.driver.release_locality(self.locality);
    }
}
