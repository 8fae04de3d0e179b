//! TPM 1.2 support for measured launch
//!
//! Driver for a TIS-attached TPM 1.2. Provides APIs for:
//! - PCR Management (Read/Extend/Reset)
//! - NV storage (ReadValue/WriteValue)
//! - Random Number Generation
//! - Data Sealing/Unsealing bound to PCR values, over OIAP/OSAP sessions
//! - Capability and flag queries
//!
//! Every command takes `&mut Tpm`, so at most one command is in flight. Each
//! command acquires its locality, runs to completion and releases it.

#![cfg_attr(not(test), no_std)]

pub mod capability;
pub mod codec;
pub mod commands;
pub mod config;
pub mod drivers;
pub mod error;
pub mod nvram;
pub mod pcr;
pub mod random;
pub mod response;
pub mod seal;
pub mod session;
pub mod timeout;

pub use capability::{PermanentFlags, VersionInfo, VolatileFlags};
pub use codec::Digest;
pub use config::{config, configure, TpmConfig};
pub use drivers::{Locality, LocalitySelection, MmioBus, TisBus, TisDriver};
pub use error::{Result, TpmError};
pub use nvram::NvIndex;
pub use seal::{cmp_creation_pcrs, SealRequest, SealedBlob};

use commands::CommandBuffer;
use response::{Response, ResponseBuffer};
use spin::Mutex;

/// A TPM behind a TIS register bus.
pub struct Tpm<B: TisBus> {
    driver: TisDriver<B>,
    config: TpmConfig,
}

impl<B: TisBus> Tpm<B> {
    /// Wrap `bus` using the process-wide configuration.
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, config().clone())
    }

    pub fn with_config(bus: B, config: TpmConfig) -> Self {
        Self {
            driver: TisDriver::new(bus, config.budgets),
            config,
        }
    }

    /// Like [`Tpm::with_config`], but only if a device answers on `bus`.
    pub fn probe(bus: B, config: TpmConfig) -> Option<Self> {
        let driver = TisDriver::probe(bus, config.budgets)?;
        Some(Self { driver, config })
    }

    pub fn config(&self) -> &TpmConfig {
        &self.config
    }

    pub fn driver(&mut self) -> &mut TisDriver<B> {
        &mut self.driver
    }

    /// Relinquish `locality` if it is active.
    pub fn release_locality(&mut self, locality: Locality) -> bool {
        self.driver.release_locality(locality)
    }

    /// Send `cmd` and return the response, whatever its return code.
    pub fn transact<'r>(
        &mut self,
        locality: Locality,
        cmd: &mut CommandBuffer,
        rsp: &'r mut ResponseBuffer,
    ) -> Result<Response<'r>> {
        let len = self
            .driver
            .transmit(locality, cmd.finalize(), rsp.as_mut_slice())?;
        let rsp: &'r ResponseBuffer = rsp;
        rsp.parse(len)
    }

    /// Send `cmd`; a non-zero return code becomes `TpmError::Module`.
    pub fn submit<'r>(
        &mut self,
        locality: Locality,
        cmd: &mut CommandBuffer,
        rsp: &'r mut ResponseBuffer,
    ) -> Result<Response<'r>> {
        let ordinal = cmd.ordinal();
        let response = self.transact(locality, cmd, rsp)?;
        if !response.is_success() {
            log::warn!(
                "TPM: {:?} returned 0x{:08X}",
                ordinal,
                response.return_code()
            );
            return Err(TpmError::Module(response.return_code()));
        }
        Ok(response)
    }
}

static TPM: Mutex<Option<Tpm<MmioBus>>> = Mutex::new(None);

/// Probe for a TPM at the configured base address and keep it as the global
/// instance.
pub fn init() -> Result<()> {
    log::info!("Initializing TPM subsystem...");

    let config = config().clone();
    // SAFETY: the configured base is the platform's TIS window, which firmware
    // maps uncached for the whole launch.
    let bus = unsafe { MmioBus::new(config.base_address) };
    let base = config.base_address;

    if let Some(tpm) = Tpm::probe(bus, config) {
        log::info!("TPM 1.2 TIS interface found at 0x{:08X}", base);
        *TPM.lock() = Some(tpm);
    } else {
        log::warn!("No TPM found at 0x{:08X}", base);
    }
    Ok(())
}

/// Check if TPM is available
pub fn is_available() -> bool {
    TPM.lock().is_some()
}

/// Run `f` against the global TPM.
pub fn with_tpm<R>(f: impl FnOnce(&mut Tpm<MmioBus>) -> Result<R>) -> Result<R> {
    let mut guard = TPM.lock();
    let tpm = guard.as_mut().ok_or(TpmError::NotAvailable)?;
    f(tpm)
}
