//! Driver configuration

use core::ops::RangeInclusive;

use crate::timeout::TimeoutBudgets;

/// Standard TIS MMIO base address
pub const TIS_BASE_ADDR: usize = 0xFED4_0000;

/// TPM driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmConfig {
    /// MMIO base of locality 0.
    pub base_address: usize,
    pub budgets: TimeoutBudgets,
    /// PCRs that `pcr_reset` may touch.
    pub resettable_pcrs: RangeInclusive<u32>,
    /// Chunk size for `nv_read_index`.
    pub nv_read_segment: usize,
}

impl TpmConfig {
    pub const fn default() -> Self {
        Self {
            base_address: TIS_BASE_ADDR,
            budgets: TimeoutBudgets::default(),
            resettable_pcrs: 16..=23,
            nv_read_segment: 256,
        }
    }
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self::default()
    }
}

static TPM_CONFIG: spin::Once<TpmConfig> = spin::Once::new();

/// Install the process-wide configuration. Only the first call has an effect.
pub fn configure(config: TpmConfig) {
    TPM_CONFIG.call_once(|| config);
}

pub fn config() -> &'static TpmConfig {
    static DEFAULT_CONFIG: TpmConfig = TpmConfig::default();
    TPM_CONFIG.get().unwrap_or(&DEFAULT_CONFIG)
}
