//! Memory-mapped TIS register window

use core::ptr::{read_volatile, write_volatile};

use super::tis::Locality;
use super::TisBus;

/// TIS registers mapped at `base | locality << 12`.
pub struct MmioBus {
    base_addr: usize,
}

impl MmioBus {
    /// # Safety
    /// The five 4 KiB locality windows starting at `base_addr` must be mapped
    /// uncached and belong to a TIS-compliant device for the lifetime of the bus.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }

    fn reg_addr(&self, locality: Locality, reg: u32) -> usize {
        self.base_addr | (usize::from(locality.index()) << 12) | reg as usize
    }
}

impl TisBus for MmioBus {
    fn read(&mut self, locality: Locality, reg: u32, buf: &mut [u8]) {
        let addr = self.reg_addr(locality, reg);
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: mapping guaranteed by `MmioBus::new`.
            *byte = unsafe { read_volatile((addr + i) as *const u8) };
        }
    }

    fn write(&mut self, locality: Locality, reg: u32, data: &[u8]) {
        let addr = self.reg_addr(locality, reg);
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: mapping guaranteed by `MmioBus::new`.
            unsafe { write_volatile((addr + i) as *mut u8, *byte) };
        }
    }
}
