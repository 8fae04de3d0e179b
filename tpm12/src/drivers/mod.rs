//! TPM Drivers
//!
//! Register access and the TIS locality/FIFO protocol on top of it.

pub mod mmio;
pub mod tis;

pub use mmio::MmioBus;
pub use tis::{ActiveLocality, Locality, LocalitySelection, TisDriver};

/// Byte-granular access to the TIS register file.
///
/// Accesses never fail at this level; a missing or wedged device shows up as
/// all-ones reads and is caught by the bounded waits above.
pub trait TisBus {
    /// Read `buf.len()` consecutive bytes starting at `reg` in `locality`'s window.
    fn read(&mut self, locality: Locality, reg: u32, buf: &mut [u8]);

    /// Write `data` byte by byte starting at `reg` in `locality`'s window.
    fn write(&mut self, locality: Locality, reg: u32, data: &[u8]);
}

impl<B: TisBus + ?Sized> TisBus for &mut B {
    fn read(&mut self, locality: Locality, reg: u32, buf: &mut [u8]) {
        (**self).read(locality, reg, buf)
    }

    fn write(&mut self, locality: Locality, reg: u32, data: &[u8]) {
        (**self).write(locality, reg, data)
    }
}
