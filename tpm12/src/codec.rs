//! Wire codec
//!
//! TPM 1.2 structures are big-endian and packed. Encoding goes through a
//! [`Sink`], so the same `Marshal` impl fills a command buffer, feeds a SHA-1
//! parameter digest or feeds an HMAC. Decoding goes through a bounded
//! [`Reader`] that fails with `TpmError::Protocol` on underflow.

use core::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{Result, TpmError};

pub const DIGEST_SIZE: usize = 20;

pub type HmacSha1 = Hmac<Sha1>;

/// TPM_DIGEST: a 20-byte SHA-1 value.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    pub const ZERO: Self = Self([0; DIGEST_SIZE]);

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(bytes);
        Self(out)
    }
}

impl From<[u8; DIGEST_SIZE]> for Digest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Byte consumer.
pub trait Sink {
    fn put(&mut self, bytes: &[u8]) -> Result<()>;
}

impl Sink for Sha1 {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        sha1::Digest::update(self, bytes);
        Ok(())
    }
}

impl Sink for HmacSha1 {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        Mac::update(self, bytes);
        Ok(())
    }
}

/// Bounded writer over a caller buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

impl Sink for Writer<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        let dst = self.buf.get_mut(self.pos..end).ok_or(TpmError::NoSpace)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Bounded big-endian cursor.
#[derive(Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.buf[..self.pos]
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(TpmError::Protocol)?;
        let bytes = self.buf.get(self.pos..end).ok_or(TpmError::Protocol)?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read<T: Unmarshal>(&mut self) -> Result<T> {
        T::unmarshal(self)
    }
}

pub trait Marshal {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()>;
}

pub trait Unmarshal: Sized {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self>;
}

macro_rules! impl_int {
    ($($ty:ty),*) => {$(
        impl Marshal for $ty {
            fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
                sink.put(&self.to_be_bytes())
            }
        }

        impl Unmarshal for $ty {
            fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
                let mut raw = [0u8; core::mem::size_of::<$ty>()];
                let len = raw.len();
                raw.copy_from_slice(reader.take(len)?);
                Ok(<$ty>::from_be_bytes(raw))
            }
        }
    )*};
}

impl_int!(u8, u16, u32);

impl Marshal for [u8] {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.put(self)
    }
}

impl Marshal for Digest {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.put(&self.0)
    }
}

impl Unmarshal for Digest {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Digest::from_slice(reader.take(DIGEST_SIZE)?))
    }
}

impl<T: Marshal + ?Sized> Marshal for &T {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        (**self).marshal(sink)
    }
}

/// Fresh SHA-1 state.
pub fn sha1_state() -> Sha1 {
    <Sha1 as sha1::Digest>::new()
}

pub fn sha1_finish(state: Sha1) -> Digest {
    Digest::from_slice(&sha1::Digest::finalize(state))
}

/// SHA-1 over the concatenation of `parts`.
pub fn sha1(parts: &[&[u8]]) -> Digest {
    let mut state = sha1_state();
    for part in parts {
        sha1::Digest::update(&mut state, part);
    }
    sha1_finish(state)
}

/// Fresh HMAC-SHA1 state keyed with `key`.
pub fn hmac_state(key: &[u8]) -> Result<HmacSha1> {
    <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| TpmError::BadParameter)
}

pub fn hmac_finish(state: HmacSha1) -> Digest {
    Digest::from_slice(&state.finalize().into_bytes())
}

/// HMAC-SHA1 over the concatenation of `parts`.
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<Digest> {
    let mut state = hmac_state(key)?;
    for part in parts {
        Mac::update(&mut state, part);
    }
    Ok(hmac_finish(state))
}
