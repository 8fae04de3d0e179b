//! OIAP / OSAP authorization sessions
//!
//! Sessions are never continued: every authorized command ends the sessions it
//! uses. Caller nonces come from the TPM's own generator.
//!
//! Authorization HMACs:
//!
//! ```text
//! inParamDigest  = SHA1(ordinal ‖ inParams)
//! authCode       = HMAC(key, inParamDigest ‖ nonceEven ‖ nonceOdd ‖ continue)
//! outParamDigest = SHA1(returnCode ‖ ordinal ‖ outParams)
//! resAuth        = HMAC(key, outParamDigest ‖ nonceEven' ‖ nonceOdd ‖ continue)
//! ```

use core::fmt;

use zeroize::Zeroizing;

use crate::codec::{self, Digest, Marshal, Reader, Sink, Unmarshal, DIGEST_SIZE};
use crate::commands::{CommandBuffer, Ordinal, Tag};
use crate::drivers::{Locality, TisBus};
use crate::error::{Result, TpmError, TPM_SUCCESS};
use crate::response::ResponseBuffer;
use crate::Tpm;

pub const NONCE_SIZE: usize = 20;

/// TPM_ENTITY_TYPE of the storage root key.
pub const TPM_ET_SRK: u16 = 0x0004;
/// Reserved handle of the storage root key.
pub const TPM_KH_SRK: u32 = 0x4000_0000;
/// TPM_RT_AUTH resource type for TPM_FlushSpecific.
pub const TPM_RT_AUTH: u32 = 0x0000_0002;

/// Well-known SRK usage secret.
pub const SRK_AUTH: AuthData = [0; DIGEST_SIZE];

/// TPM_AUTHDATA
pub type AuthData = [u8; DIGEST_SIZE];

/// Bytes of an authorization trailer in a response:
/// nonceEven ‖ continueAuthSession ‖ resAuth.
pub const RESPONSE_TRAILER_SIZE: usize = NONCE_SIZE + 1 + DIGEST_SIZE;

/// TPM_NONCE
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(..)")
    }
}

impl Marshal for Nonce {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.put(&self.0)
    }
}

impl Unmarshal for Nonce {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(reader.take(NONCE_SIZE)?);
        Ok(Self(nonce))
    }
}

/// An open OIAP session.
#[derive(Debug)]
pub struct OiapSession {
    pub handle: u32,
    pub nonce_even: Nonce,
}

/// An open OSAP session and the secret shared with the TPM. The secret is
/// wiped when the session is dropped.
pub struct OsapSession {
    pub handle: u32,
    pub nonce_even: Nonce,
    shared_secret: Zeroizing<AuthData>,
}

impl OsapSession {
    pub fn shared_secret(&self) -> &AuthData {
        &self.shared_secret
    }

    /// `secret XOR SHA1(sharedSecret ‖ nonceEven)`, the ADIP encryption of a
    /// new usage secret.
    pub fn encrypt_auth(&self, secret: &AuthData) -> AuthData {
        let pad = codec::sha1(&[&self.shared_secret[..], &self.nonce_even.0]);
        let mut out = *secret;
        for (byte, key) in out.iter_mut().zip(pad.0) {
            *byte ^= key;
        }
        out
    }
}

impl fmt::Debug for OsapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsapSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// `sharedSecret = HMAC(usageAuth, nonceEvenOSAP ‖ nonceOddOSAP)`
pub fn osap_shared_secret(
    usage_auth: &AuthData,
    nonce_even_osap: &Nonce,
    nonce_odd_osap: &Nonce,
) -> Result<AuthData> {
    Ok(codec::hmac_sha1(usage_auth, &[&nonce_even_osap.0, &nonce_odd_osap.0])?.0)
}

/// `SHA1(ordinal ‖ inParams)`
pub fn in_param_digest(ordinal: Ordinal, params: &[u8]) -> Digest {
    codec::sha1(&[&(ordinal as u32).to_be_bytes(), params])
}

/// `SHA1(returnCode ‖ ordinal ‖ outParams)`
pub fn out_param_digest(return_code: u32, ordinal: Ordinal, params: &[u8]) -> Digest {
    codec::sha1(&[
        &return_code.to_be_bytes(),
        &(ordinal as u32).to_be_bytes(),
        params,
    ])
}

/// One session slot of an authorized command: what the caller sends and what
/// it needs to check the reply.
pub struct Authorization<'k> {
    pub handle: u32,
    pub nonce_even: Nonce,
    pub nonce_odd: Nonce,
    key: &'k AuthData,
}

impl<'k> Authorization<'k> {
    pub fn new(handle: u32, nonce_even: Nonce, nonce_odd: Nonce, key: &'k AuthData) -> Self {
        Self {
            handle,
            nonce_even,
            nonce_odd,
            key,
        }
    }

    fn hmac(&self, digest: &Digest, nonce_even: &Nonce, cont: u8) -> Result<Digest> {
        codec::hmac_sha1(
            self.key,
            &[&digest.0, &nonce_even.0, &self.nonce_odd.0, &[cont]],
        )
    }

    /// Request trailer for a command whose parameter digest is `in_digest`.
    pub fn trailer(&self, in_digest: &Digest) -> Result<AuthTrailer> {
        Ok(AuthTrailer {
            handle: self.handle,
            nonce_odd: self.nonce_odd,
            continue_session: false,
            auth: self.hmac(in_digest, &self.nonce_even, 0)?,
        })
    }

    /// Check the response trailer against `out_digest`.
    pub fn verify(&self, out_digest: &Digest, trailer: &ResponseTrailer) -> Result<()> {
        let expected = self.hmac(
            out_digest,
            &trailer.nonce_even,
            u8::from(trailer.continue_session),
        )?;
        if expected.ct_eq(&trailer.auth) {
            Ok(())
        } else {
            log::error!("TPM: response authorization mismatch on session 0x{:08X}", self.handle);
            Err(TpmError::AuthFailure)
        }
    }
}

/// authHandle ‖ nonceOdd ‖ continueAuthSession ‖ authCode
#[derive(Debug, Clone, Copy)]
pub struct AuthTrailer {
    pub handle: u32,
    pub nonce_odd: Nonce,
    pub continue_session: bool,
    pub auth: Digest,
}

impl Marshal for AuthTrailer {
    fn marshal<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        self.handle.marshal(sink)?;
        self.nonce_odd.marshal(sink)?;
        u8::from(self.continue_session).marshal(sink)?;
        self.auth.marshal(sink)
    }
}

/// nonceEven ‖ continueAuthSession ‖ resAuth
#[derive(Debug, Clone, Copy)]
pub struct ResponseTrailer {
    pub nonce_even: Nonce,
    pub continue_session: bool,
    pub auth: Digest,
}

impl Unmarshal for ResponseTrailer {
    fn unmarshal(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            nonce_even: reader.read()?,
            continue_session: reader.read::<u8>()? != 0,
            auth: reader.read()?,
        })
    }
}

/// Verify the response trailers of an authorized command.
///
/// `out_params` are the response parameters preceding the trailers.
pub(crate) fn verify_response(
    ordinal: Ordinal,
    out_params: &[u8],
    sessions: &[&Authorization<'_>],
    trailers: &[ResponseTrailer],
) -> Result<()> {
    let out_digest = out_param_digest(TPM_SUCCESS, ordinal, out_params);
    for (session, trailer) in sessions.iter().zip(trailers) {
        session.verify(&out_digest, trailer)?;
    }
    Ok(())
}

impl<B: TisBus> Tpm<B> {
    /// Fresh caller nonce from TPM_GetRandom.
    pub fn nonce(&mut self, locality: Locality) -> Result<Nonce> {
        let mut nonce = Nonce::default();
        let got = self.get_random(locality, &mut nonce.0)?;
        if got != NONCE_SIZE {
            log::error!("TPM: only {} nonce bytes available", got);
            return Err(TpmError::Protocol);
        }
        Ok(nonce)
    }

    /// TPM_OIAP
    pub fn oiap(&mut self, locality: Locality) -> Result<OiapSession> {
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::Oiap);
        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();

        let session = OiapSession {
            handle: params.read()?,
            nonce_even: params.read()?,
        };
        log::trace!("TPM: OIAP session 0x{:08X}", session.handle);
        Ok(session)
    }

    /// TPM_OSAP against `entity_value`, deriving the shared secret from
    /// `usage_auth`.
    pub fn osap(
        &mut self,
        locality: Locality,
        entity_type: u16,
        entity_value: u32,
        usage_auth: &AuthData,
    ) -> Result<OsapSession> {
        let nonce_odd_osap = self.nonce(locality)?;

        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::Osap);
        cmd.push(&entity_type)?
            .push(&entity_value)?
            .push(&nonce_odd_osap)?;

        let mut rsp = ResponseBuffer::new();
        let mut params = self.submit(locality, &mut cmd, &mut rsp)?.params();
        let handle: u32 = params.read()?;
        let nonce_even: Nonce = params.read()?;
        let nonce_even_osap: Nonce = params.read()?;

        let shared_secret = Zeroizing::new(osap_shared_secret(
            usage_auth,
            &nonce_even_osap,
            &nonce_odd_osap,
        )?);
        log::trace!("TPM: OSAP session 0x{:08X}", handle);
        Ok(OsapSession {
            handle,
            nonce_even,
            shared_secret,
        })
    }

    /// TPM_FlushSpecific for an authorization session.
    pub fn flush_auth_session(&mut self, locality: Locality, handle: u32) -> Result<()> {
        let mut cmd = CommandBuffer::new(Tag::RquCommand, Ordinal::FlushSpecific);
        cmd.push(&handle)?.push(&TPM_RT_AUTH)?;

        let mut rsp = ResponseBuffer::new();
        self.submit(locality, &mut cmd, &mut rsp)?;
        log::trace!("TPM: flushed session 0x{:08X}", handle);
        Ok(())
    }

    /// Flush sessions that will not be consumed by a command. Failures are
    /// logged only; the caller is already on an error path.
    pub(crate) fn abandon_sessions(&mut self, locality: Locality, handles: &[u32]) {
        for &handle in handles {
            if let Err(err) = self.flush_auth_session(locality, handle) {
                log::warn!("TPM: failed to flush session 0x{:08X}: {}", handle, err);
            }
        }
    }

    /// Pass `result` through, flushing `handles` first if it is an error.
    pub(crate) fn or_abandon<T>(
        &mut self,
        locality: Locality,
        handles: &[u32],
        result: Result<T>,
    ) -> Result<T> {
        if result.is_err() {
            self.abandon_sessions(locality, handles);
        }
        result
    }
}
