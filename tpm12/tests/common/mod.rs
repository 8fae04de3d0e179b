//! Simulated TPM 1.2 behind a TIS register file.
//!
//! `MockTis` models the ACCESS/STS/FIFO handshake byte by byte and hands
//! complete commands to `MockEngine`, which implements the handful of
//! ordinals the driver uses, including OIAP/OSAP authorization.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use tpm12::codec::{hmac_sha1, sha1, Reader};
use tpm12::config::TpmConfig;
use tpm12::drivers::tis::{Access, StatusFlags, TIS_ACCESS, TIS_DATA_FIFO, TIS_DID_VID, TIS_STS};
use tpm12::timeout::TimeoutBudgets;
use tpm12::{Locality, SealedBlob, TisBus, Tpm};

pub const TPM_AUTHFAIL: u32 = 0x01;
pub const TPM_BADINDEX: u32 = 0x02;
pub const TPM_BAD_PARAMETER: u32 = 0x03;
pub const TPM_BAD_ORDINAL: u32 = 0x0A;
pub const TPM_INVALID_AUTHHANDLE: u32 = 0x22;
pub const TPM_WRONGPCRVAL: u32 = 0x18;

const ORD_OIAP: u32 = 0x0A;
const ORD_OSAP: u32 = 0x0B;
const ORD_EXTEND: u32 = 0x14;
const ORD_PCR_READ: u32 = 0x15;
const ORD_SEAL: u32 = 0x17;
const ORD_UNSEAL: u32 = 0x18;
const ORD_GET_RANDOM: u32 = 0x46;
const ORD_GET_CAPABILITY: u32 = 0x65;
const ORD_SAVE_STATE: u32 = 0x98;
const ORD_FLUSH_SPECIFIC: u32 = 0xBA;
const ORD_PCR_RESET: u32 = 0xC8;
const ORD_NV_WRITE_VALUE: u32 = 0xCD;
const ORD_NV_READ_VALUE: u32 = 0xCF;

const TAG_RSP_COMMAND: u16 = 0x00C4;
const TAG_RSP_AUTH1: u16 = 0x00C5;
const TAG_RSP_AUTH2: u16 = 0x00C6;

const ENC_KEY: u8 = 0x5A;

pub const ZERO_AUTH: [u8; 20] = [0; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Ready,
    Reception,
    Completion,
}

/// Register-level TIS device.
pub struct MockTis {
    pub engine: MockEngine,
    pub did_vid: u32,
    /// Bytes accepted or offered per burst.
    pub burst: u16,
    pub never_grant: bool,
    pub never_ready: bool,
    pub never_data: bool,
    pub stall_write: bool,
    /// Ignore relinquish requests.
    pub sticky: bool,
    pub seized: bool,
    active: Option<u8>,
    phase: Phase,
    cmd: Vec<u8>,
    rsp: Vec<u8>,
    rsp_pos: usize,
    pub fifo_reads: usize,
    pub releases: usize,
    pub command_ready_writes: usize,
}

impl MockTis {
    pub fn new() -> Self {
        Self {
            engine: MockEngine::new(),
            did_vid: 0x000B_15D1,
            burst: 8,
            never_grant: false,
            never_ready: false,
            never_data: false,
            stall_write: false,
            sticky: false,
            seized: false,
            active: None,
            phase: Phase::Idle,
            cmd: Vec::new(),
            rsp: Vec::new(),
            rsp_pos: 0,
            fifo_reads: 0,
            releases: 0,
            command_ready_writes: 0,
        }
    }

    pub fn active(&self) -> Option<u8> {
        self.active
    }

    /// Mark a locality active, as if left over from earlier firmware.
    pub fn force_active(&mut self, locality: u8) {
        self.active = Some(locality);
    }

    fn is_active(&self, locality: Locality) -> bool {
        self.active == Some(locality.index())
    }

    fn access(&self, locality: Locality) -> u8 {
        let mut access = Access::TPM_REG_VALID_STS;
        if self.is_active(locality) {
            access |= Access::ACTIVE_LOCALITY;
        }
        if self.seized {
            access |= Access::SEIZE;
        }
        access.bits()
    }

    fn status(&self, locality: Locality) -> [u8; 3] {
        if !self.is_active(locality) {
            return [0; 3];
        }
        let mut flags = StatusFlags::STS_VALID;
        let burst = match self.phase {
            Phase::Idle => 0,
            Phase::Ready | Phase::Reception => {
                if self.phase == Phase::Ready {
                    flags |= StatusFlags::COMMAND_READY;
                }
                if self.stall_write {
                    0
                } else {
                    self.burst
                }
            }
            Phase::Completion => {
                let remaining = self.rsp.len() - self.rsp_pos;
                if remaining > 0 && !self.never_data {
                    flags |= StatusFlags::DATA_AVAIL;
                }
                if self.never_data {
                    0
                } else {
                    remaining.min(usize::from(self.burst)) as u16
                }
            }
        };
        let [lo, hi] = burst.to_le_bytes();
        [flags.bits(), lo, hi]
    }

    fn write_access(&mut self, locality: Locality, value: u8) {
        let value = Access::from_bits_retain(value);
        if value.contains(Access::REQUEST_USE) && !self.never_grant && self.active.is_none() {
            self.active = Some(locality.index());
        }
        if value.contains(Access::ACTIVE_LOCALITY) && self.is_active(locality) {
            self.releases += 1;
            if !self.sticky {
                self.active = None;
                self.phase = Phase::Idle;
            }
        }
    }

    fn write_status(&mut self, locality: Locality, value: u8) {
        if !self.is_active(locality) {
            return;
        }
        let value = StatusFlags::from_bits_retain(value);
        if value.contains(StatusFlags::COMMAND_READY) {
            self.command_ready_writes += 1;
            if !self.never_ready {
                self.phase = Phase::Ready;
                self.cmd.clear();
                self.rsp.clear();
                self.rsp_pos = 0;
            }
        }
        if value.contains(StatusFlags::TPM_GO) && self.phase == Phase::Reception {
            self.rsp = self.engine.execute(locality.index(), &self.cmd);
            self.rsp_pos = 0;
            self.phase = Phase::Completion;
        }
    }
}

impl TisBus for MockTis {
    fn read(&mut self, locality: Locality, reg: u32, buf: &mut [u8]) {
        match reg {
            TIS_ACCESS => buf[0] = self.access(locality),
            TIS_STS => {
                let status = self.status(locality);
                let n = buf.len().min(3);
                buf[..n].copy_from_slice(&status[..n]);
            }
            TIS_DATA_FIFO => {
                for byte in buf.iter_mut() {
                    self.fifo_reads += 1;
                    *byte = match self.rsp.get(self.rsp_pos) {
                        Some(&b) if self.phase == Phase::Completion && self.is_active(locality) => {
                            self.rsp_pos += 1;
                            b
                        }
                        _ => 0xFF,
                    };
                }
            }
            TIS_DID_VID => buf.copy_from_slice(&self.did_vid.to_le_bytes()[..buf.len()]),
            _ => buf.fill(0xFF),
        }
    }

    fn write(&mut self, locality: Locality, reg: u32, data: &[u8]) {
        match reg {
            TIS_ACCESS => self.write_access(locality, data[0]),
            TIS_STS => self.write_status(locality, data[0]),
            TIS_DATA_FIFO => {
                if self.is_active(locality)
                    && matches!(self.phase, Phase::Ready | Phase::Reception)
                {
                    self.phase = Phase::Reception;
                    self.cmd.extend_from_slice(data);
                }
            }
            _ => {}
        }
    }
}

enum SessionKind {
    Oiap,
    Osap { shared_secret: [u8; 20] },
}

struct Session {
    kind: SessionKind,
    nonce_even: [u8; 20],
}

/// Command interpreter for the ordinals the driver issues.
pub struct MockEngine {
    pub pcrs: [[u8; 20]; 24],
    pub nv: HashMap<u32, Vec<u8>>,
    /// Caps on successive GetRandom answers; empty means always full.
    pub random_plan: VecDeque<usize>,
    pub random_requests: Vec<u32>,
    pub ordinals: Vec<u32>,
    pub localities: Vec<u8>,
    pub flushed: Vec<u32>,
    pub permanent_flags: [u8; 22],
    pub volatile_flags: [u8; 7],
    /// Force this return code for the next command with this ordinal.
    pub fail_next: Option<(u32, u32)>,
    pub corrupt_res_auth: bool,
    pub nv_chunk_cap: Option<usize>,
    pub saved_state: bool,
    sessions: HashMap<u32, Session>,
    next_handle: u32,
    rng: u8,
}

type Outcome = Result<(u16, Vec<u8>), u32>;

fn bad<E>(_: E) -> u32 {
    TPM_BAD_PARAMETER
}

fn u32_bytes(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

impl MockEngine {
    pub fn new() -> Self {
        let mut permanent_flags = [0u8; 22];
        permanent_flags[1] = 0x1F;
        let mut volatile_flags = [0u8; 7];
        volatile_flags[1] = 0x0A;
        Self {
            pcrs: [[0; 20]; 24],
            nv: HashMap::new(),
            random_plan: VecDeque::new(),
            random_requests: Vec::new(),
            ordinals: Vec::new(),
            localities: Vec::new(),
            flushed: Vec::new(),
            permanent_flags,
            volatile_flags,
            fail_next: None,
            corrupt_res_auth: false,
            nv_chunk_cap: None,
            saved_state: false,
            sessions: HashMap::new(),
            next_handle: 0x0200_0000,
            rng: 0,
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn random_bytes(&mut self, n: usize) -> Vec<u8> {
        (0..n)
            .map(|_| {
                self.rng = self.rng.wrapping_add(0x3D);
                self.rng
            })
            .collect()
    }

    fn nonce(&mut self) -> [u8; 20] {
        let mut nonce = [0u8; 20];
        nonce.copy_from_slice(&self.random_bytes(20));
        nonce
    }

    /// Composite hash of the current values of the selected PCRs.
    pub fn composite(&self, select: &[u8; 3]) -> [u8; 20] {
        let indices: Vec<usize> = (0..24).filter(|i| select[i / 8] & (1 << (i % 8)) != 0).collect();
        if indices.is_empty() {
            return [0; 20];
        }
        let mut buf = vec![0x00, 0x03];
        buf.extend_from_slice(select);
        buf.extend_from_slice(&u32_bytes(20 * indices.len() as u32));
        for i in indices {
            buf.extend_from_slice(&self.pcrs[i]);
        }
        sha1(&[&buf]).0
    }

    pub fn execute(&mut self, locality: u8, cmd: &[u8]) -> Vec<u8> {
        let (_tag, size, ordinal) = match parse_header(cmd) {
            Ok(header) => header,
            Err(rc) => return respond(TAG_RSP_COMMAND, rc, &[]),
        };
        if size as usize != cmd.len() {
            return respond(TAG_RSP_COMMAND, TPM_BAD_PARAMETER, &[]);
        }
        self.ordinals.push(ordinal);
        self.localities.push(locality);

        if let Some((ord, rc)) = self.fail_next {
            if ord == ordinal {
                self.fail_next = None;
                return respond(TAG_RSP_COMMAND, rc, &[]);
            }
        }

        let args = &cmd[10..];
        let outcome = match ordinal {
            ORD_PCR_READ => self.pcr_read(args),
            ORD_EXTEND => self.extend(args),
            ORD_PCR_RESET => self.pcr_reset(args),
            ORD_GET_RANDOM => self.get_random(args),
            ORD_NV_READ_VALUE => self.nv_read(args),
            ORD_NV_WRITE_VALUE => self.nv_write(args),
            ORD_GET_CAPABILITY => self.get_capability(args),
            ORD_SAVE_STATE => {
                self.saved_state = true;
                Ok((TAG_RSP_COMMAND, Vec::new()))
            }
            ORD_FLUSH_SPECIFIC => self.flush(args),
            ORD_OIAP => self.oiap(),
            ORD_OSAP => self.osap(args),
            ORD_SEAL => self.seal(locality, args),
            ORD_UNSEAL => self.unseal(args),
            _ => Err(TPM_BAD_ORDINAL),
        };
        match outcome {
            Ok((tag, body)) => respond(tag, 0, &body),
            Err(rc) => respond(TAG_RSP_COMMAND, rc, &[]),
        }
    }

    fn pcr_read(&mut self, args: &[u8]) -> Outcome {
        let index = Reader::new(args).read::<u32>().map_err(bad)? as usize;
        let value = self.pcrs.get(index).ok_or(TPM_BADINDEX)?;
        Ok((TAG_RSP_COMMAND, value.to_vec()))
    }

    fn extend(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let index = reader.read::<u32>().map_err(bad)? as usize;
        let digest = reader.take(20).map_err(bad)?;
        let old = *self.pcrs.get(index).ok_or(TPM_BADINDEX)?;
        self.pcrs[index] = sha1(&[&old, digest]).0;
        Ok((TAG_RSP_COMMAND, self.pcrs[index].to_vec()))
    }

    fn pcr_reset(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let size = reader.read::<u16>().map_err(bad)?;
        let select = reader.take(usize::from(size)).map_err(bad)?;
        for i in 0..24 {
            if select.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0) {
                if i < 16 {
                    return Err(TPM_BAD_PARAMETER);
                }
                self.pcrs[i] = [0; 20];
            }
        }
        Ok((TAG_RSP_COMMAND, Vec::new()))
    }

    fn get_random(&mut self, args: &[u8]) -> Outcome {
        let wanted = Reader::new(args).read::<u32>().map_err(bad)?;
        self.random_requests.push(wanted);
        let n = match self.random_plan.pop_front() {
            Some(cap) => cap.min(wanted as usize),
            None => wanted as usize,
        };
        let mut body = u32_bytes(n as u32).to_vec();
        body.extend(self.random_bytes(n));
        Ok((TAG_RSP_COMMAND, body))
    }

    fn nv_read(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let index: u32 = reader.read().map_err(bad)?;
        let offset = reader.read::<u32>().map_err(bad)? as usize;
        let mut size = reader.read::<u32>().map_err(bad)? as usize;
        if let Some(cap) = self.nv_chunk_cap {
            size = size.min(cap);
        }
        let data = self.nv.get(&index).ok_or(TPM_BADINDEX)?;
        let chunk = data.get(offset..offset + size).ok_or(TPM_BAD_PARAMETER)?;
        let mut body = u32_bytes(size as u32).to_vec();
        body.extend_from_slice(chunk);
        Ok((TAG_RSP_COMMAND, body))
    }

    fn nv_write(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let index: u32 = reader.read().map_err(bad)?;
        let offset = reader.read::<u32>().map_err(bad)? as usize;
        let size = reader.read::<u32>().map_err(bad)? as usize;
        let bytes = reader.take(size).map_err(bad)?;
        let data = self.nv.get_mut(&index).ok_or(TPM_BADINDEX)?;
        let dst = data.get_mut(offset..offset + size).ok_or(TPM_BAD_PARAMETER)?;
        dst.copy_from_slice(bytes);
        Ok((TAG_RSP_COMMAND, Vec::new()))
    }

    fn get_capability(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let area: u32 = reader.read().map_err(bad)?;
        let sub_size = reader.read::<u32>().map_err(bad)? as usize;
        let sub_cap = reader.take(sub_size).map_err(bad)?;
        let sub = if sub_cap.len() == 4 {
            Reader::new(sub_cap).read::<u32>().map_err(bad)?
        } else {
            0
        };

        let payload: Vec<u8> = match (area, sub) {
            (0x04, 0x108) => self.permanent_flags.to_vec(),
            (0x04, 0x109) => self.volatile_flags.to_vec(),
            (0x11, index) => {
                let data = self.nv.get(&index).ok_or(TPM_BADINDEX)?;
                let mut public = vec![0u8; 71];
                public[0..2].copy_from_slice(&0x0018u16.to_be_bytes());
                public[2..6].copy_from_slice(&index.to_be_bytes());
                public[67..].copy_from_slice(&u32_bytes(data.len() as u32));
                public
            }
            (0x1A, _) => vec![
                0x00, 0x30, 1, 2, 3, 17, 0x00, 0x02, 0x03, b'I', b'F', b'X', 0, 0x00, 0x00,
            ],
            _ => return Err(TPM_BAD_PARAMETER),
        };
        let mut body = u32_bytes(payload.len() as u32).to_vec();
        body.extend(payload);
        Ok((TAG_RSP_COMMAND, body))
    }

    fn flush(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let handle: u32 = reader.read().map_err(bad)?;
        let resource: u32 = reader.read().map_err(bad)?;
        if resource != 2 || self.sessions.remove(&handle).is_none() {
            return Err(TPM_INVALID_AUTHHANDLE);
        }
        self.flushed.push(handle);
        Ok((TAG_RSP_COMMAND, Vec::new()))
    }

    fn new_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn oiap(&mut self) -> Outcome {
        let handle = self.new_handle();
        let nonce_even = self.nonce();
        self.sessions.insert(
            handle,
            Session {
                kind: SessionKind::Oiap,
                nonce_even,
            },
        );
        let mut body = u32_bytes(handle).to_vec();
        body.extend_from_slice(&nonce_even);
        Ok((TAG_RSP_COMMAND, body))
    }

    fn osap(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let entity_type: u16 = reader.read().map_err(bad)?;
        let entity_value: u32 = reader.read().map_err(bad)?;
        let odd_osap = reader.take(20).map_err(bad)?;
        if entity_type != 0x0004 || entity_value != 0x4000_0000 {
            return Err(TPM_BAD_PARAMETER);
        }

        let handle = self.new_handle();
        let nonce_even = self.nonce();
        let even_osap = self.nonce();
        let shared_secret = hmac_sha1(&ZERO_AUTH, &[&even_osap, odd_osap]).map_err(bad)?.0;
        self.sessions.insert(
            handle,
            Session {
                kind: SessionKind::Osap { shared_secret },
                nonce_even,
            },
        );
        let mut body = u32_bytes(handle).to_vec();
        body.extend_from_slice(&nonce_even);
        body.extend_from_slice(&even_osap);
        Ok((TAG_RSP_COMMAND, body))
    }

    /// Check one request trailer and consume its session. Returns the key
    /// and the caller's odd nonce for building the response trailer.
    fn authorize(
        &mut self,
        reader: &mut Reader<'_>,
        in_digest: &[u8; 20],
        want_osap: bool,
        oiap_key: &[u8; 20],
    ) -> Result<([u8; 20], [u8; 20]), u32> {
        let handle: u32 = reader.read().map_err(bad)?;
        let mut nonce_odd = [0u8; 20];
        nonce_odd.copy_from_slice(reader.take(20).map_err(bad)?);
        let cont: u8 = reader.read().map_err(bad)?;
        let auth = reader.take(20).map_err(bad)?;

        let session = self.sessions.remove(&handle).ok_or(TPM_INVALID_AUTHHANDLE)?;
        let key = match (&session.kind, want_osap) {
            (SessionKind::Osap { shared_secret }, true) => *shared_secret,
            (SessionKind::Oiap, false) => *oiap_key,
            _ => return Err(TPM_AUTHFAIL),
        };
        let expected = hmac_sha1(&key, &[in_digest, &session.nonce_even, &nonce_odd, &[cont]])
            .map_err(bad)?;
        if expected.0 != auth {
            return Err(TPM_AUTHFAIL);
        }
        Ok((key, nonce_odd))
    }

    fn response_trailer(&mut self, key: &[u8; 20], out_digest: &[u8; 20], nonce_odd: &[u8; 20]) -> Vec<u8> {
        let nonce_even = self.nonce();
        let mut auth = hmac_sha1(key, &[out_digest, &nonce_even, nonce_odd, &[0]])
            .map(|d| d.0)
            .unwrap_or_default();
        if self.corrupt_res_auth {
            auth[0] ^= 0xFF;
        }
        let mut trailer = nonce_even.to_vec();
        trailer.push(0);
        trailer.extend_from_slice(&auth);
        trailer
    }

    fn seal(&mut self, locality: u8, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let key_handle: u32 = reader.read().map_err(bad)?;
        let params_start = reader.position();
        let enc_auth = reader.take(20).map_err(bad)?;
        let info_size = reader.read::<u32>().map_err(bad)? as usize;
        let info = reader.take(info_size).map_err(bad)?.to_vec();
        let data_size = reader.read::<u32>().map_err(bad)? as usize;
        let data = reader.take(data_size).map_err(bad)?.to_vec();
        let params_end = reader.position();
        if key_handle != 0x4000_0000 || info_size != 54 {
            return Err(TPM_BAD_PARAMETER);
        }

        let in_digest = sha1(&[&u32_bytes(ORD_SEAL), &args[params_start..params_end]]).0;
        let nonce_even_before = self.peek_nonce_even(&args[params_end..])?;
        let (key, nonce_odd) = self.authorize(&mut reader, &in_digest, true, &ZERO_AUTH)?;

        // ADIP: the blob secret must decrypt to the well-known value.
        let pad = sha1(&[&key, &nonce_even_before]).0;
        let blob_auth: Vec<u8> = enc_auth.iter().zip(pad).map(|(a, b)| a ^ b).collect();
        if blob_auth != ZERO_AUTH {
            return Err(TPM_AUTHFAIL);
        }

        let mut seal_info = info;
        // localityAtCreation must name the caller's locality.
        if seal_info[2] != 1 << locality {
            return Err(TPM_BAD_PARAMETER);
        }
        let mut creation_select = [0u8; 3];
        creation_select.copy_from_slice(&seal_info[6..9]);
        let creation = self.composite(&creation_select);
        seal_info[14..34].copy_from_slice(&creation);

        let mut blob = 0x0016u16.to_be_bytes().to_vec();
        blob.extend_from_slice(&0u16.to_be_bytes());
        blob.extend_from_slice(&u32_bytes(54));
        blob.extend_from_slice(&seal_info);
        blob.extend_from_slice(&u32_bytes(data.len() as u32));
        blob.extend(data.iter().map(|b| b ^ ENC_KEY));

        let out_digest = sha1(&[&u32_bytes(0), &u32_bytes(ORD_SEAL), &blob]).0;
        let trailer = self.response_trailer(&key, &out_digest, &nonce_odd);
        blob.extend(trailer);
        Ok((TAG_RSP_AUTH1, blob))
    }

    fn peek_nonce_even(&self, trailer: &[u8]) -> Result<[u8; 20], u32> {
        let handle = Reader::new(trailer).read::<u32>().map_err(bad)?;
        let session = self.sessions.get(&handle).ok_or(TPM_INVALID_AUTHHANDLE)?;
        Ok(session.nonce_even)
    }

    fn unseal(&mut self, args: &[u8]) -> Outcome {
        let mut reader = Reader::new(args);
        let key_handle: u32 = reader.read().map_err(bad)?;
        if key_handle != 0x4000_0000 {
            return Err(TPM_BAD_PARAMETER);
        }
        let start = reader.position();
        let blob = SealedBlob::decode(&mut reader).map_err(bad)?;
        let blob_bytes = &args[start..reader.position()];

        let in_digest = sha1(&[&u32_bytes(ORD_UNSEAL), blob_bytes]).0;
        let (parent_key, parent_odd) = self.authorize(&mut reader, &in_digest, true, &ZERO_AUTH)?;
        let (data_key, data_odd) = self.authorize(&mut reader, &in_digest, false, &ZERO_AUTH)?;

        if let Some(info) = blob.seal_info() {
            let release = self.composite(info.release_pcr_selection.bitmap());
            if release != info.digest_at_release.0 {
                return Err(TPM_WRONGPCRVAL);
            }
        }

        let secret: Vec<u8> = blob.enc_data().iter().map(|b| b ^ ENC_KEY).collect();
        let mut body = u32_bytes(secret.len() as u32).to_vec();
        body.extend_from_slice(&secret);
        let out_digest = sha1(&[&u32_bytes(0), &u32_bytes(ORD_UNSEAL), &body]).0;
        let first = self.response_trailer(&parent_key, &out_digest, &parent_odd);
        let second = self.response_trailer(&data_key, &out_digest, &data_odd);
        body.extend(first);
        body.extend(second);
        Ok((TAG_RSP_AUTH2, body))
    }
}

fn parse_header(cmd: &[u8]) -> Result<(u16, u32, u32), u32> {
    let mut reader = Reader::new(cmd);
    Ok((
        reader.read().map_err(bad)?,
        reader.read().map_err(bad)?,
        reader.read().map_err(bad)?,
    ))
}

fn respond(tag: u16, rc: u32, body: &[u8]) -> Vec<u8> {
    let mut rsp = tag.to_be_bytes().to_vec();
    rsp.extend_from_slice(&u32_bytes((10 + body.len()) as u32));
    rsp.extend_from_slice(&u32_bytes(rc));
    rsp.extend_from_slice(body);
    rsp
}

/// Small budgets so timeouts fail fast against the simulator.
pub fn test_config() -> TpmConfig {
    TpmConfig {
        budgets: TimeoutBudgets::uniform(64),
        ..TpmConfig::default()
    }
}

pub fn tpm_with(mock: MockTis) -> Tpm<MockTis> {
    Tpm::with_config(mock, test_config())
}

pub fn tpm() -> Tpm<MockTis> {
    tpm_with(MockTis::new())
}

pub fn mock(tpm: &mut Tpm<MockTis>) -> &mut MockTis {
    tpm.driver().bus_mut()
}
