//! Recursive TLV ticket encoding (§3).
//!
//! A ticket is a small fixed header (`version`, `size`) followed by two
//! top-level blobs, each itself a TLV whose payload is a sequence of
//! generically-typed fields. Field identity within a blob is positional —
//! the TLV `type` tag only distinguishes the *value encoding*
//! (`Empty`/`U32`/`U64`/`BString`/`Time`/`Binary`), not the field's name.

use crate::error::TicketError;
use bytes::{Buf, BufMut};

const USERDATA_BLOB_TYPE: u16 = 0x3000;
const SIGNATURE_BLOB_TYPE: u16 = 0x3002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum TlvType {
    Empty = 0,
    U32 = 1,
    U64 = 2,
    BString = 4,
    Time = 7,
    Binary = 8,
}

impl TlvType {
    fn from_u16(value: u16) -> Result<Self, TicketError> {
        Ok(match value {
            0 => Self::Empty,
            1 => Self::U32,
            2 => Self::U64,
            4 => Self::BString,
            7 => Self::Time,
            8 => Self::Binary,
            other => return Err(TicketError::UnknownTlvType(other)),
        })
    }
}

/// A single decoded `type:u16, length:u16, payload` field.
struct RawField {
    ty: TlvType,
    payload: Vec<u8>,
}

fn read_field(buf: &mut &[u8]) -> Result<RawField, TicketError> {
    if buf.len() < 4 {
        return Err(TicketError::Truncated(buf.len()));
    }
    let ty = TlvType::from_u16(buf.get_u16())?;
    let len = buf.get_u16() as usize;
    if buf.len() < len {
        return Err(TicketError::Truncated(buf.len()));
    }
    let payload = buf[..len].to_vec();
    buf.advance(len);
    Ok(RawField { ty, payload })
}

fn write_field(out: &mut Vec<u8>, ty: TlvType, payload: &[u8]) {
    out.put_u16(ty as u16);
    out.put_u16(payload.len() as u16);
    out.extend_from_slice(payload);
}

fn expect_binary(field: RawField) -> Result<Vec<u8>, TicketError> {
    match field.ty {
        TlvType::Binary => Ok(field.payload),
        other => Err(TicketError::UnknownTlvType(other as u16)),
    }
}

fn expect_u32(field: RawField) -> Result<u32, TicketError> {
    match field.ty {
        TlvType::U32 if field.payload.len() == 4 => {
            Ok(u32::from_be_bytes(field.payload.try_into().unwrap()))
        }
        other => Err(TicketError::UnknownTlvType(other as u16)),
    }
}

fn expect_u64_like(field: RawField, expected: TlvType) -> Result<u64, TicketError> {
    if field.ty != expected || field.payload.len() != 8 {
        return Err(TicketError::UnknownTlvType(field.ty as u16));
    }
    Ok(u64::from_be_bytes(field.payload.try_into().unwrap()))
}

fn expect_bstring(field: RawField) -> Result<String, TicketError> {
    match field.ty {
        TlvType::BString => Ok(String::from_utf8_lossy(&field.payload).into_owned()),
        other => Err(TicketError::UnknownTlvType(other as u16)),
    }
}

/// The `0x3000` userdata blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub serial: Vec<u8>,
    pub issuer_id: u32,
    pub issued_date: u64,
    pub expire_date: u64,
    pub user_id: u64,
    pub online_id: String,
    pub region: Vec<u8>,
    pub domain: String,
    pub service_id: Vec<u8>,
    pub status: u32,
    pub cookie: Option<Vec<u8>>,
}

impl UserData {
    fn parse(mut buf: &[u8]) -> Result<Self, TicketError> {
        let serial = expect_binary(read_field(&mut buf)?)?;
        let issuer_id = expect_u32(read_field(&mut buf)?)?;
        let issued_date = expect_u64_like(read_field(&mut buf)?, TlvType::Time)?;
        let expire_date = expect_u64_like(read_field(&mut buf)?, TlvType::Time)?;
        let user_id = expect_u64_like(read_field(&mut buf)?, TlvType::U64)?;
        let online_id = expect_bstring(read_field(&mut buf)?)?;
        let region = expect_binary(read_field(&mut buf)?)?;
        let domain = expect_bstring(read_field(&mut buf)?)?;
        let service_id = expect_binary(read_field(&mut buf)?)?;
        let status = expect_u32(read_field(&mut buf)?)?;

        // `cookie` is optional: peek the next field's type to tell it apart
        // from the first of the two Empty terminators.
        let next = read_field(&mut buf)?;
        let (cookie, terminators_seen) = match next.ty {
            TlvType::Binary => (Some(next.payload), 0),
            TlvType::Empty => (None, 1),
            other => return Err(TicketError::UnknownTlvType(other as u16)),
        };

        for _ in terminators_seen..2 {
            let field = read_field(&mut buf)?;
            if field.ty != TlvType::Empty {
                return Err(TicketError::UnknownTlvType(field.ty as u16));
            }
        }

        Ok(Self {
            serial,
            issuer_id,
            issued_date,
            expire_date,
            user_id,
            online_id,
            region,
            domain,
            service_id,
            status,
            cookie,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_field(out, TlvType::Binary, &self.serial);
        write_field(out, TlvType::U32, &self.issuer_id.to_be_bytes());
        write_field(out, TlvType::Time, &self.issued_date.to_be_bytes());
        write_field(out, TlvType::Time, &self.expire_date.to_be_bytes());
        write_field(out, TlvType::U64, &self.user_id.to_be_bytes());
        write_field(out, TlvType::BString, self.online_id.as_bytes());
        write_field(out, TlvType::Binary, &self.region);
        write_field(out, TlvType::BString, self.domain.as_bytes());
        write_field(out, TlvType::Binary, &self.service_id);
        write_field(out, TlvType::U32, &self.status.to_be_bytes());
        if let Some(cookie) = &self.cookie {
            write_field(out, TlvType::Binary, cookie);
        }
        write_field(out, TlvType::Empty, &[]);
        write_field(out, TlvType::Empty, &[]);
    }
}

/// The `0x3002` signature blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signer: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Signature {
    fn parse(mut buf: &[u8]) -> Result<Self, TicketError> {
        let signer = expect_binary(read_field(&mut buf)?)?;
        let signature = expect_binary(read_field(&mut buf)?)?;
        Ok(Self { signer, signature })
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_field(out, TlvType::Binary, &self.signer);
        write_field(out, TlvType::Binary, &self.signature);
    }

    fn has_content(bytes: &[u8]) -> bool {
        bytes.iter().any(|&b| b != 0)
    }

    /// Per §3: signed when both `signer` and `signature` contain at least
    /// one non-zero byte.
    pub fn is_present(&self) -> bool {
        !self.signer.is_empty()
            && !self.signature.is_empty()
            && Self::has_content(&self.signer)
            && Self::has_content(&self.signature)
    }
}

/// The full ticket: `version`, `size`, userdata blob, signature blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub version: u32,
    pub size: u32,
    pub userdata: UserData,
    pub signature: Signature,
}

impl Ticket {
    pub fn parse(mut buf: &[u8]) -> Result<Self, TicketError> {
        if buf.len() < 8 {
            return Err(TicketError::Truncated(buf.len()));
        }
        let version = buf.get_u32();
        let size = buf.get_u32();

        let blob1_ty = if buf.len() < 4 {
            return Err(TicketError::Truncated(buf.len()));
        } else {
            let mut peek = buf;
            peek.get_u16()
        };
        if blob1_ty != USERDATA_BLOB_TYPE {
            return Err(TicketError::UnknownBlobType(blob1_ty));
        }
        let (userdata, rest) = read_blob(buf)?;
        let userdata = UserData::parse(&userdata)?;
        buf = rest;

        let blob2_ty = {
            if buf.len() < 4 {
                return Err(TicketError::Truncated(buf.len()));
            }
            let mut peek = buf;
            peek.get_u16()
        };
        if blob2_ty != SIGNATURE_BLOB_TYPE {
            return Err(TicketError::UnknownBlobType(blob2_ty));
        }
        let (signature, _rest) = read_blob(buf)?;
        let signature = Signature::parse(&signature)?;

        Ok(Self {
            version,
            size,
            userdata,
            signature,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut userdata_bytes = Vec::new();
        self.userdata.write(&mut userdata_bytes);

        let mut signature_bytes = Vec::new();
        self.signature.write(&mut signature_bytes);

        let mut out = Vec::new();
        out.put_u32(self.version);
        out.put_u32(self.size);
        out.put_u16(USERDATA_BLOB_TYPE);
        out.put_u16(userdata_bytes.len() as u16);
        out.extend_from_slice(&userdata_bytes);
        out.put_u16(SIGNATURE_BLOB_TYPE);
        out.put_u16(signature_bytes.len() as u16);
        out.extend_from_slice(&signature_bytes);
        out
    }

    /// §3: "expired when `now ≥ expire_date`".
    pub fn is_expired(&self, now_unix_ms: u64) -> bool {
        now_unix_ms >= self.userdata.expire_date
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_present()
    }

    /// The first 16 bytes of `cookie`, if present and long enough, forming
    /// the session AES-CWC key the client committed to.
    pub fn cookie_session_key(&self) -> Option<[u8; 16]> {
        let cookie = self.userdata.cookie.as_ref()?;
        if cookie.len() < 16 {
            return None;
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&cookie[..16]);
        Some(key)
    }
}

/// Read a top-level blob header (`type:u16, length:u16`) and return its
/// payload slice plus the remainder of the buffer.
fn read_blob(mut buf: &[u8]) -> Result<(Vec<u8>, &[u8]), TicketError> {
    if buf.len() < 4 {
        return Err(TicketError::Truncated(buf.len()));
    }
    let _ty = buf.get_u16();
    let len = buf.get_u16() as usize;
    if buf.len() < len {
        return Err(TicketError::Truncated(buf.len()));
    }
    let payload = buf[..len].to_vec();
    Ok((payload, &buf[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket(expire_date: u64, cookie: Option<Vec<u8>>) -> Ticket {
        Ticket {
            version: 1,
            size: 0,
            userdata: UserData {
                serial: vec![1, 2, 3, 4],
                issuer_id: 42,
                issued_date: 1_700_000_000_000,
                expire_date,
                user_id: 0xDEAD_BEEF,
                online_id: "pilot_01".to_string(),
                region: vec![0x55, 0x53],
                domain: "ac5.example".to_string(),
                service_id: vec![0x00, 0x01],
                status: 0,
                cookie,
            },
            signature: Signature {
                signer: vec![1, 2, 3],
                signature: vec![4, 5, 6],
            },
        }
    }

    #[test]
    fn ticket_roundtrip_with_cookie() {
        let cookie = (0u8..20).collect::<Vec<_>>();
        let ticket = sample_ticket(2_000_000_000_000, Some(cookie));
        let bytes = ticket.to_bytes();
        let parsed = Ticket::parse(&bytes).unwrap();
        assert_eq!(parsed, ticket);
    }

    #[test]
    fn ticket_roundtrip_without_cookie() {
        let ticket = sample_ticket(2_000_000_000_000, None);
        let bytes = ticket.to_bytes();
        let parsed = Ticket::parse(&bytes).unwrap();
        assert_eq!(parsed, ticket);
        assert!(parsed.userdata.cookie.is_none());
    }

    #[test]
    fn expired_when_now_equals_or_exceeds_expire_date() {
        let ticket = sample_ticket(1_000, None);
        assert!(ticket.is_expired(1_000));
        assert!(ticket.is_expired(1_001));
        assert!(!ticket.is_expired(999));
    }

    #[test]
    fn unsigned_when_signer_or_signature_all_zero() {
        let mut ticket = sample_ticket(1_000, None);
        ticket.signature.signer = vec![0, 0, 0];
        ticket.signature.signature = vec![0, 0, 0];
        assert!(!ticket.is_signed());

        ticket.signature.signer = vec![0, 1, 0];
        assert!(ticket.is_signed());
    }

    #[test]
    fn cookie_session_key_takes_first_16_bytes() {
        let cookie: Vec<u8> = (0u8..24).collect();
        let ticket = sample_ticket(1_000, Some(cookie.clone()));
        let key = ticket.cookie_session_key().unwrap();
        assert_eq!(&key[..], &cookie[..16]);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let err = Ticket::parse(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, TicketError::Truncated(_)));
    }
}
