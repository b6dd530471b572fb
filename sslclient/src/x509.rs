//! Just enough DER to pull the issuer, subject and public key out of a
//! certificate.  The certificate is not validated except for basic
//! syntactic correctness.

use crate::msgs::codec::{Codec, InvalidMessage, Reader};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_EXPLICIT_VERSION: u8 = 0xa0;

/// The pieces of a `TBSCertificate` we look at.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct CertificateParts<'a> {
    /// The issuer `Name`, including its SEQUENCE header.
    pub(crate) issuer: &'a [u8],
    /// The subject `Name`, including its SEQUENCE header.
    pub(crate) subject: &'a [u8],
    /// The `SubjectPublicKeyInfo`, including its SEQUENCE header.
    pub(crate) spki: &'a [u8],
}

impl<'a> CertificateParts<'a> {
    pub(crate) fn parse(der: &'a [u8]) -> Result<Self, InvalidMessage> {
        let mut outer = Reader::init(der);
        let mut cert = expect_value(&mut outer, TAG_SEQUENCE)?;
        outer.expect_empty("Certificate")?;

        let mut tbs = expect_value(&mut cert, TAG_SEQUENCE)?;
        // signatureAlgorithm
        expect_value(&mut cert, TAG_SEQUENCE)?;
        // signatureValue
        expect_value(&mut cert, TAG_BIT_STRING)?;
        cert.expect_empty("Certificate")?;

        if peek_tag(&tbs) == Some(TAG_EXPLICIT_VERSION) {
            expect_value(&mut tbs, TAG_EXPLICIT_VERSION)?;
        }
        // serialNumber
        expect_value(&mut tbs, TAG_INTEGER)?;
        // signature
        expect_value(&mut tbs, TAG_SEQUENCE)?;
        let issuer = expect_tlv(&mut tbs, TAG_SEQUENCE)?;
        // validity
        expect_value(&mut tbs, TAG_SEQUENCE)?;
        let subject = expect_tlv(&mut tbs, TAG_SEQUENCE)?;
        let spki = expect_tlv(&mut tbs, TAG_SEQUENCE)?;

        Ok(Self {
            issuer,
            subject,
            spki,
        })
    }

    /// Whether the certificate names itself as its issuer.
    pub(crate) fn is_self_issued(&self) -> bool {
        self.issuer == self.subject
    }
}

fn peek_tag(r: &Reader<'_>) -> Option<u8> {
    let mut probe = r.clone();
    u8::read(&mut probe).ok()
}

/// Reads one TLV with tag `tag`, returning a reader over its value.
fn expect_value<'a>(r: &mut Reader<'a>, tag: u8) -> Result<Reader<'a>, InvalidMessage> {
    let (_, value) = read_tlv(r, tag)?;
    Ok(Reader::init(value))
}

/// Reads one TLV with tag `tag`, returning the whole encoding.
fn expect_tlv<'a>(r: &mut Reader<'a>, tag: u8) -> Result<&'a [u8], InvalidMessage> {
    read_tlv(r, tag).map(|(whole, _)| whole)
}

fn read_tlv<'a>(r: &mut Reader<'a>, tag: u8) -> Result<(&'a [u8], &'a [u8]), InvalidMessage> {
    let start = r.clone();
    let got = u8::read(r)?;
    if got != tag {
        return Err(InvalidMessage::UnexpectedMessage("DER tag"));
    }

    let first = u8::read(r)?;
    let (len, len_bytes) = match first {
        0x00..=0x7f => (usize::from(first), 0),
        0x81 => (usize::from(u8::read(r)?), 1),
        0x82 => (usize::from(u16::read(r)?), 2),
        0x83 => {
            let b = r
                .take(3)
                .ok_or(InvalidMessage::MissingData("DER length"))?;
            (
                usize::from(b[0]) << 16 | usize::from(b[1]) << 8 | usize::from(b[2]),
                3,
            )
        }
        // indefinite or absurdly long lengths are not DER certificates
        _ => return Err(InvalidMessage::UnexpectedMessage("DER length")),
    };

    let value = r
        .take(len)
        .ok_or(InvalidMessage::MessageTooShort)?;
    let header_len = 2 + len_bytes;
    let mut from_start = start;
    let whole = from_start
        .take(header_len + len)
        .ok_or(InvalidMessage::MessageTooShort)?;
    Ok((whole, value))
}
