use crate::msgs::codec::{Codec, InvalidMessage, LengthPrefixedBuffer, ListLength, Reader, u24};
use crate::msgs::enums::{
    CipherSuite, Compression, ContentType, ECPointFormat, ExtensionType, HandshakeType,
    MaxFragmentLength, NamedGroup, ProtocolVersion, SignatureScheme,
};

/// Size of the TLS record header: type, version, length.
pub(crate) const RECORD_HEADER_LEN: usize = 5;

/// A minimal TLS1.2 ClientHello, as sent by the fragment-length probe.
///
/// This is never answered with a full handshake; it only exists to learn
/// whether the peer echoes `max_fragment_length`.
#[derive(Debug)]
pub(crate) struct ProbeClientHello<'a> {
    pub(crate) random: [u8; 32],
    pub(crate) cipher_suites: &'a [CipherSuite],
    pub(crate) server_name: Option<&'a str>,
    pub(crate) max_fragment_length: MaxFragmentLength,
}

const PROBE_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
    SignatureScheme::ECDSA_NISTP521_SHA512,
    SignatureScheme::RSA_PKCS1_SHA224,
    SignatureScheme::ECDSA_SHA224,
    SignatureScheme::RSA_PKCS1_SHA1,
    SignatureScheme::ECDSA_SHA1_Legacy,
];

const PROBE_GROUPS: &[NamedGroup] = &[
    NamedGroup::X25519,
    NamedGroup::secp256r1,
    NamedGroup::secp384r1,
    NamedGroup::secp521r1,
];

impl ProbeClientHello<'_> {
    /// Encodes the hello as one complete handshake record.
    pub(crate) fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.cipher_suites.len() * 2);
        ContentType::Handshake.encode(&mut out);
        ProtocolVersion::TLSv1_2.encode(&mut out);
        {
            let record = LengthPrefixedBuffer::new(ListLength::U16, &mut out);
            HandshakeType::ClientHello.encode(record.buf);
            let body = LengthPrefixedBuffer::new(ListLength::U24, record.buf);
            self.encode_body(body.buf);
        }
        out
    }

    fn encode_body(&self, bytes: &mut Vec<u8>) {
        ProtocolVersion::TLSv1_2.encode(bytes);
        bytes.extend_from_slice(&self.random);
        // empty session id
        0u8.encode(bytes);

        {
            let suites = LengthPrefixedBuffer::new(ListLength::U16, bytes);
            for suite in self.cipher_suites {
                suite.encode(suites.buf);
            }
        }

        {
            let compressions = LengthPrefixedBuffer::new(ListLength::U8, bytes);
            Compression::Null.encode(compressions.buf);
        }

        let extensions = LengthPrefixedBuffer::new(ListLength::U16, bytes);

        ExtensionType::SignatureAlgorithms.encode(extensions.buf);
        {
            let ext = LengthPrefixedBuffer::new(ListLength::U16, extensions.buf);
            let list = LengthPrefixedBuffer::new(ListLength::U16, ext.buf);
            for scheme in PROBE_SIGNATURE_SCHEMES {
                scheme.encode(list.buf);
            }
        }

        ExtensionType::EllipticCurves.encode(extensions.buf);
        {
            let ext = LengthPrefixedBuffer::new(ListLength::U16, extensions.buf);
            let list = LengthPrefixedBuffer::new(ListLength::U16, ext.buf);
            for group in PROBE_GROUPS {
                group.encode(list.buf);
            }
        }

        ExtensionType::ECPointFormats.encode(extensions.buf);
        {
            let ext = LengthPrefixedBuffer::new(ListLength::U16, extensions.buf);
            let list = LengthPrefixedBuffer::new(ListLength::U8, ext.buf);
            ECPointFormat::Uncompressed.encode(list.buf);
        }

        ExtensionType::MaxFragmentLength.encode(extensions.buf);
        {
            let ext = LengthPrefixedBuffer::new(ListLength::U16, extensions.buf);
            self.max_fragment_length.encode(ext.buf);
        }

        if let Some(name) = self.server_name {
            ExtensionType::ServerName.encode(extensions.buf);
            let ext = LengthPrefixedBuffer::new(ListLength::U16, extensions.buf);
            let list = LengthPrefixedBuffer::new(ListLength::U16, ext.buf);
            // name_type: host_name
            0u8.encode(list.buf);
            let host = LengthPrefixedBuffer::new(ListLength::U16, list.buf);
            host.buf.extend_from_slice(name.as_bytes());
        }
    }
}

/// The parts of a ServerHello the probe cares about.
#[derive(Debug)]
pub(crate) struct ServerHelloSummary {
    pub(crate) version: ProtocolVersion,
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) max_fragment_length: Option<MaxFragmentLength>,
}

impl ServerHelloSummary {
    /// Reads the handshake message carried by one record payload.
    ///
    /// `payload` excludes the five-byte record header.
    pub(crate) fn read_payload(payload: &[u8]) -> Result<Self, InvalidMessage> {
        let mut r = Reader::init(payload);
        let typ = HandshakeType::read(&mut r)?;
        if typ != HandshakeType::ServerHello {
            return Err(InvalidMessage::UnexpectedMessage("ServerHello"));
        }

        let len = usize::from(u24::read(&mut r)?);
        let mut body = r.sub(len)?;

        let version = ProtocolVersion::read(&mut body)?;
        body.take(32)
            .ok_or(InvalidMessage::MissingData("Random"))?;
        let session_id_len = usize::from(u8::read(&mut body)?);
        body.take(session_id_len)
            .ok_or(InvalidMessage::MissingData("SessionId"))?;
        let cipher_suite = CipherSuite::read(&mut body)?;
        Compression::read(&mut body)?;

        let mut max_fragment_length = None;
        if body.any_left() {
            let ext_len = usize::from(u16::read(&mut body)?);
            let mut exts = body.sub(ext_len)?;
            while exts.any_left() {
                let typ = ExtensionType::read(&mut exts)?;
                let len = usize::from(u16::read(&mut exts)?);
                let mut data = exts.sub(len)?;
                if typ == ExtensionType::MaxFragmentLength {
                    max_fragment_length = Some(MaxFragmentLength::read(&mut data)?);
                    data.expect_empty("MaxFragmentLength")?;
                }
            }
        }

        Ok(Self {
            version,
            cipher_suite,
            max_fragment_length,
        })
    }
}

/// Splits a record header into content type and payload length.
pub(crate) fn read_record_header(
    header: &[u8; RECORD_HEADER_LEN],
) -> Result<(ContentType, usize), InvalidMessage> {
    let mut r = Reader::init(header);
    let typ = ContentType::read(&mut r)?;
    ProtocolVersion::read(&mut r)?;
    let len = usize::from(u16::read(&mut r)?);
    Ok((typ, len))
}
