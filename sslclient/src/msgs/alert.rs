use crate::msgs::codec::{Codec, InvalidMessage, LengthPrefixedBuffer, ListLength, Reader};
use crate::msgs::enums::{AlertDescription, AlertLevel, ContentType, ProtocolVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlertMessagePayload {
    pub(crate) level: AlertLevel,
    pub(crate) description: AlertDescription,
}

impl AlertMessagePayload {
    pub(crate) fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    /// Encodes this alert as a plaintext TLS1.2 record.
    pub(crate) fn to_record(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7);
        ContentType::Alert.encode(&mut out);
        ProtocolVersion::TLSv1_2.encode(&mut out);
        let body = LengthPrefixedBuffer::new(ListLength::U16, &mut out);
        self.encode(body.buf);
        drop(body);
        out
    }
}

impl Codec<'_> for AlertMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.level.encode(bytes);
        self.description.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let level = AlertLevel::read(r)?;
        let description = AlertDescription::read(r)?;
        r.expect_empty("AlertMessagePayload")
            .map(|_| Self { level, description })
    }
}

/// The records sent to abandon a handshake: `user_canceled` then `close_notify`.
pub(crate) fn abort_records() -> [Vec<u8>; 2] {
    [
        AlertMessagePayload::warning(AlertDescription::UserCanceled).to_record(),
        AlertMessagePayload::warning(AlertDescription::CloseNotify).to_record(),
    ]
}
