//! Multipart framing and HMAC signing for Jupyter messages.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{error::WireError, message::JupyterMessage};

const DELIMITER: &[u8] = b"<IDS|MSG>";

// signature, header, parent_header, metadata, content
const MIN_FRAMES_AFTER_DELIMITER: usize = 5;

type HmacSha256 = Hmac<Sha256>;

/// Signing identity shared by every message this client sends.
#[derive(Clone)]
pub struct Session {
    id: String,
    key: Vec<u8>,
}

impl Session {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // An empty key disables signing.
    fn mac(&self) -> Option<HmacSha256> {
        if self.key.is_empty() {
            return None;
        }
        HmacSha256::new_from_slice(&self.key).ok()
    }

    pub fn encode(&self, message: &JupyterMessage) -> Result<Vec<Bytes>, WireError> {
        let parts = [
            serde_json::to_vec(&message.header)?,
            serde_json::to_vec(&message.parent_header)?,
            serde_json::to_vec(&message.metadata)?,
            serde_json::to_vec(&message.content)?,
        ];

        let signature = match self.mac() {
            Some(mut mac) => {
                for part in &parts {
                    mac.update(part);
                }
                hex::encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        };

        let mut frames = message.identities.clone();
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.extend(parts.into_iter().map(Bytes::from));
        frames.extend(message.buffers.iter().cloned());

        Ok(frames)
    }

    pub fn decode(&self, mut frames: Vec<Bytes>) -> Result<JupyterMessage, WireError> {
        if frames.is_empty() {
            return Err(WireError::Empty);
        }

        let delimiter = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or(WireError::MissingDelimiter)?;

        let mut rest = frames.split_off(delimiter);
        let identities = frames;

        let available = rest.len() - 1;
        if available < MIN_FRAMES_AFTER_DELIMITER {
            return Err(WireError::TooFewFrames {
                expected: MIN_FRAMES_AFTER_DELIMITER,
                actual: available,
            });
        }

        let buffers = rest.split_off(1 + MIN_FRAMES_AFTER_DELIMITER);
        let (signature, parts) = (&rest[1], &rest[2..]);

        if let Some(mut mac) = self.mac() {
            for part in parts {
                mac.update(part);
            }
            let expected = hex::decode(signature).map_err(|_| WireError::InvalidSignature)?;
            mac.verify_slice(&expected)
                .map_err(|_| WireError::InvalidSignature)?;
        }

        Ok(JupyterMessage {
            identities,
            header: serde_json::from_slice(&parts[0])?,
            parent_header: serde_json::from_slice(&parts[1])?,
            metadata: serde_json::from_slice(&parts[2])?,
            content: serde_json::from_slice(&parts[3])?,
            buffers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use serde_json::json;

    fn sample() -> JupyterMessage {
        let mut message =
            JupyterMessage::new("s1", "stream", json!({ "name": "stdout", "text": "hi" }));
        message.identities = vec![Bytes::from_static(b"kernel.abc.stream")];
        message.parent_header = json!({ "msg_id": "parent-1" });
        message
    }

    #[googletest::test]
    fn signed_message_decodes_back() {
        let session = Session::new("secret");
        let frames = session.encode(&sample()).unwrap();

        let decoded = session.decode(frames).unwrap();

        expect_that!(decoded, eq(sample_with_same_header(&decoded)));
        expect_that!(decoded.parent_id(), some(eq("parent-1")));
        expect_that!(decoded.identities, len(eq(1)));
    }

    fn sample_with_same_header(decoded: &JupyterMessage) -> JupyterMessage {
        let mut expected = sample();
        expected.header = decoded.header.clone();
        expected
    }

    #[googletest::test]
    fn signature_is_hex_hmac_of_json_frames() {
        let session = Session::new("secret");
        let frames = session.encode(&sample()).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        for part in &frames[3..7] {
            mac.update(part);
        }

        expect_that!(frames[1].as_ref(), eq(DELIMITER));
        expect_that!(
            String::from_utf8(frames[2].to_vec()).unwrap(),
            eq(hex::encode(mac.finalize().into_bytes()))
        );
    }

    #[googletest::test]
    fn tampered_content_is_rejected() {
        let session = Session::new("secret");
        let mut frames = session.encode(&sample()).unwrap();
        frames[6] = Bytes::from_static(br#"{"name":"stdout","text":"evil"}"#);

        expect_that!(
            matches!(session.decode(frames), Err(WireError::InvalidSignature)),
            eq(true)
        );
    }

    #[googletest::test]
    fn empty_key_sends_and_accepts_unsigned_messages() {
        let session = Session::new("");
        let frames = session.encode(&sample()).unwrap();

        expect_that!(frames[2].is_empty(), eq(true));
        expect_that!(session.decode(frames), ok(anything()));
    }

    #[googletest::test]
    fn frames_without_delimiter_are_rejected() {
        let session = Session::new("secret");
        let frames = vec![Bytes::from_static(b"{}"), Bytes::from_static(b"{}")];

        expect_that!(
            matches!(session.decode(frames), Err(WireError::MissingDelimiter)),
            eq(true)
        );
        expect_that!(
            matches!(session.decode(Vec::new()), Err(WireError::Empty)),
            eq(true)
        );
    }

    #[googletest::test]
    fn truncated_message_is_rejected() {
        let session = Session::new("secret");
        let mut frames = session.encode(&sample()).unwrap();
        frames.truncate(4);

        expect_that!(
            session.decode(frames),
            err(pat!(WireError::TooFewFrames {
                expected: eq(5),
                actual: eq(2)
            }))
        );
    }
}
