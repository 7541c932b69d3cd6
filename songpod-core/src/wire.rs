//! Framing: length-prefix (4 bytes LE) + TSP body.
//!
//! Body layout: `[u8 type][u32 LE song_id][u32 LE payload_len][payload]`.

use crate::protocol::{Message, MessageType};

const LEN_SIZE: usize = 4;
/// Fixed part of a body: type tag, song id, payload length.
const HEADER_SIZE: usize = 1 + 4 + 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into a single frame: 4 bytes LE length + body.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = msg.payload();
    let body_len = HEADER_SIZE + payload.len();
    if body_len > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.push(msg.message_type().as_byte());
    out.extend_from_slice(&msg.song_id().to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Error encoding a message into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMoreData` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMoreData);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let len = len as usize;
    if len < HEADER_SIZE {
        return Err(FrameDecodeError::Malformed("frame shorter than header"));
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMoreData);
    }
    let msg = decode_body(&bytes[LEN_SIZE..LEN_SIZE + len])?;
    Ok((msg, LEN_SIZE + len))
}

fn decode_body(body: &[u8]) -> Result<Message, FrameDecodeError> {
    let kind = MessageType::from_byte(body[0])
        .ok_or(FrameDecodeError::Malformed("unknown message type"))?;
    let song_id = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
    let payload_len = u32::from_le_bytes([body[5], body[6], body[7], body[8]]) as usize;
    if HEADER_SIZE + payload_len != body.len() {
        return Err(FrameDecodeError::Malformed("payload length mismatch"));
    }
    if payload_len != 0 && !kind.has_payload() {
        return Err(FrameDecodeError::Malformed("unexpected payload"));
    }
    let payload = body[HEADER_SIZE..].to_vec();
    let msg = match kind {
        MessageType::Init => Message::Init { payload },
        MessageType::List => Message::List { payload },
        MessageType::Info => Message::Info { song_id },
        MessageType::Play => Message::Play { song_id },
        MessageType::Stop => Message::Stop { song_id },
        MessageType::Quit => Message::Quit,
    };
    Ok(msg)
}

/// Error decoding a frame (need more bytes, too large, or a structurally invalid body).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMoreData,
    #[error("frame too large")]
    TooLarge,
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// Accumulates bytes from successive reads and yields whole messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, `Ok(None)` while the frame is still incomplete.
    /// Consumed bytes are dropped from the buffer; bytes of a following frame are kept.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameDecodeError> {
        match decode_frame(&self.buf) {
            Ok((msg, n)) => {
                self.buf.drain(..n);
                Ok(Some(msg))
            }
            Err(FrameDecodeError::NeedMoreData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Message> {
        vec![
            Message::Init {
                payload: b"1: X, Y> x.mp3".to_vec(),
            },
            Message::list_request(),
            Message::List {
                payload: vec![0xab; 300],
            },
            Message::Info { song_id: 12 },
            Message::Play { song_id: 1 },
            Message::Play { song_id: u32::MAX },
            Message::Stop { song_id: 3 },
            Message::Quit,
        ]
    }

    #[test]
    fn roundtrip_all_types() {
        for msg in samples() {
            let frame = encode_frame(&msg).unwrap();
            let (decoded, n) = decode_frame(&frame).unwrap();
            assert_eq!(n, frame.len());
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn layout_is_stable() {
        let frame = encode_frame(&Message::Play { song_id: 0x0102_0304 }).unwrap();
        assert_eq!(frame, vec![9, 0, 0, 0, 3, 4, 3, 2, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn partial_read_need_more() {
        let msg = Message::Init {
            payload: vec![7; 40],
        };
        let frame = encode_frame(&msg).unwrap();
        for cut in 0..frame.len() {
            assert_eq!(
                decode_frame(&frame[..cut]).unwrap_err(),
                FrameDecodeError::NeedMoreData,
                "prefix of {} bytes",
                cut
            );
        }
    }

    #[test]
    fn split_at_every_boundary() {
        for msg in samples() {
            let frame = encode_frame(&msg).unwrap();
            for cut in 0..=frame.len() {
                let mut fb = FrameBuffer::new();
                fb.extend(&frame[..cut]);
                let first = fb.next_message().unwrap();
                fb.extend(&frame[cut..]);
                let second = fb.next_message().unwrap();
                let got: Vec<Message> = first.into_iter().chain(second).collect();
                assert_eq!(got, vec![msg.clone()], "cut at {}", cut);
                assert!(fb.is_empty());
                assert_eq!(fb.next_message().unwrap(), None);
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let msg = Message::List {
            payload: b"catalog".to_vec(),
        };
        let frame = encode_frame(&msg).unwrap();
        let mut fb = FrameBuffer::new();
        let mut seen = Vec::new();
        for b in &frame {
            fb.extend(std::slice::from_ref(b));
            if let Some(m) = fb.next_message().unwrap() {
                seen.push(m);
            }
        }
        assert_eq!(seen, vec![msg]);
    }

    #[test]
    fn multiple_messages() {
        let a = Message::Play { song_id: 4 };
        let b = Message::Quit;
        let mut buf = encode_frame(&a).unwrap();
        let n1 = buf.len();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        let (m1, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(consumed, n1);
        let (m2, _) = decode_frame(&buf[consumed..]).unwrap();
        assert_eq!(m1, a);
        assert_eq!(m2, b);

        let mut fb = FrameBuffer::new();
        fb.extend(&buf);
        assert_eq!(fb.next_message().unwrap(), Some(a));
        assert_eq!(fb.next_message().unwrap(), Some(b));
        assert_eq!(fb.next_message().unwrap(), None);
    }

    #[test]
    fn unknown_type_tag_is_malformed() {
        let mut frame = encode_frame(&Message::Quit).unwrap();
        frame[4] = 9;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_body_is_malformed() {
        // Declared length 5 cannot hold the 9-byte header.
        let frame = [5u8, 0, 0, 0, 3, 1, 0, 0, 0];
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Malformed(_))
        ));
        // Rejected as soon as the length prefix is known.
        assert!(matches!(
            decode_frame(&frame[..4]),
            Err(FrameDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn payload_length_mismatch_is_malformed() {
        let mut frame = encode_frame(&Message::Init {
            payload: vec![1, 2, 3],
        })
        .unwrap();
        // Claim 4 payload bytes inside a body that holds 3.
        frame[9] = 4;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn payload_on_play_is_malformed() {
        let mut frame = vec![12u8, 0, 0, 0, 3, 1, 0, 0, 0, 3, 0, 0, 0];
        frame.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let frame = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert_eq!(decode_frame(&frame).unwrap_err(), FrameDecodeError::TooLarge);
    }

    #[test]
    fn frame_buffer_surfaces_errors() {
        let mut fb = FrameBuffer::new();
        let mut frame = encode_frame(&Message::Quit).unwrap();
        frame[4] = 200;
        fb.extend(&frame);
        assert!(fb.next_message().is_err());
    }
}
