// src/esl/codec.rs
use bytes::BytesMut;
use std::collections::HashMap;
use std::io;
use tokio_util::codec::Decoder;

use crate::esl::event::EslEvent;

/// Frames larger than this without a blank line are treated as garbage
const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// One message from the event socket: a header block and an optional
/// `Content-Length` body
#[derive(Debug, Clone, Default)]
pub struct EslFrame {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslFrame {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.content_type(), Some("command/reply") | Some("api/response"))
    }

    /// `Reply-Text` for command replies, the body for api responses
    pub fn reply_text(&self) -> &str {
        match self.content_type() {
            Some("api/response") => self.body.as_deref().unwrap_or("").trim(),
            _ => self.header("Reply-Text").unwrap_or("").trim(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.reply_text().starts_with("+OK")
    }

    pub fn into_event(self) -> Option<EslEvent> {
        match self.content_type() {
            Some("text/event-plain") => self.body.as_deref().and_then(EslEvent::parse_plain),
            _ => None,
        }
    }
}

/// Splits the socket byte stream into `EslFrame`s
#[derive(Debug, Default)]
pub struct EslCodec;

impl Decoder for EslCodec {
    type Item = EslFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Stray newlines between frames
        let leading = src.iter().take_while(|b| **b == b'\n').count();
        if leading > 0 {
            let _ = src.split_to(leading);
        }

        let Some(header_end) = src.windows(2).position(|w| w == b"\n\n") else {
            if src.len() > MAX_HEADER_BLOCK {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "ESL header block too large",
                ));
            }
            return Ok(None);
        };

        let header_text = std::str::from_utf8(&src[..header_end])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let headers = parse_headers(header_text);

        let content_length = match headers.get("Content-Length") {
            Some(value) => value.parse::<usize>().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid Content-Length: {}", value),
                )
            })?,
            None => 0,
        };

        let body_start = header_end + 2;
        let frame_len = body_start + content_length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let body = if content_length > 0 {
            Some(String::from_utf8_lossy(&frame[body_start..]).into_owned())
        } else {
            None
        };

        Ok(Some(EslFrame { headers, body }))
    }
}

fn parse_headers(text: &str) -> HashMap<String, String> {
    text.split('\n')
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let pos = line.find(':')?;
            Some((line[..pos].trim().to_string(), line[pos + 1..].trim().to_string()))
        })
        .collect()
}
