//! Stream framing for concatenated JSON values.
//!
//! OVSDB puts JSON-RPC messages back to back on the stream with no length
//! prefix or delimiter. The framer buffers raw bytes and yields each complete
//! top-level value as soon as its closing byte has arrived.

use serde_json::Value as Json;

use super::error::{OvsdbError, OvsdbResult};

/// Incremental decoder for a byte stream of concatenated JSON values.
///
/// Each byte is scanned once: the framer tracks bracket depth and string
/// state across reads and hands a value to `serde_json` only after its
/// closing bracket has arrived. Top-level values must be objects or arrays,
/// which is all JSON-RPC sends.
#[derive(Debug)]
pub struct JsonFramer {
    buf: Vec<u8>,
    /// Start of the unconsumed bytes in `buf`
    head: usize,
    /// Bytes of the current value already scanned, counted from `head`
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    max_message_size: usize,
}

impl JsonFramer {
    pub fn new(max_message_size: usize) -> Self {
        JsonFramer {
            buf: Vec::new(),
            head: 0,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            max_message_size,
        }
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.head > 0 {
            self.buf.drain(..self.head);
            self.head = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Take the next complete value, if one is buffered.
    ///
    /// Returns `Ok(None)` while the next value is still incomplete. Invalid
    /// JSON, or a value larger than the size limit, is an error and leaves
    /// the framer unusable.
    pub fn next_message(&mut self) -> OvsdbResult<Option<Json>> {
        if self.scanned == 0 {
            let pending = &self.buf[self.head..];
            let Some(start) = pending.iter().position(|b| !b.is_ascii_whitespace()) else {
                self.buf.clear();
                self.head = 0;
                return Ok(None);
            };
            self.head += start;
            if !matches!(self.buf[self.head], b'{' | b'[') {
                return Err(OvsdbError::MalformedMessage {
                    message: format!(
                        "expected a JSON object or array, found byte {:?}",
                        char::from(self.buf[self.head])
                    ),
                });
            }
        }

        let Some(len) = self.scan() else {
            if self.buffered() > self.max_message_size {
                return Err(self.too_large());
            }
            return Ok(None);
        };
        if len > self.max_message_size {
            return Err(self.too_large());
        }

        let frame = &self.buf[self.head..self.head + len];
        let value = serde_json::from_slice(frame).map_err(|e| OvsdbError::MalformedMessage {
            message: format!("invalid JSON on stream: {e}"),
        })?;
        self.head += len;
        self.scanned = 0;
        Ok(Some(value))
    }

    /// Continue scanning the current value. Returns its length once the
    /// closing bracket is found.
    fn scan(&mut self) -> Option<usize> {
        let pending = &self.buf[self.head..];
        for (offset, &byte) in pending.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(offset + 1);
                    }
                }
                _ => {}
            }
        }
        self.scanned = pending.len();
        None
    }

    fn too_large(&self) -> OvsdbError {
        OvsdbError::MalformedMessage {
            message: format!("message exceeds {} bytes", self.max_message_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(framer: &mut JsonFramer) -> Vec<Json> {
        let mut out = Vec::new();
        while let Some(v) = framer.next_message().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut framer = JsonFramer::new(1024);
        framer.push(br#"{"id":1,"result":[],"error":null}{"id":2,"result":{},"error":null}"#);
        let msgs = drain(&mut framer);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["id"], json!(2));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_message_split_across_reads() {
        let text = r#"{"method":"update","params":["m",{"Bridge":{}}],"id":null}"#;
        let (a, b) = text.split_at(17);
        let mut framer = JsonFramer::new(1024);
        framer.push(a.as_bytes());
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b.as_bytes());
        let msg = framer.next_message().unwrap().unwrap();
        assert_eq!(msg["method"], json!("update"));
    }

    #[test]
    fn test_whitespace_between_messages() {
        let mut framer = JsonFramer::new(1024);
        framer.push(b"  {\"a\":1}\n\n {\"b\":2}  \n");
        assert_eq!(drain(&mut framer), vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut framer = JsonFramer::new(1024);
        framer.push(br#"{"comment":"}{ not a boundary"}"#);
        let msgs = drain(&mut framer);
        assert_eq!(msgs, vec![json!({"comment": "}{ not a boundary"})]);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let mut framer = JsonFramer::new(1024);
        framer.push(b"{\"a\": nope}");
        assert!(matches!(
            framer.next_message(),
            Err(OvsdbError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_oversized_partial_message() {
        let mut framer = JsonFramer::new(16);
        framer.push(b"{\"padding\": \"aaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(framer.next_message().is_err());
    }

    #[test]
    fn test_oversized_complete_message_in_one_read() {
        let mut framer = JsonFramer::new(16);
        framer.push(br#"{"padding":"aaaaaaaaaaaaaaaaaaaaaaaa"}"#);
        assert!(matches!(
            framer.next_message(),
            Err(OvsdbError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_escaped_quotes_and_brackets_in_strings() {
        let mut framer = JsonFramer::new(1024);
        framer.push(br#"{"a":"\"]}\\"}[1,"\\\"["]"#);
        assert_eq!(
            drain(&mut framer),
            vec![json!({"a": "\"]}\\"}), json!([1, "\\\"["])]
        );
    }

    #[test]
    fn test_scalar_top_level_is_rejected() {
        let mut framer = JsonFramer::new(1024);
        framer.push(b"42 ");
        assert!(framer.next_message().is_err());
    }

    #[test]
    fn test_large_message_in_small_reads() {
        let rows: serde_json::Map<String, Json> = (0..100_000)
            .map(|i| {
                (
                    format!("row-{i:08}"),
                    json!({"new": {"name": format!("br{i}"), "ports": ["set", []]}}),
                )
            })
            .collect();
        let message = json!({"id": 7, "result": {"Bridge": rows}, "error": null});
        let bytes = serde_json::to_vec(&message).unwrap();
        assert!(bytes.len() > 4 << 20);

        let mut framer = JsonFramer::new(16 << 20);
        let mut chunks = bytes.chunks(8 * 1024).peekable();
        while let Some(chunk) = chunks.next() {
            framer.push(chunk);
            let next = framer.next_message().unwrap();
            if chunks.peek().is_some() {
                assert!(next.is_none());
            } else {
                assert_eq!(next, Some(message.clone()));
            }
        }
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.scanned, 0);
    }
}
