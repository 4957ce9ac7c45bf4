//! Chunkcast wire protocol.
//!
//! Chunkcast speaks over two plain UDP channels: a small text-based control
//! channel and a binary broadcast data channel. Neither channel sequences,
//! acknowledges or retransmits anything on its own.
//!
//! ## Control Requests
//!
//! ```text
//! LIST PLS
//! GET <id> PLS
//! PARTS <id> PLS<index><index>...
//! ```
//!
//! Every request ends its text header with the `PLS` marker. `PARTS`
//! appends the requested piece indices as raw 4-byte big-endian integers
//! directly after the marker.
//!
//! ## Control Responses
//!
//! Success responses carry their payload as-is (a JSON listing, or an
//! acknowledgement word). Failures are `SRY <reason>`.
//!
//! ## Data Frame Format
//!
//! ```text
//! ┌────────────────────┬────────────────┬─────────────────────────┐
//! │     File id        │  Piece index   │        Payload          │
//! │  8 bytes (ASCII)   │ 4 bytes (BE)   │  <= chunk size bytes    │
//! └────────────────────┴────────────────┴─────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::FileDescriptor;
use crate::crypto::ID_LEN;
use crate::error::{Error, Result};

/// Marker token closing the text header of every request.
pub const REQUEST_MARKER: &str = "PLS";

/// Marker token opening every error response.
pub const ERROR_MARKER: &str = "SRY";

/// Acknowledgement sent before broadcasting a whole file.
pub const ACK_SENDING: &str = "SENDING";

/// Acknowledgement sent before rebroadcasting requested pieces.
pub const ACK_RESENDING: &str = "RESENDING";

/// Data frame header size in bytes (id + index)
pub const FRAME_HEADER_SIZE: usize = ID_LEN + 4;

const CMD_LIST: &str = "LIST";
const CMD_GET: &str = "GET";
const CMD_PARTS: &str = "PARTS";

/// Size in bytes of a `PARTS` request carrying `count` indices.
#[must_use]
pub const fn parts_request_size(count: usize) -> usize {
    CMD_PARTS.len() + 1 + ID_LEN + 1 + REQUEST_MARKER.len() + count * 4
}

/// An 8-character ASCII file identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId([u8; ID_LEN]);

impl FileId {
    /// Build an identifier from exactly [`ID_LEN`] raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the bytes are not printable ASCII.
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_graphic) {
            Ok(Self(bytes))
        } else {
            Err(Error::MalformedRequest(
                "identifier is not printable ASCII".into(),
            ))
        }
    }

    /// Derive the identifier of a file from its hex checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the checksum is shorter than [`ID_LEN`].
    pub fn from_checksum(checksum: &str) -> Result<Self> {
        crate::crypto::identifier_from_checksum(checksum).parse()
    }

    /// Raw identifier bytes as they appear on the wire.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for FileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; ID_LEN] = s.as_bytes().try_into().map_err(|_| {
            Error::MalformedRequest(format!("identifier '{s}' is not {ID_LEN} characters"))
        })?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.as_str())
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A control request sent by a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for the catalog listing
    List,
    /// Ask for a whole file to be broadcast
    Get(FileId),
    /// Ask for specific pieces to be broadcast again
    Parts {
        /// File identifier
        id: FileId,
        /// Requested piece indices
        indices: Vec<u32>,
    },
}

impl Request {
    /// Encode the request to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::List => format!("{CMD_LIST} {REQUEST_MARKER}").into_bytes(),
            Self::Get(id) => format!("{CMD_GET} {id} {REQUEST_MARKER}").into_bytes(),
            Self::Parts { id, indices } => {
                let mut buf = Vec::with_capacity(parts_request_size(indices.len()));
                buf.extend_from_slice(format!("{CMD_PARTS} {id} {REQUEST_MARKER}").as_bytes());
                for index in indices {
                    buf.extend_from_slice(&index.to_be_bytes());
                }
                buf
            }
        }
    }

    /// Decode a request from a received datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the marker is missing or the
    /// arguments do not fit the command, and [`Error::NotImplemented`] for an
    /// unknown command word.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (header, tail) = split_marker(buf)
            .ok_or_else(|| Error::MalformedRequest("missing request marker".into()))?;

        let header = std::str::from_utf8(header)
            .map_err(|_| Error::MalformedRequest("request header is not text".into()))?;
        let mut words = header.split_ascii_whitespace();
        let command = words
            .next()
            .ok_or_else(|| Error::MalformedRequest("empty request".into()))?;
        let args: Vec<&str> = words.collect();

        match command {
            CMD_LIST => {
                expect_no_payload(&args, 0, tail)?;
                Ok(Self::List)
            }
            CMD_GET => {
                expect_no_payload(&args, 1, tail)?;
                Ok(Self::Get(args[0].parse()?))
            }
            CMD_PARTS => {
                if args.len() != 1 {
                    return Err(Error::MalformedRequest(
                        "PARTS takes exactly one identifier".into(),
                    ));
                }
                if tail.len() % 4 != 0 {
                    return Err(Error::MalformedRequest(format!(
                        "index list of {} bytes is not a multiple of 4",
                        tail.len()
                    )));
                }
                let indices = tail
                    .chunks_exact(4)
                    .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                Ok(Self::Parts {
                    id: args[0].parse()?,
                    indices,
                })
            }
            other => Err(Error::NotImplemented(other.to_string())),
        }
    }
}

/// Split a request at the first ` PLS` marker (or a bare `PLS` header).
fn split_marker(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let marker = REQUEST_MARKER.as_bytes();
    let spaced_len = marker.len() + 1;

    buf.windows(spaced_len)
        .position(|w| w[0] == b' ' && &w[1..] == marker)
        .map(|pos| (&buf[..pos], &buf[pos + spaced_len..]))
}

fn expect_no_payload(args: &[&str], expected: usize, tail: &[u8]) -> Result<()> {
    if args.len() != expected {
        return Err(Error::MalformedRequest(format!(
            "expected {expected} argument(s), got {}",
            args.len()
        )));
    }
    if !tail.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::MalformedRequest(
            "unexpected data after request marker".into(),
        ));
    }
    Ok(())
}

/// Reason carried by an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    /// Identifier not in the catalog
    UnknownFile,
    /// Command word not recognized
    NotImplemented,
    /// Request could not be parsed
    MalformedRequest,
    /// Any other reason text
    Other(String),
}

impl ErrorReason {
    /// Reason text as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::UnknownFile => "UNKNOWN FILE",
            Self::NotImplemented => "NOT IMPLEMENTED",
            Self::MalformedRequest => "MALFORMED REQUEST",
            Self::Other(reason) => reason,
        }
    }

    fn parse(reason: &str) -> Self {
        match reason {
            "UNKNOWN FILE" => Self::UnknownFile,
            "NOT IMPLEMENTED" => Self::NotImplemented,
            "MALFORMED REQUEST" => Self::MalformedRequest,
            other => Self::Other(other.to_string()),
        }
    }

    /// Reason for answering a request that failed with `error`.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::UnknownFile(_) => Self::UnknownFile,
            Error::NotImplemented(_) => Self::NotImplemented,
            Error::MalformedRequest(_) => Self::MalformedRequest,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A control response sent by the sharer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success payload, passed through unchanged
    Success(Vec<u8>),
    /// Error marker followed by a reason
    Refused(ErrorReason),
}

impl Response {
    /// Success response carrying an acknowledgement word.
    #[must_use]
    pub fn ack(word: &str) -> Self {
        Self::Success(word.as_bytes().to_vec())
    }

    /// Success response carrying the catalog listing as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn listing(files: &[FileDescriptor]) -> Result<Self> {
        Ok(Self::Success(serde_json::to_vec(files)?))
    }

    /// Encode the response to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Success(payload) => payload.clone(),
            Self::Refused(reason) => format!("{ERROR_MARKER} {}", reason.as_str()).into_bytes(),
        }
    }

    /// Decode a response. Anything not starting with the error marker is a
    /// success payload.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Self {
        let prefix = ERROR_MARKER.as_bytes();
        match buf.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest[0] == b' ' => {
                let reason = String::from_utf8_lossy(rest);
                Self::Refused(ErrorReason::parse(reason.trim()))
            }
            _ => Self::Success(buf.to_vec()),
        }
    }

    /// Turn the response into its success payload, mapping refusals to errors.
    ///
    /// `id` names the file the request concerned, if any.
    ///
    /// # Errors
    ///
    /// Returns the error matching the refusal reason.
    pub fn into_payload(self, id: Option<&FileId>) -> Result<Vec<u8>> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Refused(ErrorReason::UnknownFile) => Err(Error::UnknownFile(
                id.map_or_else(String::new, ToString::to_string),
            )),
            Self::Refused(ErrorReason::NotImplemented) => {
                Err(Error::NotImplemented("rejected by sharer".into()))
            }
            Self::Refused(ErrorReason::MalformedRequest) => {
                Err(Error::MalformedRequest("rejected by sharer".into()))
            }
            Self::Refused(ErrorReason::Other(reason)) => Err(Error::Remote(reason)),
        }
    }
}

/// Decode a listing payload.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON array of descriptors.
pub fn decode_listing(payload: &[u8]) -> Result<Vec<FileDescriptor>> {
    Ok(serde_json::from_slice(payload)?)
}

/// One piece of a file on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// File identifier
    pub id: FileId,
    /// Piece index
    pub index: u32,
    /// Piece bytes
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Encode the frame to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a frame from a received datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the datagram is shorter than the
    /// header or the identifier is not ASCII.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(Error::MalformedFrame { len: buf.len() });
        }

        let mut id_bytes = [0u8; ID_LEN];
        id_bytes.copy_from_slice(&buf[..ID_LEN]);
        let id = FileId::from_bytes(id_bytes).map_err(|_| Error::MalformedFrame { len: buf.len() })?;

        let index = u32::from_be_bytes([
            buf[ID_LEN],
            buf[ID_LEN + 1],
            buf[ID_LEN + 2],
            buf[ID_LEN + 3],
        ]);

        Ok(Self {
            id,
            index,
            payload: buf[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> FileId {
        "0a1b2c3d".parse().unwrap()
    }

    #[test]
    fn test_request_text_forms() {
        assert_eq!(Request::List.encode(), b"LIST PLS");
        assert_eq!(Request::Get(id()).encode(), b"GET 0a1b2c3d PLS");
    }

    #[test]
    fn test_parts_request_layout() {
        let request = Request::Parts {
            id: id(),
            indices: vec![1, 256],
        };
        let encoded = request.encode();

        assert_eq!(&encoded[..18], b"PARTS 0a1b2c3d PLS");
        assert_eq!(&encoded[18..], &[0, 0, 0, 1, 0, 0, 1, 0]);
        assert_eq!(encoded.len(), parts_request_size(2));
        assert_eq!(Request::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_parts_indices_containing_marker_bytes() {
        // 0x20504c53 is " PLS" in ASCII
        let request = Request::Parts {
            id: id(),
            indices: vec![0x2050_4c53, 7],
        };
        assert_eq!(Request::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn test_decode_get() {
        assert_eq!(Request::decode(b"GET 0a1b2c3d PLS").unwrap(), Request::Get(id()));
    }

    #[test]
    fn test_decode_missing_marker() {
        let err = Request::decode(b"LIST").unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = Request::decode(b"DELETE 0a1b2c3d PLS").unwrap_err();
        assert!(matches!(err, Error::NotImplemented(ref word) if word == "DELETE"));
    }

    #[test]
    fn test_decode_bad_arguments() {
        assert!(matches!(
            Request::decode(b"GET PLS").unwrap_err(),
            Error::MalformedRequest(_)
        ));
        assert!(matches!(
            Request::decode(b"GET toolongid PLS").unwrap_err(),
            Error::MalformedRequest(_)
        ));
        assert!(matches!(
            Request::decode(b"PARTS 0a1b2c3d PLS\x00\x00\x01").unwrap_err(),
            Error::MalformedRequest(_)
        ));
    }

    #[test]
    fn test_response_refusal() {
        let response = Response::Refused(ErrorReason::UnknownFile);
        assert_eq!(response.encode(), b"SRY UNKNOWN FILE");

        let decoded = Response::decode(b"SRY UNKNOWN FILE");
        assert_eq!(decoded, response);
        let err = decoded.into_payload(Some(&id())).unwrap_err();
        assert!(matches!(err, Error::UnknownFile(ref f) if f == "0a1b2c3d"));
    }

    #[test]
    fn test_response_other_reason_is_remote() {
        let err = Response::decode(b"SRY BUSY").into_payload(None).unwrap_err();
        assert!(matches!(err, Error::Remote(ref r) if r == "BUSY"));
    }

    #[test]
    fn test_response_success_passthrough() {
        assert_eq!(
            Response::decode(b"SENDING").into_payload(None).unwrap(),
            b"SENDING"
        );
        assert_eq!(Response::decode(b"SRYX"), Response::Success(b"SRYX".to_vec()));
    }

    #[test]
    fn test_listing_shape() {
        let files = vec![FileDescriptor {
            id: id(),
            name: "notes.txt".into(),
            size: 2500,
            parts: 3,
            sum: "0a1b2c3d".repeat(8),
        }];
        let Response::Success(payload) = Response::listing(&files).unwrap() else {
            panic!("listing must be a success response");
        };

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value[0]["id"], "0a1b2c3d");
        assert_eq!(value[0]["parts"], 3);
        assert_eq!(decode_listing(&payload).unwrap(), files);
    }

    #[test]
    fn test_data_frame_layout() {
        let frame = DataFrame {
            id: id(),
            index: 0x0102_0304,
            payload: vec![9, 9, 9],
        };
        let encoded = frame.encode();

        assert_eq!(&encoded[..8], b"0a1b2c3d");
        assert_eq!(&encoded[8..12], &[1, 2, 3, 4]);
        assert_eq!(DataFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_data_frame_too_short() {
        let err = DataFrame::decode(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { len: 11 }));
    }

    #[test]
    fn test_data_frame_header_only() {
        let frame = DataFrame::decode(b"0a1b2c3d\0\0\0\x05").unwrap();
        assert_eq!(frame.index, 5);
        assert!(frame.payload.is_empty());
    }
}
