use crate::path::Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io;
use std::marker::PhantomData;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;
pub const FRAME_HEADER_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);

    pub fn is_supported(self) -> bool {
        self.0 <= CURRENT_PROTOCOL_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub path: Path,
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(path: Path, command: impl Into<String>) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            path,
            command: command.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PathNotFound,
    CommandNotFound,
    InvalidArguments,
    CommandException,
    DecodeError,
    ConnectionError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PathNotFound => "PathNotFound",
            ErrorKind::CommandNotFound => "CommandNotFound",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::CommandException => "CommandException",
            ErrorKind::DecodeError => "DecodeError",
            ErrorKind::ConnectionError => "ConnectionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResponse {
    Success { value: Value },
    Error { kind: ErrorKind, message: String },
}

impl CommandResponse {
    pub fn success(value: Value) -> Self {
        CommandResponse::Success { value }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        CommandResponse::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResponse::Success { .. })
    }

    pub fn into_result(self) -> Result<Value, CommandError> {
        match self {
            CommandResponse::Success { value } => Ok(value),
            CommandResponse::Error { kind, message } => Err(CommandError { kind, message }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame io failed: {0}")]
    Io(String),
}

impl FrameError {
    /// Malformed input, as opposed to a transport failure.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            FrameError::OversizedFrame { .. } | FrameError::Truncated { .. } | FrameError::Decode(_)
        )
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

fn check_len(len: usize, max_frame_bytes: usize) -> Result<(), FrameError> {
    let max = max_frame_bytes.min(u32::MAX as usize);
    if len > max {
        return Err(FrameError::OversizedFrame { size: len, max });
    }
    Ok(())
}

/// Serializes `value` as `[u32 big-endian length][json payload]`.
pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    check_len(payload.len(), max_frame_bytes)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes exactly one complete frame, header included.
pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let Some(header) = bytes.get(..FRAME_HEADER_BYTES) else {
        return Err(FrameError::Truncated {
            expected: FRAME_HEADER_BYTES,
            actual: bytes.len(),
        });
    };
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    check_len(len, max_frame_bytes)?;
    let payload = &bytes[FRAME_HEADER_BYTES..];
    if payload.len() < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual: payload.len(),
        });
    }
    if payload.len() > len {
        return Err(FrameError::Decode(format!(
            "{} trailing bytes after frame",
            payload.len() - len
        )));
    }
    serde_json::from_slice(payload).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Incremental decoder for a byte stream that arrives in arbitrary chunks.
pub struct FrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T> FrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for FrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while self.pending.len() >= FRAME_HEADER_BYTES {
            let len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if let Err(err) = check_len(len, self.max_frame_bytes) {
                // The stream cannot be resynchronised past a bad length.
                report.errors.push(err);
                self.pending.clear();
                break;
            }
            if self.pending.len() < FRAME_HEADER_BYTES + len {
                break;
            }
            let frame = self
                .pending
                .drain(..FRAME_HEADER_BYTES + len)
                .skip(FRAME_HEADER_BYTES)
                .collect::<Vec<u8>>();
            match serde_json::from_slice(&frame) {
                Ok(parsed) => report.frames.push(parsed),
                Err(err) => report.errors.push(FrameError::Decode(err.to_string())),
            }
        }

        report
    }

    /// Reports leftover bytes as a truncated frame.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let expected = if pending.len() >= FRAME_HEADER_BYTES {
            FRAME_HEADER_BYTES
                + u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize
        } else {
            FRAME_HEADER_BYTES
        };
        Err(FrameError::Truncated {
            expected,
            actual: pending.len(),
        })
    }
}

/// Reads one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; FRAME_HEADER_BYTES];
    let mut filled = 0;
    while filled < FRAME_HEADER_BYTES {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_BYTES,
                actual: filled,
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    check_len(len, max_frame_bytes)?;
    let mut payload = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = reader.read(&mut payload[read..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected: len,
                actual: read,
            });
        }
        read += n;
    }
    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|err| FrameError::Decode(err.to_string()))
}

pub async fn write_frame<W, T>(
    writer: &mut W,
    value: &T,
    max_frame_bytes: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value, max_frame_bytes)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{NodeKind, PathSegment};
    use serde_json::json;

    fn nested_request() -> CommandRequest {
        CommandRequest::new(
            Path::from_segments(vec![
                PathSegment::selected(NodeKind::Group, "a"),
                PathSegment::new(NodeKind::Window),
            ]),
            "update",
        )
        .with_args(vec![
            json!(1),
            json!(-2.5),
            json!("text"),
            json!(true),
            Value::Null,
            json!([]),
            json!([1, [2, [3, null]], {"k": "v"}]),
        ])
        .with_kwarg("empty_map", json!({}))
        .with_kwarg("nested", json!({"a": {"b": [null, {"c": []}]}, "s": ""}))
        .with_kwarg("none", Value::Null)
    }

    #[test]
    fn request_round_trips_with_nested_and_empty_values() {
        let request = nested_request();
        let frame = encode_frame(&request, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert_eq!(
            u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            frame.len() - FRAME_HEADER_BYTES
        );
        let decoded: CommandRequest = decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(decoded, request);

        let root = CommandRequest::new(Path::root(), "status");
        let frame = encode_frame(&root, DEFAULT_MAX_FRAME_BYTES).expect("encode root");
        let decoded: CommandRequest = decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode root");
        assert_eq!(decoded, root);
    }

    #[test]
    fn response_is_exactly_one_variant_on_the_wire() {
        let ok = CommandResponse::success(json!({"groups": ["a", "b"]}));
        assert_eq!(
            serde_json::to_value(&ok).expect("ok"),
            json!({"status": "success", "value": {"groups": ["a", "b"]}})
        );
        let err = CommandResponse::error(ErrorKind::PathNotFound, "no window");
        assert_eq!(
            serde_json::to_value(&err).expect("err"),
            json!({"status": "error", "kind": "path_not_found", "message": "no window"})
        );

        let ambiguous = json!({"status": "maybe", "value": 1});
        assert!(serde_json::from_value::<CommandResponse>(ambiguous).is_err());
    }

    #[test]
    fn missing_version_and_arguments_default() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"path": [], "command": "status"}"#).expect("parse");
        assert_eq!(request.version, ProtocolVersion::CURRENT);
        assert!(request.args.is_empty());
        assert!(request.kwargs.is_empty());
        assert!(!ProtocolVersion(CURRENT_PROTOCOL_VERSION + 1).is_supported());
    }

    #[test]
    fn decode_reports_truncated_and_malformed_frames() {
        let frame = encode_frame(&nested_request(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let truncated = decode_frame::<CommandRequest>(&frame[..frame.len() - 3], DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(truncated, Err(FrameError::Truncated { .. })));

        let header_only = decode_frame::<CommandRequest>(&frame[..2], DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(header_only, Err(FrameError::Truncated { expected: 4, actual: 2 })));

        let mut garbage = 5u32.to_be_bytes().to_vec();
        garbage.extend_from_slice(b"{nope");
        let malformed = decode_frame::<CommandRequest>(&garbage, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(malformed, Err(FrameError::Decode(_))));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let request = CommandRequest::new(Path::root(), "update")
            .with_args(vec![json!("x".repeat(128))]);
        let result = encode_frame(&request, 64);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn decoder_reassembles_frames_split_across_chunks() {
        let first = encode_frame(&nested_request(), DEFAULT_MAX_FRAME_BYTES).expect("first");
        let second = encode_frame(&CommandRequest::new(Path::root(), "status"), DEFAULT_MAX_FRAME_BYTES)
            .expect("second");
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut decoder = FrameDecoder::<CommandRequest>::default();
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            let report = decoder.push_chunk(chunk);
            assert!(report.errors.is_empty());
            frames.extend(report.frames);
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], nested_request());
        assert_eq!(frames[1].command, "status");
        assert_eq!(decoder.pending_bytes(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn decoder_recovers_after_malformed_payload() {
        let mut stream = 3u32.to_be_bytes().to_vec();
        stream.extend_from_slice(b"{{{");
        stream.extend_from_slice(
            &encode_frame(&CommandRequest::new(Path::root(), "status"), DEFAULT_MAX_FRAME_BYTES)
                .expect("valid"),
        );
        let mut decoder = FrameDecoder::<CommandRequest>::default();
        let report = decoder.push_chunk(&stream);
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], FrameError::Decode(_)));
    }

    #[test]
    fn decoder_finish_flags_partial_frame() {
        let frame = encode_frame(&nested_request(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let mut decoder = FrameDecoder::<CommandRequest>::default();
        let report = decoder.push_chunk(&frame[..10]);
        assert!(report.frames.is_empty());
        assert!(matches!(decoder.finish(), Err(FrameError::Truncated { .. })));
    }

    #[tokio::test]
    async fn async_read_distinguishes_clean_close_from_truncation() {
        let frame = encode_frame(&CommandRequest::new(Path::root(), "status"), DEFAULT_MAX_FRAME_BYTES)
            .expect("encode");

        let mut complete: &[u8] = &frame;
        let parsed: Option<CommandRequest> = read_frame(&mut complete, DEFAULT_MAX_FRAME_BYTES)
            .await
            .expect("read");
        assert_eq!(parsed.map(|req| req.command), Some("status".to_string()));
        let eof: Option<CommandRequest> = read_frame(&mut complete, DEFAULT_MAX_FRAME_BYTES)
            .await
            .expect("eof");
        assert!(eof.is_none());

        let mut partial: &[u8] = &frame[..frame.len() - 1];
        let result = read_frame::<_, CommandRequest>(&mut partial, DEFAULT_MAX_FRAME_BYTES).await;
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }

    #[tokio::test]
    async fn async_write_then_read_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let request = nested_request();
        let expected = request.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &request, DEFAULT_MAX_FRAME_BYTES)
                .await
                .expect("write");
        });
        let received: CommandRequest = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
            .await
            .expect("read")
            .expect("frame");
        writer.await.expect("join");
        assert_eq!(received, expected);
    }
}
