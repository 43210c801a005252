/// Frame codec for the supervision protocol.
///
/// Every frame is a 2-byte big-endian length header followed by an op byte
/// and an optional payload. The length counts the op byte plus the payload,
/// so a length of 0 is a valid header-only frame (a benign no-op, not an
/// error). The body (op + payload) is capped at `MSG_BODY_LIMIT` bytes;
/// frames declaring a larger length are drained from the stream so framing
/// stays aligned, then reported as oversized and ignored.
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header.
pub const MSG_HDR_SIZE: usize = 2;
/// Maximum frame body (op byte + payload).
pub const MSG_BODY_LIMIT: usize = 2048;

/// Protocol operations. The daemon only ever sends `Ack` and `CommandReply`;
/// the subject sends the rest. Unknown op bytes still decode and are left to
/// the caller to ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Ack,
    Heartbeat,
    Shutdown,
    SetCommand,
    ClearCommand,
    GetCommand,
    CommandReply,
}

impl Op {
    /// Wire discriminant value.
    pub const fn as_u8(self) -> u8 {
        match self {
            Op::Ack => 1,
            Op::Heartbeat => 2,
            Op::Shutdown => 3,
            Op::SetCommand => 4,
            Op::ClearCommand => 5,
            Op::GetCommand => 6,
            Op::CommandReply => 7,
        }
    }

    /// Parse a wire discriminant; `None` for unknown ops.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Op::Ack),
            2 => Some(Op::Heartbeat),
            3 => Some(Op::Shutdown),
            4 => Some(Op::SetCommand),
            5 => Some(Op::ClearCommand),
            6 => Some(Op::GetCommand),
            7 => Some(Op::CommandReply),
            _ => None,
        }
    }
}

/// One decoded protocol message. The op is kept as the raw wire byte so that
/// frames carrying future op codes survive decoding intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub op: u8,
    pub payload: Vec<u8>,
}

impl Message {
    /// Payload-free message for the given op.
    pub fn new(op: Op) -> Self {
        Self {
            op: op.as_u8(),
            payload: Vec::new(),
        }
    }

    /// Message carrying a payload.
    pub fn with_payload(op: Op, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            op: op.as_u8(),
            payload: payload.into(),
        }
    }

    /// The op, if it is one we know.
    pub fn op(&self) -> Option<Op> {
        Op::from_u8(self.op)
    }
}

/// Errors from encoding or decoding frames.
#[derive(Debug)]
pub enum CodecError {
    /// The stream ended in the middle of a frame body.
    Truncated,
    /// Encoding was asked to fit a payload at or beyond the body limit.
    PayloadTooLarge { len: usize },
    /// Read or write failure on the underlying stream.
    Io { source: io::Error },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "stream ended mid-frame (truncated body)"),
            CodecError::PayloadTooLarge { len } => {
                write!(
                    f,
                    "payload of {} bytes exceeds the {} byte body limit",
                    len, MSG_BODY_LIMIT
                )
            }
            CodecError::Io { source } => write!(f, "transport I/O error: {}", source),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Io { source } => Some(source),
            _ => None,
        }
    }
}

impl CodecError {
    /// True for frame-local problems the monitor absorbs without terminating.
    pub fn is_framing(&self) -> bool {
        matches!(self, CodecError::Truncated)
    }
}

/// Outcome of reading one frame from the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame within the body limit.
    Frame { message: Message, consumed: usize },
    /// Header-only frame (declared length 0). Consumes the header bytes only.
    Empty,
    /// The header declared a body larger than the limit. Exactly `consumed`
    /// bytes (header included) were drained so the next read stays aligned.
    Oversized { consumed: usize },
    /// Clean end of stream before a complete header.
    Eof,
}

fn body_error(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Truncated
    } else {
        CodecError::Io { source: e }
    }
}

/// Read one frame. Partial reads are retried until the frame is satisfied or
/// the stream ends. End of stream before a complete header is `Eof`; end of
/// stream inside a body is a `Truncated` error.
pub async fn read_frame<R>(stream: &mut R) -> Result<Decoded, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; MSG_HDR_SIZE];
    match stream.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Decoded::Eof),
        Err(e) => return Err(CodecError::Io { source: e }),
    }
    let len = u16::from_be_bytes(hdr) as usize;

    if len == 0 {
        return Ok(Decoded::Empty);
    }

    if len > MSG_BODY_LIMIT {
        // Drain the whole declared body so the stream stays framing-aligned:
        // the first MSG_BODY_LIMIT bytes in one read, the rest byte by byte.
        let mut body = vec![0u8; MSG_BODY_LIMIT];
        stream.read_exact(&mut body).await.map_err(body_error)?;
        let mut one = [0u8; 1];
        for _ in 0..(len - MSG_BODY_LIMIT) {
            stream.read_exact(&mut one).await.map_err(body_error)?;
        }
        return Ok(Decoded::Oversized {
            consumed: MSG_HDR_SIZE + len,
        });
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(body_error)?;
    let op = body[0];
    let payload = body.split_off(1);
    Ok(Decoded::Frame {
        message: Message { op, payload },
        consumed: MSG_HDR_SIZE + len,
    })
}

/// Encode a message into wire bytes. Fails without producing anything if the
/// payload is at or beyond the body limit.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    if message.payload.len() >= MSG_BODY_LIMIT {
        return Err(CodecError::PayloadTooLarge {
            len: message.payload.len(),
        });
    }
    let len = (message.payload.len() + 1) as u16;
    let mut buf = Vec::with_capacity(MSG_HDR_SIZE + len as usize);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(message.op);
    buf.extend_from_slice(&message.payload);
    Ok(buf)
}

/// Write a complete frame, retrying partial writes until done. Any write
/// failure is fatal at the transport level.
pub async fn write_frame<W>(stream: &mut W, message: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(message)?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| CodecError::Io { source: e })?;
    stream
        .flush()
        .await
        .map_err(|e| CodecError::Io { source: e })?;
    Ok(())
}
