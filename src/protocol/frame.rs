//! Request framing and reply encoding (§4.6 of the design).
//!
//! `*<N>\r\n` followed by `N` binary-safe bulk strings (`$<len>\r\n<bytes>\r\n`)
//! is the request frame; replies are one of `+OK`, `-ERR <msg>`, `:<int>`,
//! `$<len>\r\n<bytes>\r\n`, `$-1\r\n` or `*-1\r\n`.
//!
//! The parser is written as a straight-line `async fn`: each `.await` is a
//! suspension point of the `Start → ReadHeader → ArgHead → ArgBody`
//! machine the design describes, which is exactly what `async fn` compiles
//! down to — there is no separate hand-rolled state enum to keep in sync.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{DatafeedError, Result};

/// A fully parsed request: lowercased command name plus its remaining
/// bulk-string arguments (the format tag, if any, is the last one).
#[derive(Debug, Clone)]
pub struct Request {
    pub command: String,
    pub args: Vec<Vec<u8>>,
}

impl Request {
    /// Borrow the `n`th argument, or a `BadRequest` naming the command.
    pub fn arg(&self, n: usize) -> Result<&[u8]> {
        self.args.get(n).map(Vec::as_slice).ok_or_else(|| {
            DatafeedError::BadRequest(format!("{}: missing argument {n}", self.command))
        })
    }

    pub fn arg_str(&self, n: usize) -> Result<&str> {
        std::str::from_utf8(self.arg(n)?)
            .map_err(|_| DatafeedError::BadRequest(format!("{}: argument {n} is not UTF-8", self.command)))
    }
}

/// The outcome of reading one frame.
pub enum Frame {
    Request(Request),
    /// Peer sent the bare `quit` line (not array-framed, per §4.6).
    Quit,
    /// Peer closed the connection cleanly between requests.
    Eof,
}

fn strip_crlf(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Read exactly one request frame. Returns [`Frame::Eof`] on a clean close
/// before any bytes of a new frame arrive; any truncation mid-frame is a
/// [`DatafeedError::BadRequest`].
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut header = String::new();
    let n = reader.read_line(&mut header).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    let header = strip_crlf(&header);
    if header.eq_ignore_ascii_case("quit") {
        return Ok(Frame::Quit);
    }

    let Some(count_str) = header.strip_prefix('*') else {
        return Err(DatafeedError::BadRequest("unknown command".to_string()));
    };
    let count: usize = count_str
        .parse()
        .map_err(|_| DatafeedError::BadRequest("malformed array header".to_string()))?;

    let mut raw_args = Vec::with_capacity(count);
    for _ in 0..count {
        let mut arg_head = String::new();
        let n = reader.read_line(&mut arg_head).await?;
        if n == 0 {
            return Err(DatafeedError::BadRequest("truncated request".to_string()));
        }
        let arg_head = strip_crlf(&arg_head);
        let Some(len_str) = arg_head.strip_prefix('$') else {
            return Err(DatafeedError::BadRequest("expected bulk header".to_string()));
        };
        let len: usize = len_str
            .parse()
            .map_err(|_| DatafeedError::BadRequest("malformed bulk length".to_string()))?;

        let mut body = vec![0u8; len + 2];
        reader.read_exact(&mut body).await?;
        body.truncate(len);
        raw_args.push(body);
    }

    if raw_args.is_empty() {
        return Err(DatafeedError::BadRequest("empty request".to_string()));
    }
    let command = String::from_utf8_lossy(&raw_args[0]).to_ascii_lowercase();
    Ok(Frame::Request(Request {
        command,
        args: raw_args.into_iter().skip(1).collect(),
    }))
}

/// A reply, one of the six wire types from §4.6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NullBulk,
    NullMultiBulk,
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Ok => b"+OK\r\n".to_vec(),
            Reply::Error(msg) => format!("-ERR {msg}\r\n").into_bytes(),
            Reply::Integer(v) => format!(":{v}\r\n").into_bytes(),
            Reply::Bulk(data) => {
                let mut out = format!("${}\r\n", data.len()).into_bytes();
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
                out
            }
            Reply::NullBulk => b"$-1\r\n".to_vec(),
            Reply::NullMultiBulk => b"*-1\r\n".to_vec(),
        }
    }
}

impl From<DatafeedError> for Reply {
    fn from(err: DatafeedError) -> Reply {
        Reply::Error(err.wire_message())
    }
}
