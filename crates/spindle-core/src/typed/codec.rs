//! TaskCodec - タスクのワイヤフォーマット
//!
//! # フレーム
//! ```text
//! +--------+---------+----------------+-----------+-------------------+---------+
//! | "SPDL" | version | type_len (u16) | type utf8 | payload_len (u32) | payload |
//! +--------+---------+----------------+-----------+-------------------+---------+
//! ```
//! 数値はすべて big endian。payload は不透明なバイト列（typed API では JSON）。

use thiserror::Error;

use crate::domain::{SpindleError, TaskType};

const MAGIC: &[u8; 4] = b"SPDL";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("bad magic")]
    BadMagic,

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("task type is empty")]
    EmptyType,

    #[error("task type is not valid UTF-8")]
    InvalidType,

    #[error("task type is {0} bytes, limit is {max}", max = u16::MAX)]
    TypeTooLong(usize),

    #[error("payload is {0} bytes, limit is {max}", max = u32::MAX)]
    PayloadTooLarge(usize),
}

impl From<CodecError> for SpindleError {
    fn from(err: CodecError) -> Self {
        SpindleError::MalformedTask(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTask {
    pub task_type: TaskType,
    pub payload: Vec<u8>,
}

/// Stateless encoder/decoder for task frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCodec;

impl TaskCodec {
    pub fn encode(task_type: &TaskType, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let type_bytes = task_type.as_str().as_bytes();
        if type_bytes.is_empty() {
            return Err(CodecError::EmptyType);
        }
        let type_len =
            u16::try_from(type_bytes.len()).map_err(|_| CodecError::TypeTooLong(type_bytes.len()))?;
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

        let mut frame = Vec::with_capacity(HEADER_LEN + 2 + type_bytes.len() + 4 + payload.len());
        frame.extend_from_slice(MAGIC);
        frame.push(VERSION);
        frame.extend_from_slice(&type_len.to_be_bytes());
        frame.extend_from_slice(type_bytes);
        frame.extend_from_slice(&payload_len.to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<DecodedTask, CodecError> {
        let mut reader = Reader { buf: frame };

        if reader.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = reader.take(1, "version")?[0];
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let type_len = u16::from_be_bytes(reader.array("type length")?) as usize;
        if type_len == 0 {
            return Err(CodecError::EmptyType);
        }
        let type_bytes = reader.take(type_len, "type")?;
        let task_type = std::str::from_utf8(type_bytes).map_err(|_| CodecError::InvalidType)?;

        let payload_len = u32::from_be_bytes(reader.array("payload length")?) as usize;
        let payload = reader.take(payload_len, "payload")?.to_vec();

        if !reader.buf.is_empty() {
            return Err(CodecError::TrailingBytes(reader.buf.len()));
        }

        Ok(DecodedTask {
            task_type: TaskType::new(task_type),
            payload,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated(what));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }
}
