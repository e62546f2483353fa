//! Null-byte document framing
//!
//! The push service writes one XML document after another on a single HTTP
//! response, terminating each with `0x00`. [`DocumentFramer`] turns the raw
//! chunks into complete documents.

use crate::error::ParseError;

/// Byte that terminates every document on the stream
pub const DOCUMENT_TERMINATOR: u8 = 0x00;

/// Default cap on the bytes buffered while waiting for a terminator (16 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Incremental splitter for the null-delimited document stream
///
/// Every terminator emits the bytes buffered since the previous one, including
/// empty segments. Callers discard empty documents.
#[derive(Debug)]
pub struct DocumentFramer {
    buffer: Vec<u8>,
    max_document_bytes: usize,
}

impl Default for DocumentFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_BYTES)
    }
}

impl DocumentFramer {
    pub fn new(max_document_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_document_bytes,
        }
    }

    /// Append a chunk and return every document it completed, in order
    ///
    /// Fails with [`ParseError::Malformed`] once the unterminated tail grows
    /// past the configured maximum; the buffer is cleared in that case.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, ParseError> {
        let mut documents = Vec::new();

        for segment in chunk.split_inclusive(|b| *b == DOCUMENT_TERMINATOR) {
            match segment.split_last() {
                Some((&DOCUMENT_TERMINATOR, body)) => {
                    self.append(body)?;
                    documents.push(std::mem::take(&mut self.buffer));
                },
                _ => self.append(segment)?,
            }
        }

        Ok(documents)
    }

    /// Bytes received since the last terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received document
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        if self.buffer.len() + bytes.len() > self.max_document_bytes {
            self.buffer.clear();
            return Err(ParseError::malformed(format!(
                "document exceeds {} bytes without a terminator",
                self.max_document_bytes
            )));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }
}
