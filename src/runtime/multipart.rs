//! `multipart/form-data` encoding in two passes.
//!
//! The native request needs its Content-Length before the first body byte is
//! sent, but file payloads are only available as one-shot streams. A dry run
//! renders all framing (text fields, file headers, closing delimiter) into
//! memory; file payload sizes are added from their declared sizes. The
//! streaming pass then renders the same framing, in the same stored order,
//! into a bounded pipe read by the transport.

use super::body::{FormData, FormValue, READ_CHUNK_SIZE, size_mismatch};
use super::pipe::{self, DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter};
use crate::error::XhrError;
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::io;
use tokio::io::AsyncReadExt;

const BOUNDARY_BYTES: usize = 30;

/// Random boundary, hex encoded
pub fn random_boundary() -> String {
    let mut raw = [0u8; BOUNDARY_BYTES];
    rand::thread_rng().fill(&mut raw[..]);
    raw.iter().map(|b| format!("{:02x}", b)).collect()
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders delimiters and part headers for one encoding pass.
///
/// Both passes drive their own `Framer` over the same entries so framing is
/// byte-identical between them.
struct Framer<'a> {
    boundary: &'a str,
    parts: usize,
}

impl<'a> Framer<'a> {
    fn new(boundary: &'a str) -> Self {
        Self { boundary, parts: 0 }
    }

    fn delimiter(&mut self, out: &mut BytesMut) {
        if self.parts > 0 {
            out.put_slice(b"\r\n");
        }
        self.parts += 1;

        out.put_slice(b"--");
        out.put_slice(self.boundary.as_bytes());
        out.put_slice(b"\r\n");
    }

    /// Header plus value of a text field
    fn field(&mut self, name: &str, value: &str) -> Bytes {
        let mut out = BytesMut::new();
        self.delimiter(&mut out);
        out.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quotes(name)
            )
            .as_bytes(),
        );
        out.put_slice(value.as_bytes());
        out.freeze()
    }

    /// Header of a file part; the payload follows verbatim
    fn file_header(&mut self, name: &str, filename: &str) -> Bytes {
        let mut out = BytesMut::new();
        self.delimiter(&mut out);
        out.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                escape_quotes(name),
                escape_quotes(filename)
            )
            .as_bytes(),
        );
        out.freeze()
    }

    fn closing(&self) -> Bytes {
        let mut out = BytesMut::new();
        if self.parts > 0 {
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"--");
        out.put_slice(self.boundary.as_bytes());
        out.put_slice(b"--\r\n");
        out.freeze()
    }
}

/// Multipart body with its length computed up front
#[derive(Debug)]
pub struct MultipartEncoder {
    boundary: String,
    entries: Vec<(String, FormValue)>,
    content_length: u64,
}

impl MultipartEncoder {
    /// Run the dry-run pass over `form` with a fresh random boundary
    pub fn new(form: FormData) -> Result<Self, XhrError> {
        Self::with_boundary(form, random_boundary())
    }

    pub fn with_boundary(form: FormData, boundary: String) -> Result<Self, XhrError> {
        if boundary.is_empty() || boundary.len() > 70 {
            return Err(XhrError::Construction(format!(
                "Invalid multipart boundary length: {}",
                boundary.len()
            )));
        }

        let entries = form.into_entries();
        let framing = dry_run(&boundary, &entries);
        let payload: u64 = entries
            .iter()
            .map(|(_, value)| match value {
                FormValue::File(file) => file.size(),
                FormValue::Text(_) => 0,
            })
            .sum();

        let content_length = framing.len() as u64 + payload;

        log::debug!(
            "multipart: {} entries, {} framing bytes, {} total",
            entries.len(),
            framing.len(),
            content_length
        );

        Ok(Self {
            boundary,
            entries,
            content_length,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact byte length of the streamed body
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Start the streaming pass on the current tokio runtime and return the
    /// read end of its pipe
    pub fn spawn_stream(self) -> PipeReader {
        let (writer, reader) = pipe::pipe(DEFAULT_PIPE_CAPACITY);

        tokio::spawn(async move {
            self.write_to(writer).await;
        });

        reader
    }

    /// Streaming pass.
    ///
    /// The pipe is closed when this returns; a failure is forwarded to the
    /// reader as an I/O error instead of a clean end-of-stream.
    pub async fn write_to(self, mut writer: PipeWriter) {
        match self.stream_entries(&mut writer).await {
            Ok(written) => {
                log::debug!("multipart: streamed {} bytes", written);
                writer.close();
            }
            Err(e) => {
                log::error!("multipart: streaming pass failed: {}", e);
                writer.fail(e).await;
            }
        }
    }

    async fn stream_entries(self, writer: &mut PipeWriter) -> io::Result<u64> {
        let mut framer = Framer::new(&self.boundary);
        let mut written = 0u64;

        for (name, value) in self.entries {
            match value {
                FormValue::Text(text) => {
                    let chunk = framer.field(&name, &text);
                    written += chunk.len() as u64;
                    writer.write(chunk).await?;
                }
                FormValue::File(mut file) => {
                    let header = framer.file_header(&name, file.name());
                    written += header.len() as u64;
                    writer.write(header).await?;

                    let declared = file.size();
                    let copied = copy_source(file.source_mut(), writer, declared).await?;
                    if copied != declared {
                        return Err(size_mismatch(file.name(), declared, copied));
                    }
                    written += copied;
                }
            }
        }

        let closing = framer.closing();
        written += closing.len() as u64;
        writer.write(closing).await?;

        Ok(written)
    }
}

/// Framing bytes of every entry, with file payloads left out
fn dry_run(boundary: &str, entries: &[(String, FormValue)]) -> BytesMut {
    let mut framer = Framer::new(boundary);
    let mut out = BytesMut::new();

    for (name, value) in entries {
        match value {
            FormValue::Text(text) => out.put(framer.field(name, text)),
            FormValue::File(file) => out.put(framer.file_header(name, file.name())),
        }
    }

    out.put(framer.closing());
    out
}

/// Copy `source` into the pipe; stops early once more than `limit` bytes
/// have been seen
async fn copy_source(
    source: &mut super::body::FileSource,
    writer: &mut PipeWriter,
    limit: u64,
) -> io::Result<u64> {
    let mut copied = 0u64;
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

    loop {
        buf.reserve(READ_CHUNK_SIZE);
        let n = source.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }

        copied += n as u64;
        if copied > limit {
            break;
        }

        writer.write(buf.split().freeze()).await?;
    }

    Ok(copied)
}
