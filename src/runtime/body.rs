//! Request body values accepted by `XMLHttpRequest.send` and their encoding
//! into a native request body.

use super::multipart::MultipartEncoder;
use crate::error::XhrError;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Read granularity when streaming a file source
pub(crate) const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Byte source backing a [`File`]
pub type FileSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Binary file handed over by the guest runtime.
///
/// `size` is trusted as the Content-Length; the source is consumed exactly
/// once when the request body is streamed.
pub struct File {
    name: String,
    size: u64,
    source: FileSource,
}

impl File {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        source: impl AsyncRead + Send + Sync + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            source: Box::new(source),
        }
    }

    /// In-memory file, size taken from the data
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(name, size, io::Cursor::new(data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn source_mut(&mut self) -> &mut FileSource {
        &mut self.source
    }

    /// Stream the file's bytes verbatim.
    ///
    /// The stream fails once the source produces more than `size` bytes or
    /// ends before reaching it.
    pub(crate) fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
        let reading = SizedRead {
            name: self.name,
            declared: self.size,
            seen: 0,
            source: self.source,
        };

        futures::stream::unfold(Some(reading), |reading| async move {
            let mut reading = reading?;
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

            match reading.source.read_buf(&mut buf).await {
                Ok(0) if reading.seen == reading.declared => None,
                Ok(0) => Some((Err(reading.mismatch()), None)),
                Ok(n) => {
                    reading.seen += n as u64;
                    if reading.seen > reading.declared {
                        Some((Err(reading.mismatch()), None))
                    } else {
                        Some((Ok(buf.freeze()), Some(reading)))
                    }
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// File source being streamed against its declared size
struct SizedRead {
    name: String,
    declared: u64,
    seen: u64,
    source: FileSource,
}

impl SizedRead {
    fn mismatch(&self) -> io::Error {
        size_mismatch(&self.name, self.declared, self.seen)
    }
}

/// Error for a file whose source disagrees with its declared size
pub(crate) fn size_mismatch(name: &str, declared: u64, produced: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "file '{}' declared {} bytes but produced {}",
            name, declared, produced
        ),
    )
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Value of a single form entry
#[derive(Debug)]
pub enum FormValue {
    Text(String),
    File(File),
}

/// Ordered (name, value) entries, as built by `FormData.append`
#[derive(Debug, Default)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.entries.push((name.into(), value));
    }

    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.append(name, FormValue::Text(value.into()));
    }

    pub fn append_file(&mut self, name: impl Into<String>, file: File) {
        self.append(name, FormValue::File(file));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, FormValue)> {
        self.entries
    }
}

/// Body argument of `send`, classified once by the guest runtime
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Absent,
    Text(String),
    Blob(File),
    Form(FormData),
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<File> for RequestBody {
    fn from(file: File) -> Self {
        RequestBody::Blob(file)
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        RequestBody::Form(form)
    }
}

/// Bytes to put on the wire, not yet bound to a native request
pub enum BodyPayload {
    Empty,
    Bytes(Bytes),
    Stream(File),
    Multipart(MultipartEncoder),
}

impl BodyPayload {
    /// Turn the payload into a native body.
    ///
    /// A multipart payload starts its streaming pass on the current tokio
    /// runtime; the returned body reads the other end of the pipe.
    pub(crate) fn into_reqwest_body(self) -> Option<reqwest::Body> {
        match self {
            BodyPayload::Empty => None,
            BodyPayload::Bytes(bytes) => Some(reqwest::Body::from(bytes)),
            BodyPayload::Stream(file) => Some(reqwest::Body::wrap_stream(file.into_stream())),
            BodyPayload::Multipart(encoder) => {
                Some(reqwest::Body::wrap_stream(encoder.spawn_stream()))
            }
        }
    }
}

impl fmt::Debug for BodyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyPayload::Empty => f.write_str("Empty"),
            BodyPayload::Bytes(bytes) => write!(f, "Bytes({})", bytes.len()),
            BodyPayload::Stream(file) => write!(f, "Stream({:?})", file),
            BodyPayload::Multipart(encoder) => write!(f, "Multipart({})", encoder.boundary()),
        }
    }
}

/// Result of [`encode`]
#[derive(Debug)]
pub struct EncodedBody {
    pub payload: BodyPayload,
    /// Empty when the encoder has no opinion
    pub content_type: String,
    /// 0 when unknown or not applicable
    pub content_length: u64,
}

impl EncodedBody {
    pub fn empty() -> Self {
        Self {
            payload: BodyPayload::Empty,
            content_type: String::new(),
            content_length: 0,
        }
    }
}

/// Classify `body` and produce the native payload plus its Content-Type and
/// Content-Length.
///
/// GET and HEAD never carry a body.
pub fn encode(method: &str, body: RequestBody) -> Result<EncodedBody, XhrError> {
    if method == "GET" || method == "HEAD" {
        return Ok(EncodedBody::empty());
    }

    let encoded = match body {
        RequestBody::Absent => EncodedBody::empty(),
        RequestBody::Text(text) => {
            let bytes = Bytes::from(text);
            EncodedBody {
                content_length: bytes.len() as u64,
                payload: BodyPayload::Bytes(bytes),
                content_type: TEXT_CONTENT_TYPE.to_string(),
            }
        }
        RequestBody::Blob(file) => EncodedBody {
            content_length: file.size(),
            payload: BodyPayload::Stream(file),
            content_type: BINARY_CONTENT_TYPE.to_string(),
        },
        RequestBody::Form(form) => {
            let encoder = MultipartEncoder::new(form)?;
            EncodedBody {
                content_length: encoder.content_length(),
                content_type: encoder.content_type(),
                payload: BodyPayload::Multipart(encoder),
            }
        }
    };

    Ok(encoded)
}
