use crate::config::TransportConfig;
use crate::error::XhrError;
use crate::runtime::body::EncodedBody;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

/// Identifies one `send` of one request object
pub type RequestId = u64;

/// Native request, validated on the guest thread and executed on the event
/// loop
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: EncodedBody,
    pub timeout_ms: u64,
    pub transport: TransportConfig,
}

impl HttpRequest {
    /// Validate method, URL and headers and merge them with what the body
    /// encoder derived.
    ///
    /// Explicit headers win over the encoder's Content-Type.
    pub fn build(
        method: &str,
        url: &str,
        explicit_headers: &[(String, String)],
        body: EncodedBody,
        timeout_ms: u64,
        transport: TransportConfig,
    ) -> Result<Self, XhrError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| XhrError::Construction(format!("Invalid HTTP method: {}", method)))?;

        let url = Url::parse(url)
            .map_err(|e| XhrError::Construction(format!("Invalid URL '{}': {}", url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(XhrError::Construction(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();

        if !body.content_type.is_empty() {
            let value = HeaderValue::from_str(&body.content_type)
                .map_err(|e| XhrError::Construction(e.to_string()))?;
            headers.insert(CONTENT_TYPE, value);
        }

        if body.content_length > 0 {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.content_length));
        }

        for (key, value) in explicit_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| XhrError::Construction(format!("Invalid header name: {}", key)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| XhrError::Construction(format!("Invalid value for header {}", key)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout_ms,
            transport,
        })
    }
}

/// Progress of a native call, reported back to the guest thread in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrUpdate {
    /// Status line and headers are in; the request body was fully sent
    HeadersReceived {
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
    },
    /// The whole response body was read
    BodyReceived(Bytes),
    Failed(XhrError),
}

impl XhrUpdate {
    /// No further update follows for the same request
    pub fn is_terminal(&self) -> bool {
        !matches!(self, XhrUpdate::HeadersReceived { .. })
    }
}
