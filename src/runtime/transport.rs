use super::CallbackMessage;
use crate::error::{XhrError, error_chain};
use crate::task::{HttpRequest, RequestId, XhrUpdate};
use tokio::sync::mpsc;

/// Execute one `send` on the native side and report its progress.
///
/// Updates go through `callback_tx` in order; the guest thread applies them.
/// Nothing here looks at the aborted flag: an aborted request still runs to
/// completion and the guest side discards the result.
pub async fn execute_xhr(
    id: RequestId,
    request: HttpRequest,
    callback_tx: mpsc::UnboundedSender<CallbackMessage>,
) {
    let report = |update: XhrUpdate| {
        if callback_tx.send(CallbackMessage::Xhr(id, update)).is_err() {
            log::debug!("xhr {}: runtime gone, dropping update", id);
        }
    };

    let client = match request.transport.build_client(request.timeout_ms) {
        Ok(client) => client,
        Err(e) => {
            log::error!("xhr {}: failed to build client: {}", id, e);
            report(XhrUpdate::Failed(XhrError::Construction(error_chain(&e))));
            return;
        }
    };

    log::debug!(
        "xhr {}: {} {} ({} body bytes, timeout {}ms, proxy: {})",
        id,
        request.method,
        request.url,
        request.body.content_length,
        request.timeout_ms,
        request.transport.proxy().is_some()
    );

    let mut builder = client
        .request(request.method, request.url)
        .headers(request.headers);

    if let Some(body) = request.body.payload.into_reqwest_body() {
        builder = builder.body(body);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            let error = XhrError::from_send_error(&e, request.timeout_ms);
            log::debug!("xhr {}: {}", id, error);
            report(XhrUpdate::Failed(error));
            return;
        }
    };

    let status = response.status();
    let mut headers = Vec::with_capacity(response.headers().len());
    for (key, value) in response.headers() {
        match value.to_str() {
            Ok(value) => headers.push((key.to_string(), value.to_string())),
            Err(_) => log::warn!("xhr {}: skipping non-ASCII header {}", id, key),
        }
    }

    report(XhrUpdate::HeadersReceived {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        headers,
    });

    match response.bytes().await {
        Ok(body) => {
            log::debug!("xhr {}: received {} bytes", id, body.len());
            report(XhrUpdate::BodyReceived(body));
        }
        Err(e) => {
            log::debug!("xhr {}: body read failed: {}", id, e);
            report(XhrUpdate::Failed(XhrError::Read(error_chain(&e))));
        }
    }
}
