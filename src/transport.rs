//! WebSocket transport for the voice services
//!
//! Both the recognition and synthesis services authenticate with the same
//! header scheme; each session opens its own connection and tags it with a
//! fresh connect id.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A connected client stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection with service credentials attached.
///
/// Returns the stream together with the connect id sent to the service,
/// which correlates client and server logs.
///
/// # Errors
///
/// Returns an error when the URL is invalid, a credential cannot be encoded
/// as a header value, or the handshake fails.
pub async fn connect(
    url: &str,
    app_id: &str,
    access_token: &str,
    resource_id: &str,
) -> Result<(WsStream, String)> {
    let connect_id = Uuid::new_v4().to_string();
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Connection(format!("invalid endpoint {url}: {e}")))?;
    let headers = request.headers_mut();
    headers.insert("X-Api-App-Key", header_value(app_id)?);
    headers.insert("X-Api-Access-Key", header_value(access_token)?);
    headers.insert("X-Api-Resource-Id", header_value(resource_id)?);
    headers.insert("X-Api-Connect-Id", header_value(&connect_id)?);

    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| Error::Connection(format!("handshake with {url} failed: {e}")))?;
    if let Some(logid) = response.headers().get("X-Tt-Logid") {
        debug!(%connect_id, logid = ?logid, "connected to voice service");
    } else {
        debug!(%connect_id, "connected to voice service");
    }
    Ok((stream, connect_id))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Connection(format!("credential is not a valid header value: {e}")))
}
