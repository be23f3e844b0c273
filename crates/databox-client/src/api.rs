//! Minimal JSON-over-HTTPS client shared by the collaborator clients.
//!
//! One HTTP/1 connection per request, `x-api-key` on every call, TLS trust
//! anchored on the platform root CA. Plain `http://` endpoints are accepted
//! for development setups.

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::rt::{Read, Write};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Root store containing every certificate in `pem`.
pub fn tls_config_from_pem(pem: &[u8]) -> ClientResult<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();
    let mut reader = pem;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ClientError::Tls(e.to_string()))?;
        root_store
            .add(cert)
            .map_err(|e| ClientError::Tls(e.to_string()))?;
    }
    if root_store.is_empty() {
        return Err(ClientError::Tls("no certificates in root CA bundle".to_string()));
    }

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::Tls(format!("tls protocol version error: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Read an API key file and return its base64 encoding, the form the
/// collaborators expect in `x-api-key`.
pub fn load_api_key(path: &Path) -> ClientResult<String> {
    let raw = std::fs::read(path).map_err(|source| ClientError::File {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(STANDARD.encode(raw))
}

/// JSON client for one collaborator endpoint.
#[derive(Clone)]
pub struct ApiClient {
    endpoint: String,
    host: String,
    port: u16,
    api_key: String,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// `endpoint` is `scheme://host[:port]`; `https` requires `tls`.
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> ClientResult<Self> {
        let uri: Uri = endpoint
            .parse()
            .map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| ClientError::InvalidEndpoint(endpoint.to_string()))?
            .to_string();
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(ClientError::InvalidEndpoint(endpoint.to_string())),
        };
        let tls = match (secure, tls) {
            (true, Some(config)) => Some(TlsConnector::from(config)),
            (true, None) => {
                return Err(ClientError::Tls(format!("{endpoint} requires a root CA")));
            }
            (false, _) => None,
        };
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            host,
            port,
            api_key: api_key.into(),
            tls,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `body` as JSON to `path`. Non-2xx statuses are errors.
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<Bytes> {
        let payload = serde_json::to_vec(body).map_err(|e| ClientError::Encode(e.to_string()))?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("host", format!("{}:{}", self.host, self.port))
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ClientError::Encode(e.to_string()))?;

        let transport = |reason: String| ClientError::Transport {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| transport(e.to_string()))?;

        let (status, bytes) = match &self.tls {
            Some(connector) => {
                let server_name = ServerName::try_from(self.host.clone())
                    .map_err(|e| ClientError::Tls(e.to_string()))?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| transport(e.to_string()))?;
                exchange(TokioIo::new(tls_stream), req)
                    .await
                    .map_err(transport)?
            }
            None => exchange(TokioIo::new(stream), req).await.map_err(transport)?,
        };

        debug!(endpoint = %self.endpoint, %path, %status, "collaborator call");
        if !status.is_success() {
            return Err(ClientError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

async fn exchange<IO>(io: IO, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), String>
where
    IO: Read + Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| e.to_string())?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            trace!(error = %e, "collaborator connection closed");
        }
    });

    let resp = sender.send_request(req).await.map_err(|e| e.to_string())?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    Ok((status, bytes))
}
