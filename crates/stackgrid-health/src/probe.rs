//! Single HTTP(S) health probe.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::ProbeError;

const USER_AGENT: &str = "stackgrid-health/0.1";

/// Issues GET probes over plain TCP or TLS (Mozilla roots, ring provider).
#[derive(Clone)]
pub struct ProbeClient {
    tls: Arc<rustls::ClientConfig>,
}

impl ProbeClient {
    pub fn new() -> Result<Self, ProbeError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self::with_tls_config(Arc::new(config)))
    }

    pub fn with_tls_config(tls: Arc<rustls::ClientConfig>) -> Self {
        Self { tls }
    }

    /// GET `url` and report whether it answered 2xx within `timeout`.
    ///
    /// Non-2xx, timeout and certificate verification failure are `Ok(false)`.
    /// Any other connection or protocol error is returned.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<bool, ProbeError> {
        let target = Target::parse(url)?;
        match tokio::time::timeout(timeout, self.exchange(&target)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, "health probe timed out");
                Ok(false)
            }
        }
    }

    async fn exchange(&self, target: &Target) -> Result<bool, ProbeError> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|source| ProbeError::Transport {
                url: target.url.clone(),
                source,
            })?;

        if !target.tls {
            return send(stream, target).await;
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            ProbeError::InvalidUrl {
                url: target.url.clone(),
                reason: e.to_string(),
            }
        })?;
        match TlsConnector::from(self.tls.clone())
            .connect(server_name, stream)
            .await
        {
            Ok(tls) => send(tls, target).await,
            Err(e) if is_certificate_error(&e) => {
                debug!(url = %target.url, error = %e, "health probe tls verification failed");
                Ok(false)
            }
            Err(source) => Err(ProbeError::Transport {
                url: target.url.clone(),
                source,
            }),
        }
    }
}

fn is_certificate_error(err: &std::io::Error) -> bool {
    matches!(
        err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()),
        Some(rustls::Error::InvalidCertificate(_))
    )
}

async fn send<S>(io: S, target: &Target) -> Result<bool, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let http_err = |e: &dyn std::fmt::Display| ProbeError::Http {
        url: target.url.clone(),
        message: e.to_string(),
    };

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| http_err(&e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(target.path.as_str())
        .header("host", target.authority.as_str())
        .header("user-agent", USER_AGENT)
        .body(Empty::<Bytes>::new())
        .map_err(|e| http_err(&e))?;

    let resp = sender.send_request(req).await.map_err(|e| http_err(&e))?;
    if resp.status().is_success() {
        Ok(true)
    } else {
        debug!(status = %resp.status(), url = %target.url, "health probe non-2xx");
        Ok(false)
    }
}

struct Target {
    url: String,
    tls: bool,
    host: String,
    port: u16,
    authority: String,
    path: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, ProbeError> {
        let invalid = |reason: &str| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(invalid("scheme must be http or https")),
        };
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });
        let path = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            url: url.to_string(),
            tls,
            host: host.to_string(),
            port,
            authority: authority.as_str().to_string(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_server::{routes, serve};
    use super::*;

    #[tokio::test]
    async fn two_hundred_is_available() {
        let addr = serve(routes(&[("/auth/v1/health", 200)])).await;
        let client = ProbeClient::new().unwrap();
        let ok = client
            .probe(&format!("http://{addr}/auth/v1/health"), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn non_success_is_unavailable() {
        let addr = serve(routes(&[("/auth/v1/health", 503)])).await;
        let client = ProbeClient::new().unwrap();
        assert!(!client
            .probe(&format!("http://{addr}/auth/v1/health"), Duration::from_secs(2))
            .await
            .unwrap());
        assert!(!client
            .probe(&format!("http://{addr}/missing"), Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn timeout_is_unavailable() {
        let addr = serve(routes(&[("/slow", 0)])).await;
        let client = ProbeClient::new().unwrap();
        let ok = client
            .probe(&format!("http://{addr}/slow"), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ProbeClient::new().unwrap();
        let err = client
            .probe(&format!("http://{addr}/"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Transport { .. }));
    }

    #[tokio::test]
    async fn untrusted_certificate_is_unavailable() {
        use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
        use tokio_rustls::TlsAcceptor;

        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = CertificateDer::from(certified.cert.der().to_vec());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        let server_config = rustls::ServerConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = acceptor.accept(stream).await;
            }
        });

        let client = ProbeClient::new().unwrap();
        let ok = client
            .probe(
                &format!("https://localhost:{}/auth/v1/health", addr.port()),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn parses_targets() {
        let t = Target::parse("https://acme.eu.example.test/vapi/search/v1/_internal/health").unwrap();
        assert!(t.tls);
        assert_eq!(t.port, 443);
        assert_eq!(t.host, "acme.eu.example.test");
        assert_eq!(t.path, "/vapi/search/v1/_internal/health");

        let t = Target::parse("http://127.0.0.1:8080").unwrap();
        assert!(!t.tls);
        assert_eq!(t.port, 8080);
        assert_eq!(t.path, "/");

        assert!(matches!(
            Target::parse("ftp://x/"),
            Err(ProbeError::InvalidUrl { .. })
        ));
    }
}
