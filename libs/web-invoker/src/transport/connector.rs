//! TCP connector with optional HTTP proxy support.
//!
//! Implements `tower::Service<Uri>` so it can sit under the rustls
//! `HttpsConnector`. Through a proxy, `https` targets get a `CONNECT`
//! tunnel (TLS then runs end to end over it); plain `http` targets connect
//! to the proxy itself and the request is sent in absolute form.

use http::Uri;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::request::ProxyHost;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on the proxy's reply to `CONNECT`
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Opens the TCP leg of a connection, directly or via a proxy
#[derive(Debug, Clone)]
pub struct RouteConnector {
    proxy: Option<ProxyHost>,
    connect_timeout: Duration,
}

impl RouteConnector {
    pub(crate) fn new(proxy: Option<ProxyHost>, connect_timeout: Duration) -> Self {
        Self {
            proxy,
            connect_timeout,
        }
    }

    async fn connect(self, dst: Uri) -> Result<TokioIo<TcpStream>, BoxError> {
        let host = dst
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or("target URI has no host")?;
        let https = dst.scheme_str() == Some("https");
        let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });

        let stream = match &self.proxy {
            None => tcp_connect(host, port, self.connect_timeout).await?,
            Some(proxy) => {
                let stream = tcp_connect(&proxy.host, proxy.port, self.connect_timeout).await?;
                if https {
                    tunnel(stream, host, port, self.connect_timeout).await?
                } else {
                    stream
                }
            }
        };
        Ok(TokioIo::new(stream))
    }
}

impl tower::Service<Uri> for RouteConnector {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        Box::pin(self.clone().connect(dst))
    }
}

async fn tcp_connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {host}:{port} timed out"),
            )
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Ask the proxy to open a tunnel to `host:port`.
async fn tunnel(mut stream: TcpStream, host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");

    let exchange = async {
        stream.write_all(request.as_bytes()).await?;
        read_connect_response(&mut stream).await
    };
    let head = tokio::time::timeout(timeout, exchange).await.map_err(|_| {
        io::Error::new(io::ErrorKind::TimedOut, "proxy CONNECT timed out")
    })??;

    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("200") {
        return Err(io::Error::other(format!(
            "proxy refused tunnel to {authority}: {}",
            status_line.trim()
        )));
    }
    tracing::debug!(target = %authority, "proxy tunnel established");
    Ok(stream)
}

/// Read the proxy's response head byte by byte so no tunneled bytes are consumed.
async fn read_connect_response(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy CONNECT response too large",
            ));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed connection during CONNECT",
            ));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_direct_connect() {
        rt().block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let accept = tokio::spawn(async move { listener.accept().await.is_ok() });

            let connector = RouteConnector::new(None, Duration::from_secs(2));
            let uri: Uri = format!("http://127.0.0.1:{port}/").parse().unwrap();
            assert!(connector.oneshot(uri).await.is_ok());
            assert!(accept.await.unwrap());
        });
    }

    #[test]
    fn test_tunnel_through_proxy() {
        rt().block_on(async {
            let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_port = proxy.local_addr().unwrap().port();
            let server = tokio::spawn(async move {
                let (mut socket, _) = proxy.accept().await.unwrap();
                let mut buf = vec![0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                socket
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .unwrap();
                request
            });

            let connector = RouteConnector::new(
                Some(ProxyHost {
                    host: "127.0.0.1".to_owned(),
                    port: proxy_port,
                }),
                Duration::from_secs(2),
            );
            let uri: Uri = "https://secure.example:8443/".parse().unwrap();
            assert!(connector.oneshot(uri).await.is_ok());
            let seen = server.await.unwrap();
            assert!(seen.starts_with("CONNECT secure.example:8443 HTTP/1.1\r\n"));
        });
    }

    #[test]
    fn test_tunnel_refused() {
        rt().block_on(async {
            let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy_port = proxy.local_addr().unwrap().port();
            tokio::spawn(async move {
                let (mut socket, _) = proxy.accept().await.unwrap();
                let mut buf = vec![0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                    .await;
            });

            let connector = RouteConnector::new(
                Some(ProxyHost {
                    host: "127.0.0.1".to_owned(),
                    port: proxy_port,
                }),
                Duration::from_secs(2),
            );
            let err = connector
                .oneshot("https://secure.example/".parse().unwrap())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("407"));
        });
    }
}
