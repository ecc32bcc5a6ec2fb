//! Minimal HTTP/1 responder for probe tests.
//!
//! Answers each request with the status registered for its path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Status code per path. Unknown paths get 404, status 0 never answers.
pub type Routes = Arc<Mutex<HashMap<String, u16>>>;

pub async fn serve(routes: Routes) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&buf);
                let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
                let status = routes.lock().unwrap().get(&path).copied().unwrap_or(404);
                if status == 0 {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    return;
                }
                let resp = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = stream.write_all(resp.as_bytes()).await;
            });
        }
    });
    addr
}

pub fn routes(entries: &[(&str, u16)]) -> Routes {
    Arc::new(Mutex::new(
        entries.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
    ))
}
