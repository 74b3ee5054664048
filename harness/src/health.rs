use crate::error::{self, Result};
use crate::wait::Poll;
use log::info;
use snafu::ResultExt;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `url` until a `GET` returns a 2xx status.
pub async fn wait_for_http_ok(url: &str, poll: &Poll) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context(error::HttpClientSnafu)?;
    info!("Waiting for '{}'", url);
    poll.until(url, || {
        let request = client.get(url).send();
        async move {
            let response = request.await.context(error::HttpSnafu { url })?;
            Ok(response.status().is_success())
        }
    })
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `responses` one connection at a time and returns the server's address.
    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{}/health", addr)
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[tokio::test]
    async fn ok_after_unavailable() {
        let url = serve(vec![UNAVAILABLE, OK]).await;
        let poll = Poll::new(5, Duration::from_millis(10)).unwrap();
        wait_for_http_ok(&url, &poll).await.unwrap();
    }

    #[tokio::test]
    async fn times_out_when_never_healthy() {
        let url = serve(vec![UNAVAILABLE, UNAVAILABLE]).await;
        let poll = Poll::new(2, Duration::from_millis(10)).unwrap();
        let err = wait_for_http_ok(&url, &poll).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn connection_refused_counts_as_not_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/health", listener.local_addr().unwrap());
        drop(listener);
        let poll = Poll::new(1, Duration::from_millis(10)).unwrap();
        assert!(wait_for_http_ok(&url, &poll).await.is_err());
    }
}
