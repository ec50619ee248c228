//! Payment and refund endpoint.
//!
//! The engine never processes money itself. It hands an amount to a
//! [`PaymentGateway`] and trusts the success or failure it gets back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::model::CardInformation;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway rejected the request with status {0}")]
    Rejected(u16),
    #[error("gateway did not answer within {0:?}")]
    Timeout(Duration),
    #[error("gateway transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, amount: f64, card: &CardInformation) -> Result<(), GatewayError>;
    async fn refund(&self, amount: f64) -> Result<(), GatewayError>;
}

/// JSON-over-HTTP client for the payment module.
///
/// `charge` posts `{cardInformation, price}` to the payment URL, `refund` posts
/// `{amount}` to the refund URL. Anything but `200 OK` is a rejection.
pub struct HttpPaymentGateway {
    client: Client,
    payment_url: String,
    refund_url: String,
    timeout: Duration,
}

impl HttpPaymentGateway {
    pub fn new(payment_url: String, refund_url: String, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            payment_url,
            refund_url,
            timeout,
        })
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(), GatewayError> {
        let response = self.client.post(url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout)
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        debug!("gateway {url} answered {status}");
        if status != StatusCode::OK {
            return Err(GatewayError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, amount: f64, card: &CardInformation) -> Result<(), GatewayError> {
        self.post(&self.payment_url, json!({ "cardInformation": card, "price": amount }))
            .await
    }

    async fn refund(&self, amount: f64) -> Result<(), GatewayError> {
        self.post(&self.refund_url, json!({ "amount": amount })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every request with `status_line`.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            // Read until the headers and the announced body have both arrived.
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let body_len = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + body_len {
                        break;
                    }
                }
            }
            let request = String::from_utf8_lossy(&raw).to_string();
            let reply = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            request
        });
        (format!("http://{addr}/"), handle)
    }

    #[tokio::test]
    async fn refund_ok_posts_amount() {
        let (url, server) = serve_once("200 OK").await;
        let gw = HttpPaymentGateway::new(url.clone(), url, Duration::from_secs(5)).unwrap();
        gw.refund(60.0).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.contains("\"amount\":60.0"));
    }

    #[tokio::test]
    async fn non_200_is_rejected() {
        let (url, _server) = serve_once("400 Bad Request").await;
        let gw = HttpPaymentGateway::new(url.clone(), url, Duration::from_secs(5)).unwrap();
        let card = CardInformation {
            card_number: "1".into(),
            name: "x".into(),
            cvv: "1".into(),
            exp_date: "2020-01".into(),
        };
        assert_eq!(gw.charge(10.0, &card).await, Err(GatewayError::Rejected(400)));
    }

    #[tokio::test]
    async fn unreachable_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);
        let gw = HttpPaymentGateway::new(url.clone(), url, Duration::from_secs(2)).unwrap();
        let err = gw.refund(1.0).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_) | GatewayError::Timeout(_)));
    }
}
