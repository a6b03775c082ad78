use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{
    CoapRequest, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use rand::Rng;
use thiserror::Error;
use tokio::net::UdpSocket;
use url::Url;

use super::MAX_DATAGRAM;

#[derive(Debug, Error)]
pub enum CoapError {
    #[error("invalid device URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire codec error: {0}")]
    Codec(String),

    /// 4.04: the device is discharged, dropped the request, or the path
    /// does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("error response: {0:?}")]
    ErrorResponse(ResponseType),

    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// Minimal CoAP/UDP client: one confirmable exchange at a time, no
/// retransmission. The caller's timeout is the only retry policy.
#[derive(Debug)]
pub struct CoapClient {
    socket: UdpSocket,
    path: String,
    message_id: u16,
}

impl CoapClient {
    /// Parses a `coap://host:port/path` URI and connects an ephemeral UDP
    /// socket to its authority.
    pub async fn connect(uri: &str) -> Result<Self, CoapError> {
        let invalid = |reason: &str| CoapError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(uri).map_err(|e| CoapError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "coap" {
            return Err(invalid("scheme must be coap"));
        }
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed.port().unwrap_or(5683);
        let path = parsed.path().trim_start_matches('/').to_string();
        if path.is_empty() {
            return Err(invalid("missing resource path"));
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        Ok(Self {
            socket,
            path,
            message_id: rand::thread_rng().gen(),
        })
    }

    pub async fn get(&mut self, deadline: Duration) -> Result<Vec<u8>, CoapError> {
        self.request(RequestType::Get, Vec::new(), deadline).await
    }

    pub async fn post(&mut self, payload: Vec<u8>, deadline: Duration) -> Result<Vec<u8>, CoapError> {
        self.request(RequestType::Post, payload, deadline).await
    }

    async fn request(
        &mut self,
        method: RequestType,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<Vec<u8>, CoapError> {
        self.message_id = self.message_id.wrapping_add(1);
        let token = rand::thread_rng().gen::<[u8; 4]>().to_vec();

        let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
        request.set_method(method);
        request.set_path(&self.path);
        request.message.header.message_id = self.message_id;
        request.message.header.set_type(MessageType::Confirmable);
        request.message.set_token(token.clone());
        if !payload.is_empty() {
            request.message.set_content_format(ContentFormat::ApplicationJSON);
            request.message.payload = payload;
        }

        let bytes = request
            .message
            .to_bytes()
            .map_err(|e| CoapError::Codec(e.to_string()))?;
        self.socket.send(&bytes).await?;

        tokio::time::timeout(deadline, self.await_response(&token))
            .await
            .map_err(|_| CoapError::Timeout)?
    }

    /// Waits for the response matching our token, skipping unrelated
    /// datagrams (stale replies, stray ACKs).
    async fn await_response(&self, token: &[u8]) -> Result<Vec<u8>, CoapError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            let packet = match Packet::from_bytes(&buf[..len]) {
                Ok(packet) => packet,
                Err(_) => continue,
            };
            if &packet.get_token()[..] != token {
                continue;
            }
            match packet.header.code {
                MessageClass::Response(ResponseType::Content)
                | MessageClass::Response(ResponseType::Created) => return Ok(packet.payload),
                MessageClass::Response(ResponseType::NotFound) => {
                    return Err(CoapError::NotFound(
                        String::from_utf8_lossy(&packet.payload).into_owned(),
                    ))
                }
                MessageClass::Response(code) => return Err(CoapError::ErrorResponse(code)),
                other => return Err(CoapError::Unexpected(format!("{other:?}"))),
            }
        }
    }
}
