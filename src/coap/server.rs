use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use coap_lite::{CoapRequest, ContentFormat, Packet, RequestType, ResponseType};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use super::MAX_DATAGRAM;
use crate::device::{DeviceError, DeviceSimulator};

/// UDP server exposing one device at its configured resource path.
///
/// Each datagram is served in its own task; the drop-simulation hold and the
/// probabilistic reply delays never block the receive loop.
pub struct CoapServer {
    socket: Arc<UdpSocket>,
    path: String,
    device: DeviceSimulator,
}

impl CoapServer {
    /// Binds the socket configured in the device's static config.
    pub async fn bind(device: DeviceSimulator) -> Result<Self> {
        let addr = device.config().socket_addr()?;
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind CoAP socket on {addr}"))?;
        let path = device.config().resource_path_string();
        Ok(Self { socket: Arc::new(socket), path, device })
    }

    /// The actually bound address; differs from config when port 0 was asked.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("CoAP socket has no local address")
    }

    /// Serves requests until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!(path = %self.path, "CoAP server listening");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("CoAP server shutting down");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received.context("CoAP socket receive failed")?;
                    let packet = match Packet::from_bytes(&buf[..len]) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!(%peer, error = %e, "discarding undecodable datagram");
                            continue;
                        }
                    };
                    let request = CoapRequest::from_packet(packet, peer);
                    let socket = self.socket.clone();
                    let device = self.device.clone();
                    let path = self.path.clone();
                    tokio::spawn(async move {
                        serve_one(socket, device, &path, request, peer).await;
                    });
                }
            }
        }
    }
}

enum Reply {
    Json(ResponseType, Vec<u8>),
    Text(ResponseType, String),
}

async fn serve_one(
    socket: Arc<UdpSocket>,
    device: DeviceSimulator,
    path: &str,
    mut request: CoapRequest<SocketAddr>,
    peer: SocketAddr,
) {
    let reply = dispatch(&device, path, &request).await;

    let Some(response) = request.response.as_mut() else {
        debug!(%peer, "request message carries no response slot");
        return;
    };
    match reply {
        Reply::Json(code, body) => {
            response.set_status(code);
            response.message.set_content_format(ContentFormat::ApplicationJSON);
            response.message.payload = body;
        }
        Reply::Text(code, text) => {
            response.set_status(code);
            response.message.payload = text.into_bytes();
        }
    }

    match response.message.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, peer).await {
                warn!(%peer, error = %e, "failed to send CoAP response");
            }
        }
        Err(e) => error!(%peer, error = %e, "failed to encode CoAP response"),
    }
}

async fn dispatch(
    device: &DeviceSimulator,
    path: &str,
    request: &CoapRequest<SocketAddr>,
) -> Reply {
    if request.get_path() != path {
        return Reply::Text(ResponseType::NotFound, "No such resource.".to_string());
    }
    match request.get_method() {
        RequestType::Get => match device.handle_get().await {
            Ok(reading) => {
                Reply::Json(ResponseType::Content, serde_json::to_vec(&reading).unwrap_or_default())
            }
            Err(e) => device_error_reply(e),
        },
        RequestType::Post => match device.handle_post(&request.message.payload).await {
            Ok(triggered) => Reply::Json(
                ResponseType::Created,
                serde_json::to_vec(&triggered).unwrap_or_default(),
            ),
            Err(e) => device_error_reply(e),
        },
        _ => Reply::Text(ResponseType::MethodNotAllowed, String::new()),
    }
}

fn device_error_reply(error: DeviceError) -> Reply {
    match error {
        DeviceError::Discharged | DeviceError::Dropped => {
            Reply::Text(ResponseType::NotFound, error.to_string())
        }
        DeviceError::BadRequest(message) => Reply::Text(ResponseType::BadRequest, message),
    }
}
