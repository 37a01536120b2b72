//! WebSocket realtime status channel.
//!
//! One connection per client at `{realtime_url}/ws/{client_id}`. The server
//! pushes status frames for every job of that client and may interleave
//! keepalives (empty text, `{"type":"keepalive"}`, or WS ping/pong).

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use viddy_models::{ClientId, RealtimeEvent, RealtimeFrame};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::metrics::record_connect;
use crate::transport::{RealtimeConnection, RealtimeTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections to the realtime endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    config: BackendConfig,
}

impl WsTransport {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    fn channel_url(&self, client_id: &ClientId) -> String {
        format!(
            "{}/ws/{}",
            self.config.realtime_url,
            urlencoding::encode(client_id.as_str())
        )
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self, client_id: &ClientId) -> BackendResult<Box<dyn RealtimeConnection>> {
        let url = self.channel_url(client_id);
        debug!(url = %url, "Opening realtime channel");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BackendError::websocket(format!("bad realtime request: {}", e)))?;

        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| BackendError::config(format!("invalid API key header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connect_result = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await;

        let stream = match connect_result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
                record_connect("rejected");
                return Err(BackendError::from_http_status(
                    response.status().as_u16(),
                    format!("realtime handshake rejected by {}", url),
                ));
            }
            Ok(Err(e)) => {
                record_connect("failed");
                return Err(BackendError::websocket(format!("connection failed: {}", e)));
            }
            Err(_) => {
                record_connect("timeout");
                return Err(BackendError::Timeout(format!(
                    "realtime handshake exceeded {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        record_connect("ok");
        info!(client_id = %client_id, "Realtime channel open");
        Ok(Box::new(WsConnection {
            stream,
            finished: false,
        }))
    }
}

/// An open WebSocket connection.
pub struct WsConnection {
    stream: WsStream,
    finished: bool,
}

impl WsConnection {
    fn finish(&mut self, code: Option<u16>, reason: impl Into<String>) -> RealtimeEvent {
        self.finished = true;
        RealtimeEvent::closed(code, reason)
    }
}

#[async_trait]
impl RealtimeConnection for WsConnection {
    async fn next_event(&mut self) -> RealtimeEvent {
        if self.finished {
            return RealtimeEvent::closed(None, "connection already closed");
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return RealtimeEvent::Frame(RealtimeFrame::parse(&text));
                }
                Some(Ok(Message::Binary(data))) => {
                    let frame = match String::from_utf8(data) {
                        Ok(text) => RealtimeFrame::parse(&text),
                        Err(e) => RealtimeFrame::Unrecognized(format!("binary frame: {}", e)),
                    };
                    return RealtimeEvent::Frame(frame);
                }
                // Pongs are queued by tungstenite and flushed on the next read.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    return RealtimeEvent::keepalive();
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, "closed without status".to_string()),
                    };
                    return self.finish(code, reason);
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    warn!("Realtime channel error: {}", e);
                    return self.finish(None, e.to_string());
                }
                None => return self.finish(None, "stream ended"),
            }
        }
    }

    async fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("Realtime close handshake failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use viddy_models::{RemoteStatus, CLOSE_NORMAL};

    async fn serve_once(frames: Vec<Message>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut path = String::new();
            let callback =
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    path = req.uri().path().to_string();
                    Ok(resp)
                };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            // Drain until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
            path
        });

        (format!("http://{}", addr), server)
    }

    #[tokio::test]
    async fn test_receives_push_then_normal_close() {
        let (base, server) = serve_once(vec![
            Message::Text(String::new()),
            Message::Text(
                r#"{"status":"completed","outputLocation":"videos/out1.mp4"}"#.to_string(),
            ),
            Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            })),
        ])
        .await;

        let config = BackendConfig::for_base_url(&base).unwrap();
        let transport = WsTransport::new(config);
        let client_id = ClientId::from_string("c1");
        let mut conn = transport.connect(&client_id).await.unwrap();

        assert_eq!(conn.next_event().await, RealtimeEvent::keepalive());

        match conn.next_event().await {
            RealtimeEvent::Frame(RealtimeFrame::Status(msg)) => {
                assert_eq!(msg.status, RemoteStatus::Completed);
                assert_eq!(msg.output_location.as_deref(), Some("videos/out1.mp4"));
            }
            other => panic!("expected status push, got {:?}", other),
        }

        let closed = conn.next_event().await;
        assert!(closed.is_normal_close());
        assert_eq!(
            closed,
            RealtimeEvent::closed(Some(CLOSE_NORMAL), "done")
        );

        // Finished connections keep reporting closed.
        assert!(matches!(
            conn.next_event().await,
            RealtimeEvent::Closed { code: None, .. }
        ));

        drop(conn);
        assert_eq!(server.await.unwrap(), "/ws/c1");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = BackendConfig::for_base_url(&format!("http://{}", addr)).unwrap();
        let transport = WsTransport::new(config);
        let result = transport.connect(&ClientId::new()).await;
        assert!(matches!(result, Err(BackendError::WebSocket(_))));
    }
}
