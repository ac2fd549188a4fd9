//! # Model Link
//!
//! One outbound WebSocket per call to the realtime speech model.
//!
//! ## Task layout:
//! - **writer**: drains an unbounded command channel into the socket, so
//!   `send()` never blocks the caller and messages go out in queue order
//! - **reader**: parses inbound frames into `ServerEvent`s and forwards them
//!   on a bounded channel; when the socket ends the channel closes, which is
//!   how the owner learns the link is gone
//!
//! Session configuration and the greeting request are queued before
//! `connect()` returns, so they always precede any caller audio.

use crate::config::RealtimeConfig;
use crate::error::LinkError;
use crate::realtime::protocol::{parse_server_event, ClientEvent, ServerEvent};

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

enum LinkCommand {
    Send(ClientEvent),
    Close,
}

/// Handle to a connected model socket.
pub struct ModelLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl ModelLink {
    /// Open the upstream socket and queue `session.update` then `response.create`.
    ///
    /// ## Returns:
    /// The link handle and the stream of inbound events. The stream ends when
    /// the upstream socket closes or fails.
    pub async fn connect(
        config: &RealtimeConfig,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), LinkError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(LinkError::MissingCredential)?;

        let url = upstream_url(&config.base_url, &config.model)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| LinkError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| LinkError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(
            "OpenAI-Beta",
            HeaderValue::from_str(&config.beta_header)
                .map_err(|e| LinkError::InvalidRequest(e.to_string()))?,
        );

        info!(model = %config.model, "Connecting to realtime model");

        let handshake = tokio_tungstenite::connect_async(request);
        let result = if config.connect_timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), handshake)
                .await
                .map_err(|_| LinkError::Timeout(config.connect_timeout_secs))?
        } else {
            handshake.await
        };
        let (ws_stream, _response) = result.map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        info!(model = %config.model, "Realtime model connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<LinkCommand>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(
            async move {
                while let Some(command) = command_rx.recv().await {
                    match command {
                        LinkCommand::Send(event) => {
                            let json = match serde_json::to_string(&event) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(kind = event.kind(), error = %e, "Failed to serialize model event");
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                warn!(kind = event.kind(), error = %e, "Failed to send to model");
                                break;
                            }
                        }
                        LinkCommand::Close => break,
                    }
                }
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "Model socket close failed");
                }
                debug!("Model writer exiting");
            }
            .in_current_span(),
        );

        let reader = tokio::spawn(
            async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            let Some(event) = parse_server_event(&text) else {
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                debug!("Model event receiver dropped");
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            info!(?frame, "Model closed the connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Model socket error");
                            break;
                        }
                    }
                }
                debug!("Model reader exiting");
            }
            .in_current_span(),
        );

        let link = Self {
            commands: command_tx,
            reader,
            closed: false,
        };
        link.send(ClientEvent::session_update(config))?;
        link.send(ClientEvent::greeting(config))?;

        Ok((link, event_rx))
    }

    /// Queue one event for the model.
    pub fn send(&self, event: ClientEvent) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        self.commands
            .send(LinkCommand::Send(event))
            .map_err(|_| LinkError::Closed)
    }

    /// Close the upstream socket. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.commands.send(LinkCommand::Close);
        self.reader.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.commands.is_closed()
    }
}

impl Drop for ModelLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Append the `model` query parameter to the configured endpoint.
///
/// An empty path becomes `/` so the request target stays valid.
fn upstream_url(base_url: &str, model: &str) -> Result<String, LinkError> {
    let mut url = url::Url::parse(base_url)
        .map_err(|e| LinkError::InvalidRequest(format!("{}: {}", base_url, e)))?;
    url.query_pairs_mut().append_pair("model", model);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn test_config(base_url: String) -> RealtimeConfig {
        let mut config = AppConfig::default().realtime;
        config.api_key = Some("sk-test".to_string());
        config.base_url = base_url;
        config.model = "test-model".to_string();
        config.connect_timeout_secs = 5;
        config
    }

    #[test]
    fn test_upstream_url() {
        assert_eq!(
            upstream_url("wss://api.openai.com/v1/realtime", "gpt-4o").unwrap(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o"
        );
        assert_eq!(
            upstream_url("ws://localhost/rt?x=1", "m").unwrap(),
            "ws://localhost/rt?x=1&model=m"
        );
    }

    #[test]
    fn test_upstream_url_root_path() {
        assert_eq!(upstream_url("ws://h:1", "m").unwrap(), "ws://h:1/?model=m");
        assert_eq!(
            upstream_url("ws://h:1/", "gpt 4o&x").unwrap(),
            "ws://h:1/?model=gpt+4o%26x"
        );
    }

    #[test]
    fn test_upstream_url_rejects_garbage() {
        assert!(matches!(
            upstream_url("not a url", "m"),
            Err(LinkError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let config = AppConfig::default().realtime;
        assert!(matches!(
            ModelLink::connect(&config).await,
            Err(LinkError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = test_config(format!("ws://{}", addr));
        assert!(matches!(
            ModelLink::connect(&config).await,
            Err(LinkError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept TCP but never answer the upgrade.
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut config = test_config(format!("ws://{}", addr));
        config.connect_timeout_secs = 1;
        assert!(matches!(ModelLink::connect(&config).await, Err(LinkError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_handshake_setup_order_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (headers_tx, headers_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let auth = req.headers().get("Authorization").cloned();
                let beta = req.headers().get("OpenAI-Beta").cloned();
                let query = req.uri().query().map(str::to_string);
                let _ = headers_tx.send((auth, beta, query));
                Ok::<Response, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback).await.unwrap();

            let mut kinds = Vec::new();
            for _ in 0..3 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                        kinds.push(value["type"].as_str().unwrap().to_string());
                    }
                    other => panic!("unexpected frame {:?}", other),
                }
            }

            ws.send(Message::Text(r#"{"type":"rate_limits.updated"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"response.audio.delta","delta":"6AMY/A=="}"#.to_string()))
                .await
                .unwrap();

            // Wait for the client's close frame.
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
            kinds
        });

        let config = test_config(format!("ws://{}", addr));
        let (mut link, mut events) = ModelLink::connect(&config).await.unwrap();
        link.send(ClientEvent::audio_append("AAA=".to_string())).unwrap();

        let (auth, beta, query) = headers_rx.await.unwrap();
        assert_eq!(auth.unwrap(), "Bearer sk-test");
        assert_eq!(beta.unwrap(), "realtime=v1");
        assert_eq!(query.as_deref(), Some("model=test-model"));

        assert!(matches!(events.recv().await, Some(ServerEvent::Unknown)));
        match events.recv().await {
            Some(ServerEvent::AudioDelta { delta }) => assert_eq!(delta, "6AMY/A=="),
            other => panic!("expected audio delta, got {:?}", other),
        }

        link.close();
        link.close();
        assert!(link.is_closed());
        assert!(matches!(
            link.send(ClientEvent::audio_append(String::new())),
            Err(LinkError::Closed)
        ));

        let kinds = server.await.unwrap();
        assert_eq!(
            kinds,
            vec!["session.update", "response.create", "input_audio_buffer.append"]
        );
    }
}
