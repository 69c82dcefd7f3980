//! # Realtime Channel Flows
//!
//! Runs the gateway on an ephemeral port and talks to the status channel
//! with a real WebSocket client.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use notify_gateway::ports::testing::FakeHandle;
    use notify_gateway::GatewayConfig;

    use crate::integration::harness::Harness;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Running {
        harness: Arc<Harness>,
        addr: SocketAddr,
        stop: Option<oneshot::Sender<()>>,
        server: JoinHandle<()>,
    }

    impl Running {
        async fn start(config: GatewayConfig) -> Self {
            let harness = Arc::new(Harness::with_config(config, Vec::<(String, String)>::new()));
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (stop, stopped) = oneshot::channel::<()>();

            let server = {
                let harness = Arc::clone(&harness);
                tokio::spawn(async move {
                    harness
                        .service
                        .serve(listener, async {
                            let _ = stopped.await;
                        })
                        .await
                        .unwrap();
                })
            };

            Self {
                harness,
                addr,
                stop: Some(stop),
                server,
            }
        }

        async fn client(&self) -> Client {
            self.client_at("/api/whatsapp/events").await.unwrap()
        }

        async fn client_at(&self, path: &str) -> Result<Client, WsError> {
            connect_async(format!("ws://{}{}", self.addr, path))
                .await
                .map(|(ws, _)| ws)
        }

        /// Handle opened by the startup initialize
        async fn handle(&self) -> FakeHandle {
            for _ in 0..100 {
                if let Some(handle) = self.harness.connector.last() {
                    return handle;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("startup initialize never opened a handle");
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
        }
    }

    async fn next_frame(ws: &mut Client) -> Message {
        tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame")
    }

    async fn next_json(ws: &mut Client) -> Value {
        loop {
            match next_frame(ws).await {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    /// Read updates until one reports `status`
    async fn wait_for_status(ws: &mut Client, status: &str) -> Value {
        loop {
            let frame = next_json(ws).await;
            assert_eq!(frame["event"], "qr-update");
            if frame["data"]["connectionStatus"] == status {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_on_connect_and_on_transition() {
        let running = Running::start(GatewayConfig::default()).await;
        let mut ws = running.client().await;

        let first = next_json(&mut ws).await;
        assert_eq!(first["event"], "qr-update");
        assert!(first["data"]["connectionStatus"].is_string());

        let handle = running.handle().await;
        handle.qr("qr-payload").await;

        let update = wait_for_status(&mut ws, "qr-ready").await;
        assert_eq!(update["data"]["hasActiveQR"], true);
        assert_eq!(update["data"]["qrData"]["image"], "qr-payload");

        handle.open().await;
        let update = wait_for_status(&mut ws, "connected").await;
        assert_eq!(update["data"]["isConnected"], true);
        assert!(update["data"]["qrData"].is_null());

        running.stop().await;
    }

    #[tokio::test]
    async fn test_late_joiner_gets_retained_snapshot() {
        let running = Running::start(GatewayConfig::default()).await;
        let handle = running.handle().await;
        handle.qr("qr-early").await;

        let mut watcher = running.client().await;
        wait_for_status(&mut watcher, "qr-ready").await;

        // Joins after the QR was broadcast
        let mut late = running.client().await;
        let first = next_json(&mut late).await;
        assert_eq!(first["data"]["connectionStatus"], "qr-ready");
        assert_eq!(first["data"]["qrData"]["image"], "qr-early");

        running.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_ceiling() {
        let mut config = GatewayConfig::default();
        config.websocket.max_subscribers = 1;
        let running = Running::start(config).await;
        running.handle().await;

        let mut admitted = running.client().await;
        next_json(&mut admitted).await;

        let mut rejected = running.client().await;
        let error = next_json(&mut rejected).await;
        assert_eq!(error["event"], "error");
        match next_frame(&mut rejected).await {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1013),
            other => panic!("expected close frame, got {:?}", other),
        }

        // The admitted subscriber is unaffected
        admitted
            .send(Message::text(r#"{"event":"get-status"}"#))
            .await
            .unwrap();
        assert_eq!(next_json(&mut admitted).await["event"], "qr-update");
        assert_eq!(
            running
                .harness
                .service
                .metrics()
                .websocket_rejected
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );

        running.stop().await;
    }

    #[tokio::test]
    async fn test_join_user_and_invalid_frames() {
        let running = Running::start(GatewayConfig::default()).await;
        // Startup initialize has broadcast its last transition
        running.handle().await;
        let mut ws = running.client().await;
        assert_eq!(
            next_json(&mut ws).await["data"]["connectionStatus"],
            "initializing"
        );

        ws.send(Message::text(r#"{"event":"join-user","userId":"user-7"}"#))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["event"], "qr-update");

        ws.send(Message::text(r#"{"event":"join-user","userId":"  "}"#))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["event"], "error");

        ws.send(Message::text("definitely not json")).await.unwrap();
        assert_eq!(next_json(&mut ws).await["event"], "error");

        running.stop().await;
    }

    #[tokio::test]
    async fn test_api_key_guards_realtime_channel() {
        let mut config = GatewayConfig::default();
        config.security.api_key = Some("s3cret".into());
        let running = Running::start(config).await;
        let handle = running.handle().await;
        handle.qr("pairing-secret").await;

        match running.client_at("/api/whatsapp/events").await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            Ok(_) => panic!("upgrade without a key was accepted"),
            Err(other) => panic!("unexpected handshake error: {:?}", other),
        }
        assert!(running
            .client_at("/api/whatsapp/events?token=wrong")
            .await
            .is_err());
        assert_eq!(running.harness.service.sessions().broadcaster().subscriber_count(), 0);

        let mut ws = running
            .client_at("/api/whatsapp/events?token=s3cret")
            .await
            .unwrap();
        let update = wait_for_status(&mut ws, "qr-ready").await;
        assert_eq!(update["data"]["qrData"]["image"], "pairing-secret");

        running.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_departures_leave_session_untouched() {
        let running = Running::start(GatewayConfig::default()).await;
        let handle = running.handle().await;
        handle.open().await;

        let mut watcher = running.client().await;
        wait_for_status(&mut watcher, "connected").await;
        let sessions = running.harness.service.sessions();
        let before = sessions.status();

        // One client vanishes without a close frame, one closes cleanly
        // after a bad frame
        let abrupt = running.client().await;
        let mut polite = running.client().await;
        drop(abrupt);
        wait_for_status(&mut polite, "connected").await;
        polite.send(Message::text("garbage")).await.unwrap();
        assert_eq!(next_json(&mut polite).await["event"], "error");
        polite.close(None).await.unwrap();

        let broadcaster = sessions.broadcaster();
        for _ in 0..100 {
            if broadcaster.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broadcaster.subscriber_count(), 1);

        assert_eq!(sessions.status(), before);
        assert!(sessions.is_connected());
        assert_eq!(running.harness.connector.open_count(), 1);

        // The remaining subscriber still gets live updates
        watcher
            .send(Message::text(r#"{"event":"get-status"}"#))
            .await
            .unwrap();
        let frame = next_json(&mut watcher).await;
        assert_eq!(frame["data"]["connectionStatus"], "connected");

        running.stop().await;
    }
}
