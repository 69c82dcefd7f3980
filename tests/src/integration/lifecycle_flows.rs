//! # Session Lifecycle Flows
//!
//! Drives the lifecycle manager through protocol event sequences and checks
//! the state machine, the single-flight lock and both timers.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use notify_gateway::ports::CloseReason;
    use notify_gateway::{ConnectionStatus, LifecycleError, SessionSnapshot};

    use crate::integration::harness::{settle, Harness};

    fn assert_consistent(snapshot: &SessionSnapshot) {
        assert_eq!(
            snapshot.qr_data.is_some(),
            snapshot.connection_status == ConnectionStatus::QrReady,
            "QR present iff qr-ready: {:?}",
            snapshot
        );
        assert_eq!(snapshot.has_active_qr, snapshot.qr_data.is_some());
        assert_eq!(
            snapshot.is_connected,
            snapshot.connection_status == ConnectionStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_present_only_while_qr_ready() {
        let h = Harness::new();
        let sessions = h.service.sessions();
        assert_consistent(&sessions.status());

        sessions.initialize().await.unwrap();
        let handle = h.connector.last().unwrap();
        assert_consistent(&sessions.status());

        handle.qr("qr-1").await;
        settle().await;
        let first = sessions.status();
        assert_consistent(&first);
        assert_eq!(first.connection_status, ConnectionStatus::QrReady);

        // A fresh QR replaces the previous one without leaving qr-ready
        h.clock.advance(chrono::Duration::seconds(30));
        handle.qr("qr-2").await;
        settle().await;
        let second = sessions.status();
        assert_consistent(&second);
        let qr = second.qr_data.unwrap();
        assert_eq!(qr.image, "qr-2");
        assert_eq!(qr.expires_at - qr.created_at, chrono::Duration::seconds(120));

        handle.open().await;
        settle().await;
        assert_consistent(&sessions.status());
        assert!(sessions.is_connected());

        handle.close(CloseReason::LoggedOut).await;
        settle().await;
        let closed = sessions.status();
        assert_consistent(&closed);
        assert_eq!(closed.connection_status, ConnectionStatus::Disconnected);
        assert!(!sessions.has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_while_locked_changes_nothing() {
        let h = Harness::new();
        *h.connector.behavior.open_delay.lock() = Some(Duration::from_secs(5));

        let sessions = h.service.sessions().clone();
        let in_flight = tokio::spawn(async move { sessions.request_qr().await });
        settle().await;
        assert!(h.service.sessions().is_busy());

        let before = h.service.sessions().status();
        assert!(matches!(
            h.service.sessions().initialize().await,
            Err(LifecycleError::OperationInProgress)
        ));
        assert_eq!(h.service.sessions().status(), before);
        assert_eq!(h.connector.open_count(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        in_flight.await.unwrap().unwrap();
        assert_eq!(h.connector.open_count(), 1);
        assert!(!h.service.sessions().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_reconnects_once() {
        let h = Harness::new();
        let handle = h.connect().await;

        handle.close(CloseReason::ConnectionLost).await;
        settle().await;
        assert_eq!(
            h.service.sessions().connection_status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(h.connector.open_count(), 1);

        tokio::time::advance(Duration::from_millis(2900)).await;
        settle().await;
        assert_eq!(h.connector.open_count(), 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(h.connector.open_count(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_reconnect() {
        let h = Harness::new();
        let handle = h.connect().await;

        handle.close(CloseReason::ConnectionLost).await;
        settle().await;
        h.service.sessions().destroy().await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(
            h.service.sessions().connection_status(),
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_close_does_not_reconnect() {
        let h = Harness::new();
        let handle = h.connect().await;

        handle.close(CloseReason::LoggedOut).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(h.connector.open_count(), 1);
        assert!(!h.service.sessions().has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_survives_failed_credential_cleanup() {
        let h = Harness::new();
        let handle = h.connect().await;
        h.credentials.failing_clears.store(2, Ordering::SeqCst);

        h.service.sessions().reset_session().await.unwrap();

        let status = h.service.sessions().status();
        assert_eq!(status.connection_status, ConnectionStatus::Disconnected);
        assert!(!h.service.sessions().has_session());
        assert_eq!(h.credentials.clear_calls.load(Ordering::SeqCst), 2);
        assert!(handle.session.logged_out.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_failure_reinitializes() {
        let h = Harness::new();
        h.connect().await;
        h.connector.behavior.fail_logout.store(true, Ordering::SeqCst);

        assert!(h.service.sessions().reset_session().await.is_err());

        // Recovery opened a second handle
        assert_eq!(h.connector.open_count(), 2);
        assert!(h.service.sessions().has_session());
        assert!(!h.service.sessions().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_expiry_clears_payload() {
        let h = Harness::new();
        h.pairing("qr-1").await;
        assert!(h.service.sessions().status().has_active_qr);

        tokio::time::advance(Duration::from_secs(119)).await;
        settle().await;
        assert!(h.service.sessions().status().has_active_qr);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        let status = h.service.sessions().status();
        assert!(!status.has_active_qr);
        assert_consistent(&status);
        // The handle is kept so a late scan can still complete
        assert!(h.service.sessions().has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_from_replaced_handle_are_ignored() {
        let h = Harness::new();
        let old = h.pairing("qr-old").await;

        h.service.sessions().request_qr().await.unwrap();
        let new = h.connector.last().unwrap();
        assert_eq!(h.connector.open_count(), 2);
        assert!(old.session.logged_out.load(Ordering::SeqCst));

        old.open().await;
        settle().await;
        assert!(!h.service.sessions().is_connected());

        new.qr("qr-new").await;
        settle().await;
        assert_eq!(
            h.service.sessions().status().qr_data.map(|q| q.image),
            Some("qr-new".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_persist_from_events() {
        let h = Harness::new();
        let handle = h.pairing("qr").await;

        let mut entries = notify_gateway::ports::Credentials::new();
        entries.insert("creds.json".into(), b"{\"me\":1}".to_vec());
        handle
            .emit(notify_gateway::ports::ProtocolEvent::CredentialsUpdated(entries))
            .await;
        settle().await;

        assert!(h.credentials.snapshot().contains_key("creds.json"));
    }
}
