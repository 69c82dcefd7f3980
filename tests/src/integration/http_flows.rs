//! # HTTP Surface Flows
//!
//! Every route and status code, exercised through the assembled router with
//! its full middleware stack.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use notify_gateway::GatewayConfig;

    use crate::integration::harness::{
        product_body, settle, Harness, PNG_BASE64, REGISTERED_ID,
    };

    // =========================================================================
    // STATUS
    // =========================================================================

    #[tokio::test]
    async fn test_status_shape() {
        let h = Harness::new();
        let (status, body) = h.get("/api/whatsapp/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isConnected"], false);
        assert_eq!(body["hasActiveQR"], false);
        assert!(body["qrData"].is_null());
        assert_eq!(body["connectionStatus"], "disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_carries_qr() {
        let h = Harness::new();
        h.pairing("data:image/png;base64,QR").await;

        let (_, body) = h.get("/api/whatsapp/status").await;
        assert_eq!(body["connectionStatus"], "qr-ready");
        assert_eq!(body["hasActiveQR"], true);
        assert_eq!(body["qrData"]["image"], "data:image/png;base64,QR");
        assert!(body["qrData"]["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn test_root_is_alive() {
        let h = Harness::new();
        let (status, _) = h.get("/").await;
        assert_eq!(status, StatusCode::OK);
    }

    // =========================================================================
    // REQUEST-QR
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_request_qr_starts_pairing() {
        let h = Harness::new();
        let (status, body) = h.post("/api/whatsapp/request-qr", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(
            h.service.sessions().connection_status().as_str(),
            "initializing"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_qr_when_connected_is_400() {
        let h = Harness::new();
        h.connect().await;
        let (status, body) = h.post("/api/whatsapp/request-qr", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "already_connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_request_qr_is_409() {
        let h = std::sync::Arc::new(Harness::new());
        *h.connector.behavior.open_delay.lock() = Some(Duration::from_secs(5));

        let first = {
            let h = std::sync::Arc::clone(&h);
            tokio::spawn(async move { h.post("/api/whatsapp/request-qr", None).await })
        };
        settle().await;
        let in_flight = h.service.sessions().status();

        let (status, body) = h.post("/api/whatsapp/request-qr", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "operation_in_progress");
        assert_eq!(h.service.sessions().status(), in_flight);

        tokio::time::advance(Duration::from_secs(5)).await;
        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_qr_open_failure_is_500() {
        let h = Harness::new();
        h.connector.behavior.fail_open.store(true, Ordering::SeqCst);
        let (status, body) = h.post("/api/whatsapp/request-qr", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        // No protocol detail leaks to the caller
        assert!(!body["message"].as_str().unwrap().contains("fake"));
    }

    // =========================================================================
    // SEND-PRODUCT-INFO
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_send_delivers_with_receipt() {
        let h = Harness::new();
        let handle = h.connect().await;

        let (status, body) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["success"], true);
        assert_eq!(body["messageId"], "FAKE0001");
        assert_eq!(body["recipient"], REGISTERED_ID);
        assert_eq!(body["timestamp"], "2024-05-01T12:00:00Z");

        let sent = handle.session.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, REGISTERED_ID);
        assert_eq!(sent[0].mime_type, "image/png");
        // Default caption rendered at UTC-5
        assert!(sent[0].caption.contains("Nombre del Producto: Drill"));
        assert!(sent[0].caption.contains("Fecha: 01/05/2024"));
        assert!(sent[0].caption.contains("Hora: 07:00:00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_uses_named_template_and_keeps_unknown_keys() {
        let h = Harness::with_templates([("greeting", "Hi {{productName}}, {{unknown}}")]);
        let handle = h.connect().await;

        let mut body = product_body();
        body["templateContext"] = json!("greeting");
        let (status, _) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(handle.session.sent.lock()[0].caption, "Hi Drill, {{unknown}}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_falls_back_when_template_store_is_down() {
        let h = Harness::with_templates([("product_details", "custom {{productName}}")]);
        let handle = h.connect().await;
        h.templates.unavailable.store(true, Ordering::SeqCst);

        let (status, _) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(handle.session.sent.lock()[0]
            .caption
            .contains("Nombre del Producto: Drill"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_optional_fields_shows_no_placeholders() {
        let h = Harness::new();
        let handle = h.connect().await;

        let mut body = product_body();
        body.as_object_mut().unwrap().remove("email");
        body["description"] = json!("");
        let (status, _) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let caption = handle.session.sent.lock()[0].caption.clone();
        assert!(!caption.contains("{{"), "placeholder leaked: {}", caption);
    }

    #[tokio::test]
    async fn test_send_when_disconnected_is_400() {
        let h = Harness::new();
        let (status, body) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not_ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_validation_failures_are_400() {
        let h = Harness::new();
        h.connect().await;

        let cases = [
            ("phone", json!("123"), "invalid_recipient"),
            ("phone", json!(""), "invalid_recipient"),
            ("imageData", json!(""), "invalid_image_format"),
            ("imageData", json!("not*base64"), "invalid_image_format"),
            ("imageData", json!("data:image/bmp;base64,AAAA"), "invalid_image_format"),
            ("imageData", json!("https://cdn.example.com/missing.png"), "image_fetch_failed"),
        ];

        for (field, value, tag) in cases {
            let mut body = product_body();
            body[field] = value;
            let (status, response) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", field, response);
            assert_eq!(response["error"], tag);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_malformed_json_is_400() {
        let h = Harness::new();
        h.connect().await;
        let (status, body) = h
            .post("/api/whatsapp/send-product-info", Some(json!(["not", "an", "object"])))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_image_ceiling_is_inclusive() {
        let mut config = GatewayConfig::default();
        config.media.max_image_bytes = 6;
        let h = Harness::with_config(config, Vec::<(String, String)>::new());
        h.connect().await;

        // 8 encoded chars estimate 6 bytes: accepted
        let mut body = product_body();
        body["imageData"] = json!("iVBORw0K");
        let (status, _) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        // 12 encoded chars estimate 9 bytes: rejected
        let mut body = product_body();
        body["imageData"] = json!(PNG_BASE64);
        let (status, response) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "image_too_large");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_remote_image() {
        let h = Harness::new();
        let handle = h.connect().await;
        h.fetcher
            .serve("https://cdn.example.com/drill.gif", b"GIF89a....".to_vec());

        let mut body = product_body();
        body["imageData"] = json!("https://cdn.example.com/drill.gif");
        let (status, _) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(handle.session.sent.lock()[0].mime_type, "image/gif");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_unregistered_is_404() {
        let h = Harness::new();
        h.connect().await;
        let mut body = product_body();
        body["phone"] = json!("+1 (555) 010-9999");
        let (status, response) = h.post("/api/whatsapp/send-product-info", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response["error"], "unregistered_recipient");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_lookup_failure_reads_as_unregistered() {
        let h = Harness::new();
        h.connect().await;
        h.connector.behavior.fail_lookup.store(true, Ordering::SeqCst);
        let (status, _) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_delivery_failure_is_500() {
        let h = Harness::new();
        h.connect().await;
        h.connector.behavior.fail_send.store(true, Ordering::SeqCst);
        let (status, body) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "delivery_failed");
        assert_eq!(h.service.metrics().sends_failed.load(Ordering::Relaxed), 1);
    }

    // =========================================================================
    // RESET
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reset_succeeds() {
        let h = Harness::new();
        let handle = h.connect().await;
        let (status, body) = h.post("/api/whatsapp/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(handle.session.logged_out.load(Ordering::SeqCst));
        assert!(!h.service.sessions().has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reset_is_409() {
        let h = std::sync::Arc::new(Harness::new());
        h.connect().await;

        let first = {
            let h = std::sync::Arc::clone(&h);
            tokio::spawn(async move { h.post("/api/whatsapp/reset", None).await })
        };
        settle().await;

        let (status, _) = h.post("/api/whatsapp/reset", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_failure_with_recovery_is_200() {
        let h = Harness::new();
        h.connect().await;
        h.connector.behavior.fail_logout.store(true, Ordering::SeqCst);

        let (status, body) = h.post("/api/whatsapp/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("warnings"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_failure_without_recovery_is_500() {
        let h = Harness::new();
        h.connect().await;
        h.connector.behavior.fail_logout.store(true, Ordering::SeqCst);
        h.connector.behavior.fail_open.store(true, Ordering::SeqCst);

        let (status, body) = h.post("/api/whatsapp/reset", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
    }

    // =========================================================================
    // MIDDLEWARE
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_api_key_guards_mutating_routes_only() {
        let mut config = GatewayConfig::default();
        config.security.api_key = Some("s3cret".into());
        let h = Harness::with_config(config, Vec::<(String, String)>::new());

        let (status, _) = h.post("/api/whatsapp/request-qr", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = h
            .call(
                Method::POST,
                "/api/whatsapp/request-qr",
                None,
                &[("x-api-key", "s3cret")],
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h.get("/api/whatsapp/status").await;
        assert_eq!(status, StatusCode::OK);

        // The realtime channel carries the pairing QR, so it is guarded too
        let (status, _) = h.get("/api/whatsapp/events").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_rate_limit() {
        let mut config = GatewayConfig::default();
        config.rate_limit.send_per_minute = 2;
        let h = Harness::with_config(config, Vec::<(String, String)>::new());
        h.connect().await;

        for _ in 0..2 {
            let (status, _) = h
                .post("/api/whatsapp/send-product-info", Some(product_body()))
                .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = h
            .post("/api/whatsapp/send-product-info", Some(product_body()))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limited");

        // The general tier is untouched
        let (status, _) = h.post("/api/whatsapp/reset", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let h = Harness::new();
        h.get("/api/whatsapp/status").await;
        let (status, body) = h.get("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["connectionStatus"], "disconnected");
        assert!(body["gateway"]["requests_total"].as_u64().unwrap() >= 1);
        assert_eq!(body["realtime"]["subscribers"], 0);
    }
}
