//! Product notification pipeline.
//!
//! `send_product_info` runs the checks in a fixed order, so the first
//! failing stage decides the error a caller sees:
//!
//! 1. session readiness
//! 2. recipient normalization
//! 3. number registration lookup
//! 4. media resolution (inline decode or remote download)
//! 5. caption template lookup and rendering
//! 6. delivery through the session handle

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use tracing::{debug, info, instrument, warn};

use crate::domain::config::GatewayConfig;
use crate::domain::{
    render, render_filled, DeliveryReceipt, FetchError, ImagePayload, MediaInput, MediaPolicy, PhoneDigits,
    ProductInfoRequest, SendError, TemplateVars,
};
use crate::domain::LifecycleError;
use crate::lifecycle::SessionManager;
use crate::ports::{Clock, MediaFetcher, TemplateStore};

/// Knobs of the send pipeline
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub media: MediaPolicy,
    pub recipient_domain: String,
    pub default_context: String,
    pub default_text: String,
    pub utc_offset: FixedOffset,
}

impl From<&GatewayConfig> for DeliverySettings {
    fn from(config: &GatewayConfig) -> Self {
        // validate() bounds the offset; UTC is the fallback
        let utc_offset = FixedOffset::east_opt(config.template.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self {
            media: MediaPolicy::from(&config.media),
            recipient_domain: config.session.recipient_domain.clone(),
            default_context: config.template.default_context.clone(),
            default_text: config.template.default_text.clone(),
            utc_offset,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

/// Validates and delivers product notifications
pub struct SendOrchestrator {
    sessions: SessionManager,
    templates: Arc<dyn TemplateStore>,
    fetcher: Arc<dyn MediaFetcher>,
    clock: Arc<dyn Clock>,
    settings: DeliverySettings,
}

impl SendOrchestrator {
    pub fn new(
        sessions: SessionManager,
        templates: Arc<dyn TemplateStore>,
        fetcher: Arc<dyn MediaFetcher>,
        clock: Arc<dyn Clock>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            sessions,
            templates,
            fetcher,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Validate the request and deliver the image with a rendered caption
    #[instrument(skip_all, fields(operation = "send_product_info"))]
    pub async fn send_product_info(
        &self,
        request: &ProductInfoRequest,
    ) -> Result<DeliveryReceipt, SendError> {
        if !self.sessions.is_connected() {
            return Err(SendError::NotReady);
        }

        let digits = PhoneDigits::normalize(&request.phone)?;
        let identifier = digits.to_identifier(&self.settings.recipient_domain);

        let recipient = match self.sessions.validate_number(&identifier).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                info!(recipient = %digits, "Recipient is not registered");
                return Err(SendError::UnregisteredRecipient(digits.to_string()));
            }
            Err(LifecycleError::NotConnected) => return Err(SendError::NotReady),
            Err(e) => return Err(SendError::DeliveryFailed(e.to_string())),
        };

        let image = self.resolve_media(&request.image_data).await.map_err(|e| {
            warn!(recipient = %digits, error = %e, "Image rejected");
            e
        })?;

        let caption = self.render_caption(request).await;

        let message_id = self
            .sessions
            .send_image(&recipient, &image, &caption)
            .await
            .map_err(|e| {
                warn!(recipient = %recipient, error = %e, "Delivery failed");
                e
            })?;

        info!(
            recipient = %recipient,
            message_id = %message_id,
            mime_type = %image.mime_type,
            size = image.bytes.len(),
            "Product notification delivered"
        );

        Ok(DeliveryReceipt {
            message_id,
            recipient,
            timestamp: self.clock.now(),
        })
    }

    /// Turn the caller's payload into bytes ready for delivery
    pub async fn resolve_media(&self, raw: &str) -> Result<ImagePayload, SendError> {
        match MediaInput::parse(raw, &self.settings.media)? {
            MediaInput::Inline(payload) => {
                self.settings.media.check_len(payload.bytes.len())?;
                Ok(payload)
            }
            MediaInput::Remote(url) => {
                debug!(url = %url, "Downloading remote image");
                let limit = self.settings.media.max_bytes;
                let payload = self.fetcher.fetch(&url, limit).await.map_err(|e| match e {
                    FetchError::TooLarge { size, limit } => SendError::ImageTooLarge { size, limit },
                    other => SendError::ImageFetchFailed(other.to_string()),
                })?;
                self.settings.media.check_len(payload.bytes.len())?;
                Ok(payload)
            }
        }
    }

    /// Look up the caption template, falling back to the built-in text on a
    /// miss or a store failure. Stored templates keep unresolved keys
    /// verbatim; the built-in text blanks empty fields instead.
    pub async fn render_caption(&self, request: &ProductInfoRequest) -> String {
        let context = request
            .template_context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.settings.default_context);

        let (template, builtin) = match self.templates.lookup(context).await {
            Ok(Some(text)) => (text, false),
            Ok(None) => {
                debug!(context = %context, "Template not found, using default");
                (self.settings.default_text.clone(), true)
            }
            Err(e) => {
                warn!(context = %context, error = %e, "Template lookup failed, using default");
                (self.settings.default_text.clone(), true)
            }
        };

        let now = self.clock.now().with_timezone(&self.settings.utc_offset);
        let vars = TemplateVars::for_product(
            &request.product_name,
            &request.description,
            &request.phone,
            &request.email,
            now,
        );
        if builtin {
            render_filled(&template, &vars)
        } else {
            render(&template, &vars)
        }
    }
}
