use std::time::Duration;

use almox_core::config::NotificationConfig;
use almox_core::notifications::{NotificationError, NotificationSender, RequestNotification};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// Posts each notification as JSON to a generic webhook.
pub struct WebhookNotificationSender {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    kind: &'static str,
    correlation_id: &'a str,
    reason: Option<&'a str>,
    request: &'a almox_core::MaterialRequest,
}

impl WebhookNotificationSender {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into(), token })
    }

    /// `None` when no webhook url is configured.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>, NotificationError> {
        match &config.webhook_url {
            Some(url) => Self::new(
                url.clone(),
                config.webhook_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &RequestNotification) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            kind: notification.kind.as_str(),
            correlation_id: &notification.correlation_id,
            reason: notification.reason.as_deref(),
            request: &notification.request,
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| NotificationError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use almox_core::domain::material::MaterialId;
    use almox_core::domain::principal::UserId;
    use almox_core::domain::request::{MaterialRequest, NewLineItem, UnitId};
    use almox_core::notifications::{
        NotificationError, NotificationKind, NotificationSender, RequestNotification,
    };
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::Value;

    use super::WebhookNotificationSender;

    type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn receiver(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Received>,
                          headers: HeaderMap,
                          Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_owned);
                        received.lock().expect("lock").push((auth, body));
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{address}/hook"), received)
    }

    fn notification() -> RequestNotification {
        let mut request = MaterialRequest::new(
            UserId("u-requester".to_string()),
            UnitId("unit-north".to_string()),
            None,
            vec![NewLineItem { material_id: MaterialId("7".to_string()), quantity: 3 }],
            Utc::now(),
        )
        .expect("request");
        request.rejection_reason = Some("duplicate".to_string());
        RequestNotification::new(NotificationKind::Rejected, request, "corr-hook")
    }

    #[tokio::test]
    async fn posts_json_with_bearer_token() {
        let (url, received) = receiver(StatusCode::NO_CONTENT).await;
        let sender = WebhookNotificationSender::new(
            url,
            Some(SecretString::from("hook-token".to_string())),
            Duration::from_secs(5),
        )
        .expect("client");

        sender.send(&notification()).await.expect("delivered");

        let received = received.lock().expect("lock").clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer hook-token"));
        assert_eq!(received[0].1["kind"], "rejected");
        assert_eq!(received[0].1["reason"], "duplicate");
        assert_eq!(received[0].1["request"]["items"][0]["requested_quantity"], 3);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let (url, _) = receiver(StatusCode::BAD_GATEWAY).await;
        let sender = WebhookNotificationSender::new(url, None, Duration::from_secs(5))
            .expect("client");

        let error = sender.send(&notification()).await.expect_err("502");
        assert!(matches!(error, NotificationError::Status(502)));
    }
}
