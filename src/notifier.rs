use serde_json::json;

/// Fire-and-forget email sender backed by an HTTP mail relay. Delivery
/// failures are logged and swallowed; they must never fail the operation
/// that triggered the notification.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    relay_url: Option<String>,
    from: String,
}

impl Notifier {
    pub fn new(relay_url: Option<String>, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay_url,
            from,
        }
    }

    pub fn send(&self, to: &str, subject: &str, html: &str) {
        let Some(url) = self.relay_url.clone() else {
            tracing::debug!(to, subject, "mail relay not configured, dropping notification");
            return;
        };

        let body = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "html": html,
        });
        let http = self.http.clone();
        let to = to.to_string();

        tokio::spawn(async move {
            let result = http
                .post(url)
                .json(&body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(err) = result {
                tracing::warn!(error = %err, to, "notification send failed");
            }
        });
    }
}
