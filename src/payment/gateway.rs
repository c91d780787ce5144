use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use utoipa::ToSchema;

use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;

/// HTTP client for the payment gateway plus the signature primitives.
/// Signature verification is pure and fails closed: any internal error
/// counts as a failed verification.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

/// Remote record of an expected charge, created before the user pays.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in minor currency units, as the gateway expects.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    /// Create a payment intent for an order. The receipt ties the remote
    /// record back to our order number.
    pub async fn create_intent(&self, amount: Decimal, receipt: &str) -> AppResult<PaymentIntent> {
        let body = serde_json::json!({
            "amount": to_minor_units(amount)?,
            "currency": self.config.currency,
            "receipt": receipt,
        });
        let value = self.post_with_retry("/orders", &body).await?;
        serde_json::from_value(value)
            .map_err(|e| AppError::ExternalService(format!("unexpected intent response: {e}")))
    }

    /// Issue a refund against a captured payment.
    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Decimal,
        reason: Option<&str>,
    ) -> AppResult<GatewayRefund> {
        let body = serde_json::json!({
            "amount": to_minor_units(amount)?,
            "notes": { "reason": reason },
        });
        let path = format!("/payments/{payment_id}/refund");
        let value = self.post_with_retry(&path, &body).await?;
        serde_json::from_value(value)
            .map_err(|e| AppError::ExternalService(format!("unexpected refund response: {e}")))
    }

    /// Verify the signature the gateway hands to the client after a
    /// successful payment: HMAC-SHA256 over "<gateway_order_id>|<payment_id>"
    /// keyed with the API secret.
    pub fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        let message = format!("{gateway_order_id}|{payment_id}");
        verify_hmac(
            self.config.key_secret.as_bytes(),
            message.as_bytes(),
            signature,
        )
    }

    /// Verify a webhook delivery: HMAC-SHA256 over the exact raw payload
    /// bytes, keyed with the webhook secret.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        verify_hmac(self.config.webhook_secret.as_bytes(), raw_body, signature)
    }

    /// POST with bounded retry on transient failures (connect errors,
    /// timeouts, 5xx). Client errors are reported immediately.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<serde_json::Value>().await.map_err(|e| {
                        AppError::ExternalService(format!("invalid gateway response: {e}"))
                    });
                }
                Ok(resp) if resp.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(status = %resp.status(), attempt, "gateway request failed, retrying");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    return Err(AppError::ExternalService(format!(
                        "gateway returned {status}: {detail}"
                    )));
                }
                Err(err) if (err.is_connect() || err.is_timeout()) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(error = %err, attempt, "gateway unreachable, retrying");
                }
                Err(err) => return Err(AppError::ExternalService(err.to_string())),
            }

            tokio::time::sleep(Duration::from_millis(
                RETRY_BASE_DELAY_MS << (attempt - 1),
            ))
            .await;
        }
    }
}

fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("amount out of range".into()))
}

/// Compute the hex HMAC-SHA256 of `message` under `secret`. Shared by
/// verification here and by callers that need to produce signatures.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_hmac(secret: &[u8], message: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    match hmac_sha256_hex(secret, message) {
        Some(expected) => constant_time_eq(&expected, signature),
        None => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(key_secret: &str, webhook_secret: &str) -> GatewayClient {
        GatewayClient::new(GatewayConfig {
            base_url: "http://localhost:0".into(),
            key_id: "key_test".into(),
            key_secret: key_secret.into(),
            webhook_secret: webhook_secret.into(),
            currency: "INR".into(),
        })
    }

    #[test]
    fn payment_signature_round_trip() {
        let client = client("s3cret", "whsecret");
        let sig = hmac_sha256_hex(b"s3cret", b"order_abc|pay_xyz").unwrap();
        assert!(client.verify_payment_signature("order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn tampered_payment_signature_fails() {
        let client = client("s3cret", "whsecret");
        let sig = hmac_sha256_hex(b"s3cret", b"order_abc|pay_xyz").unwrap();
        assert!(!client.verify_payment_signature("order_abc", "pay_other", &sig));
        assert!(!client.verify_payment_signature("order_abc", "pay_xyz", "deadbeef"));
        assert!(!client.verify_payment_signature("order_abc", "pay_xyz", ""));
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let client = client("s3cret", "whsecret");
        let body = br#"{"event":"payment.captured"}"#;
        let good = hmac_sha256_hex(b"whsecret", body).unwrap();
        let wrong_key = hmac_sha256_hex(b"s3cret", body).unwrap();
        assert!(client.verify_webhook_signature(body, &good));
        assert!(!client.verify_webhook_signature(body, &wrong_key));
    }

    #[test]
    fn missing_secret_fails_closed() {
        let client = client("", "");
        let sig = hmac_sha256_hex(b"", b"order_abc|pay_xyz").unwrap_or_default();
        assert!(!client.verify_payment_signature("order_abc", "pay_xyz", &sig));
        assert!(!client.verify_webhook_signature(b"{}", &sig));
    }

    #[test]
    fn minor_units_conversion() {
        use rust_decimal_macros::dec;
        assert_eq!(to_minor_units(dec!(2263.00)).unwrap(), 226300);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }
}
