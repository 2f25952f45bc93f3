//! Client Secret Validation
//!
//! The backend hands back `<intent-id>_secret_<random>`. Anything else is
//! rejected here, before a gateway round trip is spent on it.

use crate::error::{CheckoutError, Result};
use crate::model::PaymentReference;

/// Prefix every payment intent id carries
pub const INTENT_ID_PREFIX: &str = "pi_";

/// Token between the intent id and the random part
pub const SECRET_SEPARATOR: &str = "_secret_";

/// A validated client secret
///
/// `Debug` is redacted; use [`ClientSecret::expose`] to hand it to a gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    /// The raw secret, for the gateway call only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The `pi_...` part before the separator
    pub fn intent_id(&self) -> &str {
        self.0
            .split_once(SECRET_SEPARATOR)
            .map_or(self.0.as_str(), |(id, _)| id)
    }

    /// Payment reference recorded against the transaction once confirmed
    pub fn payment_reference(&self) -> PaymentReference {
        PaymentReference::new(self.intent_id())
    }
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientSecret({}_secret_***)", self.intent_id())
    }
}

/// Pure validation of backend-issued client secrets
pub struct SecretValidator;

impl SecretValidator {
    /// Normalize and validate a raw secret
    ///
    /// Trims whitespace and control characters and strips one layer of
    /// surrounding quotes (the backend sometimes JSON-encodes the value twice).
    pub fn validate(raw: &str) -> Result<ClientSecret> {
        let normalized = Self::normalize(raw);

        let Some(intent_part) = normalized.strip_prefix(INTENT_ID_PREFIX) else {
            return Err(CheckoutError::MalformedSecret(format!(
                "missing '{INTENT_ID_PREFIX}' prefix"
            )));
        };

        if normalized.matches(SECRET_SEPARATOR).count() != 1 {
            return Err(CheckoutError::MalformedSecret(format!(
                "expected exactly one '{SECRET_SEPARATOR}' separator"
            )));
        }

        let (id, random) = intent_part
            .split_once(SECRET_SEPARATOR)
            .ok_or_else(|| CheckoutError::MalformedSecret("separator overlaps prefix".into()))?;

        if id.is_empty() || random.is_empty() {
            return Err(CheckoutError::MalformedSecret("empty segment around separator".into()));
        }

        Ok(ClientSecret(normalized.to_string()))
    }

    /// Re-run the identical rule on an already-validated secret, right before
    /// it is handed to the gateway
    pub fn revalidate(secret: &ClientSecret) -> Result<ClientSecret> {
        Self::validate(secret.expose())
    }

    fn normalize(raw: &str) -> &str {
        let trimmed = trim_noise(raw);
        let unquoted = ['"', '\'']
            .iter()
            .find_map(|q| trimmed.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
            .unwrap_or(trimmed);
        trim_noise(unquoted)
    }
}

fn trim_noise(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}
