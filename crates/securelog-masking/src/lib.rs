//! Field-name and annotation driven PII masking.
//!
//! Implements the Masking Engine: given a structured payload, replace every
//! sensitive value with a fixed masked representation, descending into
//! nested mappings and sequences up to a bounded depth. Masking never fails
//! from the caller's point of view — rule errors fail closed to the
//! PASSWORD strategy and are logged.

mod strategies;

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

pub use strategies::MaskType;

/// Depth limit for descending into nested payload mappings/sequences.
pub const MAX_MASK_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("emergency masking is enabled but no public key was configured")]
    MissingEmergencyKey,
    #[error("emergency encryption failed: {0}")]
    EmergencyEncryptionFailed(String),
}

/// Mapping from a field-name pattern to the masking strategy applied when a
/// payload key matches it (case-insensitive, exact match on the key name).
#[derive(Debug, Clone)]
pub struct MaskingRules {
    patterns: HashMap<String, MaskType>,
}

impl MaskingRules {
    pub fn new() -> Self {
        Self {
            patterns: HashMap::new(),
        }
    }

    /// The built-in pattern table named in the spec: rrn, credit_card,
    /// password, ssn, phone, email, name, address, account_number.
    pub fn with_defaults() -> Self {
        let mut rules = Self::new();
        rules.add_pattern("rrn", MaskType::Rrn);
        rules.add_pattern("credit_card", MaskType::CreditCard);
        rules.add_pattern("card_number", MaskType::CreditCard);
        rules.add_pattern("password", MaskType::Password);
        rules.add_pattern("passwd", MaskType::Password);
        rules.add_pattern("ssn", MaskType::Ssn);
        rules.add_pattern("phone", MaskType::Phone);
        rules.add_pattern("phone_number", MaskType::Phone);
        rules.add_pattern("email", MaskType::Email);
        rules.add_pattern("name", MaskType::Name);
        rules.add_pattern("full_name", MaskType::Name);
        rules.add_pattern("address", MaskType::Address);
        rules.add_pattern("account_number", MaskType::AccountNumber);
        rules
    }

    pub fn add_pattern(&mut self, field_name: impl Into<String>, mask_type: MaskType) {
        self.patterns.insert(field_name.into().to_lowercase(), mask_type);
    }

    pub fn lookup(&self, field_name: &str) -> Option<MaskType> {
        self.patterns.get(&field_name.to_lowercase()).copied()
    }
}

impl Default for MaskingRules {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Static per-field annotation metadata, the systems-language stand-in for
/// the source's runtime reflection over annotated fields (see design note in
/// SPEC_FULL.md §10.7): a table of `(field_name, mask_type)` a call site
/// registers up front, independent of the field-name pattern table.
#[derive(Debug, Clone, Default)]
pub struct FieldAnnotations {
    mask_types: HashMap<String, MaskType>,
    emergency_fields: std::collections::HashSet<String>,
}

impl FieldAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotate(&mut self, field_name: impl Into<String>, mask_type: MaskType) {
        self.mask_types.insert(field_name.into(), mask_type);
    }

    pub fn annotate_emergency(&mut self, field_name: impl Into<String>) {
        self.emergency_fields.insert(field_name.into());
    }

    fn lookup(&self, field_name: &str) -> Option<MaskType> {
        self.mask_types.get(field_name).copied()
    }

    fn is_emergency(&self, field_name: &str) -> bool {
        self.emergency_fields.contains(field_name)
    }
}

/// RSA public key used by emergency mode to encrypt the original value
/// alongside the masked display form. The private key never enters this
/// crate or process.
pub struct EmergencyConfig {
    pub enabled: bool,
    pub public_key: rsa::RsaPublicKey,
}

/// Mask a single payload (the top-level mapping of a log record), applying
/// `rules` (key-name driven) and `annotations` (field-metadata driven),
/// optionally layering emergency-mode encryption for annotated fields.
pub fn mask_payload(
    payload: &Map<String, Value>,
    rules: &MaskingRules,
    annotations: Option<&FieldAnnotations>,
    emergency: Option<&EmergencyConfig>,
) -> Map<String, Value> {
    mask_object(payload, rules, annotations, emergency, 0)
}

fn mask_object(
    object: &Map<String, Value>,
    rules: &MaskingRules,
    annotations: Option<&FieldAnnotations>,
    emergency: Option<&EmergencyConfig>,
    depth: usize,
) -> Map<String, Value> {
    let mut out = Map::with_capacity(object.len());
    for (key, value) in object {
        let mask_type = annotations
            .and_then(|a| a.lookup(key))
            .or_else(|| rules.lookup(key));

        let is_emergency = annotations.map(|a| a.is_emergency(key)).unwrap_or(false);

        let masked_value = if is_emergency {
            match emergency {
                Some(cfg) if cfg.enabled => {
                    mask_emergency(value, mask_type, cfg).unwrap_or_else(|err| {
                        tracing::error!(field = %key, error = %err, "emergency masking failed, falling back to password mask");
                        mask_scalar_or_descend(value, Some(MaskType::Password), rules, annotations, emergency, depth)
                    })
                }
                _ => mask_scalar_or_descend(value, mask_type, rules, annotations, emergency, depth),
            }
        } else {
            mask_scalar_or_descend(value, mask_type, rules, annotations, emergency, depth)
        };

        out.insert(key.clone(), masked_value);
    }
    out
}

fn mask_scalar_or_descend(
    value: &Value,
    mask_type: Option<MaskType>,
    rules: &MaskingRules,
    annotations: Option<&FieldAnnotations>,
    emergency: Option<&EmergencyConfig>,
    depth: usize,
) -> Value {
    match value {
        Value::Object(inner) => {
            if depth >= MAX_MASK_DEPTH {
                tracing::warn!(depth, "masking depth limit reached, leaving remainder unmasked-structure intact but opaque");
                return Value::Object(Map::new());
            }
            Value::Object(mask_object(inner, rules, annotations, emergency, depth + 1))
        }
        Value::Array(items) => {
            if depth >= MAX_MASK_DEPTH {
                return Value::Array(Vec::new());
            }
            Value::Array(
                items
                    .iter()
                    .map(|item| mask_scalar_or_descend(item, mask_type, rules, annotations, emergency, depth + 1))
                    .collect(),
            )
        }
        other => match mask_type {
            Some(mt) => apply_strategy(other, mt),
            None => other.clone(),
        },
    }
}

fn apply_strategy(value: &Value, mask_type: MaskType) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => {
            if s.is_empty() {
                Value::String(String::new())
            } else {
                Value::String(strategies::mask(mask_type, s))
            }
        }
        other => {
            let text = match other {
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return other.clone(),
            };
            Value::String(strategies::mask(mask_type, &text))
        }
    }
}

fn mask_emergency(
    value: &Value,
    mask_type: Option<MaskType>,
    cfg: &EmergencyConfig,
) -> Result<Value, MaskingError> {
    let display = match mask_type {
        Some(mt) => apply_strategy(value, mt),
        None => apply_strategy(value, MaskType::Password),
    };

    let plaintext = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut rng = rand::thread_rng();
    let encrypted_bytes = cfg
        .public_key
        .encrypt(&mut rng, rsa::Oaep::new::<sha2::Sha256>(), plaintext.as_bytes())
        .map_err(|e| MaskingError::EmergencyEncryptionFailed(e.to_string()))?;

    let mut composite = Map::new();
    composite.insert("display".to_string(), display);
    composite.insert(
        "encrypted".to_string(),
        Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            encrypted_bytes,
        )),
    );
    Ok(Value::Object(composite))
}

/// `mask(mask(payload)) == mask(payload)`: masking is idempotent because
/// every strategy is a total, deterministic function of its masked output
/// (stars stay stars) — re-applying the key-matched strategy to an
/// already-masked string reproduces the same masked string for every
/// strategy in this crate.
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_rules() -> MaskingRules {
        MaskingRules::with_defaults()
    }

    #[test]
    fn masks_nested_payload() {
        let rules = sample_rules();
        let payload: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "rrn": "123456-1234567",
            "amount": 1000,
            "nested": { "password": "hunter2" },
            "tags": ["password123"]
        }))
        .unwrap();

        let masked = mask_payload(&payload, &rules, None, None);
        assert_eq!(masked["rrn"], Value::String("123456-*******".to_string()));
        assert_eq!(masked["amount"], Value::Number(1000.into()));
        assert_eq!(
            masked["nested"]["password"],
            Value::String("*".repeat(8))
        );
    }

    #[test]
    fn null_and_empty_pass_through() {
        let rules = sample_rules();
        let payload: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "password": null,
            "ssn": ""
        }))
        .unwrap();
        let masked = mask_payload(&payload, &rules, None, None);
        assert_eq!(masked["password"], Value::Null);
        assert_eq!(masked["ssn"], Value::String(String::new()));
    }

    #[test]
    fn annotation_overrides_key_pattern() {
        let rules = sample_rules();
        let mut annotations = FieldAnnotations::new();
        annotations.annotate("custom_field", MaskType::Ssn);

        let payload: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "custom_field": "123-45-6789"
        }))
        .unwrap();

        let masked = mask_payload(&payload, &rules, Some(&annotations), None);
        assert_eq!(masked["custom_field"], Value::String("***-**-6789".to_string()));
    }

    proptest! {
        #[test]
        fn mask_idempotent(s in "[A-Za-z0-9 @.\\-]{0,40}") {
            let rules = sample_rules();
            let mut payload = Map::new();
            payload.insert("password".to_string(), Value::String(s));
            let once = mask_payload(&payload, &rules, None, None);
            let twice = mask_payload(&once, &rules, None, None);
            prop_assert_eq!(once, twice);
        }
    }
}
