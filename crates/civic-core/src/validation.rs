//! # Validation Module
//!
//! Argument checks applied before any network work starts.
//!
//! ## Usage
//! ```rust
//! use civic_core::validation::{validate_endpoint, validate_tier};
//! use civic_core::AccessTier;
//!
//! assert_eq!(validate_tier(2).unwrap(), AccessTier::Partner);
//! assert!(validate_endpoint("wss://data.example.org/ws").is_ok());
//! assert!(validate_endpoint("https://data.example.org").is_err());
//! ```

use url::Url;

use crate::error::ValidationError;
use crate::types::AccessTier;
use crate::MAX_CACHE_KEY_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a raw tier value and converts it.
pub fn validate_tier(tier: i64) -> ValidationResult<AccessTier> {
    u8::try_from(tier)
        .map_err(|_| ValidationError::OutOfRange {
            field: "tier".to_string(),
            min: 0,
            max: 2,
        })
        .and_then(AccessTier::try_from)
}

/// Validates a push endpoint address.
///
/// ## Rules
/// - Must not be empty
/// - Must parse as an absolute URL
/// - Scheme must be `ws` or `wss`
/// - Must name a host
pub fn validate_endpoint(target: &str) -> ValidationResult<Url> {
    let target = target.trim();

    if target.is_empty() {
        return Err(ValidationError::Required {
            field: "target".to_string(),
        });
    }

    let url = Url::parse(target).map_err(|e| ValidationError::InvalidFormat {
        field: "target".to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ValidationError::InvalidFormat {
            field: "target".to_string(),
            reason: format!("scheme must be ws or wss, got {}", url.scheme()),
        });
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidFormat {
            field: "target".to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Validates a cache key.
pub fn validate_cache_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "key".to_string(),
        });
    }

    if key.len() > MAX_CACHE_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "key".to_string(),
            max: MAX_CACHE_KEY_LEN,
        });
    }

    Ok(())
}

/// Validates subscription topics: each must be non-blank.
pub fn validate_topics<S: AsRef<str>>(topics: &[S]) -> ValidationResult<()> {
    if topics.iter().any(|t| t.as_ref().trim().is_empty()) {
        return Err(ValidationError::Required {
            field: "topic".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tier() {
        assert_eq!(validate_tier(0).unwrap(), AccessTier::Public);
        assert_eq!(validate_tier(1).unwrap(), AccessTier::Registered);
        assert!(validate_tier(-1).is_err());
        assert!(validate_tier(3).is_err());
        assert!(validate_tier(300).is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("ws://localhost:8080/ws").is_ok());
        assert!(validate_endpoint("wss://civic.example.org/ws").is_ok());

        assert!(matches!(
            validate_endpoint("  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_endpoint("http://civic.example.org"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_validate_cache_key() {
        assert!(validate_cache_key("districts").is_ok());
        assert!(validate_cache_key("").is_err());
        assert!(validate_cache_key(&"k".repeat(MAX_CACHE_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_topics() {
        assert!(validate_topics(&["alert", "clusterUpdate"]).is_ok());
        assert!(validate_topics::<&str>(&[]).is_ok());
        assert!(validate_topics(&["alert", " "]).is_err());
    }
}
