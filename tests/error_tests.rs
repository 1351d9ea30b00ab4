//! Error handling tests for r-token-registry.
//!
//! Tests the error types and their behavior.

use r_token_registry::{RTokenError, TokenKind};
use std::error::Error;

#[cfg(test)]
mod error_handling {
    use super::*;

    #[test]
    fn transient_store_display() {
        let error = RTokenError::TransientStore;
        let message = format!("{}", error);

        assert_eq!(
            message,
            "optimistic store transaction conflicted; no partial effect was applied"
        );
    }

    #[test]
    fn retries_exhausted_display_carries_attempts() {
        let error = RTokenError::RetriesExhausted { attempts: 10 };
        let message = format!("{}", error);

        assert_eq!(message, "store transaction retries exhausted after 10 attempts");
    }

    #[test]
    fn unsupported_kind_display_names_the_kind() {
        let access = format!("{}", RTokenError::UnsupportedKind(TokenKind::Access));
        let refresh = format!("{}", RTokenError::UnsupportedKind(TokenKind::Refresh));

        assert_eq!(access, "token kind ACCESS is not configured on this registry");
        assert_eq!(refresh, "token kind REFRESH is not configured on this registry");
    }

    #[test]
    fn encode_error_wraps_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("{broken")
            .expect_err("parse should fail");
        let error = RTokenError::from(json_error);

        assert!(matches!(error, RTokenError::Encode(_)));
        assert!(error.source().is_some());
    }

    #[test]
    fn error_debug() {
        let error = RTokenError::TransientStore;
        let debug_str = format!("{:?}", error);

        assert!(debug_str.contains("TransientStore"));
    }

    #[test]
    fn error_trait_implementation() {
        let error = RTokenError::TransientStore;

        // Should implement Error trait
        let _: &dyn Error = &error;

        // source() should return None for this simple error
        assert!(error.source().is_none());
    }
}
