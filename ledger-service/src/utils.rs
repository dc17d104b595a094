//! Shared utility functions for the ledger service

use axum::http::StatusCode;
use tracing::info;

use crate::ledger::LedgerError;
use crate::state::AppState;

/// Pick the instance a request addresses: explicit wins, then the
/// configured default. Always validated.
pub fn resolve_instance<'a>(
    requested: Option<&'a String>,
    state: &'a AppState,
) -> Result<&'a str, StatusCode> {
    let instance = requested
        .map(|s| s.as_str())
        .unwrap_or(&state.default_instance);
    validate_instance(instance)?;
    Ok(instance)
}

/// Validate a lottery instance id: lowercase alphanumeric plus dashes,
/// at most 64 characters
pub fn validate_instance(instance: &str) -> Result<(), StatusCode> {
    let well_formed = !instance.is_empty()
        && instance.len() <= 64
        && instance
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        info!(
            "Invalid instance '{}'. Must be lowercase alphanumeric/dashes, max 64 chars",
            instance
        );
        Err(StatusCode::BAD_REQUEST)
    }
}

/// Validate that a wallet address is base58 for exactly 32 bytes
pub fn validate_wallet(address: &str) -> Result<(), StatusCode> {
    match bs58::decode(address).into_vec() {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => {
            info!("Invalid wallet address '{}'", address);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Map a ledger error onto the HTTP status the handlers answer with
pub fn ledger_error_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Conflict { .. } => StatusCode::CONFLICT,
        LedgerError::NotFound => StatusCode::NOT_FOUND,
        LedgerError::RoundClosed { .. }
        | LedgerError::RoundExpired { .. }
        | LedgerError::NoTickets => StatusCode::CONFLICT,
    }
}

/// Parse an environment variable into a type implementing FromStr, with a default fallback
pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_instance_valid() {
        assert!(validate_instance("main").is_ok());
        assert!(validate_instance("devnet-2").is_ok());
        assert!(validate_instance("a").is_ok());
    }

    #[test]
    fn test_validate_instance_invalid() {
        assert!(validate_instance("").is_err());
        assert!(validate_instance("MAIN").is_err()); // Case-sensitive
        assert!(validate_instance("bad instance").is_err());
        assert!(validate_instance("under_score").is_err());
        assert!(validate_instance(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_wallet_valid() {
        assert!(validate_wallet("11111111111111111111111111111111").is_ok());
        assert!(validate_wallet("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA").is_ok());
        assert!(validate_wallet("So11111111111111111111111111111111111111112").is_ok());
    }

    #[test]
    fn test_validate_wallet_invalid() {
        assert!(validate_wallet("").is_err());
        assert!(validate_wallet("abc").is_err());
        assert!(validate_wallet("not!base58").is_err());
        // Valid base58 but the wrong decoded length
        assert!(validate_wallet("1111111111111111").is_err());
    }

    #[test]
    fn test_ledger_error_status_mapping() {
        assert_eq!(
            ledger_error_status(&LedgerError::Unavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ledger_error_status(&LedgerError::Conflict { attempts: 3 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ledger_error_status(&LedgerError::NotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ledger_error_status(&LedgerError::NoTickets),
            StatusCode::CONFLICT
        );
    }
}
