//! Token extraction and the precedence rule from spec.md §4.6: a gateway
//! token, if present on a connection at all, is the sole authentication
//! path — it does not fall back to single-user auth on failure. Only the
//! *absence* of a gateway token defers to that pre-existing collaborator.

use crate::tenant::TenantManager;

/// Where a candidate gateway token was found, in the precedence order
/// spec.md §4.6 specifies: an explicit `connect` payload field beats the
/// `X-Gateway-Token` header, which beats `Authorization: Bearer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    ConnectPayload,
    GatewayTokenHeader,
    AuthorizationBearer,
}

/// Raw inputs a connection may offer. Any subset may be `None`; the caller
/// (the WebSocket framing layer, out of this crate's scope) is responsible
/// for populating whichever of these its transport actually carries.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTokenInputs<'a> {
    pub connect_payload_token: Option<&'a str>,
    pub gateway_token_header: Option<&'a str>,
    pub authorization_header: Option<&'a str>,
}

impl<'a> ConnectionTokenInputs<'a> {
    /// Resolve the single candidate token per the precedence order, along
    /// with where it came from. `Authorization: Bearer <token>` is unwrapped
    /// of its `Bearer ` prefix (case-insensitive); a header present but not
    /// bearer-shaped is treated as absent.
    pub fn resolve(&self) -> Option<(TokenSource, &'a str)> {
        if let Some(token) = self.connect_payload_token {
            return Some((TokenSource::ConnectPayload, token));
        }
        if let Some(token) = self.gateway_token_header {
            return Some((TokenSource::GatewayTokenHeader, token));
        }
        if let Some(header) = self.authorization_header {
            if let Some(token) = strip_bearer_prefix(header) {
                return Some((TokenSource::AuthorizationBearer, token));
            }
        }
        None
    }
}

fn strip_bearer_prefix(header: &str) -> Option<&str> {
    let prefix = "bearer ";
    if header.len() > prefix.len() && header[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(header[prefix.len()..].trim())
    } else {
        None
    }
}

/// Outcome of authenticating one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No gateway token was offered at all — the caller should defer to
    /// single-user authentication, which this crate does not implement.
    NoGatewayToken,
    Authenticated { user_id: String },
    /// A gateway token was offered but failed to authenticate. Per spec.md
    /// §4.6 this is terminal: the connection is rejected and does NOT fall
    /// back to single-user auth.
    Rejected,
}

/// Authenticate a connection's gateway token, if any, against `manager`.
/// This is a thin wrapper: all caching, verification, and provisioning
/// happens inside [`TenantManager::authenticate_token`].
pub async fn authenticate(
    manager: &TenantManager,
    inputs: &ConnectionTokenInputs<'_>,
) -> AuthOutcome {
    let Some((_source, token)) = inputs.resolve() else {
        return AuthOutcome::NoGatewayToken;
    };

    match manager.authenticate_token(token).await {
        Some(user_id) => AuthOutcome::Authenticated { user_id },
        None => AuthOutcome::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_favors_connect_payload_over_headers() {
        let inputs = ConnectionTokenInputs {
            connect_payload_token: Some("gt-payload"),
            gateway_token_header: Some("gt-header"),
            authorization_header: Some("Bearer gt-bearer"),
        };
        assert_eq!(
            inputs.resolve(),
            Some((TokenSource::ConnectPayload, "gt-payload"))
        );
    }

    #[test]
    fn precedence_favors_gateway_header_over_bearer() {
        let inputs = ConnectionTokenInputs {
            connect_payload_token: None,
            gateway_token_header: Some("gt-header"),
            authorization_header: Some("Bearer gt-bearer"),
        };
        assert_eq!(
            inputs.resolve(),
            Some((TokenSource::GatewayTokenHeader, "gt-header"))
        );
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let inputs = ConnectionTokenInputs {
            connect_payload_token: None,
            gateway_token_header: None,
            authorization_header: Some("Bearer gt-bearer"),
        };
        assert_eq!(
            inputs.resolve(),
            Some((TokenSource::AuthorizationBearer, "gt-bearer"))
        );
    }

    #[test]
    fn non_bearer_authorization_header_is_ignored() {
        let inputs = ConnectionTokenInputs {
            connect_payload_token: None,
            gateway_token_header: None,
            authorization_header: Some("Basic dXNlcjpwYXNz"),
        };
        assert_eq!(inputs.resolve(), None);
    }

    #[test]
    fn no_token_anywhere_resolves_to_none() {
        let inputs = ConnectionTokenInputs::default();
        assert_eq!(inputs.resolve(), None);
    }
}
