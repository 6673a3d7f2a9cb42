//! 4.G Auth Gate.
//!
//! Credential *issuance* (username/password login, hashing, QR magic links)
//! is explicitly an external collaborator (spec.md §1, §9); this module only
//! *validates* a bearer already issued and binds it to a role + box
//! allow-list, the way `knhk-workflow-engine/src/security/auth.rs`'s
//! `AuthManager::authenticate` treats the token as an opaque lookup rather
//! than performing real crypto itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{CoreError, CoreResult};
use crate::session::generate_session_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Judge,
    Spectator,
}

/// Claims bound to an operator bearer token (spec.md §4.G.1).
#[derive(Debug, Clone)]
pub struct OperatorClaims {
    pub role: Role,
    /// Empty means "all boxes" (used for admin-wide tokens).
    pub box_ids: Vec<u32>,
    pub expires_at: Instant,
}

impl OperatorClaims {
    pub fn allows(&self, box_id: u32) -> bool {
        self.box_ids.is_empty() || self.box_ids.contains(&box_id)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Validates operator bearer tokens and issues/validates spectator tokens.
/// Token -> claims lookups are in-memory only, consistent with spec.md §1's
/// in-memory-authoritative, no-durable-storage non-goal.
#[derive(Clone)]
pub struct AuthGate {
    operator_tokens: Arc<DashMap<String, OperatorClaims>>,
    spectator_tokens: Arc<DashMap<String, Instant>>,
    spectator_ttl: Duration,
}

impl AuthGate {
    pub fn new(spectator_ttl: Duration) -> Self {
        Self {
            operator_tokens: Arc::new(DashMap::new()),
            spectator_tokens: Arc::new(DashMap::new()),
            spectator_ttl,
        }
    }

    /// Register a bearer token issued by the external credential service.
    /// Returns the token so callers (tests, an admin bootstrap script) can
    /// use it immediately.
    pub fn register_operator_token(&self, token: impl Into<String>, claims: OperatorClaims) {
        self.operator_tokens.insert(token.into(), claims);
    }

    pub fn validate_operator(&self, token: &str) -> CoreResult<OperatorClaims> {
        let entry = self
            .operator_tokens
            .get(token)
            .ok_or(CoreError::Unauthenticated)?;
        if entry.is_expired(Instant::now()) {
            return Err(CoreError::Unauthenticated);
        }
        Ok(entry.clone())
    }

    pub fn authorize_box(&self, claims: &OperatorClaims, box_id: u32) -> CoreResult<()> {
        if claims.allows(box_id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden)
        }
    }

    /// `POST /api/public/token`: no credentials required, read-only.
    pub fn issue_spectator_token(&self) -> (String, u64) {
        let token = generate_session_id();
        self.spectator_tokens.insert(token.clone(), Instant::now() + self.spectator_ttl);
        (token, self.spectator_ttl.as_secs())
    }

    pub fn validate_spectator(&self, token: &str) -> bool {
        match self.spectator_tokens.get(token) {
            Some(expires_at) => Instant::now() < *expires_at,
            None => false,
        }
    }

    /// Sweep out expired spectator tokens; called periodically so the map
    /// does not grow unboundedly over a long event.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.spectator_tokens.retain(|_, expires_at| *expires_at > now);
        self.operator_tokens.retain(|_, claims| !claims.is_expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_token_roundtrips() {
        let gate = AuthGate::new(Duration::from_secs(60));
        gate.register_operator_token(
            "tok",
            OperatorClaims { role: Role::Judge, box_ids: vec![1, 2], expires_at: Instant::now() + Duration::from_secs(60) },
        );
        let claims = gate.validate_operator("tok").unwrap();
        assert!(gate.authorize_box(&claims, 1).is_ok());
        assert!(matches!(gate.authorize_box(&claims, 3), Err(CoreError::Forbidden)));
    }

    #[test]
    fn unknown_token_is_unauthenticated() {
        let gate = AuthGate::new(Duration::from_secs(60));
        assert!(matches!(gate.validate_operator("nope"), Err(CoreError::Unauthenticated)));
    }

    #[test]
    fn expired_operator_token_rejected() {
        let gate = AuthGate::new(Duration::from_secs(60));
        gate.register_operator_token(
            "tok",
            OperatorClaims { role: Role::Admin, box_ids: vec![], expires_at: Instant::now() - Duration::from_secs(1) },
        );
        assert!(matches!(gate.validate_operator("tok"), Err(CoreError::Unauthenticated)));
    }

    #[test]
    fn spectator_token_issued_and_validated() {
        let gate = AuthGate::new(Duration::from_secs(86_400));
        let (token, ttl) = gate.issue_spectator_token();
        assert_eq!(ttl, 86_400);
        assert!(gate.validate_spectator(&token));
        assert!(!gate.validate_spectator("bogus"));
    }

    #[test]
    fn empty_box_ids_means_all_boxes() {
        let claims = OperatorClaims { role: Role::Admin, box_ids: vec![], expires_at: Instant::now() + Duration::from_secs(60) };
        assert!(claims.allows(42));
    }
}
