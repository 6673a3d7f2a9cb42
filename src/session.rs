//! 4.D Session & Version Registry.
//!
//! `sessionId` is 128 bits of randomness, URL-safe encoded, regenerated on
//! every `INIT_ROUTE`/`RESET_BOX`; `boxVersion` increments alongside it. The
//! pair is what makes stale writers from old tabs safe to ignore instead of
//! corrupting state (spec.md §4.D).

use data_encoding::BASE64URL_NOPAD;
use rand::RngCore;

/// Generate a fresh session id: 16 random bytes, URL-safe base64, no padding.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64URL_NOPAD.encode(&bytes)
}

/// `{sessionId, boxVersion}` pair identifying one incarnation of a box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub box_version: u64,
}

impl Session {
    pub fn fresh(box_version: u64) -> Self {
        Self {
            session_id: generate_session_id(),
            box_version,
        }
    }

    /// Rotate to a new session id, bumping the version by one — the
    /// operation `INIT_ROUTE` and `RESET_BOX` both perform.
    pub fn rotate(&mut self) {
        self.session_id = generate_session_id();
        self.box_version += 1;
    }

    /// Spec.md §4.D: commands must carry the pair currently in effect.
    pub fn matches(&self, session_id: &str, box_version: u64) -> bool {
        self.session_id == session_id && self.box_version == box_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_sized() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        // 16 bytes base64url-nopad encodes to 22 chars.
        assert_eq!(a.len(), 22);
    }

    #[test]
    fn rotate_bumps_version_and_changes_id() {
        let mut session = Session::fresh(1);
        let old_id = session.session_id.clone();
        session.rotate();
        assert_eq!(session.box_version, 2);
        assert_ne!(session.session_id, old_id);
    }

    #[test]
    fn stale_pair_does_not_match() {
        let session = Session::fresh(3);
        assert!(!session.matches(&session.session_id, 2));
        assert!(!session.matches("someone-elses-id", 3));
        assert!(session.matches(&session.session_id, 3));
    }
}
