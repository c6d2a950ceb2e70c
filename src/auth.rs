//! Authentication capability hook (spec.md §4.4.1).
//!
//! The core does not implement a real `mysql_native_password` challenge —
//! that needs the 20-byte auth-seed scramble this server never computes
//! against a stored hash. `AuthRegistry` is the seam a real algorithm would
//! plug into; its default check is deliberately simplified, but unlike the
//! system it's modeled on it does not accept every configured user
//! unconditionally once a password is set.

use std::collections::HashMap;

/// One configured user's credential, as read from
/// `authentication.users.<name>.password`.
#[derive(Debug, Clone, Default)]
pub struct AuthRegistry {
    users: HashMap<String, String>,
}

impl AuthRegistry {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// `username` unknown -> fails. Known with an empty configured
    /// password -> passes unconditionally. Known with a non-empty password
    /// -> `auth_data` must equal the password's UTF-8 bytes exactly.
    ///
    /// That equality check is a stand-in for a real challenge-response
    /// verification, not a faithful `mysql_native_password` implementation;
    /// it exists so a non-empty password still rejects mismatched
    /// credentials instead of being accepted unconditionally.
    pub fn check(&self, username: &str, auth_data: &[u8]) -> bool {
        match self.users.get(username) {
            None => false,
            Some(password) if password.is_empty() => true,
            Some(password) => auth_data == password.as_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AuthRegistry {
        let mut users = HashMap::new();
        users.insert("root".to_string(), String::new());
        users.insert("analyst".to_string(), "s3cret".to_string());
        AuthRegistry::new(users)
    }

    #[test]
    fn unknown_user_fails() {
        assert!(!registry().check("nobody", b""));
    }

    #[test]
    fn empty_password_passes_unconditionally() {
        assert!(registry().check("root", b""));
        assert!(registry().check("root", b"anything"));
    }

    #[test]
    fn non_empty_password_requires_matching_auth_data() {
        assert!(registry().check("analyst", b"s3cret"));
        assert!(!registry().check("analyst", b"wrong"));
        assert!(!registry().check("analyst", b""));
    }
}
