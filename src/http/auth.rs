//! HTTP basic authentication
//!
//! Only the header arithmetic lives here: building the expected
//! `Authorization` value and comparing it with what the client sent.
//! Credential storage is the application's business.

use base64::prelude::*;

/// Realm announced in the `WWW-Authenticate` challenge
pub const DEFAULT_REALM: &str = "Login Required";

/// `Basic` credentials as they appear after the scheme name
pub fn basic_credentials(user: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("{}:{}", user, password))
}

/// Whether an `Authorization` header value carries `user:password`
///
/// The scheme name is matched case-insensitively.
pub fn check_basic(authorization: &str, user: &str, password: &str) -> bool {
    let Some((scheme, token)) = authorization.trim().split_once(' ') else {
        return false;
    };
    scheme.eq_ignore_ascii_case("Basic") && token.trim() == basic_credentials(user, password)
}

/// Value of the `WWW-Authenticate` header for a basic challenge
pub fn basic_challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials("Aladdin", "open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_check_basic() {
        assert!(check_basic("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==", "Aladdin", "open sesame"));
        assert!(check_basic("basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==", "Aladdin", "open sesame"));
        assert!(!check_basic("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==", "Aladdin", "wrong"));
        assert!(!check_basic("Bearer QWxhZGRpbjpvcGVuIHNlc2FtZQ==", "Aladdin", "open sesame"));
        assert!(!check_basic("", "a", "b"));
    }

    #[test]
    fn test_challenge() {
        assert_eq!(basic_challenge(DEFAULT_REALM), "Basic realm=\"Login Required\"");
    }
}
