//! Client side of the opening handshake

use super::Entropy;
use crate::http::{HttpClient, Method, Result, Transport};
use base64::prelude::*;

/// Protocol version sent in `Sec-WebSocket-Version`
pub const WEBSOCKET_VERSION: &str = "13";

/// Status code of a successful upgrade
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded
pub fn generate_key<E: Entropy>(entropy: &mut E) -> String {
    let mut input = [0u8; 16];
    entropy.fill(&mut input);
    BASE64_STANDARD.encode(input)
}

/// Send the `Upgrade` request for `path`
pub fn send_upgrade_request<T: Transport>(
    http: &mut HttpClient<T>,
    path: &str,
    key: &str,
    user_agent: &str,
) -> Result<()> {
    let host = http.host().to_string();

    http.begin_request(Method::Get, path);
    http.send_header("Host", &host);
    http.send_header("User-Agent", user_agent);
    http.send_header("Connection", "keep-alive");
    http.send_header("Upgrade", "websocket");
    http.send_header("Connection", "Upgrade");
    http.send_header("Sec-WebSocket-Key", key);
    http.send_header("Sec-WebSocket-Version", WEBSOCKET_VERSION);
    log::trace!("upgrading {} with key {}", path, key);
    http.end_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MemoryTransport, Timeouts};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_key_is_16_bytes_base64() {
        let mut rng = StdRng::seed_from_u64(1);
        let key = generate_key(&mut rng);

        assert_eq!(key.len(), 24);
        assert!(key.ends_with("=="));
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key(&mut rng));
    }

    #[test]
    fn test_upgrade_request_layout() {
        let wire = MemoryTransport::new();
        let mut http = HttpClient::new(wire.clone(), "echo.local:8080", Timeouts::default());

        send_upgrade_request(&mut http, "/chat", "dGhlIHNhbXBsZSBub25jZQ==", "test/1.0").unwrap();

        assert_eq!(
            String::from_utf8(wire.written()).unwrap(),
            "GET /chat HTTP/1.1\r\n\
             Host: echo.local:8080\r\n\
             User-Agent: test/1.0\r\n\
             Connection: keep-alive\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
    }
}
