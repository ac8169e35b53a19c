//! Event and address fixtures.

use docfeed_core::Event;
use serde_json::Value;

/// Builds an event from a JSON object literal.
///
/// # Panics
///
/// If `value` is not a JSON object.
pub fn event(value: Value) -> Event {
    Event::try_from(value).expect("event fixture must be a JSON object")
}

/// URL of a local port with nothing listening on it.
///
/// Connections are refused immediately, which makes every attempt a
/// transport error.
pub fn closed_port_url() -> String {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    let address = listener.local_addr().expect("bound listener has an address");
    drop(listener);
    format!("http://{address}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_fixture_keeps_fields() {
        let event = event(json!({"id": "doc-1", "text": "hello"}));

        assert_eq!(event.get("id"), Some(&json!("doc-1")));
        assert_eq!(event.len(), 2);
    }

    #[test]
    #[should_panic(expected = "JSON object")]
    fn event_fixture_rejects_arrays() {
        event(json!([1, 2]));
    }

    #[test]
    fn closed_port_refuses_connections() {
        let url = closed_port_url();
        let address = url.trim_start_matches("http://");

        assert!(std::net::TcpStream::connect(address).is_err());
    }
}
