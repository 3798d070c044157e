//! Skips wiremock-backed integration tests where localhost sockets cannot
//! be bound.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

/// `SIFT_REQUIRE_SOCKET_TESTS=1` turns a skip into a failure.
fn socket_tests_required() -> bool {
    std::env::var("SIFT_REQUIRE_SOCKET_TESTS")
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
#[must_use]
pub fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind a localhost socket at {}:{}",
        location.file(),
        location.line()
    );
    assert!(
        !socket_tests_required(),
        "{message}; unset SIFT_REQUIRE_SOCKET_TESTS to allow skipping"
    );
    eprintln!("{message}; skipping. Set SIFT_REQUIRE_SOCKET_TESTS=1 to fail instead.");
    true
}

/// Starts a mock server, or returns `None` when sockets are unavailable.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl std::future::Future<Output = Option<MockServer>> {
    let skip = should_skip_socket_bound_test();
    async move {
        if skip {
            None
        } else {
            Some(MockServer::start().await)
        }
    }
}
