use std::io::Read;

use crate::config::HttpConfig;

/// Result of a single GET. Connection-level failures carry no status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub url: String,
    pub status: Option<u16>,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl FetchAttempt {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }

    /// Short human-readable reason for a failed attempt.
    pub fn reason(&self) -> String {
        match (&self.error, self.status) {
            (Some(e), _) => e.clone(),
            (None, Some(status)) => format!("HTTP {}", status),
            (None, None) => "no response".to_owned(),
        }
    }
}

pub trait Transport {
    fn get(&self, url: &str) -> FetchAttempt;
}

pub struct UreqTransport {
    http: HttpConfig,
}

impl UreqTransport {
    pub fn new(http: HttpConfig) -> UreqTransport {
        UreqTransport { http }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> FetchAttempt {
        let response = ureq::get(url)
            .set("User-Agent", &self.http.user_agent)
            .timeout_connect(self.http.connect_timeout_ms)
            .timeout_read(self.http.read_timeout_ms)
            .call();

        if let Some(error) = response.synthetic_error() {
            return FetchAttempt {
                url: url.to_owned(),
                status: None,
                body: Vec::new(),
                error: Some(error.to_string()),
            };
        }

        let status = response.status();
        let mut body = Vec::new();
        let error = if response.ok() {
            match response.into_reader().read_to_end(&mut body) {
                Ok(_) => None,
                Err(e) => Some(format!("failed to read response body: {}", e)),
            }
        } else {
            None // body of an error page is not kept
        };

        FetchAttempt {
            url: url.to_owned(),
            status: Some(status),
            body,
            error,
        }
    }
}

#[cfg(test)]
pub mod mock {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{FetchAttempt, Transport};

    /// Serves canned responses by URL and records every request. Unknown URLs answer 404.
    #[derive(Default)]
    pub struct MockTransport {
        routes: HashMap<String, (u16, Vec<u8>)>,
        pub requests: RefCell<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        pub fn route(mut self, url: &str, status: u16, body: &[u8]) -> MockTransport {
            self.routes.insert(url.to_owned(), (status, body.to_vec()));
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.borrow().clone()
        }
    }

    impl Transport for MockTransport {
        fn get(&self, url: &str) -> FetchAttempt {
            self.requests.borrow_mut().push(url.to_owned());
            let (status, body) = self.routes.get(url).cloned().unwrap_or((404, Vec::new()));
            FetchAttempt {
                url: url.to_owned(),
                status: Some(status),
                body: if (200..300).contains(&status) { body } else { Vec::new() },
                error: None,
            }
        }
    }
}

#[test]
fn test_attempt_success_and_reason() {
    let ok = FetchAttempt { url: "u".to_owned(), status: Some(200), body: b"x".to_vec(), error: None };
    let missing = FetchAttempt { url: "u".to_owned(), status: Some(404), body: Vec::new(), error: None };
    let broken = FetchAttempt { url: "u".to_owned(), status: None, body: Vec::new(), error: Some("connection refused".to_owned()) };

    assert!(ok.is_success());
    assert!(!missing.is_success());
    assert_eq!(missing.reason(), "HTTP 404");
    assert!(!broken.is_success());
    assert_eq!(broken.reason(), "connection refused");
}

#[cfg(test)]
fn short_timeouts() -> HttpConfig {
    HttpConfig {
        connect_timeout_ms: 2000,
        read_timeout_ms: 2000,
        ..HttpConfig::default()
    }
}

#[test]
fn test_ureq_connection_refused_has_no_status() {
    use std::net::TcpListener;

    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}/current.csv", port);

    let attempt = UreqTransport::new(short_timeouts()).get(&url);

    assert_eq!(attempt.url, url);
    assert_eq!(attempt.status, None);
    assert!(attempt.error.is_some());
    assert!(attempt.body.is_empty());
    assert!(!attempt.is_success());
}

#[test]
fn test_ureq_error_status_drops_body() {
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buffer = [0u8; 512];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buffer[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found")
            .unwrap();
    });

    let url = format!("http://127.0.0.1:{}/LCDMA_April_2024.zip", port);
    let attempt = UreqTransport::new(short_timeouts()).get(&url);
    server.join().unwrap();

    assert_eq!(attempt.status, Some(404));
    assert_eq!(attempt.error, None);
    assert!(attempt.body.is_empty());
    assert!(!attempt.is_success());
    assert_eq!(attempt.reason(), "HTTP 404");
}
