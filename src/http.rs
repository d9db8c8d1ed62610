use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Request {
    pub(crate) url: String,
    pub(crate) bearer_token: Option<String>,
    pub(crate) query: Vec<(String, String)>,
}

impl Request {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub(crate) fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(str::to_string);
        self
    }

    pub(crate) fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Non-success outcome of a request. `status` is None for transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpFailure {
    pub(crate) status: Option<u16>,
    pub(crate) message: String,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn failure(status: Option<u16>, message: String) -> HttpFailure {
    HttpFailure { status, message }
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn send_with_retries(
    method: Method,
    request: &Request,
    policy: &RetryPolicy,
) -> Result<String, HttpFailure> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(policy.connect_timeout)
            .timeout_read(policy.read_timeout)
            .timeout_write(policy.read_timeout)
            .build();

        let mut call = agent
            .request(method.as_str(), &request.url)
            .set("Accept", "application/json");
        if let Some(token) = &request.bearer_token {
            call = call.set("Authorization", &format!("Bearer {token}"));
        }
        for (key, value) in &request.query {
            call = call.query(key, value);
        }

        let result = match method {
            Method::Post => call.send_string(""),
            Method::Get => call.call(),
        };

        match result {
            Ok(response) => match response.into_string() {
                Ok(body) => return Ok(body),
                Err(err) => {
                    return Err(failure(
                        None,
                        format!("request failed: response decode failed: {err}"),
                    ));
                }
            },
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let status_error = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let truncated = body.chars().take(240).collect::<String>();
                    format!("HTTP status {status} ({truncated})")
                };

                if should_retry_http_status(status) && attempt < attempts {
                    tracing::debug!(url = %request.url, status, attempt, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }

                if should_retry_http_status(status) {
                    return Err(failure(
                        Some(status),
                        format!("request failed after {attempts} attempt(s): {status_error}"),
                    ));
                }

                return Err(failure(
                    Some(status),
                    format!("request failed: {status_error}"),
                ));
            }
            Err(ureq::Error::Transport(err)) => {
                let transport_error = format!("transport error: {err}");
                if attempt < attempts {
                    tracing::debug!(url = %request.url, attempt, "retrying after transport error");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(failure(
                    None,
                    format!("request failed after {attempts} attempt(s): {transport_error}"),
                ));
            }
        }
    }

    Err(failure(
        None,
        "request failed: exhausted attempts without a concrete error".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Reply {
        Status(u16, &'static str),
        Slow(Duration, u16, &'static str),
    }

    struct StubServer {
        base_url: String,
        heads: Arc<Mutex<Vec<String>>>,
        shutdown_tx: mpsc::Sender<()>,
        join_handle: Option<thread::JoinHandle<()>>,
    }

    impl StubServer {
        fn spawn(replies: Vec<Reply>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub server");
            listener.set_nonblocking(true).expect("set nonblocking");
            let addr = listener.local_addr().expect("local addr");

            let heads = Arc::new(Mutex::new(Vec::new()));
            let heads_clone = Arc::clone(&heads);
            let mut replies = VecDeque::from(replies);
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            let join_handle = thread::spawn(move || {
                while shutdown_rx.try_recv().is_err() {
                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            let reply = replies
                                .pop_front()
                                .unwrap_or(Reply::Status(200, "{}"));
                            let heads = Arc::clone(&heads_clone);
                            thread::spawn(move || {
                                if let Ok(head) = read_head(&mut stream) {
                                    heads.lock().expect("lock heads").push(head);
                                }
                                let _ = reply_with(&mut stream, reply);
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });

            Self {
                base_url: format!("http://{addr}"),
                heads,
                shutdown_tx,
                join_handle: Some(join_handle),
            }
        }

        fn heads(&self) -> Vec<String> {
            self.heads.lock().expect("lock heads").clone()
        }
    }

    impl Drop for StubServer {
        fn drop(&mut self) {
            let _ = self.shutdown_tx.send(());
            if let Some(handle) = self.join_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let mut buf = [0_u8; 1024];
        let mut data = Vec::new();
        while !data.windows(4).any(|window| window == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => data.extend_from_slice(&buf[..read]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn reply_with(stream: &mut TcpStream, reply: Reply) -> std::io::Result<()> {
        let (status, body) = match reply {
            Reply::Status(status, body) => (status, body),
            Reply::Slow(delay, status, body) => {
                thread::sleep(delay);
                (status, body)
            }
        };
        write!(
            stream,
            "HTTP/1.1 {status} Stub\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )?;
        stream.write_all(body.as_bytes())?;
        stream.flush()
    }

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn retries_retryable_statuses_until_success() {
        let server = StubServer::spawn(vec![
            Reply::Status(500, "boom"),
            Reply::Status(429, "slow down"),
            Reply::Status(200, "{\"ok\":true}"),
        ]);

        let body = send_with_retries(Method::Get, &Request::new(&server.base_url), &fast_policy(3))
            .expect("should eventually succeed");

        assert_eq!(body, "{\"ok\":true}");
        assert_eq!(server.heads().len(), 3);
    }

    #[test]
    fn not_found_is_reported_with_status_and_not_retried() {
        let server = StubServer::spawn(vec![Reply::Status(404, "missing")]);

        let err = send_with_retries(Method::Get, &Request::new(&server.base_url), &fast_policy(5))
            .expect_err("404 should not be retried");

        assert_eq!(err.status, Some(404));
        assert!(err.message.contains("HTTP status 404 (missing)"), "{err}");
        assert_eq!(server.heads().len(), 1);
    }

    #[test]
    fn transport_timeout_is_retried() {
        let server = StubServer::spawn(vec![
            Reply::Slow(Duration::from_millis(150), 200, "late"),
            Reply::Status(200, "on time"),
        ]);
        let policy = RetryPolicy {
            read_timeout: Duration::from_millis(20),
            ..fast_policy(2)
        };

        let body = send_with_retries(Method::Get, &Request::new(&server.base_url), &policy)
            .expect("timeout should be retried");

        assert_eq!(body, "on time");
        assert_eq!(server.heads().len(), 2);
    }

    #[test]
    fn exhausted_retries_keep_last_status() {
        let server = StubServer::spawn(vec![Reply::Status(503, "down"), Reply::Status(503, "down")]);

        let err = send_with_retries(Method::Get, &Request::new(&server.base_url), &fast_policy(2))
            .expect_err("retryable failures should eventually error");

        assert_eq!(err.status, Some(503));
        assert!(err.message.contains("after 2 attempt(s)"), "{err}");
    }

    #[test]
    fn post_sends_bearer_token_and_query() {
        let server = StubServer::spawn(vec![Reply::Status(204, "")]);
        let request = Request::new(format!("{}/me/follow/42", server.base_url))
            .bearer(Some("secret"))
            .query("format", "json");

        let body = send_with_retries(Method::Post, &request, &fast_policy(1)).expect("post ok");

        assert!(body.is_empty());
        let heads = server.heads();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].starts_with("POST /me/follow/42?format=json "), "{}", heads[0]);
        assert!(heads[0].to_lowercase().contains("authorization: bearer secret"), "{}", heads[0]);
    }
}
