#![allow(dead_code)]

pub mod test_server {
    use fnrunner::cli::{build_service, Service};
    use fnrunner::config::ServerConfig;
    use fnrunner::server::{HttpServer, ServerHandle};
    use fnrunner::LocalAgent;
    use std::net::{SocketAddr, TcpListener};
    use std::sync::{Arc, Once};

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x10000);
        });
    }

    /// Running server on an ephemeral port, stopped on drop.
    pub struct TestServer {
        pub addr: SocketAddr,
        pub agent: Arc<LocalAgent>,
        handle: Option<ServerHandle>,
    }

    impl TestServer {
        pub fn start(config: &ServerConfig) -> Self {
            setup_may_runtime();
            let Service { service, agent, .. } = build_service(config).unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let handle = HttpServer(service).start(addr).unwrap();
            handle.wait_ready().unwrap();
            Self {
                addr,
                agent,
                handle: Some(handle),
            }
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.agent.shutdown();
            if let Some(handle) = self.handle.take() {
                handle.stop();
            }
        }
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap_or_default()
        }
    }

    /// Build a request with an optional body and `Content-Length`.
    pub fn request(method: &str, path: &str, body: Option<&str>) -> String {
        match body {
            Some(body) => format!(
                "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ),
            None => format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
        }
    }

    /// Send a raw request and read one response, honouring `Content-Length`.
    pub fn send_request(addr: &SocketAddr, req: &str) -> RawResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();

        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            if let Some(resp) = parse(&buf) {
                return resp;
            }
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        parse(&buf).expect("incomplete response")
    }

    fn parse(buf: &[u8]) -> Option<RawResponse> {
        let end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let mut lines = head.lines();
        let status = lines.next()?.split_whitespace().nth(1)?.parse().ok()?;
        let headers: Vec<(String, String)> = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);
        let body = &buf[end + 4..];
        if body.len() < length {
            return None;
        }
        Some(RawResponse {
            status,
            headers,
            body: body[..length].to_vec(),
        })
    }
}
