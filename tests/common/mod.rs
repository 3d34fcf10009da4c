#![allow(dead_code)]

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// A response parsed off the wire.
    #[derive(Debug, Clone)]
    pub struct ParsedResponse {
        pub status_line: String,
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl ParsedResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn header_names(&self) -> Vec<&str> {
            self.headers.iter().map(|(n, _)| n.as_str()).collect()
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    /// Split one raw response into status, headers and the remaining bytes.
    pub fn parse_response(raw: &[u8]) -> ParsedResponse {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header terminator");
        let head = String::from_utf8_lossy(&raw[..split]).into_owned();
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        ParsedResponse {
            status_line,
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    /// Decode a chunked body (no trailers).
    pub fn dechunk(mut body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let line_end = body
                .windows(2)
                .position(|w| w == b"\r\n")
                .expect("chunk size line");
            let size_text = String::from_utf8_lossy(&body[..line_end]).into_owned();
            let size = usize::from_str_radix(size_text.trim(), 16).expect("hex chunk size");
            body = &body[line_end + 2..];
            if size == 0 {
                return out;
            }
            out.extend_from_slice(&body[..size]);
            body = &body[size + 2..];
        }
    }

    /// Write `raw` and read until the server closes the connection.
    pub fn send_request(addr: &SocketAddr, raw: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        stream.write_all(raw.as_bytes()).expect("write request");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("read response");
        out
    }

    /// `GET path` with `Connection: close`.
    pub fn get(addr: &SocketAddr, path: &str) -> ParsedResponse {
        let raw = send_request(
            addr,
            &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
        );
        parse_response(&raw)
    }
}

pub mod temp_files {
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// A config file with the given extension; removed when dropped.
    pub fn config_file(content: &str, ext: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("arbor_test_")
            .suffix(&format!(".{ext}"))
            .tempfile()
            .expect("create temp file");
        file.write_all(content.as_bytes()).expect("write temp file");
        file
    }
}

pub mod test_server {
    use arbor::lifecycle::Engine;
    use arbor::runtime_config::ServerConfig;
    use arbor::server::Server;
    use std::net::SocketAddr;
    use std::time::Duration;

    /// Server settings for tests: ephemeral port, short accept poll.
    pub fn test_config(threads: usize) -> ServerConfig {
        ServerConfig {
            socket_host: "127.0.0.1".to_string(),
            socket_port: 0,
            thread_pool: threads,
            accept_poll: Duration::from_millis(10),
            socket_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        }
    }

    /// A started server that is stopped when dropped.
    pub struct TestServer {
        pub server: Server,
        pub addr: SocketAddr,
    }

    impl TestServer {
        pub fn start(engine: Engine, config: ServerConfig) -> Self {
            let server = Server::new(engine, config);
            let addr = server.start().expect("server starts");
            server.wait_ready().expect("server ready");
            Self { server, addr }
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if self.server.state() != arbor::server::ServerState::Stopped {
                let _ = self.server.stop();
            }
        }
    }
}
