//! Prepared HTTP requests.
//!
//! A [`PreparedRequest`] is built once by the front-end and shared
//! immutably across all workers for the whole run. Header map and URI are
//! never mutated; body bytes are cloned into each send so no two workers
//! ever share a body reader.

use reqwest::header::{HeaderMap, CONNECTION, CONTENT_LENGTH, HOST};
use reqwest::{Method, Url};

/// An HTTP/1.1 request ready to serialize and send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// Convenience constructor for a body-less GET.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, HeaderMap::new(), Vec::new())
    }

    /// The `Host` header value: hostname plus the port when it is explicit
    /// and non-default for the scheme.
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// The request-target for the request line: path plus optional query.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Key used for per-endpoint statistics.
    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    /// Serializes the request in canonical HTTP/1.1 dump form: request
    /// line, `Host`, remaining headers verbatim, `Content-Length` when a
    /// body is present, blank line, body.
    ///
    /// `Connection` headers are dropped: the engine requires keep-alive for
    /// pipelining and never emits `Connection: close`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());

        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.request_target().as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");

        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(self.host_header().as_bytes());
        out.extend_from_slice(b"\r\n");

        let mut has_content_length = false;
        for (name, value) in self.headers.iter() {
            if *name == HOST || *name == CONNECTION {
                continue;
            }
            if *name == CONTENT_LENGTH {
                has_content_length = true;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if !self.body.is_empty() && !has_content_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, ACCEPT};

    fn parse(url: &str) -> Url {
        url.parse().unwrap()
    }

    #[test]
    fn test_serialize_get() {
        let req = PreparedRequest::get(parse("http://example.com/echo?x=1"));
        let wire = String::from_utf8(req.serialize()).unwrap();

        assert!(wire.starts_with("GET /echo?x=1 HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_serialize_includes_explicit_port() {
        let req = PreparedRequest::get(parse("http://example.com:8080/"));
        let wire = String::from_utf8(req.serialize()).unwrap();
        assert!(wire.contains("Host: example.com:8080\r\n"));
    }

    #[test]
    fn test_serialize_body_gets_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let req = PreparedRequest::new(
            Method::POST,
            parse("http://example.com/items"),
            headers,
            b"{\"a\":1}".to_vec(),
        );
        let wire = String::from_utf8(req.serialize()).unwrap();

        assert!(wire.starts_with("POST /items HTTP/1.1\r\n"));
        assert!(wire.contains("accept: application/json\r\n"));
        assert!(wire.contains("Content-Length: 7\r\n"));
        assert!(wire.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn test_serialize_never_emits_connection_close() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        let req = PreparedRequest::new(
            Method::GET,
            parse("http://example.com/"),
            headers,
            Vec::new(),
        );
        let wire = String::from_utf8(req.serialize()).unwrap();
        assert!(!wire.to_lowercase().contains("connection"));
    }

    #[test]
    fn test_user_host_header_not_duplicated() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("spoofed.example"));
        let req = PreparedRequest::new(
            Method::GET,
            parse("http://example.com/"),
            headers,
            Vec::new(),
        );
        let wire = String::from_utf8(req.serialize()).unwrap();
        assert_eq!(wire.matches("Host").count(), 1);
        assert!(wire.contains("Host: example.com\r\n"));
    }
}
