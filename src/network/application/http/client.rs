use crate::network::error::Error;
use crate::network::{Connection, read_exact, write_all};

/// Upper bound on the status line plus headers of a response.
const MAX_HEAD_LEN: usize = 8 * 1024;
/// Upper bound on a response body.
const MAX_BODY_LEN: usize = 256 * 1024;

/// HTTP request methods used against the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl Method {
    /// The method token of the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// One header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name, compared without regard to ASCII case.
    pub name: String,
    /// Header value, trimmed.
    pub value: String,
}

impl Header {
    /// Builds a header from any string-like pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A request borrowed from the caller.
#[derive(Debug)]
pub struct Request<'a> {
    /// Request method.
    pub method: Method,
    /// Absolute path including the query string.
    pub path: &'a str,
    /// Extra headers; `Content-Length` is always added by the client.
    pub headers: Vec<Header>,
    /// Request body, if any.
    pub body: Option<&'a [u8]>,
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code from the status line.
    pub status_code: u16,
    /// Headers in arrival order.
    pub headers: Vec<Header>,
    /// Body, as long as `Content-Length` said.
    pub body: Vec<u8>,
}

impl Response {
    /// First header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// HTTP/1.1 client over one [`Connection`].
#[derive(Debug)]
pub struct Client<C: Connection> {
    connection: C,
}

impl<C: Connection> Client<C> {
    /// Wraps an open connection.
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    /// Hands the connection back, e.g. to close it.
    pub fn into_inner(self) -> C {
        self.connection
    }

    /// Writes `request` and reads the whole response.
    ///
    /// # Errors
    ///
    /// * [`Error::WriteError`] / [`Error::ReadError`] - I/O failed
    /// * [`Error::ConnectionClosed`] - the peer hung up before the head ended
    /// * [`Error::ProtocolError`] - malformed status line or headers
    /// * [`Error::PayloadTooLarge`] - the body exceeds the client's limit
    pub fn request(&mut self, request: &Request) -> Result<Response, Error> {
        // --- Build Request ---
        let mut request_buf: Vec<u8> = Vec::with_capacity(
            256 + request.body.map(<[u8]>::len).unwrap_or_default(),
        );

        // Request line
        request_buf.extend_from_slice(request.method.as_str().as_bytes());
        request_buf.push(b' ');
        request_buf.extend_from_slice(request.path.as_bytes());
        request_buf.extend_from_slice(b" HTTP/1.1\r\n");

        // Headers
        let mut has_user_agent = false;
        for header in &request.headers {
            if header.name.eq_ignore_ascii_case("User-Agent") {
                has_user_agent = true;
            }
            request_buf.extend_from_slice(header.name.as_bytes());
            request_buf.extend_from_slice(b": ");
            request_buf.extend_from_slice(header.value.as_bytes());
            request_buf.extend_from_slice(b"\r\n");
        }

        if !has_user_agent {
            request_buf.extend_from_slice(
                concat!("User-Agent: iothub-device/", env!("CARGO_PKG_VERSION"), "\r\n")
                    .as_bytes(),
            );
        }

        // Body
        let body = request.body.unwrap_or_default();
        request_buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        request_buf.extend_from_slice(body);

        // --- Send Request ---
        write_all(&mut self.connection, &request_buf)?;
        self.connection.flush().map_err(|_| Error::WriteError)?;

        // --- Receive Head ---
        let mut head_buf: Vec<u8> = Vec::with_capacity(1024);
        let mut chunk = [0u8; 512];
        let header_end_pos = loop {
            if let Some(pos) = find_slice(&head_buf, b"\r\n\r\n") {
                break pos;
            }
            if head_buf.len() > MAX_HEAD_LEN {
                return Err(Error::ProtocolError);
            }
            match self.connection.read(&mut chunk) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => head_buf.extend_from_slice(&chunk[..n]),
                Err(_) => return Err(Error::ReadError),
            }
        };

        // --- Parse Response ---
        let header_str =
            core::str::from_utf8(&head_buf[..header_end_pos]).map_err(|_| Error::ProtocolError)?;
        let mut lines = header_str.lines();

        // Parse status line
        let status_line = lines.next().ok_or(Error::ProtocolError)?;
        let mut status_parts = status_line.splitn(3, ' ');
        status_parts.next(); // Skip HTTP version
        let status_code = status_parts
            .next()
            .ok_or(Error::ProtocolError)?
            .parse::<u16>()
            .map_err(|_| Error::ProtocolError)?;

        // Parse headers
        let mut headers = Vec::new();
        let mut content_length: Option<usize> = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or(Error::ProtocolError)?;
            let (name, value) = (name.trim(), value.trim());
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.parse::<usize>().map_err(|_| Error::ProtocolError)?);
            }
            headers.push(Header::new(name, value));
        }

        // Whatever followed the blank line in the last read is body
        let mut body = head_buf[header_end_pos + 4..].to_vec();
        let len = content_length.unwrap_or(body.len());
        if len > MAX_BODY_LEN {
            return Err(Error::PayloadTooLarge);
        }
        if body.len() < len {
            let already = body.len();
            body.resize(len, 0);
            read_exact(&mut self.connection, &mut body[already..])?;
        }
        body.truncate(len);

        Ok(Response {
            status_code,
            headers,
            body,
        })
    }
}

/// Finds the first occurrence of a slice in another slice and returns its starting position.
fn find_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
