use std::io::{self, Read};

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use super::{Backend, BackendError, range::{ContentRange, RangeRequest, RangeUnit}};

/// Range reader over a single HTTP resource.
///
/// Every `read_at` is exactly one `GET` with a `Range` header, `size` is one `HEAD`. Nothing
/// is cached or retried here.
///
/// A server may confirm a shorter range when the request runs past the end of the resource.
/// `read_at` then returns the confirmed count, which is less than the buffer length; callers
/// that need the whole buffer must check it. `BlockCache` reports it as `OriginShortRead`.
pub struct HttpBackend {
    url: String,
    unit: RangeUnit,
    client: Client,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self::with_client(url, Client::builder().build()?))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        HttpBackend {
            url: url.into(),
            unit: RangeUnit::Bytes,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn fetch(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let request = RangeRequest::new(self.unit, offset, buffer.len() as u64)?;
        let mut response = self.client
            .get(&self.url)
            .header(RANGE, request.to_string())
            .send()?;

        let header = response.headers().get(CONTENT_RANGE)
            .map(|value| value.to_str().unwrap_or_default().to_string())
            .unwrap_or_default();
        let confirmed = ContentRange::parse(&header)?;

        let content_length = response.content_length()
            .ok_or_else(|| BackendError::CorruptResponse("missing content length".to_string()))?;
        if confirmed.len() != content_length {
            return Err(BackendError::CorruptResponse(format!(
                "content range {header:?} does not match content length {content_length}",
            )));
        }
        if confirmed.start != request.start {
            return Err(BackendError::CorruptResponse(format!(
                "content range {header:?} does not start at requested offset {offset}",
            )));
        }
        if content_length > buffer.len() as u64 {
            return Err(BackendError::CorruptResponse(format!(
                "content length {content_length} exceeds requested length {}", buffer.len(),
            )));
        }

        let expected = content_length as usize;
        let mut filled = 0;
        while filled < expected {
            match response.read(&mut buffer[filled..expected]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::debug!("body of {} broke off after {} bytes: {}", self.url, filled, err);
                    break;
                },
            }
        }
        if filled < expected {
            return Err(BackendError::ShortRead {
                expected: expected as u64,
                actual: filled as u64,
            });
        }
        Ok(filled)
    }
}

impl Backend for HttpBackend {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        let length = buffer.len();
        let result = self.fetch(buffer, offset);
        match &result {
            Ok(n) => log::trace!("read-at {:#x} size={:#x} => {:#x}", offset, length, n),
            Err(err) => {
                log::trace!("read-at {:#x} size={:#x} => {}", offset, length, err);
                log::error!("read-at {:#x} size={:#x} from {}: {}", offset, length, self.url, err);
            },
        }
        result
    }

    fn write_at(&self, _buffer: &[u8], _offset: u64) -> Result<usize, BackendError> {
        Ok(0)
    }

    fn size(&self) -> Result<u64, BackendError> {
        let response = self.client.head(&self.url).send()?;
        let value = response.headers().get(CONTENT_LENGTH)
            .ok_or_else(|| BackendError::SizeUnavailable("missing content length".to_string()))?;
        let size = value.to_str().ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| BackendError::SizeUnavailable(format!("unparsable content length {value:?}")))?;
        log::debug!("size of {} is {}", self.url, size);
        Ok(size)
    }

    fn sync(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{
        io::Write,
        net::TcpListener,
        sync::{Arc, atomic::{AtomicUsize, Ordering}},
        thread,
    };
    use tiny_http::{Header, Method, Response, Server, StatusCode};

    /// Serves `data` with range support; `ranges` counts the range requests seen.
    pub(crate) struct RangeServer {
        pub url: String,
        pub ranges: Arc<AtomicUsize>,
        server: Arc<Server>,
    }

    impl RangeServer {
        pub(crate) fn spawn(data: Vec<u8>) -> Self {
            Self::spawn_with(data, |range, data| {
                let body = data[range.0 as usize..=range.1 as usize].to_vec();
                (range, body)
            })
        }

        /// `respond` maps the requested inclusive range to the advertised range and the body.
        pub(crate) fn spawn_with<F>(data: Vec<u8>, respond: F) -> Self
        where
            F: Fn((u64, u64), &[u8]) -> ((u64, u64), Vec<u8>) + Send + 'static,
        {
            let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
            let url = format!("http://{}/disk.img", server.server_addr());
            let ranges = Arc::new(AtomicUsize::new(0));
            {
                let server = server.clone();
                let ranges = ranges.clone();
                thread::spawn(move || {
                    for request in server.incoming_requests() {
                        let total = data.len();
                        if request.method() == &Method::Head {
                            let _ = request.respond(Response::from_data(data.clone()));
                            continue;
                        }
                        let range = request.headers().iter()
                            .find(|h| h.field.equiv("Range"))
                            .and_then(|h| h.value.as_str().strip_prefix("bytes=").map(str::to_string))
                            .and_then(|spec| {
                                let (start, end) = spec.split_once('-')?;
                                Some((start.parse::<u64>().ok()?, end.parse::<u64>().ok()?))
                            });
                        let Some(range) = range else {
                            let _ = request.respond(Response::from_data(data.clone()));
                            continue;
                        };
                        ranges.fetch_add(1, Ordering::SeqCst);
                        let range = (range.0, range.1.min(total as u64 - 1));
                        let ((start, end), body) = respond(range, &data);
                        let content_range = format!("bytes {}-{}/{}", start, end, total);
                        let response = Response::from_data(body)
                            .with_status_code(StatusCode(206))
                            .with_header(Header::from_bytes("Content-Range", content_range.as_bytes()).unwrap());
                        let _ = request.respond(response);
                    }
                });
            }
            RangeServer {
                url,
                ranges,
                server,
            }
        }

        pub(crate) fn range_requests(&self) -> usize {
            self.ranges.load(Ordering::SeqCst)
        }
    }

    impl Drop for RangeServer {
        fn drop(&mut self) {
            self.server.unblock();
        }
    }

    pub(crate) fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_http_size() {
        let server = RangeServer::spawn(pattern(4096));
        let backend = HttpBackend::new(&server.url).unwrap();
        assert_eq!(backend.size().unwrap(), 4096);
        assert_eq!(server.range_requests(), 0);
    }

    #[test]
    fn test_http_read_at() {
        let data = pattern(4096);
        let server = RangeServer::spawn(data.clone());
        let backend = HttpBackend::new(&server.url).unwrap();

        let mut buffer = vec![0u8; 2048];
        let n = backend.read_at(&mut buffer, 1024).unwrap();
        assert_eq!(n, 2048);
        assert_eq!(buffer, data[1024..3072]);

        let mut buffer = vec![0u8; 1];
        assert_eq!(backend.read_at(&mut buffer, 4095).unwrap(), 1);
        assert_eq!(buffer[0], data[4095]);

        assert_eq!(server.range_requests(), 2);
    }

    #[test]
    fn test_http_read_past_end_is_short() {
        let data = pattern(1000);
        let server = RangeServer::spawn(data.clone());
        let backend = HttpBackend::new(&server.url).unwrap();

        // the server clamps to the last byte, the reader reports the shorter count
        let mut buffer = vec![0u8; 512];
        let n = backend.read_at(&mut buffer, 512).unwrap();
        assert_eq!(n, 488);
        assert_eq!(buffer[..n], data[512..]);
    }

    #[test]
    fn test_http_invalid_range() {
        let server = RangeServer::spawn(pattern(16));
        let backend = HttpBackend::new(&server.url).unwrap();

        let mut empty = [0u8; 0];
        assert!(matches!(backend.read_at(&mut empty, 0), Err(BackendError::InvalidRange { .. })));
        let mut buffer = [0u8; 2];
        assert!(matches!(backend.read_at(&mut buffer, u64::MAX), Err(BackendError::InvalidRange { .. })));
        assert_eq!(server.range_requests(), 0);
    }

    #[test]
    fn test_http_range_unsupported() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", server.server_addr());
        let handle = thread::spawn(move || {
            // ignores the range and answers with the whole body
            let request = server.recv().unwrap();
            let _ = request.respond(Response::from_data(vec![7u8; 64]));
        });

        let backend = HttpBackend::new(url).unwrap();
        let mut buffer = vec![0u8; 16];
        assert!(matches!(backend.read_at(&mut buffer, 0), Err(BackendError::RangeUnsupported(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_http_corrupt_response() {
        // advertises the requested range but sends half of it
        let server = RangeServer::spawn_with(pattern(1024), |range, data| {
            let body = data[range.0 as usize..range.0 as usize + 8].to_vec();
            (range, body)
        });
        let backend = HttpBackend::new(&server.url).unwrap();
        let mut buffer = vec![0u8; 16];
        assert!(matches!(backend.read_at(&mut buffer, 0), Err(BackendError::CorruptResponse(_))));

        // answers with a different range of the right length
        let server = RangeServer::spawn_with(pattern(1024), |range, data| {
            let (start, end) = (range.0 + 1, range.1 + 1);
            ((start, end), data[start as usize..=end as usize].to_vec())
        });
        let backend = HttpBackend::new(&server.url).unwrap();
        let mut buffer = vec![0u8; 16];
        assert!(matches!(backend.read_at(&mut buffer, 0), Err(BackendError::CorruptResponse(_))));
    }

    #[test]
    fn test_http_short_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut request);
            let _ = stream.write_all(
                b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-99/1000\r\nContent-Length: 100\r\n\r\n",
            );
            let _ = stream.write_all(&[1u8; 10]);
            // dropping the stream cuts the body short
        });

        let backend = HttpBackend::new(url).unwrap();
        let mut buffer = vec![0u8; 100];
        let result = backend.read_at(&mut buffer, 0);
        assert!(matches!(result, Err(BackendError::ShortRead { expected: 100, .. })), "{result:?}");
        handle.join().unwrap();
    }

    #[test]
    fn test_http_size_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut request);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n");
        });

        let backend = HttpBackend::new(url).unwrap();
        assert!(matches!(backend.size(), Err(BackendError::SizeUnavailable(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_http_write_is_noop() {
        let server = RangeServer::spawn(pattern(16));
        let backend = HttpBackend::new(&server.url).unwrap();
        assert_eq!(backend.write_at(&[1, 2, 3], 0).unwrap(), 0);
        backend.sync().unwrap();
        assert_eq!(server.range_requests(), 0);
    }
}
