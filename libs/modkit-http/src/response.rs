//! `HttpResponse` (§6.2): status code, header set, cookie set, a `send`
//! primitive for bytes/string/stream bodies, and `html`/`json`/`text`/
//! `redirect` convenience wrappers.

use parking_lot::Mutex;

/// Body chosen by whichever of `send`/`html`/`json`/`text`/`redirect` the
/// handling action called last. Built up inside a `Context`-shared handle so
/// any action in the trigger's dependency graph can finish the response.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Empty,
    Bytes(bytes::Bytes, Option<String>),
}

#[derive(Debug, Default)]
struct Inner {
    status: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
    body: Option<ResponseBody>,
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Empty
    }
}

/// Shared, interior-mutable response builder. Cloning gives another handle
/// to the same underlying state, so it can be stashed into `Context::data`
/// and mutated by whichever action ends up producing the response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                status: 200,
                headers: Vec::new(),
                cookies: Vec::new(),
                body: None,
            })),
        }
    }

    pub fn set_status(&self, status: u16) {
        self.inner.lock().status = status;
    }

    pub fn status(&self) -> u16 {
        self.inner.lock().status
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().headers.push((name.into(), value.into()));
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.inner
            .lock()
            .cookies
            .push(format!("{name}={value}; Path=/"));
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.inner.lock().headers.clone()
    }

    pub fn cookie_headers(&self) -> Vec<String> {
        self.inner.lock().cookies.clone()
    }

    pub fn body(&self) -> ResponseBody {
        self.inner.lock().body.clone().unwrap_or(ResponseBody::Empty)
    }

    /// Raw body send with an optional MIME type; the primitive every other
    /// helper on this type is built from.
    pub fn send(&self, bytes: impl Into<bytes::Bytes>, mime: Option<&str>) {
        let mut guard = self.inner.lock();
        guard.body = Some(ResponseBody::Bytes(bytes.into(), mime.map(str::to_string)));
        if let Some(mime) = mime {
            if !guard.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                guard.headers.push(("content-type".to_string(), mime.to_string()));
            }
        }
    }

    pub fn html(&self, body: impl Into<String>) {
        self.send(body.into().into_bytes(), Some("text/html; charset=utf-8"));
    }

    pub fn text(&self, body: impl Into<String>) {
        self.send(body.into().into_bytes(), Some("text/plain; charset=utf-8"));
    }

    pub fn json<T: serde::Serialize>(&self, value: &T) -> Result<(), serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        self.send(bytes, Some("application/json"));
        Ok(())
    }

    pub fn redirect(&self, location: &str) {
        self.set_status(302);
        self.set_header("location", location);
    }
}
