//! `HttpRequest` (§6.2): method, URL, headers, cookies, body accessed as
//! bytes/text/json/form.

use std::collections::HashMap;

use http::{HeaderMap, Method};

/// Snapshot of an inbound HTTP request, stashed into a `Context`'s scratch
/// `data` map under the `"http.request"` key so module actions can read it
/// without `modkit` depending on HTTP types.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: http::Uri,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl HttpRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parses the `Cookie` header into a name → value map. Malformed pairs
    /// are skipped rather than failing the whole request.
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let Some(raw) = self.header("cookie") else {
            return out;
        };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                out.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        out
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }

    pub fn body_json<T: for<'de> serde::Deserialize<'de>>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn body_form(&self) -> anyhow::Result<HashMap<String, String>> {
        let text = self.body_text()?;
        let mut out = HashMap::new();
        for pair in text.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            out.insert(
                urldecode(key),
                urldecode(value),
            );
        }
        Ok(out)
    }
}

/// Minimal `application/x-www-form-urlencoded` percent-decoder so this crate
/// doesn't need a dedicated URL-encoding dependency for one helper.
fn urldecode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok();
                        if let Some(byte) = byte {
                            out.push(byte as char);
                        }
                    }
                    _ => out.push('%'),
                }
            }
            other => out.push(other),
        }
    }
    out
}
