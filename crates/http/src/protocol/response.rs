//! HTTP response header.

use std::borrow::Cow;

use http::{HeaderMap, Response, StatusCode, Version};

/// The parsed head of a response.
///
/// Besides the typed status it keeps the reason phrase exactly as received,
/// which may differ from the canonical one.
#[derive(Debug)]
pub struct ResponseHeader {
    inner: Response<()>,
    reason: Option<String>,
}

impl ResponseHeader {
    pub fn new(inner: Response<()>, reason: Option<String>) -> Self {
        Self { inner, reason }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The reason phrase as received, `None` when the status line had none.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref().filter(|reason| !reason.is_empty())
    }

    /// Text for a status line: the received reason, else the canonical one,
    /// else `status code N`.
    pub fn status_text(&self) -> Cow<'_, str> {
        if let Some(reason) = self.reason() {
            return Cow::Borrowed(reason);
        }
        match self.status().canonical_reason() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("status code {}", self.status().as_u16())),
        }
    }

    pub fn into_inner(self) -> Response<()> {
        self.inner
    }
}

impl AsRef<Response<()>> for ResponseHeader {
    fn as_ref(&self) -> &Response<()> {
        &self.inner
    }
}

impl From<Response<()>> for ResponseHeader {
    fn from(inner: Response<()>) -> Self {
        Self { inner, reason: None }
    }
}
