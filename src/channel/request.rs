use crate::headers::HeaderFieldList;
use crate::info::RequestInfo;
use crate::path::RequestPath;
use crate::version::HttpVersion;

/// A request as the handler sees it: head, trailers and the whole body
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub(crate) version: HttpVersion,
    pub(crate) method: String,
    pub(crate) entity: String,
    pub(crate) path: String,
    pub(crate) query: String,
    pub(crate) headers: HeaderFieldList,
    pub(crate) trailers: HeaderFieldList,
    pub(crate) content_length: Option<u64>,
    pub(crate) body: Vec<u8>
}

impl HttpRequest {
    pub fn new<M: Into<String>, E: Into<String>>(version: HttpVersion, method: M,
                                                 entity: E) -> HttpRequest
    {
        HttpRequest {
            version: version,
            method: method.into(),
            entity: entity.into(),
            path: String::new(),
            query: String::new(),
            headers: HeaderFieldList::new(),
            trailers: HeaderFieldList::new(),
            content_length: None,
            body: Vec::new()
        }
    }

    pub(crate) fn set_path(&mut self, target: RequestPath) {
        self.path = target.path;
        self.query = target.query;
    }

    #[inline]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target exactly as it came in
    #[inline]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The percent-decoded path of the request target
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Everything after the `'?'`, still encoded
    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[inline]
    pub fn headers(&self) -> &HeaderFieldList {
        &self.headers
    }

    /// Shorthand for `headers().get(name)`
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name)
    }

    #[inline]
    pub fn trailers(&self) -> &HeaderFieldList {
        &self.trailers
    }

    /// The declared length; `None` for chunked or bodyless requests
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    pub fn info(&self) -> RequestInfo {
        let mut info = RequestInfo::new(self.version, self.method.clone(),
                                        self.entity.clone(), self.headers.clone());
        info.content_length = self.content_length;
        info.trailers = self.trailers.clone();
        info
    }
}
