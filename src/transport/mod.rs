//! Transport seam
//!
//! The execution engine never talks HTTP directly. Page loads and file transfers go
//! through a [`Transport`], so site adapters can be tested against a scripted
//! implementation and the engine can run on top of any client.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TransportError;

mod http;

pub use http::HttpTransport;

/// Query or form parameters in request order
pub type Params = Vec<(String, String)>;

/// Progress callback: bytes transferred so far and total size when known
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// A page or resource request
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Query parameters appended to the URL
    pub get: Params,
    /// Form parameters; a non-empty list turns the request into a POST
    pub post: Params,
    /// Send the previously loaded URL as referer
    pub referer: bool,
    /// Use the cookie store
    pub cookies: bool,
    /// Only retrieve the response headers
    pub just_header: bool,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            post: Vec::new(),
            referer: true,
            cookies: true,
            just_header: false,
        }
    }
}

/// Response to a [`FetchRequest`]
#[derive(Clone, Debug, Default)]
pub struct FetchResponse {
    /// HTTP status code
    pub code: u16,
    /// Raw `Name: value` header lines
    pub headers: String,
    /// Response body (empty for header-only requests)
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Body decoded as UTF-8 (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parsed response headers, as returned by header-only loads
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageHeaders {
    /// HTTP status code
    pub code: u16,
    /// Lower-cased header names mapped to every value seen
    pub fields: BTreeMap<String, Vec<String>>,
}

impl PageHeaders {
    /// First value of a header (name is case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of a header (name is case-insensitive)
    pub fn get_all(&self, name: &str) -> &[String] {
        self.fields
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A file transfer to a local path
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// Source URL
    pub url: String,
    /// Destination file
    pub path: PathBuf,
    /// Query parameters
    pub get: Params,
    /// Form parameters
    pub post: Params,
    /// Send the previously loaded URL as referer
    pub referer: bool,
    /// Use the cookie store
    pub cookies: bool,
    /// Maximum number of connections; 0 means unlimited
    pub chunks: u32,
    /// Continue a partial file instead of starting over
    pub resume: bool,
    /// Report the server-provided Content-Disposition name
    pub disposition: bool,
}

/// Result of a finished transfer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Server-provided name when it differs from the requested one
    ///
    /// The file itself always stays at the requested path; moving it is up to the
    /// caller.
    pub final_name: Option<String>,
    /// Size of the file on disk
    pub size: u64,
}

/// HTTP-like transport used by an execution
///
/// Errors distinguish a bad response header ([`TransportError::BadHeader`]) from
/// generic I/O and connection failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Load a page or resource
    async fn fetch(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse, TransportError>;

    /// Transfer a file to `request.path`, reporting progress along the way
    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: ProgressFn<'_>,
    ) -> Result<TransferOutcome, TransportError>;

    /// Forget all cookies
    async fn clear_cookies(&self);
}

/// Creates the transport for a new execution
///
/// Implemented for any `Fn(&str) -> Result<Arc<dyn Transport>>` taking the plugin name.
pub trait TransportFactory: Send + Sync {
    /// Transport for one execution of `plugin`
    fn create(&self, plugin: &str) -> crate::Result<Arc<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str) -> crate::Result<Arc<dyn Transport>> + Send + Sync,
{
    fn create(&self, plugin: &str) -> crate::Result<Arc<dyn Transport>> {
        self(plugin)
    }
}

/// Fresh [`HttpTransport`] (own cookie store) per execution
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(&self, _plugin: &str) -> crate::Result<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new()?))
    }
}
