//! reqwest-backed [`Transport`]

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, RANGE, REFERER};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::{FetchRequest, FetchResponse, Params, ProgressFn, TransferOutcome, TransferRequest, Transport};
use crate::error::{Error, Result, TransportError};
use crate::utils::parse_content_disposition;

const USER_AGENT: &str = concat!("hoster-dl/", env!("CARGO_PKG_VERSION"));

/// Page loads give up after this long; transfers are only bounded by the connect timeout
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

struct Clients {
    with_cookies: Client,
    without_cookies: Client,
}

/// HTTP transport with a per-instance cookie store and referer tracking
///
/// One instance corresponds to one browser session: cookies set by earlier loads
/// are sent by later ones, and the last loaded URL becomes the next referer.
/// Transfers use a single connection regardless of the requested chunk count.
pub struct HttpTransport {
    clients: RwLock<Clients>,
    last_url: Mutex<Option<String>>,
}

impl HttpTransport {
    /// Create a transport with an empty cookie store
    pub fn new() -> Result<Self> {
        Ok(Self {
            clients: RwLock::new(Self::build_clients()?),
            last_url: Mutex::new(None),
        })
    }

    fn build_clients() -> Result<Clients> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let with_cookies = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .cookie_provider(jar)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        let without_cookies = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Clients {
            with_cookies,
            without_cookies,
        })
    }

    fn client(&self, cookies: bool) -> Client {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        if cookies {
            clients.with_cookies.clone()
        } else {
            clients.without_cookies.clone()
        }
    }

    fn last_url(&self) -> Option<String> {
        self.last_url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn remember(&self, url: &reqwest::Url) {
        *self.last_url.lock().unwrap_or_else(|e| e.into_inner()) = Some(url.to_string());
    }

    fn request(
        &self,
        url: &str,
        get: &Params,
        post: &Params,
        referer: bool,
        cookies: bool,
        head: bool,
    ) -> std::result::Result<RequestBuilder, TransportError> {
        let url = reqwest::Url::parse(url)?;
        let client = self.client(cookies);

        let mut builder = if head {
            client.head(url)
        } else if post.is_empty() {
            client.get(url)
        } else {
            client.post(url).form(post)
        };
        if !get.is_empty() {
            builder = builder.query(get);
        }
        if referer && let Some(previous) = self.last_url() {
            builder = builder.header(REFERER, previous);
        }
        Ok(builder)
    }
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut raw = String::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            raw.push_str(name.as_str());
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
    }
    raw
}

fn check_status(status: StatusCode, url: &reqwest::Url) -> std::result::Result<(), TransportError> {
    if status.is_client_error() || status.is_server_error() {
        return Err(TransportError::BadHeader {
            code: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> std::result::Result<FetchResponse, TransportError> {
        let response = self
            .request(
                url,
                &request.get,
                &request.post,
                request.referer,
                request.cookies,
                request.just_header,
            )?
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let final_url = response.url().clone();
        check_status(response.status(), &final_url)?;

        let code = response.status().as_u16();
        let headers = format_headers(response.headers());
        let body = if request.just_header {
            Vec::new()
        } else {
            response.bytes().await?.to_vec()
        };

        tracing::debug!(url = %final_url, code, bytes = body.len(), "Loaded page");
        self.remember(&final_url);

        Ok(FetchResponse {
            code,
            headers,
            body,
        })
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: ProgressFn<'_>,
    ) -> std::result::Result<TransferOutcome, TransportError> {
        if request.chunks > 1 {
            tracing::debug!(
                chunks = request.chunks,
                "Chunked transfer requested, using a single connection"
            );
        }
        if let Some(parent) = request.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let offset = if request.resume {
            tokio::fs::metadata(&request.path)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        } else {
            0
        };

        let mut builder = self.request(
            &request.url,
            &request.get,
            &request.post,
            request.referer,
            request.cookies,
            false,
        )?;
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", offset));
        }

        let response = builder.send().await?;
        let final_url = response.url().clone();

        if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::debug!(path = %request.path.display(), "Partial file already complete");
            progress(offset, Some(offset));
            return Ok(TransferOutcome {
                final_name: None,
                size: offset,
            });
        }
        check_status(response.status(), &final_url)?;

        let appending = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        let start = if appending { offset } else { 0 };
        let total = response.content_length().map(|len| len + start);
        let disposition_name = if request.disposition {
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_disposition)
        } else {
            None
        };

        let mut file = if appending {
            tracing::info!(path = %request.path.display(), offset, "Resuming transfer");
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&request.path)
                .await?
        } else {
            tokio::fs::File::create(&request.path).await?
        };

        let mut transferred = start;
        progress(transferred, total);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            transferred += chunk.len() as u64;
            progress(transferred, total);
        }
        file.flush().await?;
        drop(file);

        self.remember(&final_url);

        let current = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let final_name =
            disposition_name.filter(|name| current.as_deref() != Some(name.as_str()));

        Ok(TransferOutcome {
            final_name,
            size: transferred,
        })
    }

    async fn clear_cookies(&self) {
        match Self::build_clients() {
            Ok(clients) => {
                *self.clients.write().unwrap_or_else(|e| e.into_inner()) = clients;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to reset cookie store"),
        }
    }
}
