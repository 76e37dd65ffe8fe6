//! Shared test helpers for creating Engine instances and scripted transports in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::TransportError;
use crate::task::Task;
use crate::transport::{
    FetchRequest, FetchResponse, ProgressFn, TransferOutcome, TransferRequest, Transport,
    TransportFactory,
};
use crate::types::{Package, TaskId};

/// File served by [`MockTransport::transfer`]
#[derive(Clone)]
struct MockFile {
    body: Vec<u8>,
    disposition_name: Option<String>,
}

/// Transport answering from in-memory pages and files
///
/// Unknown URLs answer with a 404 bad header.
#[derive(Default)]
pub(crate) struct MockTransport {
    pages: Mutex<HashMap<String, FetchResponse>>,
    files: Mutex<HashMap<String, MockFile>>,
    transfer_delay: Mutex<Option<Duration>>,
    pub(crate) fetches: AtomicUsize,
    pub(crate) transfers: AtomicUsize,
    pub(crate) cookie_clears: AtomicUsize,
}

impl MockTransport {
    /// Serve `body` for page loads of `url`
    pub(crate) fn page(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.page_with_headers(url, "Content-Type: text/html", body);
    }

    /// Serve `body` and raw `headers` for page loads of `url`
    pub(crate) fn page_with_headers(&self, url: &str, headers: &str, body: impl Into<Vec<u8>>) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            FetchResponse {
                code: 200,
                headers: headers.to_string(),
                body: body.into(),
            },
        );
    }

    /// Serve `body` for transfers of `url`
    pub(crate) fn file(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(
            url.to_string(),
            MockFile {
                body: body.into(),
                disposition_name: None,
            },
        );
    }

    /// Serve `body` for transfers of `url` with a Content-Disposition file name
    pub(crate) fn file_with_disposition(&self, url: &str, body: impl Into<Vec<u8>>, name: &str) {
        self.files.lock().unwrap().insert(
            url.to_string(),
            MockFile {
                body: body.into(),
                disposition_name: Some(name.to_string()),
            },
        );
    }

    /// Make every transfer take `delay` before writing the file
    pub(crate) fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> Result<FetchResponse, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let page = self.pages.lock().unwrap().get(url).cloned();
        match page {
            Some(mut page) => {
                if request.just_header {
                    page.body.clear();
                }
                Ok(page)
            }
            None => Err(TransportError::BadHeader {
                code: 404,
                url: url.to_string(),
            }),
        }
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: ProgressFn<'_>,
    ) -> Result<TransferOutcome, TransportError> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        let delay = *self.transfer_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let file = self.files.lock().unwrap().get(&request.url).cloned();
        let Some(file) = file else {
            return Err(TransportError::BadHeader {
                code: 404,
                url: request.url.clone(),
            });
        };

        let total = file.body.len() as u64;
        let half = file.body.len() / 2;
        tokio::fs::write(&request.path, &file.body).await?;
        progress(half as u64, Some(total));
        progress(total, Some(total));

        let requested = request.path.file_name().map(|n| n.to_string_lossy());
        let final_name = file
            .disposition_name
            .filter(|name| request.disposition && requested.as_deref() != Some(name.as_str()));

        Ok(TransferOutcome {
            final_name,
            size: total,
        })
    }

    async fn clear_cookies(&self) {
        self.cookie_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing every execution the same transport
pub(crate) fn shared_transport(transport: Arc<MockTransport>) -> Arc<dyn TransportFactory> {
    let transport: Arc<dyn Transport> = transport;
    Arc::new(move |_plugin: &str| -> crate::Result<Arc<dyn Transport>> { Ok(transport.clone()) })
}

/// Configuration rooted in `dir` with instant OCR and short poll intervals
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.general.download_folder = dir.join("downloads");
    config.general.tmp_dir = dir.join("tmp");
    config.persistence.database_path = dir.join("test.db");
    config.captcha.ocr_delay_min_ms = 0;
    config.captcha.ocr_delay_max_ms = 0;
    config
}

/// Helper to create a test Engine with a persistent database and a scripted transport.
/// Returns the engine, the transport and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine() -> (Engine, Arc<MockTransport>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let transport = Arc::new(MockTransport::default());

    let engine = Engine::new(config)
        .await
        .unwrap()
        .with_transport_factory(shared_transport(transport.clone()));

    (engine, transport, temp_dir)
}

/// Task of plugin "ExampleHoster" in package folder `folder`
pub(crate) fn test_task(id: i64, folder: &str, name: &str) -> Task {
    Task::new(
        TaskId(id),
        format!("http://example.com/{}", id),
        name,
        "ExampleHoster",
        Package {
            id: 1,
            folder: folder.to_string(),
            password: Some("secret".to_string()),
        },
    )
}
