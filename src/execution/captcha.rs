//! Captcha Coordinator

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;

use super::PluginExecution;
use crate::captcha::{CaptchaResult, NewCaptcha, ResultKind};
use crate::signal::{Outcome, Signal};
use crate::transport::{FetchRequest, Params};
use crate::types::Event;

/// Options of [`PluginExecution::decrypt_captcha`]
#[derive(Clone, Debug)]
pub struct CaptchaRequest {
    /// Query parameters of the image request
    pub get: Params,
    /// Form parameters of the image request
    pub post: Params,
    /// Use the cookie store for the image request
    pub cookies: bool,
    /// Skip OCR and always ask a solver
    pub force_user: bool,
    /// Image type, used as file extension
    pub image_type: String,
    /// Expected answer kind
    pub result_kind: ResultKind,
}

impl Default for CaptchaRequest {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            post: Vec::new(),
            cookies: false,
            force_user: false,
            image_type: "jpg".to_string(),
            result_kind: ResultKind::Textual,
        }
    }
}

impl PluginExecution {
    /// Load the captcha image at `url` and get it solved
    ///
    /// Uses the plugin's OCR engine when one is available, otherwise queues the
    /// captcha with the broker and polls until it is answered, fails or times out.
    pub async fn decrypt_captcha(
        &mut self,
        url: &str,
        request: CaptchaRequest,
    ) -> Outcome<CaptchaResult> {
        let fetch = FetchRequest {
            get: request.get.clone(),
            post: request.post.clone(),
            cookies: request.cookies,
            ..Default::default()
        };
        let image = self.fetch(url, &fetch).await?.body;

        let path = self.captcha_path(&request.image_type);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, &image).await?;

        let result = self.solve_captcha(image, &path, &request).await;

        if !self.config.general.debug
            && let Err(e) = tokio::fs::remove_file(&path).await
        {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove captcha image");
        }
        result
    }

    async fn solve_captcha(
        &mut self,
        image: Vec<u8>,
        path: &Path,
        request: &CaptchaRequest,
    ) -> Outcome<CaptchaResult> {
        if !request.force_user
            && let Some(ocr) = self.ocr.clone()
        {
            let (min, max) = (
                self.config.captcha.ocr_delay_min_ms,
                self.config.captcha.ocr_delay_max_ms,
            );
            let delay = rand::thread_rng().gen_range(min..=max);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.check_abort()?;

            let text = ocr.solve(path).await?;
            tracing::debug!(task_id = %self.task.id(), result = %text, "OCR result");
            return CaptchaResult::parse(request.result_kind, &text)
                .ok_or_else(|| Signal::fail(format!("Unusable OCR result '{}'", text)));
        }

        let task = self
            .broker
            .enqueue(NewCaptcha {
                plugin: self.task.plugin().to_string(),
                image,
                image_type: request.image_type.clone(),
                path: path.to_path_buf(),
                kind: request.result_kind,
            })
            .await?;
        self.captcha_task = Some(task.clone());
        self.emit_event(Event::CaptchaQueued {
            id: self.task.id(),
            captcha_id: task.id(),
        });

        let poll = self.config.captcha.poll_interval;
        while task.is_waiting() {
            let aborted = tokio::select! {
                biased;
                _ = self.task.abort_token().cancelled() => true,
                _ = tokio::time::sleep(poll) => false,
            };
            if aborted {
                self.broker.dequeue(&task).await;
                return Err(Signal::Abort);
            }
        }
        self.broker.dequeue(&task).await;

        if let Some(error) = task.error() {
            if self.ocr_registered {
                return Err(Signal::fail("OCR unavailable and no human solver connected"));
            }
            return Err(Signal::fail(error));
        }
        match task.result() {
            Some(result) => {
                tracing::debug!(task_id = %self.task.id(), result = %result, "Captcha result");
                Ok(result)
            }
            None => Err(Signal::fail("No captcha result obtained in appropriate time")),
        }
    }

    /// `<tmp_dir>/tmpCaptcha_<plugin>_<id>.<ext>`, id derived from the current time
    fn captcha_path(&self, image_type: &str) -> PathBuf {
        let id = (chrono::Utc::now().timestamp_millis() / 10) % 100_000;
        self.config.general.tmp_dir.join(format!(
            "tmpCaptcha_{}_{:05}.{}",
            self.task.plugin(),
            id,
            image_type
        ))
    }

    /// Tell the solver of the held captcha that its answer was accepted
    pub async fn correct_captcha(&self) {
        if let Some(task) = &self.captcha_task {
            task.correct().await;
        }
    }

    /// Tell the solver of the held captcha that its answer was rejected
    pub async fn invalid_captcha(&self) {
        if let Some(task) = &self.captcha_task {
            task.invalid().await;
        }
    }
}
