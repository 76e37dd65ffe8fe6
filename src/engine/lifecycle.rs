//! Execution lifecycle: account binding, retry loop, terminal outcome

use std::path::PathBuf;

use super::Engine;
use crate::db::FileRecord;
use crate::error::Result;
use crate::execution::{AccountBinding, ExecutionParts, PluginExecution};
use crate::hoster::Hoster;
use crate::signal::{Failure, Outcome, Signal};
use crate::task::Task;
use crate::types::{Event, Status};
use crate::wait::WaitController;

impl Engine {
    /// Build the execution context for `task`
    ///
    /// Registers the task with the Duplicate Guard, selects an account when one is
    /// registered and usable for the task's plugin and resolves the plugin's OCR engine.
    pub async fn execution(&self, task: Task) -> Result<PluginExecution> {
        self.registry.register(&task).await;
        let plugin = task.plugin().to_string();

        let account = match self.accounts.get(&plugin) {
            Some(account) if account.can_use().await => match account.select_account().await {
                Some((user, data)) => {
                    let premium = account.is_premium(&user).await;
                    tracing::debug!(task_id = %task.id(), user = %user, premium, "Account selected");
                    Some(AccountBinding {
                        account: account.clone(),
                        user,
                        data,
                        premium,
                    })
                }
                None => None,
            },
            _ => None,
        };

        let ocr_registered = self.ocr.contains(&plugin);
        let ocr = if self.config.captcha.ocr_enabled {
            self.ocr.get(&plugin)
        } else {
            None
        };

        let wait = WaitController::new(
            task.clone(),
            self.reconnect.clone(),
            self.event_tx.clone(),
            self.config.download.wait_poll_interval,
        );

        Ok(PluginExecution::new(
            task,
            ExecutionParts {
                config: self.config.clone(),
                registry: self.registry.clone(),
                index: self.index.clone(),
                events: self.event_tx.clone(),
                transport: self.transports.create(&plugin)?,
                account,
                broker: self.broker.clone(),
                ocr,
                ocr_registered,
                wait,
            },
        ))
    }

    /// Drive `hoster` until it completes or raises a non-retry signal
    ///
    /// Every try checks the abort flag, refreshes the account session (or clears
    /// cookies when running anonymously), calls `setup`, moves the task to
    /// [`Status::Starting`] and calls `process`. A `Retry` restarts the try;
    /// more than `download.max_retries` restarts turn it into a failure.
    pub async fn preprocessing(
        &self,
        exec: &mut PluginExecution,
        hoster: &mut dyn Hoster,
    ) -> Outcome<()> {
        let max_retries = self.config.download.max_retries;
        let mut restarts = 0u32;

        loop {
            match self.attempt(exec, hoster).await {
                Err(Signal::Retry(reason)) => {
                    restarts += 1;
                    if restarts > max_retries {
                        tracing::warn!(
                            task_id = %exec.task().id(),
                            restarts,
                            "Giving up after too many retries"
                        );
                        let reason = if reason.is_empty() {
                            "Max retries reached".to_string()
                        } else {
                            reason
                        };
                        return Err(Signal::fail(reason));
                    }
                    tracing::info!(
                        task_id = %exec.task().id(),
                        attempt = restarts,
                        reason = %reason,
                        "Restarting process"
                    );
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, exec: &mut PluginExecution, hoster: &mut dyn Hoster) -> Outcome<()> {
        exec.check_abort()?;

        match exec.account().cloned() {
            Some(binding) => binding.account.check_login(&binding.user).await?,
            None => exec.transport().clear_cookies().await,
        }

        hoster.setup(exec).await?;
        exec.set_status(Status::Starting).await;
        hoster.process(exec).await
    }

    /// Run one task to its terminal outcome
    ///
    /// Registers the task, builds its execution, calls `init` and then
    /// [`preprocessing`](Self::preprocessing). The task ends in exactly one terminal
    /// status, except after `Reconnect`, which resets it to [`Status::Created`] for the
    /// scheduler to pick up again. An aborted task always ends as aborted, whatever
    /// the hoster raised.
    pub async fn run(&self, task: Task, hoster: &mut dyn Hoster) -> Outcome<()> {
        self.registry.insert(task.clone()).await;
        tracing::info!(
            task_id = %task.id(),
            plugin = task.plugin(),
            url = task.url(),
            "Task started"
        );

        let mut exec = match self.execution(task.clone()).await {
            Ok(exec) => exec,
            Err(e) => {
                let outcome = Err(Signal::from(e));
                self.finish(&task, None, &outcome).await;
                return outcome;
            }
        };

        let outcome = match hoster.init(&mut exec).await {
            Ok(()) => self.preprocessing(&mut exec, hoster).await,
            Err(signal) => Err(signal),
        };

        let outcome = match outcome {
            Err(signal) if task.is_aborted() && signal != Signal::Abort => {
                tracing::debug!(task_id = %task.id(), signal = %signal, "Abort overrides signal");
                Err(Signal::Abort)
            }
            other => other,
        };

        self.finish(&task, exec.last_download().cloned(), &outcome).await;
        outcome
    }

    /// Map the outcome to the task's status, notify listeners and update the index
    async fn finish(&self, task: &Task, path: Option<PathBuf>, outcome: &Outcome<()>) {
        let id = task.id();

        let (status, message, event) = match outcome {
            Ok(()) => (Status::Finished, None, Event::Finished { id, path }),
            Err(Signal::Abort) => (Status::Aborted, None, Event::Aborted { id }),
            Err(Signal::Fail(reason)) => {
                let status = if reason.is_offline() {
                    Status::Offline
                } else {
                    Status::Failed
                };
                (
                    status,
                    Some(reason.to_string()),
                    Event::Failed {
                        id,
                        reason: reason.clone(),
                    },
                )
            }
            Err(Signal::Skip(info)) => (
                Status::Skipped,
                Some(info.to_string()),
                Event::Skipped {
                    id,
                    info: info.clone(),
                },
            ),
            // only reachable from init; the retry loop converts the rest
            Err(Signal::Retry(reason)) => {
                let reason = Failure::Other(reason.clone());
                (
                    Status::Failed,
                    Some(reason.to_string()),
                    Event::Failed { id, reason },
                )
            }
            Err(Signal::Reconnect) => {
                tracing::info!(task_id = %id, "Reconnect requested, task reset");
                if task.set_status(Status::Created).await {
                    // send() returns Err if there are no receivers, which is fine - we just drop the event
                    self.event_tx
                        .send(Event::StatusChanged {
                            id,
                            status: Status::Created,
                        })
                        .ok();
                }
                return;
            }
        };

        if !task.set_terminal(status, message.clone()).await {
            return;
        }
        match &message {
            Some(message) => {
                tracing::info!(task_id = %id, status = %status, message = %message, "Task ended")
            }
            None => tracing::info!(task_id = %id, status = %status, "Task ended"),
        }
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();

        let Some(index) = &self.index else {
            return;
        };
        let record = FileRecord {
            id,
            package_folder: task.package().folder.clone(),
            name: task.name().await,
            plugin: task.plugin().to_string(),
            status,
            size: task.size(),
        };
        if let Err(e) = index.record_file(&record).await {
            tracing::warn!(task_id = %id, error = %e, "Failed to record file in duplicate index");
        }
    }
}
