use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use super::Engine;
use crate::account::{Account, AccountData, AccountPool, LoginBackend, LoginInfo};
use crate::engine::test_helpers::{create_test_engine, test_task};
use crate::error::Error;
use crate::execution::{DownloadRequest, PluginExecution};
use crate::hoster::Hoster;
use crate::signal::{Failure, Outcome, Signal, SkipInfo};
use crate::types::{Event, Status, TaskId};

const FILE_URL: &str = "http://example.com/file.bin";

/// Hoster whose `process` replays scripted outcomes, then downloads `FILE_URL`
#[derive(Default)]
struct ScriptedHoster {
    init: Option<Signal>,
    outcomes: VecDeque<Outcome<()>>,
    setups: usize,
    processes: usize,
}

impl ScriptedHoster {
    fn with_outcomes(outcomes: impl IntoIterator<Item = Outcome<()>>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Hoster for ScriptedHoster {
    async fn init(&mut self, exec: &mut PluginExecution) -> Outcome<()> {
        exec.set_chunk_limit(1);
        match self.init.take() {
            Some(signal) => Err(signal),
            None => Ok(()),
        }
    }

    async fn setup(&mut self, _exec: &mut PluginExecution) -> Outcome<()> {
        self.setups += 1;
        Ok(())
    }

    async fn process(&mut self, exec: &mut PluginExecution) -> Outcome<()> {
        self.processes += 1;
        assert_eq!(exec.task().status().await, Status::Starting);
        if let Some(outcome) = self.outcomes.pop_front() {
            return outcome;
        }
        exec.download(FILE_URL, DownloadRequest::default()).await?;
        Ok(())
    }
}

// --- run() outcome tests ---

#[tokio::test]
async fn test_run_finishes_and_records_file() {
    let (engine, transport, temp_dir) = create_test_engine().await;
    transport.file(FILE_URL, b"content".to_vec());
    let mut events = engine.subscribe();

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::default();
    engine.run(task.clone(), &mut hoster).await.unwrap();

    assert_eq!(task.status().await, Status::Finished);
    assert_eq!(hoster.processes, 1);
    // anonymous tries start from an empty cookie store
    assert_eq!(transport.cookie_clears.load(Ordering::SeqCst), 1);

    let mut finished_path = None;
    while let Ok(event) = events.try_recv() {
        if let Event::Finished { id, path } = event {
            assert_eq!(id, TaskId(1));
            finished_path = path;
        }
    }
    assert_eq!(
        finished_path,
        Some(temp_dir.path().join("downloads").join("pkg").join("file.bin"))
    );

    // a later task for the same file sees the record
    let index = engine.index.clone().unwrap();
    let record = index
        .find_duplicates(TaskId(2), "pkg", "file.bin")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.plugin, "ExampleHoster");
}

#[tokio::test]
async fn test_run_restarts_process_on_retry() {
    let (engine, transport, _temp_dir) = create_test_engine().await;
    transport.file(FILE_URL, b"content".to_vec());

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::with_outcomes([
        Err(Signal::Retry("server busy".to_string())),
        Err(Signal::Retry("server busy".to_string())),
    ]);
    engine.run(task.clone(), &mut hoster).await.unwrap();

    assert_eq!(hoster.setups, 3);
    assert_eq!(hoster.processes, 3);
    assert_eq!(task.status().await, Status::Finished);
    assert_eq!(transport.cookie_clears.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_run_gives_up_after_max_retries() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let max_retries = engine.config().download.max_retries as usize;

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::with_outcomes(
        std::iter::repeat_with(|| Err(Signal::Retry("server busy".to_string()))).take(20),
    );
    let err = engine.run(task.clone(), &mut hoster).await.unwrap_err();

    assert_eq!(err, Signal::fail("server busy"));
    assert_eq!(hoster.processes, max_retries + 1);
    assert_eq!(task.status().await, Status::Failed);
    assert_eq!(task.message().await.as_deref(), Some("server busy"));
}

#[tokio::test]
async fn test_retry_without_reason_fails_with_default_message() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::with_outcomes(
        std::iter::repeat_with(|| Err(Signal::Retry(String::new()))).take(20),
    );
    let err = engine.run(task, &mut hoster).await.unwrap_err();
    assert_eq!(err, Signal::fail("Max retries reached"));
}

#[tokio::test]
async fn test_run_maps_failures_to_statuses() {
    let cases = [
        (Signal::offline(), Status::Offline, "offline"),
        (Signal::temp_offline(), Status::Failed, "temp. offline"),
        (Signal::fail("quota exceeded"), Status::Failed, "quota exceeded"),
        (Signal::skip("already cached"), Status::Skipped, "already cached"),
    ];

    for (signal, status, message) in cases {
        let (engine, _transport, _temp_dir) = create_test_engine().await;
        let task = test_task(1, "pkg", "file.bin");
        let mut hoster = ScriptedHoster::with_outcomes([Err(signal.clone())]);

        let err = engine.run(task.clone(), &mut hoster).await.unwrap_err();
        assert_eq!(err, signal);
        assert_eq!(task.status().await, status, "status for {:?}", signal);
        assert_eq!(task.message().await.as_deref(), Some(message));
    }
}

#[tokio::test]
async fn test_failure_event_carries_typed_reason() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let mut events = engine.subscribe();

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::with_outcomes([Err(Signal::temp_offline())]);
    engine.run(task, &mut hoster).await.unwrap_err();

    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        if let Event::Failed { reason: r, .. } = event {
            reason = Some(r);
        }
    }
    assert_eq!(reason, Some(Failure::TempOffline));
}

#[tokio::test]
async fn test_skipped_sibling_reports_conflicting_plugin() {
    let (engine, transport, _temp_dir) = create_test_engine().await;
    transport.file(FILE_URL, b"content".to_vec());

    let first = test_task(1, "pkg", "file.bin");
    engine
        .run(first, &mut ScriptedHoster::default())
        .await
        .unwrap();

    let second = test_task(2, "pkg", "file.bin");
    let err = engine
        .run(second.clone(), &mut ScriptedHoster::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Signal::Skip(SkipInfo::Task {
            plugin: "ExampleHoster".to_string(),
            id: TaskId(1),
        })
    );
    assert_eq!(second.status().await, Status::Skipped);
    assert_eq!(second.message().await.as_deref(), Some("ExampleHoster"));
}

#[tokio::test]
async fn test_init_signal_ends_run_without_process() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster {
        init: Some(Signal::offline()),
        ..Default::default()
    };

    let err = engine.run(task.clone(), &mut hoster).await.unwrap_err();
    assert_eq!(err, Signal::offline());
    assert_eq!(hoster.setups, 0);
    assert_eq!(hoster.processes, 0);
    assert_eq!(task.status().await, Status::Offline);
}

// --- abort and reconnect tests ---

/// Hoster that aborts its own task and then fails
struct AbortingHoster;

#[async_trait]
impl Hoster for AbortingHoster {
    async fn process(&mut self, exec: &mut PluginExecution) -> Outcome<()> {
        exec.task().abort();
        Err(Signal::fail("connection reset"))
    }
}

#[tokio::test]
async fn test_abort_overrides_other_signals() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let mut events = engine.subscribe();

    let task = test_task(1, "pkg", "file.bin");
    let err = engine.run(task.clone(), &mut AbortingHoster).await.unwrap_err();

    assert_eq!(err, Signal::Abort);
    assert_eq!(task.status().await, Status::Aborted);
    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::Failed { .. }));
        aborted |= matches!(event, Event::Aborted { id: TaskId(1) });
    }
    assert!(aborted);
}

/// Hoster that waits for a long hoster-imposed delay
struct WaitingHoster;

#[async_trait]
impl Hoster for WaitingHoster {
    async fn process(&mut self, exec: &mut PluginExecution) -> Outcome<()> {
        exec.set_wait(3600, true).await;
        exec.wait().await?;
        Err(Signal::fail("wait should not expire"))
    }
}

#[tokio::test]
async fn test_engine_abort_cancels_waiting_task() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let task = test_task(1, "pkg", "file.bin");
    engine.add_task(task.clone()).await;

    let aborter = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(aborter.abort(TaskId(1)).await);
    });

    let err = engine.run(task.clone(), &mut WaitingHoster).await.unwrap_err();
    assert_eq!(err, Signal::Abort);
    assert_eq!(task.status().await, Status::Aborted);
    assert!(!engine.abort(TaskId(42)).await);
}

#[tokio::test]
async fn test_reconnect_resets_task_to_created() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let task = test_task(1, "pkg", "file.bin");

    let reconnect = engine.reconnect().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        reconnect.set();
    });

    let err = engine.run(task.clone(), &mut WaitingHoster).await.unwrap_err();
    assert_eq!(err, Signal::Reconnect);
    assert_eq!(task.status().await, Status::Created);
    assert!(task.message().await.is_none());
}

// --- account tests ---

/// Rejects the password "wrong"
struct PasswordBackend;

#[async_trait]
impl LoginBackend for PasswordBackend {
    async fn login(&self, _user: &str, data: &AccountData) -> crate::Result<LoginInfo> {
        if data.password == "wrong" {
            return Err(Error::Account("invalid credentials".to_string()));
        }
        Ok(LoginInfo {
            premium: true,
            valid_until: None,
        })
    }
}

#[tokio::test]
async fn test_account_session_is_checked_before_each_try() {
    let (engine, transport, _temp_dir) = create_test_engine().await;
    transport.file(FILE_URL, b"content".to_vec());
    let pool = Arc::new(AccountPool::new("ExampleHoster", Arc::new(PasswordBackend)));
    pool.add_account("alice", AccountData::new("secret")).await;
    let engine = engine.with_account("ExampleHoster", pool.clone());

    let task = test_task(1, "pkg", "file.bin");
    engine
        .run(task.clone(), &mut ScriptedHoster::default())
        .await
        .unwrap();

    assert_eq!(task.status().await, Status::Finished);
    assert!(pool.is_premium("alice").await);
    // accounts keep their session cookies
    assert_eq!(transport.cookie_clears.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_login_fails_task() {
    let (engine, _transport, _temp_dir) = create_test_engine().await;
    let pool = Arc::new(AccountPool::new("ExampleHoster", Arc::new(PasswordBackend)));
    pool.add_account("bob", AccountData::new("wrong")).await;
    let engine = engine.with_account("ExampleHoster", pool.clone());

    let task = test_task(1, "pkg", "file.bin");
    let mut hoster = ScriptedHoster::default();
    let err = engine.run(task.clone(), &mut hoster).await.unwrap_err();

    assert!(matches!(err, Signal::Fail(Failure::Other(_))));
    assert_eq!(hoster.processes, 0);
    assert_eq!(task.status().await, Status::Failed);
    assert!(!pool.is_valid("bob").await);
}

#[tokio::test]
async fn test_engine_without_index_still_guards_siblings() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = crate::engine::test_helpers::test_config(temp_dir.path());
    let transport = Arc::new(crate::engine::test_helpers::MockTransport::default());
    transport.file(FILE_URL, b"content".to_vec());
    let engine = Engine::without_index(config)
        .unwrap()
        .with_transport_factory(crate::engine::test_helpers::shared_transport(transport));

    engine
        .run(test_task(1, "pkg", "file.bin"), &mut ScriptedHoster::default())
        .await
        .unwrap();
    let err = engine
        .run(test_task(2, "pkg", "file.bin"), &mut ScriptedHoster::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Signal::Skip(SkipInfo::Task { .. })));
}

#[tokio::test]
async fn test_new_engine_rejects_invalid_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = crate::engine::test_helpers::test_config(temp_dir.path());
    config.permission.folder = "rwxr-xr-x".to_string();

    assert!(matches!(
        Engine::new(config).await,
        Err(Error::Config { .. })
    ));
}

#[test]
fn test_engine_without_index_rejects_invalid_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = crate::engine::test_helpers::test_config(temp_dir.path());
    config.captcha.ocr_delay_min_ms = 5;
    config.captcha.ocr_delay_max_ms = 1;
    assert!(matches!(
        Engine::without_index(config),
        Err(Error::Config { key: Some(key), .. }) if key == "captcha.ocr_delay_min_ms"
    ));

    let mut config = crate::engine::test_helpers::test_config(temp_dir.path());
    config.download.wait_poll_interval = Duration::ZERO;
    assert!(matches!(
        Engine::without_index(config),
        Err(Error::Config { key: Some(key), .. }) if key == "download.wait_poll_interval"
    ));
}
