//! Account subsystem
//!
//! An [`Account`] gives an execution credentials for its hoster: which user to log
//! in as, whether that user is premium, and whether the session is still valid.
//! [`AccountPool`] is the default implementation. Lookups are read-mostly; logins
//! are serialized per user so a session is never refreshed twice at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default lifetime of a login session
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(10 * 60 * 60);

/// Stored credentials and account status
#[derive(Clone, Debug, Default)]
pub struct AccountData {
    /// Password or API key
    pub password: String,
    /// Premium status as reported by the last login
    pub premium: bool,
    /// End of the paid period, if known
    pub valid_until: Option<DateTime<Utc>>,
    /// Hoster-specific options
    pub options: HashMap<String, String>,
}

impl AccountData {
    /// Credentials for a fresh, not yet logged-in account
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Result of a successful login
#[derive(Clone, Debug, Default)]
pub struct LoginInfo {
    /// Premium status
    pub premium: bool,
    /// End of the paid period, if known
    pub valid_until: Option<DateTime<Utc>>,
}

/// Credential source consumed by an execution
#[async_trait]
pub trait Account: Send + Sync {
    /// Whether at least one usable account exists
    async fn can_use(&self) -> bool;

    /// Pick an account for a new execution
    async fn select_account(&self) -> Option<(String, AccountData)>;

    /// Premium status of `user`
    async fn is_premium(&self, user: &str) -> bool;

    /// Make sure `user` has a valid session, logging in when needed
    ///
    /// Returns an error when the credentials are rejected.
    async fn check_login(&self, user: &str) -> Result<()>;

    /// Transport carrying the session of `user`, if the account keeps one
    fn transport_for(&self, _user: &str) -> Option<Arc<dyn Transport>> {
        None
    }
}

/// Hoster-specific login procedure used by [`AccountPool`]
#[async_trait]
pub trait LoginBackend: Send + Sync {
    /// Log `user` in and report the account status
    async fn login(&self, user: &str, data: &AccountData) -> Result<LoginInfo>;
}

#[derive(Debug)]
struct AccountEntry {
    data: AccountData,
    valid: bool,
    logged_in_at: Option<Instant>,
}

impl AccountEntry {
    fn usable(&self, now: DateTime<Utc>) -> bool {
        self.valid && self.data.valid_until.is_none_or(|until| until > now)
    }
}

/// Pool of accounts for one hoster plugin
pub struct AccountPool {
    plugin: String,
    backend: Arc<dyn LoginBackend>,
    accounts: RwLock<HashMap<String, AccountEntry>>,
    login_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    session_ttl: Duration,
}

impl AccountPool {
    /// Create an empty pool for `plugin`
    pub fn new(plugin: impl Into<String>, backend: Arc<dyn LoginBackend>) -> Self {
        Self {
            plugin: plugin.into(),
            backend,
            accounts: RwLock::new(HashMap::new()),
            login_locks: Mutex::new(HashMap::new()),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Re-login after sessions older than `ttl` (builder style)
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Plugin this pool belongs to
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Add or replace an account
    pub async fn add_account(&self, user: impl Into<String>, data: AccountData) {
        self.accounts.write().await.insert(
            user.into(),
            AccountEntry {
                data,
                valid: true,
                logged_in_at: None,
            },
        );
    }

    /// Remove an account
    pub async fn remove_account(&self, user: &str) -> bool {
        self.accounts.write().await.remove(user).is_some()
    }

    /// Mark an account unusable (e.g. after the hoster rejected it)
    pub async fn invalidate(&self, user: &str) {
        if let Some(entry) = self.accounts.write().await.get_mut(user) {
            tracing::warn!(plugin = %self.plugin, user, "Account marked invalid");
            entry.valid = false;
            entry.logged_in_at = None;
        }
    }

    /// Whether `user` exists and is usable
    pub async fn is_valid(&self, user: &str) -> bool {
        let now = Utc::now();
        self.accounts
            .read()
            .await
            .get(user)
            .is_some_and(|entry| entry.usable(now))
    }

    async fn session_fresh(&self, user: &str) -> Result<bool> {
        let accounts = self.accounts.read().await;
        let entry = accounts
            .get(user)
            .ok_or_else(|| Error::Account(format!("unknown account '{}'", user)))?;
        if !entry.valid {
            return Err(Error::Account(format!("account '{}' is invalid", user)));
        }
        Ok(entry
            .logged_in_at
            .is_some_and(|at| at.elapsed() < self.session_ttl))
    }

    async fn login_lock(&self, user: &str) -> Arc<Mutex<()>> {
        self.login_locks
            .lock()
            .await
            .entry(user.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Account for AccountPool {
    async fn can_use(&self) -> bool {
        let now = Utc::now();
        self.accounts
            .read()
            .await
            .values()
            .any(|entry| entry.usable(now))
    }

    async fn select_account(&self) -> Option<(String, AccountData)> {
        let now = Utc::now();
        let accounts = self.accounts.read().await;
        let usable: Vec<(&String, &AccountEntry)> = accounts
            .iter()
            .filter(|(_, entry)| entry.usable(now))
            .collect();

        let (user, entry) = usable.choose(&mut rand::thread_rng())?;
        Some(((*user).clone(), entry.data.clone()))
    }

    async fn is_premium(&self, user: &str) -> bool {
        self.accounts
            .read()
            .await
            .get(user)
            .is_some_and(|entry| entry.data.premium)
    }

    async fn check_login(&self, user: &str) -> Result<()> {
        if self.session_fresh(user).await? {
            return Ok(());
        }

        let lock = self.login_lock(user).await;
        let _guard = lock.lock().await;

        // another execution may have logged in while we waited
        if self.session_fresh(user).await? {
            return Ok(());
        }

        let data = match self.accounts.read().await.get(user) {
            Some(entry) => entry.data.clone(),
            None => return Err(Error::Account(format!("unknown account '{}'", user))),
        };

        tracing::info!(plugin = %self.plugin, user, "Logging in");
        match self.backend.login(user, &data).await {
            Ok(info) => {
                if let Some(entry) = self.accounts.write().await.get_mut(user) {
                    entry.data.premium = info.premium;
                    entry.data.valid_until = info.valid_until;
                    entry.logged_in_at = Some(Instant::now());
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(plugin = %self.plugin, user, error = %e, "Login failed");
                self.invalidate(user).await;
                Err(Error::Account(format!("login failed for '{}': {}", user, e)))
            }
        }
    }
}
