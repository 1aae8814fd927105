//! In-process provider
//!
//! A deterministic implementation of the provider traits. Nothing leaves the
//! process: channels, login codes and call membership live in a shared
//! [`SimProvider`] state that tests (and the console, when no protocol
//! backend is linked) can script and inspect.
//!
//! Conventions:
//!
//! - the login code is always [`SIM_LOGIN_CODE`]
//! - valid credentials start with `sim:`; anything else is malformed
//! - every channel handle registered with [`SimProvider::with_channel`] is
//!   visible to every account

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::provider::{
    CallControl, ChannelId, CodeVerification, MediaSpec, MessagingConnection, Profile,
    ProviderError, ProviderFactory, ProviderResult, ResolvedChannel,
};

/// Login code accepted by every simulated account
pub const SIM_LOGIN_CODE: &str = "12345";

const CREDENTIAL_PREFIX: &str = "sim:";

/// A text message sent through a simulated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub session: String,
    pub channel: ChannelId,
    pub text: String,
}

#[derive(Default)]
struct SimState {
    channels: Mutex<HashMap<String, ResolvedChannel>>,
    live_calls: Mutex<HashSet<ChannelId>>,
    failing_connects: Mutex<HashSet<String>>,
    failing_starts: Mutex<HashSet<String>>,
    // Remaining failing join attempts per session; u32::MAX never runs out.
    failing_joins: Mutex<HashMap<String, u32>>,
    rejected_phones: Mutex<HashSet<String>>,
    password: Mutex<Option<String>>,
    codes_expired: AtomicBool,
    step_delay: Mutex<Duration>,
    join_delay: Mutex<Duration>,
    joined: Mutex<HashMap<String, ChannelId>>,
    sent: Mutex<Vec<SentMessage>>,
    connected: AtomicUsize,
}

impl SimState {
    fn step_delay(&self) -> Duration {
        *self.step_delay.lock()
    }
}

/// Factory for simulated connections and call layers
#[derive(Clone, Default)]
pub struct SimProvider {
    state: Arc<SimState>,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A credential this provider accepts for `name`
    pub fn credential(name: &str) -> String {
        format!("{}{}", CREDENTIAL_PREFIX, name)
    }

    /// Make a public channel resolvable by `handle`
    pub fn with_channel(self, handle: &str, id: i64, title: &str) -> Self {
        self.state.channels.lock().insert(
            handle.to_string(),
            ResolvedChannel {
                id: ChannelId(id),
                title: title.to_string(),
            },
        );
        self
    }

    /// Mark a channel as currently hosting a live call
    pub fn with_live_call(self, id: i64) -> Self {
        self.state.live_calls.lock().insert(ChannelId(id));
        self
    }

    /// Make every `connect` of session `name` fail
    pub fn fail_connect(&self, name: &str) {
        self.state.failing_connects.lock().insert(name.to_string());
    }

    /// Make starting the call layer of session `name` fail
    pub fn fail_call_start(&self, name: &str) {
        self.state.failing_starts.lock().insert(name.to_string());
    }

    /// Make the next `times` join attempts of session `name` fail
    pub fn fail_joins(&self, name: &str, times: u32) {
        self.state.failing_joins.lock().insert(name.to_string(), times);
    }

    /// Make every join attempt of session `name` fail
    pub fn fail_all_joins(&self, name: &str) {
        self.fail_joins(name, u32::MAX);
    }

    /// Reject login-code requests for `phone`
    pub fn reject_phone(&self, phone: &str) {
        self.state.rejected_phones.lock().insert(phone.to_string());
    }

    /// Require a two-step verification password after the login code
    pub fn require_password(&self, password: &str) {
        *self.state.password.lock() = Some(password.to_string());
    }

    /// Answer every code submission with an expired-code signal
    pub fn expire_codes(&self) {
        self.state.codes_expired.store(true, Ordering::SeqCst);
    }

    /// Delay every login round-trip by `delay`
    pub fn set_step_delay(&self, delay: Duration) {
        *self.state.step_delay.lock() = delay;
    }

    /// Delay every group call join by `delay`
    pub fn set_join_delay(&self, delay: Duration) {
        *self.state.join_delay.lock() = delay;
    }

    /// Messages sent so far, oldest first
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.sent.lock().clone()
    }

    /// Channel whose call session `name` is currently part of
    pub fn joined_channel(&self, name: &str) -> Option<ChannelId> {
        self.state.joined.lock().get(name).copied()
    }

    /// Number of connections currently up
    pub fn open_connections(&self) -> usize {
        self.state.connected.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for SimProvider {
    fn open_session(
        &self,
        name: &str,
        credential: Option<&str>,
    ) -> ProviderResult<Arc<dyn MessagingConnection>> {
        let authorized = match credential {
            Some(credential) if credential.starts_with(CREDENTIAL_PREFIX) => true,
            Some(_) => return Err(ProviderError::other("malformed credential")),
            None => false,
        };

        Ok(Arc::new(SimConnection {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(false),
            authorized: AtomicBool::new(authorized),
            awaiting_password: AtomicBool::new(false),
            phone: Mutex::new(None),
        }))
    }

    fn call_control(
        &self,
        connection: Arc<dyn MessagingConnection>,
    ) -> ProviderResult<Arc<dyn CallControl>> {
        Ok(Arc::new(SimCallControl {
            connection,
            state: Arc::clone(&self.state),
            running: AtomicBool::new(false),
            session: Mutex::new(String::new()),
        }))
    }
}

/// Simulated messaging connection
pub struct SimConnection {
    name: String,
    state: Arc<SimState>,
    connected: AtomicBool,
    authorized: AtomicBool,
    awaiting_password: AtomicBool,
    phone: Mutex<Option<String>>,
}

impl SimConnection {
    fn ensure_connected(&self) -> ProviderResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::NotConnected)
        }
    }

    fn ensure_authorized(&self) -> ProviderResult<()> {
        self.ensure_connected()?;
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::other("connection is not logged in"))
        }
    }

    async fn round_trip(&self) {
        let delay = self.state.step_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MessagingConnection for SimConnection {
    async fn connect(&self) -> ProviderResult<()> {
        if self.state.failing_connects.lock().contains(&self.name) {
            return Err(ProviderError::other("connection refused"));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.state.connected.fetch_add(1, Ordering::SeqCst);
        }
        debug!(session = %self.name, "Simulated connection up");
        Ok(())
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.connected.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn self_profile(&self) -> ProviderResult<Profile> {
        self.ensure_authorized()?;
        Ok(Profile {
            first_name: format!("Sim {}", self.name),
            last_name: None,
            username: Some(self.name.clone()),
        })
    }

    async fn send_message(&self, channel: ChannelId, text: &str) -> ProviderResult<()> {
        self.ensure_authorized()?;
        self.state.sent.lock().push(SentMessage {
            session: self.name.clone(),
            channel,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn resolve_channel(&self, handle: &str) -> ProviderResult<ResolvedChannel> {
        self.ensure_authorized()?;
        self.state
            .channels
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| ProviderError::other(format!("no channel named '{}'", handle)))
    }

    async fn request_login_code(&self, phone: &str) -> ProviderResult<CodeVerification> {
        self.ensure_connected()?;
        self.round_trip().await;

        if self.state.rejected_phones.lock().contains(phone) {
            return Err(ProviderError::InvalidPhone);
        }
        *self.phone.lock() = Some(phone.to_string());
        Ok(CodeVerification {
            phone_code_hash: format!("hash-{}", phone.trim_start_matches('+')),
        })
    }

    async fn submit_login_code(
        &self,
        phone: &str,
        verification: &CodeVerification,
        code: &str,
    ) -> ProviderResult<()> {
        self.ensure_connected()?;
        self.round_trip().await;

        let expected_hash = format!("hash-{}", phone.trim_start_matches('+'));
        let requested = self.phone.lock().as_deref() == Some(phone);
        if !requested || verification.phone_code_hash != expected_hash {
            return Err(ProviderError::other("phone code hash mismatch"));
        }
        if self.state.codes_expired.load(Ordering::SeqCst) {
            return Err(ProviderError::CodeExpired);
        }
        if code != SIM_LOGIN_CODE {
            return Err(ProviderError::InvalidCode);
        }
        if self.state.password.lock().is_some() {
            self.awaiting_password.store(true, Ordering::SeqCst);
            return Err(ProviderError::PasswordRequired);
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_password(&self, password: &str) -> ProviderResult<()> {
        self.ensure_connected()?;
        self.round_trip().await;

        if !self.awaiting_password.load(Ordering::SeqCst) {
            return Err(ProviderError::other("no password was requested"));
        }
        let matches = self.state.password.lock().as_deref() == Some(password);
        if !matches {
            return Err(ProviderError::InvalidPassword);
        }
        self.awaiting_password.store(false, Ordering::SeqCst);
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn export_credential(&self) -> ProviderResult<String> {
        self.ensure_authorized()?;
        Ok(SimProvider::credential(&self.name))
    }
}

/// Simulated call layer
///
/// Learns which session it belongs to from the connection's profile when it
/// starts.
pub struct SimCallControl {
    connection: Arc<dyn MessagingConnection>,
    state: Arc<SimState>,
    running: AtomicBool,
    session: Mutex<String>,
}

impl SimCallControl {
    fn ensure_running(&self) -> ProviderResult<String> {
        if self.is_connected() {
            Ok(self.session.lock().clone())
        } else {
            Err(ProviderError::NotConnected)
        }
    }
}

#[async_trait]
impl CallControl for SimCallControl {
    async fn start(&self) -> ProviderResult<()> {
        if !self.connection.is_connected() {
            return Err(ProviderError::NotConnected);
        }
        let profile = self.connection.self_profile().await?;
        let name = profile.username.unwrap_or_default();
        if self.state.failing_starts.lock().contains(&name) {
            return Err(ProviderError::other("call layer failed to start"));
        }
        *self.session.lock() = name;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> ProviderResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.connection.is_connected()
    }

    async fn join_channel(
        &self,
        channel: ChannelId,
        _media: &MediaSpec,
        _auto_invite: bool,
    ) -> ProviderResult<()> {
        let delay = *self.state.join_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let session = self.ensure_running()?;

        {
            let mut failing = self.state.failing_joins.lock();
            if let Some(remaining) = failing.get_mut(&session) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(ProviderError::other("group call join rejected"));
                }
            }
        }

        self.state.joined.lock().insert(session, channel);
        self.state.live_calls.lock().insert(channel);
        Ok(())
    }

    async fn leave_channel(&self, channel: ChannelId) -> ProviderResult<()> {
        let session = self.ensure_running()?;
        let mut joined = self.state.joined.lock();
        if joined.get(&session) == Some(&channel) {
            joined.remove(&session);
            Ok(())
        } else {
            Err(ProviderError::other("not part of this call"))
        }
    }

    async fn query_active_call(&self, channel: ChannelId) -> ProviderResult<bool> {
        Ok(self.state.live_calls.lock().contains(&channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn logged_in(provider: &SimProvider, name: &str) -> Arc<dyn MessagingConnection> {
        let credential = SimProvider::credential(name);
        let connection = provider.open_session(name, Some(&credential)).unwrap();
        connection.connect().await.unwrap();
        connection
    }

    #[test]
    fn test_malformed_credential_rejected() {
        let provider = SimProvider::new();
        assert!(provider.open_session("acc1", Some("garbage")).is_err());
        assert!(provider.open_session("acc1", None).is_ok());
    }

    #[tokio::test]
    async fn test_login_requires_password_when_configured() {
        let provider = SimProvider::new();
        provider.require_password("hunter2");

        let connection = provider.open_session("acc1", None).unwrap();
        connection.connect().await.unwrap();
        let verification = connection.request_login_code("+15550001").await.unwrap();

        let result = connection
            .submit_login_code("+15550001", &verification, SIM_LOGIN_CODE)
            .await;
        assert_eq!(result, Err(ProviderError::PasswordRequired));
        assert_eq!(
            connection.submit_password("wrong").await,
            Err(ProviderError::InvalidPassword)
        );
        connection.submit_password("hunter2").await.unwrap();
        assert_eq!(connection.export_credential().await.unwrap(), "sim:acc1");
    }

    #[tokio::test]
    async fn test_join_failures_run_out() {
        let provider = SimProvider::new().with_channel("foo", 42, "Foo");
        provider.fail_joins("acc1", 1);

        let connection = logged_in(&provider, "acc1").await;
        let calls = provider.call_control(connection).unwrap();
        calls.start().await.unwrap();

        let media = MediaSpec::default();
        assert!(calls.join_channel(ChannelId(42), &media, true).await.is_err());
        calls.join_channel(ChannelId(42), &media, true).await.unwrap();
        assert_eq!(provider.joined_channel("acc1"), Some(ChannelId(42)));

        calls.leave_channel(ChannelId(42)).await.unwrap();
        assert_eq!(provider.joined_channel("acc1"), None);
    }

    #[tokio::test]
    async fn test_open_connection_accounting() {
        let provider = SimProvider::new();
        let connection = logged_in(&provider, "acc1").await;
        assert_eq!(provider.open_connections(), 1);
        connection.disconnect().await.unwrap();
        connection.disconnect().await.unwrap();
        assert_eq!(provider.open_connections(), 0);
    }
}
