use std::time::Duration;

/// Which web client the login pretends to be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientMode {
    #[default]
    Normal,
    /// The desktop (UOS) flavour, accepted for accounts the browser login
    /// turns away.
    Desktop,
}

/// How received messages reach the handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One message at a time, in batch order.
    #[default]
    Inline,
    /// Up to `workers` handler invocations at once. Started in batch order,
    /// finished in any order.
    Pooled { workers: usize },
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub mode: ClientMode,
    /// Pause between two login status checks.
    pub login_poll_interval: Duration,
    /// Upper bound on a whole `login()` call.
    pub login_timeout: Duration,
    /// First delay of the sync retry backoff.
    pub backoff_base: Duration,
    /// Longest delay the backoff grows to.
    pub backoff_cap: Duration,
    /// Consecutive failed sync rounds after which the loop gives up.
    pub max_retries: u32,
    /// Consecutive 401/403 answers after which the session is considered
    /// expired.
    pub max_auth_failures: u32,
    pub dispatch_mode: DispatchMode,
    /// Deadline of the sync-check long poll. Must exceed the server's hold
    /// time (about 25 seconds).
    pub sync_check_timeout: Duration,
    /// Deadline of every other request.
    pub request_timeout: Duration,
    /// `extspam` header value sent with the establish request in desktop
    /// mode.
    pub desktop_extspam: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: ClientMode::Normal,
            login_poll_interval: Duration::from_secs(1),
            login_timeout: Duration::from_secs(5 * 60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            max_retries: 8,
            max_auth_failures: 3,
            dispatch_mode: DispatchMode::Inline,
            sync_check_timeout: Duration::from_secs(35),
            request_timeout: Duration::from_secs(30),
            desktop_extspam: None,
        }
    }
}
