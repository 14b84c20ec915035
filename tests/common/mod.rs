#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use wechat_rust::bot::{Bot, BotBuilder};
use wechat_rust::config::ClientConfig;
use wechat_rust::test_utils::{MockHttpClient, MockReply, bodies, routes};
use wechat_rust::types::events::{Event, EventHandler};

pub const SELF: &str = "@self";
pub const TICKET: &str = "oZZsO0Qv8Q==";
pub const HOST: &str = "wx2.qq.com";
pub const INIT_CURSOR: &[(u32, u64)] = &[(1, 100), (2, 200)];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        login_poll_interval: Duration::from_millis(10),
        login_timeout: Duration::from_secs(10),
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(100),
        ..Default::default()
    }
}

/// Scripts a QR login that is scanned, then confirmed, followed by an init
/// listing `friends`. The long poll is held open afterwards.
pub fn script_login(mock: &MockHttpClient, friends: &[(&str, &str)]) {
    mock.push(routes::JSLOGIN, MockReply::ok(bodies::ticket(TICKET)));
    mock.push(routes::LOGIN_STATUS, MockReply::ok(bodies::login_status(201)));
    mock.push(routes::LOGIN_STATUS, MockReply::ok(bodies::login_confirmed(HOST)));
    mock.push(routes::NEW_LOGIN_PAGE, MockReply::ok(bodies::login_info()));
    mock.push(
        routes::INIT,
        MockReply::ok(bodies::init(SELF, friends, INIT_CURSOR)),
    );
    mock.fallback(routes::STATUS_NOTIFY, MockReply::ok(bodies::ok()));
    mock.fallback(routes::GET_CONTACT, MockReply::ok(bodies::contact_page(friends)));
    mock.fallback(routes::LOGOUT, MockReply::ok(""));
    mock.fallback(routes::SYNC_CHECK, MockReply::Hold);
}

pub fn builder(mock: &MockHttpClient, config: ClientConfig) -> BotBuilder {
    Bot::builder()
        .with_config(config)
        .with_http_client(mock.clone())
}

/// Records every lifecycle event synchronously.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn attach(bot: &Bot) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        bot.client().event_bus.add_handler(recorder.clone());
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHandler for EventRecorder {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Polls `check` until it holds, failing the test after a minute.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(60), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
