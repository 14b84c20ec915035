use crate::client::Client;
use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, MessageHandler};
use crate::error::ClientError;
use crate::send::SentMessage;
use crate::store::SessionStorage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wechat_rust_ureq_http_client::UreqHttpClient;
use wxcore::net::HttpClient;
use wxcore::session::Session;
use wxcore::types::events::{Event, EventHandler, LogoutReason};
use wxcore::types::message::Message;

/// A received message together with the client it arrived on.
pub struct MessageContext {
    pub message: Message,
    pub client: Arc<Client>,
}

impl MessageContext {
    /// The conversation the message belongs to.
    pub fn chat(&self) -> String {
        let me = self.client.self_user_name().unwrap_or_default();
        self.message.chat(&me).to_string()
    }

    /// Sends `text` back to the conversation the message came from.
    pub async fn reply_text(&self, text: &str) -> Result<SentMessage, ClientError> {
        self.client.send_text(&self.chat(), text).await
    }
}

type EventHandlerCallback =
    Arc<dyn Fn(Event, Arc<Client>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct BotEventHandler {
    client: std::sync::Weak<Client>,
    event_handler: EventHandlerCallback,
}

impl EventHandler for BotEventHandler {
    fn handle_event(&self, event: &Event) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let handler = self.event_handler.clone();
        let event = event.clone();
        tokio::spawn(async move {
            handler(event, client).await;
        });
    }
}

type ChallengeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
type ConfirmedCallback = Arc<dyn Fn(&Session) + Send + Sync>;
type LogoutCallback = Arc<dyn Fn(&LogoutReason) + Send + Sync>;

/// Typed lifecycle callbacks. Each one defaults to doing nothing. They run
/// synchronously on the task that raised the event, so they should return
/// quickly.
#[derive(Default, Clone)]
struct LifecycleCallbacks {
    on_login_challenge: Option<ChallengeCallback>,
    on_login_confirmed: Option<ConfirmedCallback>,
    on_logout: Option<LogoutCallback>,
}

impl LifecycleCallbacks {
    fn is_empty(&self) -> bool {
        self.on_login_challenge.is_none()
            && self.on_login_confirmed.is_none()
            && self.on_logout.is_none()
    }
}

impl EventHandler for LifecycleCallbacks {
    fn handle_event(&self, event: &Event) {
        match event {
            Event::LoginChallenge { ticket, qr_url } => {
                if let Some(cb) = &self.on_login_challenge {
                    cb(ticket, qr_url);
                }
            }
            Event::LoginConfirmed(session) => {
                if let Some(cb) = &self.on_login_confirmed {
                    cb(session);
                }
            }
            Event::LoggedOut(reason) => {
                if let Some(cb) = &self.on_logout {
                    cb(reason);
                }
            }
            Event::LoginScanned { .. } | Event::ContactsChanged { .. } => {}
        }
    }
}

pub struct Bot {
    client: Arc<Client>,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::new()
    }

    pub fn client(&self) -> Arc<Client> {
        self.client.clone()
    }

    /// Logs in and starts receiving. Blocks until the session is
    /// established or the attempt failed.
    pub async fn login(&self) -> Result<(), ClientError> {
        self.client.login().await
    }

    /// Waits until the session ends. See [`Client::block`].
    pub async fn block(&self) -> Option<LogoutReason> {
        self.client.block().await
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.client.logout().await
    }
}

#[derive(Default)]
pub struct BotBuilder {
    config: ClientConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    storage: Option<Arc<dyn SessionStorage>>,
    ticket: Option<String>,
    message_handler: Option<MessageHandler>,
    event_handler: Option<EventHandlerCallback>,
    lifecycle: LifecycleCallbacks,
}

impl BotBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport to use. Defaults to [`UreqHttpClient`].
    pub fn with_http_client<C: HttpClient + 'static>(mut self, client: C) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Enables hot login: the session is saved after every login and tried
    /// first on the next one.
    pub fn with_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Uses a ticket obtained elsewhere instead of requesting one.
    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = Some(ticket.into());
        self
    }

    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.message_handler = Some(Arc::new(move |ctx| Box::pin(handler(ctx))));
        self
    }

    /// Receives every lifecycle event on a spawned task.
    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event, Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Some(Arc::new(move |event, client| {
            Box::pin(handler(event, client))
        }));
        self
    }

    /// Called with the ticket and the URL to render as a QR code.
    pub fn on_login_challenge<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.lifecycle.on_login_challenge = Some(Arc::new(callback));
        self
    }

    pub fn on_login_confirmed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.lifecycle.on_login_confirmed = Some(Arc::new(callback));
        self
    }

    pub fn on_logout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LogoutReason) + Send + Sync + 'static,
    {
        self.lifecycle.on_logout = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Bot {
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(UreqHttpClient::new()));
        let dispatcher = Dispatcher::new(self.message_handler, self.config.dispatch_mode);
        let client = Client::new(
            self.config,
            http_client,
            self.storage,
            dispatcher,
            self.ticket,
        );

        if !self.lifecycle.is_empty() {
            client.event_bus.add_handler(Arc::new(self.lifecycle));
        }
        if let Some(event_handler) = self.event_handler {
            client.event_bus.add_handler(Arc::new(BotEventHandler {
                client: Arc::downgrade(&client),
                event_handler,
            }));
        }

        Bot { client }
    }
}
