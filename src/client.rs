use crate::config::ClientConfig;
use crate::contact::ContactStore;
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::store::SessionStorage;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use wxcore::net::HttpClient;
use wxcore::session::Session;
use wxcore::types::events::{CoreEventBus, Event, LogoutReason};
use wxcore::urls;

pub struct Client {
    pub(crate) session: Arc<RwLock<Session>>,
    pub(crate) config: ClientConfig,
    pub(crate) http_client: Arc<dyn HttpClient>,
    pub(crate) storage: Option<Arc<dyn SessionStorage>>,

    pub(crate) contacts: ContactStore,
    pub(crate) dispatcher: Dispatcher,
    pub event_bus: CoreEventBus,

    /// Ticket handed in by the host instead of requesting one.
    pub(crate) preset_ticket: Mutex<Option<String>>,

    pub(crate) is_running: AtomicBool,
    pub(crate) is_logging_in: AtomicBool,
    /// Flipped to true to stop the sync loop.
    pub(crate) shutdown: watch::Sender<bool>,
    /// Set once the session ended, with the reason.
    pub(crate) terminated: watch::Sender<Option<LogoutReason>>,
    pub(crate) sync_handle: Mutex<Option<JoinHandle<()>>>,

    /// Receive order of messages across batches.
    pub(crate) received_count: AtomicU64,
}

impl Client {
    pub(crate) fn new(
        config: ClientConfig,
        http_client: Arc<dyn HttpClient>,
        storage: Option<Arc<dyn SessionStorage>>,
        dispatcher: Dispatcher,
        preset_ticket: Option<String>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let (terminated, _) = watch::channel(None);
        Arc::new(Self {
            session: Arc::new(RwLock::new(Session::new())),
            config,
            http_client,
            storage,
            contacts: ContactStore::new(),
            dispatcher,
            event_bus: CoreEventBus::new(),
            preset_ticket: Mutex::new(preset_ticket),
            is_running: AtomicBool::new(false),
            is_logging_in: AtomicBool::new(false),
            shutdown,
            terminated,
            sync_handle: Mutex::new(None),
            received_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A copy of the current session.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_valid()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    /// `UserName` of the logged-in account, once known.
    pub fn self_user_name(&self) -> Option<String> {
        self.contacts.self_user_name()
    }

    /// Message handler invocations that returned an error or panicked.
    pub fn handler_failures(&self) -> usize {
        self.dispatcher.handler_failures()
    }

    /// Why the last session ended, if it has.
    pub fn termination_reason(&self) -> Option<LogoutReason> {
        self.terminated.borrow().clone()
    }

    /// Waits until the session ends and returns the reason.
    ///
    /// Returns `None` right away if no session is running, so a caller that
    /// blocks after a failed login does not hang.
    pub async fn block(&self) -> Option<LogoutReason> {
        let mut rx = self.terminated.subscribe();
        if rx.borrow().is_none() && !self.is_running() {
            return None;
        }
        rx.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|reason| reason.clone())
    }

    /// Resolves once a stop was requested.
    pub(crate) async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Ends the session: tells the server (best effort), stops the sync
    /// loop and waits for it to finish. Safe to call from inside a message
    /// handler.
    pub async fn logout(&self) -> Result<(), ClientError> {
        info!(target: "Client", "Logging out.");
        if let Err(e) = self.notify_logout().await {
            warn!(target: "Client", "Logout request failed: {e}");
        }

        self.shutdown.send_replace(true);
        let handle = self
            .sync_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(target: "Client", "Sync task ended abnormally: {e}");
            }
        } else {
            debug!(target: "Client", "No sync loop running.");
        }

        if let Some(storage) = &self.storage {
            storage.clear().await?;
        }
        Ok(())
    }

    async fn notify_logout(&self) -> Result<(), ClientError> {
        let (endpoints, skey, form) = {
            let session = self.session.read().await;
            let (Some(endpoints), Some(creds)) = (session.endpoints(), session.credentials.as_ref())
            else {
                return Ok(());
            };
            if !session.is_valid() {
                return Ok(());
            }
            let form = format!(
                "sid={}&uin={}",
                urlencoding::encode(&creds.wxsid),
                creds.wxuin
            );
            (endpoints, creds.skey.clone(), form)
        };
        let url = urls::with_query(
            &endpoints.logout(),
            &[
                ("redirect", "1".to_string()),
                ("type", "1".to_string()),
                ("skey", skey),
            ],
        );
        let request = wxcore::net::HttpRequest::post(url)
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(form.into_bytes());
        // The endpoint answers with a redirect page; any reply will do.
        match self.execute(request).await {
            Ok(_) | Err(ClientError::HttpStatus(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Marks the session dead, fires `LoggedOut`, then wakes `block()`
    /// callers. Called once, by the sync loop as it exits.
    pub(crate) async fn finish_session(&self, reason: LogoutReason) {
        self.session.write().await.valid = false;
        info!(target: "Client", "Session ended: {reason}");
        self.event_bus.dispatch(&Event::LoggedOut(reason.clone()));
        self.terminated.send_replace(Some(reason));
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub(crate) fn next_receive_index(&self) -> u64 {
        self.received_count.fetch_add(1, Ordering::Relaxed)
    }
}
