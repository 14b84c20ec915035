use crate::client::Client;
use crate::config::ClientMode;
use crate::error::ClientError;
use crate::request::timestamp_ms;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use wxcore::ProtocolError;
use wxcore::login::{LoginChallenge, LoginInfo, LoginState, LoginStatus, parse_login_status, parse_ticket_response};
use wxcore::net::HttpRequest;
use wxcore::request::{BareRequest, InitResponse, PushLoginResponse, StatusNotifyRequest, StatusNotifyResponse};
use wxcore::types::contact::{Contact, ContactDelta};
use wxcore::types::events::Event;
use wxcore::urls::{self, APP_ID, NEW_LOGIN_PAGE, with_query};

/// `client-version` header of the desktop client.
const DESKTOP_CLIENT_VERSION: &str = "2.0.0";

/// `Code` of the status notification that marks the chat list as opened.
const STATUS_NOTIFY_INITED: i32 = 3;

enum HotLogin {
    /// The saved session is live again.
    Resumed,
    /// The saved session is gone but the phone was asked to confirm this
    /// ticket.
    PushTicket(String),
    Unavailable,
}

impl Client {
    /// Asks the login host for a fresh ticket.
    pub async fn issue_ticket(&self) -> Result<String, ClientError> {
        let redirect_uri = match self.config.mode {
            ClientMode::Normal => NEW_LOGIN_PAGE.to_string(),
            ClientMode::Desktop => format!("{NEW_LOGIN_PAGE}?mod=desktop"),
        };
        let url = with_query(
            &urls::jslogin_url(),
            &[
                ("appid", APP_ID.to_string()),
                ("fun", "new".to_string()),
                ("lang", "zh_CN".to_string()),
                ("redirect_uri", redirect_uri),
                ("_", timestamp_ms()),
            ],
        );
        let body = self.get_text(url).await?;
        let ticket = parse_ticket_response(&body)?;
        debug!(target: "Client/Login", "Issued ticket {ticket}");
        Ok(ticket)
    }

    /// Runs one status check and applies it to `challenge`. On confirmation
    /// the session is established before returning, so the state returned
    /// then is [`LoginState::SessionEstablished`].
    pub async fn poll_status(&self, challenge: &mut LoginChallenge) -> Result<LoginState, ClientError> {
        let url = with_query(
            &urls::login_status_url(),
            &[
                ("loginicon", "true".to_string()),
                ("uuid", challenge.ticket.clone()),
                ("tip", "0".to_string()),
                ("r", (!Utc::now().timestamp()).to_string()),
                ("_", timestamp_ms()),
            ],
        );
        let request = HttpRequest::get(url).with_timeout(self.config.sync_check_timeout);
        let body = self.execute(request).await?.body_string();
        let status = parse_login_status(&body)?;

        let state = challenge
            .apply_status(&status)
            .map_err(ProtocolError::from)?;
        debug!(target: "Client/Login", "Login status {} -> {state:?}", status.code());

        match status {
            LoginStatus::Scanned { avatar } => {
                info!(target: "Client/Login", "Ticket scanned, waiting for confirmation on the phone.");
                self.event_bus.dispatch(&Event::LoginScanned { avatar });
                Ok(state)
            }
            LoginStatus::Confirmed { .. } => {
                info!(target: "Client/Login", "Login confirmed, establishing session.");
                self.establish_session(challenge).await?;
                Ok(challenge.state())
            }
            _ => Ok(state),
        }
    }

    /// Exchanges a confirmed ticket for credentials and initialises the
    /// session.
    async fn establish_session(&self, challenge: &mut LoginChallenge) -> Result<(), ClientError> {
        let redirect = challenge
            .redirect_uri()
            .ok_or(ProtocolError::MissingField("redirect_uri"))?
            .to_string();
        let host = urls::host_of(&redirect)?.to_string();

        let separator = if redirect.contains('?') { '&' } else { '?' };
        let mut request = HttpRequest::get(format!("{redirect}{separator}fun=new&version=v2"));
        if self.config.mode == ClientMode::Desktop {
            request = request.with_header("client-version", DESKTOP_CLIENT_VERSION);
            if let Some(extspam) = &self.config.desktop_extspam {
                request = request.with_header("extspam", extspam.clone());
            }
        }
        let body = self.execute(request).await?.body_string();
        let credentials = LoginInfo::parse(&body)?.into_credentials()?;

        {
            let mut session = self.session.write().await;
            session.credentials = Some(credentials);
            session.host = Some(host);
            session.valid = false;
        }

        self.init_session().await?;
        challenge.establish().map_err(ProtocolError::from)?;
        Ok(())
    }

    /// Loads self user, initial cursor and initial contacts, then marks the
    /// session valid.
    pub(crate) async fn init_session(&self) -> Result<(), ClientError> {
        let ctx = self.pending_auth_context().await?;
        let url = with_query(
            &ctx.endpoints.init(),
            &[
                ("r", (!Utc::now().timestamp()).to_string()),
                ("pass_ticket", ctx.pass_ticket.clone()),
            ],
        );
        let init: InitResponse = self
            .post_json(
                url,
                &BareRequest {
                    base_request: ctx.base_request.clone(),
                },
            )
            .await?;

        let self_user_name = init.user.user_name.clone();
        if self_user_name.is_empty() {
            return Err(ProtocolError::MissingField("User.UserName").into());
        }

        self.contacts.set_self_user_name(&self_user_name);
        let deltas = std::iter::once(init.user)
            .chain(init.contact_list)
            .map(|raw| ContactDelta::Upsert(Contact::from_raw(raw, Some(&self_user_name))));
        let changed = self.contacts.apply_all(deltas);

        {
            let mut session = self.session.write().await;
            session.self_user_name = Some(self_user_name.clone());
            if !init.sync_key.is_empty() {
                session.sync_cursor = init.sync_key;
            }
            session.valid = true;
        }
        info!(
            target: "Client/Login",
            "Session initialised for {self_user_name} with {} contacts.",
            changed.upserted.len()
        );

        if let Err(e) = self.status_notify(&self_user_name).await {
            warn!(target: "Client/Login", "Status notify failed: {e}");
        }
        Ok(())
    }

    async fn status_notify(&self, self_user_name: &str) -> Result<(), ClientError> {
        let ctx = self.auth_context().await?;
        let url = with_query(
            &ctx.endpoints.status_notify(),
            &[
                ("lang", "zh_CN".to_string()),
                ("pass_ticket", ctx.pass_ticket.clone()),
            ],
        );
        let body = StatusNotifyRequest {
            base_request: ctx.base_request,
            code: STATUS_NOTIFY_INITED,
            from_user_name: self_user_name.to_string(),
            to_user_name: self_user_name.to_string(),
            client_msg_id: Utc::now().timestamp_millis().unsigned_abs(),
        };
        let _: StatusNotifyResponse = self.post_json(url, &body).await?;
        Ok(())
    }

    /// Logs in and starts the sync loop.
    ///
    /// Tries, in order: the session held by the configured storage, a ticket
    /// supplied through the builder, a push to the phone of the saved
    /// account, and finally a fresh ticket. Returns once the session is
    /// established, or with [`ClientError::AuthTimeout`] after
    /// `login_timeout`.
    pub async fn login(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_running() {
            return Err(ClientError::AlreadyRunning);
        }
        if self.is_logging_in.swap(true, Ordering::SeqCst) {
            return Err(ClientError::LoginInProgress);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_logging_in.store(false, Ordering::Relaxed);
        });

        let timeout = self.config.login_timeout;
        match tokio::time::timeout(timeout, self.run_login()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target: "Client/Login", "Login not completed within {timeout:?}.");
                return Err(ClientError::AuthTimeout(timeout));
            }
        }

        if let Err(e) = self.refresh_contacts().await {
            warn!(target: "Client/Login", "Full contact fetch failed: {e}");
        }
        self.persist_session().await;

        let session = self.session().await;
        self.event_bus.dispatch(&Event::LoginConfirmed(Box::new(session)));
        self.start_sync()
    }

    async fn run_login(&self) -> Result<(), ClientError> {
        let push_ticket = match self.try_hot_login().await {
            HotLogin::Resumed => return Ok(()),
            HotLogin::PushTicket(ticket) => Some(ticket),
            HotLogin::Unavailable => None,
        };

        let preset = self
            .preset_ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let challenge = match preset.or(push_ticket) {
            Some(ticket) => LoginChallenge::presupplied(ticket),
            None => LoginChallenge::issued(self.issue_ticket().await?),
        };
        self.await_confirmation(challenge).await
    }

    async fn await_confirmation(&self, mut challenge: LoginChallenge) -> Result<(), ClientError> {
        let qr_url = challenge.qr_url();
        info!(target: "Client/Login", "Scan to log in: {qr_url}");
        self.event_bus.dispatch(&Event::LoginChallenge {
            ticket: challenge.ticket.clone(),
            qr_url,
        });
        challenge.mark_displayed();

        loop {
            match self.poll_status(&mut challenge).await? {
                LoginState::SessionEstablished => return Ok(()),
                LoginState::Expired => {
                    let waited = (Utc::now() - challenge.issued_at)
                        .to_std()
                        .unwrap_or_default();
                    info!(target: "Client/Login", "Ticket expired after {waited:?}.");
                    return Err(ClientError::AuthTimeout(waited));
                }
                LoginState::Cancelled => {
                    info!(target: "Client/Login", "Login cancelled on the phone.");
                    return Err(ClientError::LoginCancelled);
                }
                _ => tokio::time::sleep(self.config.login_poll_interval).await,
            }
        }
    }

    async fn try_hot_login(&self) -> HotLogin {
        let Some(storage) = &self.storage else {
            return HotLogin::Unavailable;
        };
        let saved = match storage.load().await {
            Ok(Some(saved)) => saved,
            Ok(None) => return HotLogin::Unavailable,
            Err(e) => {
                warn!(target: "Client/Login", "Could not load saved session: {e}");
                return HotLogin::Unavailable;
            }
        };
        let Some(uin) = saved.credentials.as_ref().map(|c| c.wxuin) else {
            return HotLogin::Unavailable;
        };
        if saved.host.is_none() {
            return HotLogin::Unavailable;
        }

        info!(target: "Client/Login", "Trying saved session.");
        {
            let mut session = self.session.write().await;
            *session = saved;
            session.valid = false;
        }
        match self.init_session().await {
            Ok(()) => {
                info!(target: "Client/Login", "Resumed saved session.");
                return HotLogin::Resumed;
            }
            Err(e) => warn!(target: "Client/Login", "Saved session rejected: {e}"),
        }

        let pushed = self.push_login(uin).await;
        self.session.write().await.reset();
        self.contacts.clear();
        match pushed {
            Ok(ticket) => {
                info!(target: "Client/Login", "Confirmation pushed to the phone.");
                HotLogin::PushTicket(ticket)
            }
            Err(e) => {
                debug!(target: "Client/Login", "Push login unavailable: {e}");
                HotLogin::Unavailable
            }
        }
    }

    /// Asks the phone of account `uin` to confirm a new login, using the
    /// cookies of the previous session. Returns the ticket to poll.
    async fn push_login(&self, uin: i64) -> Result<String, ClientError> {
        let endpoints = self
            .session
            .read()
            .await
            .endpoints()
            .ok_or(ClientError::SessionInvalid)?;
        let url = with_query(&endpoints.push_login(), &[("uin", uin.to_string())]);
        let response = self.execute(HttpRequest::get(url)).await?;
        let reply: PushLoginResponse =
            serde_json::from_slice(&response.body).map_err(ProtocolError::from)?;
        if reply.ret != "0" || reply.uuid.is_empty() {
            return Err(ClientError::Server {
                ret: reply.ret.parse().unwrap_or(-1),
                message: reply.msg,
            });
        }
        Ok(reply.uuid)
    }

    pub(crate) async fn persist_session(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let session = self.session().await;
        if let Err(e) = storage.save(&session).await {
            warn!(target: "Client/Login", "Could not save session: {e}");
        }
    }
}
