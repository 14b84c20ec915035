//! The long-poll loop that keeps a session alive and brings in events.

use crate::backoff::Backoff;
use crate::client::Client;
use crate::error::ClientError;
use crate::request::timestamp_ms;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use wxcore::net::HttpRequest;
use wxcore::request::{SyncRequest, SyncResponse, sync_rr};
use wxcore::sync::{SyncSignal, parse_sync_check};
use wxcore::types::contact::{Contact, ContactDelta};
use wxcore::types::events::LogoutReason;
use wxcore::types::message::classify;
use wxcore::urls::with_query;

/// How one sync round ended.
enum RoundOutcome {
    /// Nothing pending; go back to the long poll.
    Idle,
    /// The server has more queued; sync again right away.
    More,
}

enum Step<T> {
    Done(T),
    Stopped,
}

impl Client {
    /// Spawns the sync loop for the current session.
    pub(crate) fn start_sync(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }
        self.shutdown.send_replace(false);
        self.terminated.send_replace(None);

        let client = self.clone();
        let handle = tokio::spawn(async move {
            client.run_sync_loop().await;
        });
        *self
            .sync_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Runs until the session expires, retries run out, or a stop is
    /// requested. Always ends through [`Client::finish_session`].
    async fn run_sync_loop(self: Arc<Self>) {
        info!(target: "Client/Sync", "Sync loop started.");
        let mut backoff = Backoff::new(
            self.config.backoff_base,
            self.config.backoff_cap,
            self.config.max_retries,
        );
        let mut auth_failures = 0u32;
        let mut skip_check = false;

        let reason = loop {
            if self.stop_requested() {
                break LogoutReason::Requested;
            }

            let outcome = match self.until_shutdown(self.sync_round(skip_check)).await {
                Step::Stopped => break LogoutReason::Requested,
                Step::Done(outcome) => outcome,
            };

            let err = match outcome {
                Ok(RoundOutcome::Idle) => {
                    backoff.reset();
                    auth_failures = 0;
                    skip_check = false;
                    continue;
                }
                Ok(RoundOutcome::More) => {
                    backoff.reset();
                    auth_failures = 0;
                    skip_check = true;
                    continue;
                }
                Err(ClientError::SessionExpired { code }) => {
                    warn!(target: "Client/Sync", "Server ended the session (code {code}).");
                    break LogoutReason::SessionExpired { code };
                }
                Err(err) => err,
            };

            match err {
                ClientError::HttpStatus(status) if err.is_auth_failure() => {
                    auth_failures += 1;
                    if auth_failures >= self.config.max_auth_failures {
                        warn!(
                            target: "Client/Sync",
                            "{auth_failures} consecutive auth failures, treating session as expired."
                        );
                        break LogoutReason::SessionExpired {
                            code: i64::from(status),
                        };
                    }
                }
                // Only an unbroken run of 401/403 counts.
                _ => auth_failures = 0,
            }

            skip_check = false;
            let Some(delay) = backoff.next_delay() else {
                error!(
                    target: "Client/Sync",
                    "Giving up after {} consecutive failures: {err}",
                    backoff.failures() - 1
                );
                break LogoutReason::RetriesExhausted {
                    attempts: backoff.failures() - 1,
                    last_error: err.to_string(),
                };
            };
            warn!(
                target: "Client/Sync",
                "Sync failed ({err}), retrying in {delay:?} (failure {})",
                backoff.failures()
            );
            if let Step::Stopped = self.until_shutdown(tokio::time::sleep(delay)).await {
                break LogoutReason::Requested;
            }
        };

        self.finish_session(reason).await;
        info!(target: "Client/Sync", "Sync loop has shut down.");
    }

    /// Drives `fut` unless a stop is requested first.
    async fn until_shutdown<F: std::future::Future>(&self, fut: F) -> Step<F::Output> {
        tokio::select! {
            biased;
            _ = self.wait_for_shutdown() => Step::Stopped,
            out = fut => Step::Done(out),
        }
    }

    async fn sync_round(self: &Arc<Self>, skip_check: bool) -> Result<RoundOutcome, ClientError> {
        if !skip_check {
            match self.sync_check().await? {
                SyncSignal::Idle => return Ok(RoundOutcome::Idle),
                SyncSignal::SessionInvalid { retcode } => {
                    return Err(ClientError::SessionExpired { code: retcode });
                }
                SyncSignal::Events { selector } => {
                    debug!(target: "Client/Sync", "Sync check selector {selector}");
                }
            }
        }

        let response = self.sync_fetch().await?;
        let more = response.continue_flag != 0;
        self.apply_sync_response(response).await;
        Ok(if more {
            RoundOutcome::More
        } else {
            RoundOutcome::Idle
        })
    }

    /// One long poll against the push host.
    pub(crate) async fn sync_check(&self) -> Result<SyncSignal, ClientError> {
        let ctx = self.auth_context().await?;
        let cursor = self.session.read().await.sync_cursor.to_query();
        let url = with_query(
            &ctx.endpoints.sync_check(),
            &[
                ("r", timestamp_ms()),
                ("skey", ctx.base_request.skey.clone()),
                ("sid", ctx.base_request.sid.clone()),
                ("uin", ctx.base_request.uin.to_string()),
                ("deviceid", ctx.base_request.device_id.clone()),
                ("synckey", cursor),
                ("_", timestamp_ms()),
            ],
        );
        let request = HttpRequest::get(url).with_timeout(self.config.sync_check_timeout);
        let body = self.execute(request).await?.body_string();
        Ok(parse_sync_check(&body)?)
    }

    /// Fetches the pending events.
    pub(crate) async fn sync_fetch(&self) -> Result<SyncResponse, ClientError> {
        let ctx = self.auth_context().await?;
        let cursor = self.session.read().await.sync_cursor.clone();
        let url = with_query(
            &ctx.endpoints.sync(),
            &[
                ("sid", ctx.base_request.sid.clone()),
                ("skey", ctx.base_request.skey.clone()),
                ("pass_ticket", ctx.pass_ticket.clone()),
            ],
        );
        let body = SyncRequest {
            base_request: ctx.base_request,
            sync_key: cursor,
            rr: sync_rr(Utc::now().timestamp()),
        };
        self.post_json(url, &body).await
    }

    /// Adopts the new cursor, then routes contact changes and messages, in
    /// that order.
    async fn apply_sync_response(self: &Arc<Self>, response: SyncResponse) {
        if let Some(next) = response.next_cursor() {
            let mut session = self.session.write().await;
            if !next.dominates(&session.sync_cursor) {
                warn!(
                    target: "Client/Sync",
                    "Server cursor {next} does not dominate {}",
                    session.sync_cursor
                );
            }
            session.sync_cursor = next.clone();
        }

        let self_user_name = self.self_user_name().unwrap_or_default();
        let deltas: Vec<ContactDelta> = response
            .mod_contact_list
            .into_iter()
            .map(|raw| ContactDelta::Upsert(Contact::from_raw(raw, Some(&self_user_name))))
            .chain(
                response
                    .del_contact_list
                    .into_iter()
                    .map(|raw| ContactDelta::Remove(raw.user_name)),
            )
            .collect();
        self.apply_contact_deltas(deltas);

        if response.add_msg_list.is_empty() {
            return;
        }
        let batch: Vec<_> = response
            .add_msg_list
            .into_iter()
            .map(|raw| classify(raw, &self_user_name, self.next_receive_index()))
            .collect();
        debug!(target: "Client/Sync", "Dispatching {} messages", batch.len());
        let failures = self.dispatcher.dispatch(self, batch).await;
        if failures > 0 {
            debug!(target: "Client/Sync", "{failures} handler invocations failed in this batch");
        }
    }
}

