use crate::client::Client;
use crate::error::ClientError;
use chrono::Utc;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use wxcore::ProtocolError;
use wxcore::net::{HttpRequest, HttpResponse};
use wxcore::request::{BaseRequest, HasBaseResponse};
use wxcore::sync::is_session_expired_ret;
use wxcore::urls::Endpoints;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// What an authenticated call needs, copied out of the session so the lock
/// is not held across the request.
#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub base_request: BaseRequest,
    pub endpoints: Endpoints,
    pub pass_ticket: String,
    pub self_user_name: String,
}

/// Milliseconds since the epoch, the cache-buster most endpoints expect.
pub(crate) fn timestamp_ms() -> String {
    Utc::now().timestamp_millis().to_string()
}

impl Client {
    /// Sends a request with the session cookies attached and stores any
    /// cookies the reply sets. Non-2xx replies become
    /// [`ClientError::HttpStatus`].
    pub(crate) async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ClientError> {
        if let Some(cookie) = self.session.read().await.cookies.header_value() {
            request = request.with_header("Cookie", cookie);
        }
        if !request.headers.contains_key("User-Agent") {
            request = request.with_header("User-Agent", USER_AGENT);
        }
        if request.timeout.is_none() {
            request.timeout = Some(self.config.request_timeout);
        }

        debug!(target: "Client/Http", "{} {}", request.method, request.url);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(ClientError::Network)?;

        let set_cookies: Vec<String> = response
            .header_values("set-cookie")
            .map(str::to_string)
            .collect();
        if !set_cookies.is_empty() {
            let mut session = self.session.write().await;
            for header in &set_cookies {
                session.cookies.store_set_cookie(header);
            }
        }

        if !response.is_success() {
            return Err(ClientError::HttpStatus(response.status_code));
        }
        Ok(response)
    }

    pub(crate) async fn get_text(&self, url: String) -> Result<String, ClientError> {
        Ok(self.execute(HttpRequest::get(url)).await?.body_string())
    }

    pub(crate) async fn get_json<Resp>(&self, url: String) -> Result<Resp, ClientError>
    where
        Resp: DeserializeOwned + HasBaseResponse,
    {
        let response = self.execute(HttpRequest::get(url)).await?;
        parse_json_response(&response)
    }

    pub(crate) async fn post_json<Req, Resp>(&self, url: String, body: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + HasBaseResponse,
    {
        let body = serde_json::to_vec(body).map_err(ProtocolError::from)?;
        let response = self
            .execute(HttpRequest::post(url).with_json_body(body))
            .await?;
        parse_json_response(&response)
    }

    /// Copies out what an authenticated call needs, or fails with
    /// [`ClientError::SessionInvalid`] when there is no live session.
    pub(crate) async fn auth_context(&self) -> Result<AuthContext, ClientError> {
        let session = self.session.read().await;
        if !session.is_valid() {
            return Err(ClientError::SessionInvalid);
        }
        self.auth_context_of(&session)
    }

    /// Like [`Client::auth_context`], without requiring the session to be
    /// marked valid. Used while the session is still being initialised.
    pub(crate) async fn pending_auth_context(&self) -> Result<AuthContext, ClientError> {
        let session = self.session.read().await;
        self.auth_context_of(&session)
    }

    fn auth_context_of(&self, session: &wxcore::session::Session) -> Result<AuthContext, ClientError> {
        let (Some(base_request), Some(endpoints), Some(creds)) = (
            session.base_request(),
            session.endpoints(),
            session.credentials.as_ref(),
        ) else {
            return Err(ClientError::SessionInvalid);
        };
        Ok(AuthContext {
            base_request,
            endpoints,
            pass_ticket: creds.pass_ticket.clone(),
            self_user_name: session.self_user_name.clone().unwrap_or_default(),
        })
    }
}

/// Decodes a JSON reply and maps a non-zero `BaseResponse.Ret`.
pub(crate) fn parse_json_response<Resp>(response: &HttpResponse) -> Result<Resp, ClientError>
where
    Resp: DeserializeOwned + HasBaseResponse,
{
    let parsed: Resp = serde_json::from_slice(&response.body).map_err(ProtocolError::from)?;
    check_base_response(parsed)
}

pub(crate) fn check_base_response<Resp: HasBaseResponse>(resp: Resp) -> Result<Resp, ClientError> {
    let base = resp.base_response();
    if base.is_ok() {
        return Ok(resp);
    }
    if is_session_expired_ret(base.ret) {
        return Err(ClientError::SessionExpired { code: base.ret });
    }
    Err(ClientError::Server {
        ret: base.ret,
        message: base.err_msg.clone(),
    })
}
