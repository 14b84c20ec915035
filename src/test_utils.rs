//! Scripted transport for driving a [`Client`](crate::Client) without a
//! network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use wxcore::net::{HttpClient, HttpRequest, HttpResponse};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(HttpResponse),
    /// A transport failure (connection refused, reset, ...).
    Error(String),
    /// Never answers, like a long poll the server keeps open.
    Hold,
}

impl MockReply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        MockReply::Response(HttpResponse::new(200, body))
    }

    pub fn status(code: u16) -> Self {
        MockReply::Response(HttpResponse::new(code, Vec::new()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        MockReply::Error(message.into())
    }

    /// Adds a `Set-Cookie` header to a scripted response.
    pub fn with_cookie(self, cookie: &str) -> Self {
        match self {
            MockReply::Response(response) => {
                MockReply::Response(response.with_header("Set-Cookie", cookie))
            }
            other => other,
        }
    }
}

/// A request the mock received and when.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn body_string(&self) -> String {
        self.request
            .body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Route {
    queue: VecDeque<MockReply>,
    fallback: Option<MockReply>,
}

#[derive(Default)]
struct MockState {
    routes: HashMap<String, Route>,
    requests: Vec<RecordedRequest>,
}

/// Answers requests by URL substring. When several registered patterns
/// match, the longest one wins. Queued replies are used first, then the
/// route's fallback; an unmatched request gets a 404.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    state: Arc<Mutex<MockState>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Queues a reply for requests whose URL contains `pattern`.
    pub fn push(&self, pattern: &str, reply: MockReply) -> &Self {
        self.with_state(|s| {
            s.routes
                .entry(pattern.to_string())
                .or_default()
                .queue
                .push_back(reply)
        });
        self
    }

    /// Reply used for `pattern` once its queue is empty.
    pub fn fallback(&self, pattern: &str, reply: MockReply) -> &Self {
        self.with_state(|s| {
            s.routes.entry(pattern.to_string()).or_default().fallback = Some(reply);
        });
        self
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_state(|s| s.requests.clone())
    }

    /// Requests whose URL contains `pattern`.
    pub fn requests_to(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|r| r.request.url.contains(pattern))
                .cloned()
                .collect()
        })
    }

    fn next_reply(&self, request: HttpRequest) -> MockReply {
        self.with_state(|s| {
            let url = request.url.clone();
            s.requests.push(RecordedRequest {
                request,
                at: Instant::now(),
            });
            let Some(route) = s
                .routes
                .iter_mut()
                .filter(|(pattern, _)| url.contains(pattern.as_str()))
                .max_by_key(|(pattern, _)| pattern.len())
                .map(|(_, route)| route)
            else {
                return MockReply::status(404);
            };
            route
                .queue
                .pop_front()
                .or_else(|| route.fallback.clone())
                .unwrap_or_else(|| MockReply::status(404))
        })
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        match self.next_reply(request) {
            MockReply::Response(response) => Ok(response),
            MockReply::Error(message) => Err(anyhow::anyhow!(message)),
            MockReply::Hold => std::future::pending().await,
        }
    }
}

/// URL fragments of the endpoints tests usually script.
pub mod routes {
    pub const JSLOGIN: &str = "/jslogin";
    pub const LOGIN_STATUS: &str = "mmwebwx-bin/login?";
    pub const NEW_LOGIN_PAGE: &str = "mmwebwx-bin/webwxnewloginpage";
    pub const INIT: &str = "webwxinit";
    pub const STATUS_NOTIFY: &str = "webwxstatusnotify";
    pub const GET_CONTACT: &str = "webwxgetcontact";
    pub const SYNC_CHECK: &str = "synccheck";
    pub const SYNC: &str = "webwxsync";
    pub const SEND_MSG: &str = "webwxsendmsg?";
    pub const OPLOG: &str = "webwxoplog";
    pub const LOGOUT: &str = "webwxlogout";
}

/// Reply bodies in the shapes the web host produces.
pub mod bodies {
    use serde_json::json;

    pub fn ticket(ticket: &str) -> String {
        format!(r#"window.QRLogin.code = 200; window.QRLogin.uuid = "{ticket}";"#)
    }

    pub fn login_status(code: i32) -> String {
        format!("window.code={code};")
    }

    pub fn login_confirmed(host: &str) -> String {
        format!(
            "window.code=200;\nwindow.redirect_uri=\"https://{host}/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U&lang=zh_CN&scan=1\";"
        )
    }

    pub fn login_info() -> String {
        "<error><ret>0</ret><message></message><skey>@crypt_skey</skey><wxsid>wxsid</wxsid>\
         <wxuin>10001</wxuin><pass_ticket>pass%2Bticket</pass_ticket><isgrayscale>1</isgrayscale></error>"
            .to_string()
    }

    pub fn ok() -> String {
        json!({ "BaseResponse": { "Ret": 0, "ErrMsg": "" } }).to_string()
    }

    pub fn base_error(ret: i64) -> String {
        json!({ "BaseResponse": { "Ret": ret, "ErrMsg": "" } }).to_string()
    }

    pub fn cursor(pairs: &[(u32, u64)]) -> serde_json::Value {
        json!({
            "Count": pairs.len(),
            "List": pairs
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Val": v }))
                .collect::<Vec<_>>(),
        })
    }

    pub fn contact(user_name: &str, nick_name: &str) -> serde_json::Value {
        json!({ "UserName": user_name, "NickName": nick_name, "ContactFlag": 1, "VerifyFlag": 0 })
    }

    /// `webwxinit` reply for account `self_user_name` with the given friends.
    pub fn init(self_user_name: &str, friends: &[(&str, &str)], cursor: &[(u32, u64)]) -> String {
        json!({
            "BaseResponse": { "Ret": 0, "ErrMsg": "" },
            "User": contact(self_user_name, "me"),
            "SyncKey": self::cursor(cursor),
            "ContactList": friends
                .iter()
                .map(|(u, n)| contact(u, n))
                .collect::<Vec<_>>(),
        })
        .to_string()
    }

    pub fn contact_page(members: &[(&str, &str)]) -> String {
        json!({
            "BaseResponse": { "Ret": 0, "ErrMsg": "" },
            "MemberCount": members.len(),
            "MemberList": members.iter().map(|(u, n)| contact(u, n)).collect::<Vec<_>>(),
            "Seq": 0,
        })
        .to_string()
    }

    pub fn sync_check(retcode: i64, selector: i64) -> String {
        format!(r#"window.synccheck={{retcode:"{retcode}",selector:"{selector}"}}"#)
    }

    pub fn text_message(msg_id: &str, from: &str, to: &str, content: &str) -> serde_json::Value {
        json!({
            "MsgId": msg_id,
            "NewMsgId": 0,
            "FromUserName": from,
            "ToUserName": to,
            "MsgType": 1,
            "Content": content,
            "CreateTime": 1_700_000_000,
        })
    }

    pub fn sync(messages: Vec<serde_json::Value>, cursor: &[(u32, u64)]) -> String {
        json!({
            "BaseResponse": { "Ret": 0, "ErrMsg": "" },
            "AddMsgCount": messages.len(),
            "AddMsgList": messages,
            "ModContactCount": 0,
            "ModContactList": [],
            "DelContactCount": 0,
            "DelContactList": [],
            "SyncKey": self::cursor(cursor),
            "SyncCheckKey": self::cursor(cursor),
            "ContinueFlag": 0,
        })
        .to_string()
    }

    pub fn sent(msg_id: &str) -> String {
        json!({
            "BaseResponse": { "Ret": 0, "ErrMsg": "" },
            "MsgID": msg_id,
            "LocalID": "",
        })
        .to_string()
    }
}
