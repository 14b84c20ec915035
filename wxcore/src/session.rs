use crate::request::BaseRequest;
use crate::sync::SyncCursor;
use crate::urls::Endpoints;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity issued by the establish-session step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub skey: String,
    pub wxsid: String,
    pub wxuin: i64,
    pub pass_ticket: String,
}

/// Name/value cookies collected from `Set-Cookie` headers.
///
/// The web hosts share cookies across `wx*.qq.com` subdomains, so the jar is
/// not scoped by domain or path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Stores the `name=value` pair of one `Set-Cookie` header. Attributes
    /// are ignored; an expired deletion (`Max-Age=0` or empty value) drops
    /// the cookie.
    pub fn store_set_cookie(&mut self, header: &str) {
        let mut parts = header.split(';');
        let Some((name, value)) = parts.next().and_then(|kv| kv.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let deleted = value.trim().is_empty()
            || parts.any(|attr| attr.trim().eq_ignore_ascii_case("max-age=0"));
        if deleted {
            self.cookies.remove(name);
        } else {
            self.cookies
                .insert(name.to_string(), value.trim().to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header, or `None` if the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// The authenticated context every call after login runs against.
///
/// `valid` flips to true once the session has been established and
/// initialised, and back to false when the server rejects it or the user
/// logs out. All fields are plain data so an external store can persist a
/// session and restore it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub credentials: Option<Credentials>,
    pub cookies: CookieJar,
    pub device_id: String,
    pub sync_cursor: SyncCursor,
    /// Web host chosen by the login redirect, e.g. `wx2.qq.com`.
    pub host: Option<String>,
    /// `UserName` of the logged-in account.
    pub self_user_name: Option<String>,
    #[serde(default)]
    pub valid: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            credentials: None,
            cookies: CookieJar::default(),
            device_id: generate_device_id(),
            sync_cursor: SyncCursor::default(),
            host: None,
            self_user_name: None,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn endpoints(&self) -> Option<Endpoints> {
        self.host.as_deref().map(Endpoints::new)
    }

    pub fn base_request(&self) -> Option<BaseRequest> {
        self.credentials.as_ref().map(|c| BaseRequest {
            uin: c.wxuin,
            sid: c.wxsid.clone(),
            skey: c.skey.clone(),
            device_id: self.device_id.clone(),
        })
    }

    /// Drops everything tied to the server-side session, keeping only the
    /// device identifier.
    pub fn reset(&mut self) {
        let device_id = std::mem::take(&mut self.device_id);
        *self = Self {
            device_id,
            ..Self::new()
        };
    }
}

/// `e` followed by fifteen random digits, the shape the web client uses.
pub fn generate_device_id() -> String {
    let mut rng = rand::rng();
    let digits: String = (0..15)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect();
    format!("e{digits}")
}
