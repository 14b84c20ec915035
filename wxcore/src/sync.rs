//! Sync cursor and long-poll signal parsing.

use crate::error::ProtocolError;
use crate::script::assigned_value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `retcode` values with which the sync-check host declares the session dead.
///
/// 1100: logged out from the phone. 1101: signed in elsewhere.
/// 1102: cookies rejected.
pub const SESSION_INVALID_CODES: [i64; 3] = [1100, 1101, 1102];

pub fn is_session_invalid_code(code: i64) -> bool {
    SESSION_INVALID_CODES.contains(&code)
}

/// `BaseResponse.Ret` values that mean the session is gone. Besides the
/// sync-check codes, 1205 is returned once the account was logged out.
pub fn is_session_expired_ret(ret: i64) -> bool {
    is_session_invalid_code(ret) || ret == 1205
}

/// Partitioned sequence numbers that tell the server which events the
/// client has already seen.
///
/// On the wire this is `{"Count": n, "List": [{"Key": k, "Val": v}, ...]}`
/// in JSON bodies and `k_v|k_v|...` in sync-check query strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireSyncKey", into = "WireSyncKey")]
pub struct SyncCursor {
    pairs: Vec<(u32, u64)>,
}

impl SyncCursor {
    pub fn new(pairs: Vec<(u32, u64)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(u32, u64)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: u32) -> Option<u64> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Renders the `synckey` query parameter.
    pub fn to_query(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}_{v}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// The server's partial order: `self` is at or past `other` when every
    /// partition `other` tracks is present here with a value at least as
    /// large.
    pub fn dominates(&self, other: &SyncCursor) -> bool {
        other
            .pairs
            .iter()
            .all(|(k, v)| self.get(*k).is_some_and(|mine| mine >= *v))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
struct WireSyncKey {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    list: Vec<WireSyncPair>,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
struct WireSyncPair {
    key: u32,
    val: u64,
}

impl From<WireSyncKey> for SyncCursor {
    fn from(wire: WireSyncKey) -> Self {
        Self {
            pairs: wire.list.into_iter().map(|p| (p.key, p.val)).collect(),
        }
    }
}

impl From<SyncCursor> for WireSyncKey {
    fn from(cursor: SyncCursor) -> Self {
        Self {
            count: cursor.pairs.len(),
            list: cursor
                .pairs
                .into_iter()
                .map(|(key, val)| WireSyncPair { key, val })
                .collect(),
        }
    }
}

/// What one sync-check long poll told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The hold time elapsed with nothing new.
    Idle,
    /// Something changed; the selector names the event class.
    Events { selector: i64 },
    /// The server no longer accepts this session.
    SessionInvalid { retcode: i64 },
}

/// Parses `window.synccheck={retcode:"0",selector:"2"}`.
pub fn parse_sync_check(body: &str) -> Result<SyncSignal, ProtocolError> {
    let retcode = parse_code(body, "retcode")?;
    if is_session_invalid_code(retcode) {
        return Ok(SyncSignal::SessionInvalid { retcode });
    }
    if retcode != 0 {
        return Err(ProtocolError::InvalidValue {
            field: "retcode",
            value: retcode.to_string(),
        });
    }
    match parse_code(body, "selector")? {
        0 => Ok(SyncSignal::Idle),
        selector => Ok(SyncSignal::Events { selector }),
    }
}

fn parse_code(body: &str, field: &'static str) -> Result<i64, ProtocolError> {
    let raw = assigned_value(body, field).ok_or(ProtocolError::MissingField(field))?;
    raw.parse().map_err(|_| ProtocolError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}
