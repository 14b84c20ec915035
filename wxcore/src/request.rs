//! JSON bodies of the authenticated `webwx*` endpoints.
//!
//! Field names follow the wire format (PascalCase, a few oddities such as
//! `DeviceID` and `MsgID`). Response structs default every field so that
//! partially filled replies still deserialize; absence is checked by the
//! caller where it matters.

use crate::sync::SyncCursor;
use crate::types::contact::RawContact;
use crate::types::message::RawMessage;
use serde::{Deserialize, Serialize};

/// Identity block every authenticated POST carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseRequest {
    pub uin: i64,
    pub sid: String,
    pub skey: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseResponse {
    pub ret: i64,
    pub err_msg: String,
}

impl BaseResponse {
    pub fn is_ok(&self) -> bool {
        self.ret == 0
    }
}

/// Responses that carry a `BaseResponse` status block.
pub trait HasBaseResponse {
    fn base_response(&self) -> &BaseResponse;
}

macro_rules! impl_has_base_response {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasBaseResponse for $ty {
                fn base_response(&self) -> &BaseResponse {
                    &self.base_response
                }
            }
        )*
    };
}

impl_has_base_response!(
    InitResponse,
    ContactListResponse,
    BatchGetContactResponse,
    SyncResponse,
    SendMsgResponse,
    StatusNotifyResponse,
    OplogResponse,
    RevokeResponse,
    UploadMediaResponse,
);

/// Body of requests that need nothing besides the identity block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BareRequest {
    pub base_request: BaseRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitResponse {
    pub base_response: BaseResponse,
    pub user: RawContact,
    pub sync_key: SyncCursor,
    pub contact_list: Vec<RawContact>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusNotifyRequest {
    pub base_request: BaseRequest,
    pub code: i32,
    pub from_user_name: String,
    pub to_user_name: String,
    pub client_msg_id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatusNotifyResponse {
    pub base_response: BaseResponse,
}

/// One page of the full contact list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContactListResponse {
    pub base_response: BaseResponse,
    pub member_count: usize,
    pub member_list: Vec<RawContact>,
    /// Cursor of the next page; 0 when this was the last one.
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetContactRequest {
    pub base_request: BaseRequest,
    pub count: usize,
    pub list: Vec<BatchContactQuery>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchContactQuery {
    pub user_name: String,
    /// Group the user is looked up in; empty for plain contacts.
    pub encry_chat_room_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BatchGetContactResponse {
    pub base_response: BaseResponse,
    pub count: usize,
    pub contact_list: Vec<RawContact>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncRequest {
    pub base_request: BaseRequest,
    pub sync_key: SyncCursor,
    /// Bitwise complement of the current unix time, as the web client sends.
    #[serde(rename = "rr")]
    pub rr: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SyncResponse {
    pub base_response: BaseResponse,
    pub add_msg_count: usize,
    pub add_msg_list: Vec<RawMessage>,
    pub mod_contact_count: usize,
    pub mod_contact_list: Vec<RawContact>,
    pub del_contact_count: usize,
    pub del_contact_list: Vec<RawContact>,
    pub sync_key: SyncCursor,
    /// Newer cursor used by some hosts in place of `SyncKey`.
    pub sync_check_key: SyncCursor,
    /// Non-zero when more events are queued and the next round should sync
    /// again without waiting on the long poll.
    pub continue_flag: i32,
}

impl SyncResponse {
    /// The cursor to adopt after this batch, if the server sent one.
    ///
    /// `SyncCheckKey` wins because it holds every key of `SyncKey` plus the
    /// ones only the long poll tracks, and `webwxsync` accepts it as well, so
    /// a single cursor serves both requests.
    pub fn next_cursor(&self) -> Option<&SyncCursor> {
        [&self.sync_check_key, &self.sync_key]
            .into_iter()
            .find(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendMsgRequest {
    pub base_request: BaseRequest,
    pub msg: OutgoingMessage,
    pub scene: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutgoingMessage {
    #[serde(rename = "Type")]
    pub msg_type: i32,
    pub content: String,
    pub from_user_name: String,
    pub to_user_name: String,
    #[serde(rename = "LocalID")]
    pub local_id: String,
    pub client_msg_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SendMsgResponse {
    pub base_response: BaseResponse,
    #[serde(rename = "MsgID")]
    pub msg_id: String,
    #[serde(rename = "LocalID")]
    pub local_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevokeRequest {
    pub base_request: BaseRequest,
    pub client_msg_id: String,
    pub svr_msg_id: String,
    pub to_user_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RevokeResponse {
    pub base_response: BaseResponse,
    pub introduction: String,
    pub sys_wording: String,
}

/// Contact mutation commands of `webwxoplog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OplogCommand {
    SetRemark,
    SetPinned(bool),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OplogRequest {
    pub base_request: BaseRequest,
    pub cmd_id: i32,
    #[serde(rename = "OP", skip_serializing_if = "Option::is_none")]
    pub op: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark_name: Option<String>,
    pub user_name: String,
}

impl OplogRequest {
    pub fn new(base_request: BaseRequest, user_name: impl Into<String>, command: OplogCommand) -> Self {
        let (cmd_id, op) = match command {
            OplogCommand::SetRemark => (2, None),
            OplogCommand::SetPinned(pinned) => (3, Some(i32::from(pinned))),
        };
        Self {
            base_request,
            cmd_id,
            op,
            remark_name: None,
            user_name: user_name.into(),
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark_name = Some(remark.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OplogResponse {
    pub base_response: BaseResponse,
}

/// JSON carried in the `uploadmediarequest` form field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadMediaRequest {
    pub upload_type: i32,
    pub base_request: BaseRequest,
    pub client_media_id: u64,
    pub total_len: u64,
    pub start_pos: u64,
    pub data_len: u64,
    pub media_type: i32,
    pub from_user_name: String,
    pub to_user_name: String,
    pub file_md5: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UploadMediaResponse {
    pub base_response: BaseResponse,
    pub media_id: String,
    pub start_pos: u64,
}

/// Reply of `webwxpushloginurl`. Unlike the rest, keys are lowercase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushLoginResponse {
    pub ret: String,
    pub msg: String,
    pub uuid: String,
}

/// Bitwise complement of the unix time in seconds, the `rr` the web client
/// sends with sync requests.
pub fn sync_rr(now_secs: i64) -> i64 {
    !now_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseRequest {
        BaseRequest {
            uin: 42,
            sid: "sid".into(),
            skey: "@crypt_k".into(),
            device_id: "e123456789012345".into(),
        }
    }

    #[test]
    fn base_request_uses_wire_names() {
        let json = serde_json::to_value(BareRequest { base_request: base() }).unwrap();
        assert_eq!(json["BaseRequest"]["Uin"], 42);
        assert_eq!(json["BaseRequest"]["DeviceID"], "e123456789012345");
        assert_eq!(json["BaseRequest"]["Skey"], "@crypt_k");
    }

    #[test]
    fn oplog_pin_body() {
        let req = OplogRequest::new(base(), "@abc", OplogCommand::SetPinned(true));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["CmdId"], 3);
        assert_eq!(json["OP"], 1);
        assert!(json.get("RemarkName").is_none());

        let req = OplogRequest::new(base(), "@abc", OplogCommand::SetRemark).with_remark("Bob");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["CmdId"], 2);
        assert!(json.get("OP").is_none());
        assert_eq!(json["RemarkName"], "Bob");
    }

    #[test]
    fn sync_response_prefers_check_key() {
        let body = r#"{
            "BaseResponse": {"Ret": 0, "ErrMsg": ""},
            "AddMsgCount": 0, "AddMsgList": [],
            "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 5}]},
            "SyncCheckKey": {"Count": 1, "List": [{"Key": 1, "Val": 6}]},
            "ContinueFlag": 0
        }"#;
        let resp: SyncResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.next_cursor().unwrap().get(1), Some(6));

        let empty: SyncResponse = serde_json::from_str(r#"{"BaseResponse":{"Ret":0}}"#).unwrap();
        assert!(empty.next_cursor().is_none());
    }

    #[test]
    fn outgoing_message_omits_missing_media() {
        let msg = OutgoingMessage {
            msg_type: 1,
            content: "pong".into(),
            from_user_name: "@me".into(),
            to_user_name: "@u1".into(),
            local_id: "1".into(),
            client_msg_id: "1".into(),
            media_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Type"], 1);
        assert_eq!(json["LocalID"], "1");
        assert!(json.get("MediaId").is_none());
    }
}
