use crate::client::Client;
use crate::error::ClientError;
use crate::request::AuthContext;
use crate::upload::{MediaKind, UploadedMedia, file_extension};
use chrono::Utc;
use log::{debug, info};
use quick_xml::escape::escape;
use rand::Rng;
use wxcore::request::{OutgoingMessage, RevokeRequest, RevokeResponse, SendMsgRequest, SendMsgResponse};
use wxcore::types::message::{MSG_TYPE_IMAGE, MSG_TYPE_TEXT, MSG_TYPE_VIDEO};
use wxcore::urls::with_query;

/// `Type` of an app message carrying a file attachment.
const MSG_TYPE_FILE_ATTACHMENT: i32 = 6;
/// App id the web client stamps on attachment descriptors.
const WEB_APP_ID: &str = "wxeb7ec651dd0aefa9";

/// Special account that forwards messages to the user's own devices.
pub const FILE_HELPER: &str = "filehelper";

/// Ids of a message the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Server-side id, needed to revoke the message.
    pub msg_id: String,
    /// Id we generated for it.
    pub local_id: String,
    pub to: String,
}

/// Millisecond timestamp followed by four random digits, the shape the web
/// client uses for `LocalID` and `ClientMsgId`.
pub(crate) fn generate_local_id() -> String {
    let millis = Utc::now().timestamp_millis().unsigned_abs();
    let suffix: u64 = rand::rng().random_range(0..10_000);
    (millis * 10_000 + suffix).to_string()
}

enum Route {
    Text,
    Image,
    Video,
    App,
}

impl Client {
    pub async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, ClientError> {
        let ctx = self.send_context(to).await?;
        let msg = outgoing(&ctx, to, MSG_TYPE_TEXT, text.to_string(), None);
        self.post_message(&ctx, Route::Text, msg).await
    }

    pub async fn send_image(
        &self,
        to: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<SentMessage, ClientError> {
        let ctx = self.send_context(to).await?;
        let media = self.upload_media(to, file_name, data, MediaKind::Image).await?;
        let msg = outgoing(&ctx, to, MSG_TYPE_IMAGE, String::new(), Some(media.media_id));
        self.post_message(&ctx, Route::Image, msg).await
    }

    pub async fn send_video(
        &self,
        to: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<SentMessage, ClientError> {
        let ctx = self.send_context(to).await?;
        let media = self.upload_media(to, file_name, data, MediaKind::Video).await?;
        let msg = outgoing(&ctx, to, MSG_TYPE_VIDEO, String::new(), Some(media.media_id));
        self.post_message(&ctx, Route::Video, msg).await
    }

    /// Sends any file as an attachment.
    pub async fn send_file(
        &self,
        to: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<SentMessage, ClientError> {
        let ctx = self.send_context(to).await?;
        let media = self.upload_media(to, file_name, data, MediaKind::File).await?;
        let content = attachment_descriptor(&media);
        let msg = outgoing(&ctx, to, MSG_TYPE_FILE_ATTACHMENT, content, None);
        self.post_message(&ctx, Route::App, msg).await
    }

    /// Withdraws a message sent earlier.
    pub async fn revoke(&self, sent: &SentMessage) -> Result<(), ClientError> {
        let ctx = self.send_context(&sent.to).await?;
        let body = RevokeRequest {
            base_request: ctx.base_request.clone(),
            client_msg_id: sent.local_id.clone(),
            svr_msg_id: sent.msg_id.clone(),
            to_user_name: sent.to.clone(),
        };
        let _: RevokeResponse = self.post_json(ctx.endpoints.revoke_msg(), &body).await?;
        info!(target: "Client/Send", "Revoked message {} to {}", sent.msg_id, sent.to);
        Ok(())
    }

    /// Checks the target and the session before anything goes out.
    async fn send_context(&self, to: &str) -> Result<AuthContext, ClientError> {
        if to.trim().is_empty() {
            return Err(ClientError::InvalidTarget(to.to_string()));
        }
        let ctx = self.auth_context().await?;
        if to != FILE_HELPER && !self.contacts.contains(to) {
            return Err(ClientError::InvalidTarget(to.to_string()));
        }
        Ok(ctx)
    }

    async fn post_message(
        &self,
        ctx: &AuthContext,
        route: Route,
        msg: OutgoingMessage,
    ) -> Result<SentMessage, ClientError> {
        let pass_ticket = ("pass_ticket", ctx.pass_ticket.clone());
        let url = match route {
            Route::Text => with_query(&ctx.endpoints.send_msg(), &[pass_ticket]),
            Route::Image => with_query(&ctx.endpoints.send_msg_img(), &async_json(pass_ticket)),
            Route::Video => with_query(&ctx.endpoints.send_video_msg(), &async_json(pass_ticket)),
            Route::App => with_query(&ctx.endpoints.send_app_msg(), &async_json(pass_ticket)),
        };
        let to = msg.to_user_name.clone();
        let local_id = msg.local_id.clone();
        let msg_type = msg.msg_type;

        let body = SendMsgRequest {
            base_request: ctx.base_request.clone(),
            msg,
            scene: 0,
        };
        let reply: SendMsgResponse = self.post_json(url, &body).await?;
        debug!(target: "Client/Send", "Sent type {msg_type} to {to} as {}", reply.msg_id);
        Ok(SentMessage {
            msg_id: reply.msg_id,
            local_id: if reply.local_id.is_empty() {
                local_id
            } else {
                reply.local_id
            },
            to,
        })
    }
}

fn async_json(pass_ticket: (&'static str, String)) -> [(&'static str, String); 3] {
    [
        ("fun", "async".to_string()),
        ("f", "json".to_string()),
        pass_ticket,
    ]
}

fn outgoing(
    ctx: &AuthContext,
    to: &str,
    msg_type: i32,
    content: String,
    media_id: Option<String>,
) -> OutgoingMessage {
    let local_id = generate_local_id();
    OutgoingMessage {
        msg_type,
        content,
        from_user_name: ctx.self_user_name.clone(),
        to_user_name: to.to_string(),
        client_msg_id: local_id.clone(),
        local_id,
        media_id,
    }
}

fn attachment_descriptor(media: &UploadedMedia) -> String {
    format!(
        "<appmsg appid='{WEB_APP_ID}' sdkver=''><title>{}</title><des></des><action></action>\
         <type>{MSG_TYPE_FILE_ATTACHMENT}</type><content></content><url></url><lowurl></lowurl>\
         <appattach><totallen>{}</totallen><attachid>{}</attachid><fileext>{}</fileext></appattach>\
         <extinfo></extinfo></appmsg>",
        escape(&media.file_name),
        media.size,
        media.media_id,
        escape(file_extension(&media.file_name)),
    )
}
