use crate::client::Client;
use crate::error::ClientError;
use crate::request::{AuthContext, parse_json_response};
use chrono::Utc;
use log::debug;
use rand::Rng;
use wxcore::ProtocolError;
use wxcore::net::HttpRequest;
use wxcore::request::{UploadMediaRequest, UploadMediaResponse};
use wxcore::urls::with_query;

/// Size of one `webwxuploadmedia` chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 512 * 1024;

const UPLOAD_TYPE_CHUNKED: i32 = 2;
const MEDIA_TYPE_ATTACHMENT: i32 = 4;

/// Media class of an upload, as the upload form names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    fn form_value(self) -> &'static str {
        match self {
            MediaKind::Image => "pic",
            MediaKind::Video => "video",
            MediaKind::File => "doc",
        }
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
    pub file_name: String,
    pub size: u64,
}

impl Client {
    /// Uploads `data` in 512 KiB chunks and returns the media id to send.
    pub async fn upload_media(
        &self,
        to: &str,
        file_name: &str,
        data: Vec<u8>,
        kind: MediaKind,
    ) -> Result<UploadedMedia, ClientError> {
        let ctx = self.auth_context().await?;
        let data_ticket = self
            .session
            .read()
            .await
            .cookies
            .get("webwx_data_ticket")
            .unwrap_or_default()
            .to_string();

        let (data, file_md5) = tokio::task::spawn_blocking(move || {
            let digest = format!("{:x}", md5::compute(&data));
            (data, digest)
        })
        .await
        .map_err(|e| ClientError::Network(e.into()))?;

        let total_len = data.len() as u64;
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&data[..]]
        } else {
            data.chunks(UPLOAD_CHUNK_SIZE).collect()
        };
        let client_media_id = Utc::now().timestamp_millis().unsigned_abs();
        let mime = mime_type(file_name);
        let url = with_query(&ctx.endpoints.upload_media(), &[("f", "json".to_string())]);

        let mut media_id = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let request = UploadMediaRequest {
                upload_type: UPLOAD_TYPE_CHUNKED,
                base_request: ctx.base_request.clone(),
                client_media_id,
                total_len,
                start_pos: 0,
                data_len: total_len,
                media_type: MEDIA_TYPE_ATTACHMENT,
                from_user_name: ctx.self_user_name.clone(),
                to_user_name: to.to_string(),
                file_md5: file_md5.clone(),
            };
            let form = UploadForm {
                ctx: &ctx,
                file_name,
                mime: &mime,
                total_len,
                chunk_index: index,
                chunk_count: chunks.len(),
                kind,
                request_json: serde_json::to_string(&request).map_err(ProtocolError::from)?,
                data_ticket: &data_ticket,
            };
            let boundary = multipart_boundary();
            let body = form.encode(&boundary, chunk);

            debug!(
                target: "Client/Send",
                "Uploading {file_name} chunk {}/{}",
                index + 1,
                chunks.len()
            );
            let response = self
                .execute(
                    HttpRequest::post(url.clone())
                        .with_header(
                            "Content-Type",
                            format!("multipart/form-data; boundary={boundary}"),
                        )
                        .with_body(body),
                )
                .await?;
            let reply: UploadMediaResponse = parse_json_response(&response)?;
            if !reply.media_id.is_empty() {
                media_id = reply.media_id;
            }
        }

        if media_id.is_empty() {
            return Err(ProtocolError::MissingField("MediaId").into());
        }
        Ok(UploadedMedia {
            media_id,
            file_name: file_name.to_string(),
            size: total_len,
        })
    }
}

struct UploadForm<'a> {
    ctx: &'a AuthContext,
    file_name: &'a str,
    mime: &'a str,
    total_len: u64,
    chunk_index: usize,
    chunk_count: usize,
    kind: MediaKind,
    request_json: String,
    data_ticket: &'a str,
}

impl UploadForm<'_> {
    fn encode(&self, boundary: &str, chunk: &[u8]) -> Vec<u8> {
        let mut fields: Vec<(&str, String)> = vec![
            ("id", "WU_FILE_0".to_string()),
            ("name", self.file_name.to_string()),
            ("type", self.mime.to_string()),
            ("lastModifiedDate", Utc::now().to_rfc2822()),
            ("size", self.total_len.to_string()),
        ];
        if self.chunk_count > 1 {
            fields.push(("chunks", self.chunk_count.to_string()));
            fields.push(("chunk", self.chunk_index.to_string()));
        }
        fields.extend([
            ("mediatype", self.kind.form_value().to_string()),
            ("uploadmediarequest", self.request_json.clone()),
            ("webwx_data_ticket", self.data_ticket.to_string()),
            ("pass_ticket", self.ctx.pass_ticket.clone()),
        ]);

        let mut body = Vec::with_capacity(chunk.len() + 1024);
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"filename\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.file_name.replace('"', "_"),
                self.mime
            )
            .as_bytes(),
        );
        body.extend_from_slice(chunk);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }
}

fn multipart_boundary() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..16)
        .map(|_| char::from(b"0123456789abcdef"[rng.random_range(0..16usize)]))
        .collect();
    format!("----WebKitFormBoundary{suffix}")
}

fn mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

/// Extension of `file_name`, used in attachment descriptors.
pub(crate) fn file_extension(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxcore::request::BaseRequest;
    use wxcore::urls::Endpoints;

    fn ctx() -> AuthContext {
        AuthContext {
            base_request: BaseRequest {
                uin: 1,
                sid: "sid".into(),
                skey: "skey".into(),
                device_id: "e000000000000000".into(),
            },
            endpoints: Endpoints::new("wx.qq.com"),
            pass_ticket: "pt".into(),
            self_user_name: "@me".into(),
        }
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_type("a.JPG"), "image/jpeg");
        assert_eq!(mime_type("clip.mp4"), "video/mp4");
        assert_eq!(mime_type("song.mp3"), "audio/mpeg");
        assert_eq!(
            mime_type("doc.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(
            mime_type("sheet.xlsx"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(mime_type("noext"), "application/octet-stream");
        assert_eq!(file_extension("report.final.pdf"), "pdf");
        assert_eq!(file_extension("noext"), "");
    }

    #[test]
    fn form_carries_chunk_fields_only_when_split() {
        let ctx = ctx();
        let mut form = UploadForm {
            ctx: &ctx,
            file_name: "a.png",
            mime: "image/png",
            total_len: 3,
            chunk_index: 0,
            chunk_count: 1,
            kind: MediaKind::Image,
            request_json: "{}".into(),
            data_ticket: "dt",
        };
        let single = String::from_utf8(form.encode("BOUND", b"abc")).unwrap();
        assert!(single.contains("name=\"mediatype\"\r\n\r\npic\r\n"));
        assert!(single.contains("name=\"webwx_data_ticket\"\r\n\r\ndt\r\n"));
        assert!(!single.contains("name=\"chunks\""));
        assert!(single.contains("filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\nabc\r\n--BOUND--\r\n"));

        form.chunk_count = 2;
        form.chunk_index = 1;
        let split = String::from_utf8(form.encode("BOUND", b"c")).unwrap();
        assert!(split.contains("name=\"chunks\"\r\n\r\n2\r\n"));
        assert!(split.contains("name=\"chunk\"\r\n\r\n1\r\n"));
    }
}
