//! Endpoint URLs of the web protocol.

use crate::error::ProtocolError;

pub const APP_ID: &str = "wx782c26e4c19acffb";
pub const LOGIN_HOST: &str = "https://login.wx.qq.com";
pub const QR_CODE_URL: &str = "https://login.weixin.qq.com/qrcode/";
/// Page the login host redirects to once a ticket is confirmed.
pub const NEW_LOGIN_PAGE: &str = "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage";

const CGI_PATH: &str = "/cgi-bin/mmwebwx-bin";

/// Appends `params` to `url` as a percent-encoded query string.
pub fn with_query(url: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

/// URL the host renders as a QR code for the given ticket.
pub fn qr_code_url(ticket: &str) -> String {
    format!("{QR_CODE_URL}{ticket}")
}

pub fn jslogin_url() -> String {
    format!("{LOGIN_HOST}/jslogin")
}

pub fn login_status_url() -> String {
    format!("{LOGIN_HOST}{CGI_PATH}/login")
}

/// Extracts the host (`wx2.qq.com`) from an absolute URL.
pub fn host_of(url: &str) -> Result<&str, ProtocolError> {
    let invalid = || ProtocolError::InvalidValue {
        field: "redirect_uri",
        value: url.to_string(),
    };
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).ok_or_else(invalid)?;
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(invalid)?;
    Ok(host)
}

/// URLs that live on the web host picked by the login redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    host: String,
}

impl Endpoints {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn cgi(&self, name: &str) -> String {
        format!("https://{}{CGI_PATH}/{name}", self.host)
    }

    pub fn init(&self) -> String {
        self.cgi("webwxinit")
    }

    pub fn status_notify(&self) -> String {
        self.cgi("webwxstatusnotify")
    }

    pub fn get_contact(&self) -> String {
        self.cgi("webwxgetcontact")
    }

    pub fn batch_get_contact(&self) -> String {
        self.cgi("webwxbatchgetcontact")
    }

    /// The long poll lives on a dedicated push subdomain.
    pub fn sync_check(&self) -> String {
        format!("https://webpush.{}{CGI_PATH}/synccheck", self.host)
    }

    pub fn sync(&self) -> String {
        self.cgi("webwxsync")
    }

    pub fn send_msg(&self) -> String {
        self.cgi("webwxsendmsg")
    }

    pub fn send_msg_img(&self) -> String {
        self.cgi("webwxsendmsgimg")
    }

    pub fn send_app_msg(&self) -> String {
        self.cgi("webwxsendappmsg")
    }

    pub fn send_video_msg(&self) -> String {
        self.cgi("webwxsendvideomsg")
    }

    pub fn revoke_msg(&self) -> String {
        self.cgi("webwxrevokemsg")
    }

    pub fn upload_media(&self) -> String {
        format!("https://file.{}{CGI_PATH}/webwxuploadmedia", self.host)
    }

    pub fn oplog(&self) -> String {
        self.cgi("webwxoplog")
    }

    pub fn push_login(&self) -> String {
        self.cgi("webwxpushloginurl")
    }

    pub fn logout(&self) -> String {
        self.cgi("webwxlogout")
    }
}
