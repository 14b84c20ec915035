//! Login challenge state machine.
//!
//! Flow: `Init → TicketIssued → AwaitingScan → AwaitingConfirm → Confirmed →
//! SessionEstablished`, with `Expired` and `Cancelled` as alternate terminal
//! states. The machine is driven by the status codes the login host returns
//! while the caller polls; it performs no I/O itself.

use crate::error::ProtocolError;
use crate::script::assigned_value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current state of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LoginState {
    #[default]
    Init,
    /// The login host handed out a ticket; not yet shown to anyone.
    TicketIssued,
    /// The ticket is displayed (or was supplied up front) and nobody has
    /// scanned it yet.
    AwaitingScan,
    /// A phone scanned the code; the user has to confirm on the phone.
    AwaitingConfirm,
    /// The phone confirmed; the redirect carrying credentials is known.
    Confirmed,
    SessionEstablished,
    Expired,
    Cancelled,
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionEstablished | Self::Expired | Self::Cancelled
        )
    }
}

/// One answer of the login status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    /// 408: nothing happened during the hold time.
    Waiting,
    /// 201: scanned; the body may carry the scanner's avatar as a data URL.
    Scanned { avatar: Option<String> },
    /// 200: confirmed; the redirect exchanges the ticket for credentials.
    Confirmed { redirect_uri: String },
    /// 400: the ticket is no longer valid.
    Expired,
    /// 403: the user declined on the phone.
    Cancelled,
}

impl LoginStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Waiting => "408",
            Self::Scanned { .. } => "201",
            Self::Confirmed { .. } => "200",
            Self::Expired => "400",
            Self::Cancelled => "403",
        }
    }
}

/// Parses `window.code=201;window.userAvatar = '...';` style bodies.
///
/// A code outside the known set is a protocol error: the caller must abort
/// the attempt rather than guess.
pub fn parse_login_status(body: &str) -> Result<LoginStatus, ProtocolError> {
    let code = assigned_value(body, "window.code").ok_or(ProtocolError::MissingField("window.code"))?;
    match code {
        "408" => Ok(LoginStatus::Waiting),
        "201" => Ok(LoginStatus::Scanned {
            avatar: assigned_value(body, "window.userAvatar")
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        }),
        "200" => {
            let redirect_uri = assigned_value(body, "window.redirect_uri")
                .filter(|u| !u.is_empty())
                .ok_or(ProtocolError::MissingField("window.redirect_uri"))?;
            Ok(LoginStatus::Confirmed {
                redirect_uri: redirect_uri.to_string(),
            })
        }
        "400" => Ok(LoginStatus::Expired),
        "403" => Ok(LoginStatus::Cancelled),
        other => Err(ProtocolError::UnknownLoginStatus(other.to_string())),
    }
}

/// Parses `window.QRLogin.code = 200; window.QRLogin.uuid = "...";`.
pub fn parse_ticket_response(body: &str) -> Result<String, ProtocolError> {
    let code = assigned_value(body, "window.QRLogin.code")
        .ok_or(ProtocolError::MissingField("window.QRLogin.code"))?;
    if code != "200" {
        return Err(ProtocolError::TicketRejected(code.to_string()));
    }
    let ticket = assigned_value(body, "window.QRLogin.uuid")
        .filter(|t| !t.is_empty())
        .ok_or(ProtocolError::MissingField("window.QRLogin.uuid"))?;
    Ok(ticket.to_string())
}

/// Body of the establish-session redirect.
///
/// ```xml
/// <error><ret>0</ret><message></message><skey>@crypt_..</skey>
/// <wxsid>..</wxsid><wxuin>..</wxuin><pass_ticket>..</pass_ticket>
/// <isgrayscale>1</isgrayscale></error>
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename = "error")]
pub struct LoginInfo {
    pub ret: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub skey: String,
    #[serde(default)]
    pub wxsid: String,
    #[serde(default)]
    pub wxuin: String,
    #[serde(default)]
    pub pass_ticket: String,
    #[serde(default)]
    pub isgrayscale: Option<i32>,
}

impl LoginInfo {
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let info: LoginInfo = quick_xml::de::from_str(body)?;
        if info.ret != 0 {
            return Err(ProtocolError::LoginRejected {
                ret: info.ret,
                message: info.message,
            });
        }
        Ok(info)
    }

    pub fn into_credentials(self) -> Result<crate::session::Credentials, ProtocolError> {
        if self.skey.is_empty() {
            return Err(ProtocolError::MissingField("skey"));
        }
        if self.wxsid.is_empty() {
            return Err(ProtocolError::MissingField("wxsid"));
        }
        let wxuin = self
            .wxuin
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidValue {
                field: "wxuin",
                value: self.wxuin.clone(),
            })?;
        // The ticket arrives percent-encoded; keep it decoded so query
        // building encodes it exactly once.
        let pass_ticket = urlencoding::decode(&self.pass_ticket)
            .map(|t| t.into_owned())
            .unwrap_or(self.pass_ticket);
        Ok(crate::session::Credentials {
            skey: self.skey,
            wxsid: self.wxsid,
            wxuin,
            pass_ticket,
        })
    }
}

/// A ticket plus where its login attempt currently stands.
#[derive(Debug, Clone, Serialize)]
pub struct LoginChallenge {
    pub ticket: String,
    pub issued_at: DateTime<Utc>,
    state: LoginState,
    redirect_uri: Option<String>,
}

impl LoginChallenge {
    /// A ticket freshly handed out by the login host.
    pub fn issued(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            issued_at: Utc::now(),
            state: LoginState::TicketIssued,
            redirect_uri: None,
        }
    }

    /// A ticket obtained elsewhere (push login, or supplied by the caller).
    /// It is taken as is and starts out waiting for a scan.
    pub fn presupplied(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            issued_at: Utc::now(),
            state: LoginState::AwaitingScan,
            redirect_uri: None,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Where credentials are fetched from, known once confirmed.
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    pub fn qr_url(&self) -> String {
        crate::urls::qr_code_url(&self.ticket)
    }

    /// The ticket was handed to the host for display.
    pub fn mark_displayed(&mut self) {
        if self.state == LoginState::TicketIssued {
            self.state = LoginState::AwaitingScan;
        }
    }

    /// Applies one observed status. Returns the new state, or an error if the
    /// status is not a legal move from the current state; the state is left
    /// untouched in that case.
    pub fn apply_status(&mut self, status: &LoginStatus) -> Result<LoginState, InvalidTransition> {
        use LoginState::*;
        let next = match (self.state, status) {
            (TicketIssued | AwaitingScan, LoginStatus::Waiting) => AwaitingScan,
            (TicketIssued | AwaitingScan, LoginStatus::Scanned { .. }) => AwaitingConfirm,
            // Some phones confirm without a separate scan event reaching us.
            (TicketIssued | AwaitingScan, LoginStatus::Confirmed { .. }) => Confirmed,
            (AwaitingConfirm, LoginStatus::Confirmed { .. }) => Confirmed,
            (TicketIssued | AwaitingScan | AwaitingConfirm, LoginStatus::Expired) => Expired,
            (TicketIssued | AwaitingScan | AwaitingConfirm, LoginStatus::Cancelled) => Cancelled,
            (current, status) => {
                return Err(InvalidTransition {
                    current_state: current,
                    observed: status.code(),
                });
            }
        };
        if let LoginStatus::Confirmed { redirect_uri } = status {
            self.redirect_uri = Some(redirect_uri.clone());
        }
        self.state = next;
        Ok(next)
    }

    /// Credentials were committed to the session.
    pub fn establish(&mut self) -> Result<LoginState, InvalidTransition> {
        if self.state != LoginState::Confirmed {
            return Err(InvalidTransition {
                current_state: self.state,
                observed: "established",
            });
        }
        self.state = LoginState::SessionEstablished;
        Ok(self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: LoginState,
    pub observed: &'static str,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "status {} is not allowed in state {:?}",
            self.observed, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed() -> LoginStatus {
        LoginStatus::Confirmed {
            redirect_uri: "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=t".into(),
        }
    }

    /// Flow: TicketIssued → AwaitingScan → AwaitingConfirm → Confirmed → SessionEstablished
    #[test]
    fn happy_path() {
        let mut c = LoginChallenge::issued("oZZsO0Qv8Q==");
        assert_eq!(c.state(), LoginState::TicketIssued);

        c.mark_displayed();
        assert_eq!(c.state(), LoginState::AwaitingScan);

        assert_eq!(c.apply_status(&LoginStatus::Waiting).unwrap(), LoginState::AwaitingScan);
        assert_eq!(
            c.apply_status(&LoginStatus::Scanned { avatar: None }).unwrap(),
            LoginState::AwaitingConfirm
        );
        assert_eq!(c.apply_status(&confirmed()).unwrap(), LoginState::Confirmed);
        assert!(c.redirect_uri().unwrap().contains("ticket=t"));
        assert_eq!(c.establish().unwrap(), LoginState::SessionEstablished);
        assert!(c.state().is_terminal());
    }

    #[test]
    fn presupplied_ticket_waits_for_scan() {
        let c = LoginChallenge::presupplied("oZZsO0Qv8Q==");
        assert_eq!(c.state(), LoginState::AwaitingScan);
        assert_eq!(c.qr_url(), "https://login.weixin.qq.com/qrcode/oZZsO0Qv8Q==");
    }

    #[test]
    fn awaiting_confirm_only_moves_forward() {
        for status in [LoginStatus::Waiting, LoginStatus::Scanned { avatar: None }] {
            let mut c = LoginChallenge::presupplied("t");
            c.apply_status(&LoginStatus::Scanned { avatar: None }).unwrap();

            let err = c.apply_status(&status).unwrap_err();
            assert_eq!(err.current_state, LoginState::AwaitingConfirm);
            assert_eq!(c.state(), LoginState::AwaitingConfirm);
        }

        for (status, expected) in [
            (confirmed(), LoginState::Confirmed),
            (LoginStatus::Expired, LoginState::Expired),
            (LoginStatus::Cancelled, LoginState::Cancelled),
        ] {
            let mut c = LoginChallenge::presupplied("t");
            c.apply_status(&LoginStatus::Scanned { avatar: None }).unwrap();
            assert_eq!(c.apply_status(&status).unwrap(), expected);
        }
    }

    #[test]
    fn confirmed_never_regresses() {
        let mut c = LoginChallenge::presupplied("t");
        c.apply_status(&confirmed()).unwrap();
        assert!(c.apply_status(&LoginStatus::Waiting).is_err());
        assert!(c.apply_status(&LoginStatus::Scanned { avatar: None }).is_err());
        c.establish().unwrap();
        assert!(c.apply_status(&LoginStatus::Waiting).is_err());
        assert_eq!(c.state(), LoginState::SessionEstablished);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let mut c = LoginChallenge::presupplied("t");
        c.apply_status(&LoginStatus::Expired).unwrap();
        assert!(c.apply_status(&confirmed()).is_err());
        assert!(c.establish().is_err());
    }

    #[test]
    fn parses_status_bodies() {
        assert_eq!(parse_login_status("window.code=408;").unwrap(), LoginStatus::Waiting);
        assert_eq!(
            parse_login_status("window.code=201;window.userAvatar = 'data:img/jpg;base64,AAA';")
                .unwrap(),
            LoginStatus::Scanned {
                avatar: Some("data:img/jpg;base64,AAA".into())
            }
        );
        assert_eq!(
            parse_login_status(
                "window.code=200;\nwindow.redirect_uri=\"https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=X&uuid=Y&lang=zh_CN&scan=1\";"
            )
            .unwrap(),
            LoginStatus::Confirmed {
                redirect_uri:
                    "https://wx2.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=X&uuid=Y&lang=zh_CN&scan=1"
                        .into()
            }
        );
        assert_eq!(parse_login_status("window.code=400;").unwrap(), LoginStatus::Expired);
        assert_eq!(parse_login_status("window.code=403;").unwrap(), LoginStatus::Cancelled);
    }

    #[test]
    fn unknown_status_is_a_protocol_error() {
        assert!(matches!(
            parse_login_status("window.code=502;"),
            Err(ProtocolError::UnknownLoginStatus(code)) if code == "502"
        ));
        assert!(matches!(
            parse_login_status("window.code=200;"),
            Err(ProtocolError::MissingField("window.redirect_uri"))
        ));
        assert!(parse_login_status("<html></html>").is_err());
    }

    #[test]
    fn parses_ticket_response() {
        let body = r#"window.QRLogin.code = 200; window.QRLogin.uuid = "oZZsO0Qv8Q==";"#;
        assert_eq!(parse_ticket_response(body).unwrap(), "oZZsO0Qv8Q==");
        assert!(matches!(
            parse_ticket_response(r#"window.QRLogin.code = 500;"#),
            Err(ProtocolError::TicketRejected(_))
        ));
        assert!(parse_ticket_response("garbage").is_err());
    }

    #[test]
    fn parses_login_info() {
        let body = "<error><ret>0</ret><message></message><skey>@crypt_1_2</skey><wxsid>sid</wxsid><wxuin>123456</wxuin><pass_ticket>pt%2B</pass_ticket><isgrayscale>1</isgrayscale></error>";
        let creds = LoginInfo::parse(body).unwrap().into_credentials().unwrap();
        assert_eq!(creds.skey, "@crypt_1_2");
        assert_eq!(creds.wxsid, "sid");
        assert_eq!(creds.wxuin, 123456);
        assert_eq!(creds.pass_ticket, "pt+");
    }

    #[test]
    fn rejected_login_info() {
        let body = "<error><ret>1203</ret><message>forbidden</message></error>";
        assert!(matches!(
            LoginInfo::parse(body),
            Err(ProtocolError::LoginRejected { ret: 1203, .. })
        ));
    }
}
