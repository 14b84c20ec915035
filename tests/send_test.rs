mod common;

use common::*;
use serde_json::json;
use wechat_rust::test_utils::{MockHttpClient, MockReply, bodies, routes};
use wechat_rust::{ClientError, FILE_HELPER};

async fn logged_in(mock: &MockHttpClient) -> wechat_rust::Bot {
    init_logging();
    script_login(mock, &[("@u1", "Alice")]);
    let bot = builder(mock, test_config()).build();
    bot.login().await.unwrap();
    bot
}

fn json_body(mock: &MockHttpClient, route: &str) -> serde_json::Value {
    let requests = mock.requests_to(route);
    serde_json::from_str(&requests.last().expect("request sent").body_string()).unwrap()
}

#[tokio::test]
async fn sent_message_can_be_revoked() {
    let mock = MockHttpClient::new();
    mock.push(routes::SEND_MSG, MockReply::ok(bodies::sent("srv-42")));
    mock.push("webwxrevokemsg", MockReply::ok(bodies::ok()));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let sent = client.send_text("@u1", "oops").await.unwrap();
    assert_eq!(sent.msg_id, "srv-42");
    assert_eq!(sent.to, "@u1");
    assert!(!sent.local_id.is_empty());

    client.revoke(&sent).await.unwrap();
    let body = json_body(&mock, "webwxrevokemsg");
    assert_eq!(body["SvrMsgId"], "srv-42");
    assert_eq!(body["ClientMsgId"], sent.local_id.as_str());
    assert_eq!(body["ToUserName"], "@u1");

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn file_is_uploaded_then_sent_as_attachment() {
    let mock = MockHttpClient::new();
    mock.push(
        "webwxuploadmedia",
        MockReply::ok(
            json!({ "BaseResponse": { "Ret": 0, "ErrMsg": "" }, "MediaId": "@crypt_media", "StartPos": 11 })
                .to_string(),
        ),
    );
    mock.push("webwxsendappmsg", MockReply::ok(bodies::sent("srv-7")));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let sent = client
        .send_file(FILE_HELPER, "notes.txt", b"hello world".to_vec())
        .await
        .unwrap();
    assert_eq!(sent.msg_id, "srv-7");

    let upload = &mock.requests_to("webwxuploadmedia")[0];
    let form = upload.body_string();
    assert!(form.contains("name=\"mediatype\"\r\n\r\ndoc\r\n"));
    assert!(form.contains("hello world"));
    assert!(
        upload.request.headers["Content-Type"].starts_with("multipart/form-data; boundary=")
    );

    let body = json_body(&mock, "webwxsendappmsg");
    assert_eq!(body["Msg"]["Type"], 6);
    assert_eq!(body["Msg"]["ToUserName"], FILE_HELPER);
    let content = body["Msg"]["Content"].as_str().unwrap();
    assert!(content.contains("<attachid>@crypt_media</attachid>"));
    assert!(content.contains("<totallen>11</totallen>"));

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn image_carries_the_uploaded_media_id() {
    let mock = MockHttpClient::new();
    mock.push(
        "webwxuploadmedia",
        MockReply::ok(
            json!({ "BaseResponse": { "Ret": 0, "ErrMsg": "" }, "MediaId": "@crypt_img" })
                .to_string(),
        ),
    );
    mock.push("webwxsendmsgimg", MockReply::ok(bodies::sent("srv-8")));
    let bot = logged_in(&mock).await;

    bot.client()
        .send_image("@u1", "cat.png", vec![0x89, b'P', b'N', b'G'])
        .await
        .unwrap();
    let body = json_body(&mock, "webwxsendmsgimg");
    assert_eq!(body["Msg"]["Type"], 3);
    assert_eq!(body["Msg"]["MediaId"], "@crypt_img");
    assert!(mock.requests_to("webwxsendmsgimg")[0].request.url.contains("fun=async"));

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn server_rejection_is_reported() {
    let mock = MockHttpClient::new();
    mock.push(routes::SEND_MSG, MockReply::ok(bodies::base_error(1204)));
    let bot = logged_in(&mock).await;

    let err = bot.client().send_text("@u1", "hi").await.unwrap_err();
    assert!(matches!(err, ClientError::Server { ret: 1204, .. }), "got {err:?}");
    bot.logout().await.unwrap();
}
