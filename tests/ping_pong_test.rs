mod common;

use common::*;
use std::time::Duration;
use wechat_rust::test_utils::{MockHttpClient, MockReply, bodies, routes};

fn pong_bot(mock: &MockHttpClient) -> wechat_rust::Bot {
    builder(mock, test_config())
        .on_message(|ctx| async move {
            if ctx.message.text() == Some("ping") {
                ctx.reply_text("pong").await?;
            }
            Ok(())
        })
        .build()
}

#[tokio::test]
async fn ping_gets_exactly_one_pong() {
    init_logging();
    let mock = MockHttpClient::new();
    script_login(&mock, &[("@u1", "U1")]);
    mock.push(routes::SYNC_CHECK, MockReply::ok(bodies::sync_check(0, 2)));
    mock.push(
        routes::SYNC,
        MockReply::ok(bodies::sync(
            vec![
                bodies::text_message("m1", "@u1", SELF, "ping"),
                bodies::text_message("m2", "@u1", SELF, "hello"),
            ],
            &[(1, 101)],
        )),
    );
    mock.fallback(routes::SEND_MSG, MockReply::ok(bodies::sent("srv-1")));

    let bot = pong_bot(&mock);
    bot.login().await.unwrap();
    wait_until(|| mock.requests_to(routes::SYNC_CHECK).len() >= 2).await;
    // Give any stray send a chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sends = mock.requests_to(routes::SEND_MSG);
    assert_eq!(sends.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&sends[0].body_string()).unwrap();
    assert_eq!(body["Msg"]["ToUserName"], "@u1");
    assert_eq!(body["Msg"]["FromUserName"], SELF);
    assert_eq!(body["Msg"]["Content"], "pong");
    assert_eq!(body["Msg"]["Type"], 1);
    assert_eq!(body["Msg"]["LocalID"], body["Msg"]["ClientMsgId"]);
    assert_eq!(body["BaseRequest"]["Skey"], "@crypt_skey");

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn redelivered_ping_is_answered_once() {
    init_logging();
    let mock = MockHttpClient::new();
    script_login(&mock, &[("@u1", "U1")]);
    for cursor in [101, 102] {
        mock.push(routes::SYNC_CHECK, MockReply::ok(bodies::sync_check(0, 2)));
        mock.push(
            routes::SYNC,
            MockReply::ok(bodies::sync(
                vec![bodies::text_message("m1", "@u1", SELF, "ping")],
                &[(1, cursor)],
            )),
        );
    }
    mock.fallback(routes::SEND_MSG, MockReply::ok(bodies::sent("srv-1")));

    let bot = pong_bot(&mock);
    bot.login().await.unwrap();
    wait_until(|| mock.requests_to(routes::SYNC_CHECK).len() >= 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(mock.requests_to(routes::SEND_MSG).len(), 1);
    bot.logout().await.unwrap();
}

#[tokio::test]
async fn group_ping_is_answered_in_the_group() {
    init_logging();
    let mock = MockHttpClient::new();
    script_login(&mock, &[("@u1", "U1"), ("@@g1", "Team")]);
    mock.push(routes::SYNC_CHECK, MockReply::ok(bodies::sync_check(0, 2)));
    mock.push(
        routes::SYNC,
        MockReply::ok(bodies::sync(
            vec![bodies::text_message("m1", "@@g1", SELF, "@u1:<br/>ping")],
            &[(1, 101)],
        )),
    );
    mock.fallback(routes::SEND_MSG, MockReply::ok(bodies::sent("srv-1")));

    let bot = pong_bot(&mock);
    bot.login().await.unwrap();
    wait_until(|| !mock.requests_to(routes::SEND_MSG).is_empty()).await;

    let sends = mock.requests_to(routes::SEND_MSG);
    let body: serde_json::Value = serde_json::from_str(&sends[0].body_string()).unwrap();
    assert_eq!(body["Msg"]["ToUserName"], "@@g1");
    bot.logout().await.unwrap();
}

#[tokio::test]
async fn sending_to_an_unknown_contact_is_rejected() {
    init_logging();
    let mock = MockHttpClient::new();
    script_login(&mock, &[("@u1", "U1")]);

    let bot = pong_bot(&mock);
    bot.login().await.unwrap();
    let client = bot.client();

    let err = client.send_text("@nobody", "hi").await.unwrap_err();
    assert!(matches!(err, wechat_rust::ClientError::InvalidTarget(_)));
    let err = client.send_text("  ", "hi").await.unwrap_err();
    assert!(matches!(err, wechat_rust::ClientError::InvalidTarget(_)));
    assert!(mock.requests_to(routes::SEND_MSG).is_empty());

    bot.logout().await.unwrap();
    let err = client.send_text("@u1", "hi").await.unwrap_err();
    assert!(matches!(err, wechat_rust::ClientError::SessionInvalid));
}
