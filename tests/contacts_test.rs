mod common;

use common::*;
use serde_json::json;
use wechat_rust::ClientError;
use wechat_rust::test_utils::{MockHttpClient, MockReply, bodies, routes};
use wechat_rust::types::events::Event;

async fn logged_in(mock: &MockHttpClient) -> wechat_rust::Bot {
    init_logging();
    script_login(mock, &[("@u1", "Alice"), ("@@g1", "Team")]);
    let bot = builder(mock, test_config()).build();
    bot.login().await.unwrap();
    bot
}

fn pinned(bot: &wechat_rust::Bot, id: &str) -> bool {
    bot.client().contacts().get(id).expect("known contact").is_pinned()
}

#[tokio::test]
async fn pin_then_unpin_restores_the_flag() {
    let mock = MockHttpClient::new();
    mock.fallback(routes::OPLOG, MockReply::ok(bodies::ok()));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let before = pinned(&bot, "@u1");
    client.pin("@u1").await.unwrap();
    assert!(pinned(&bot, "@u1"));
    client.unpin("@u1").await.unwrap();
    assert_eq!(pinned(&bot, "@u1"), before);

    let ops: Vec<serde_json::Value> = mock
        .requests_to(routes::OPLOG)
        .iter()
        .map(|r| serde_json::from_str(&r.body_string()).unwrap())
        .collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0]["CmdId"], 3);
    assert_eq!(ops[0]["OP"], 1);
    assert_eq!(ops[0]["UserName"], "@u1");
    assert_eq!(ops[1]["OP"], 0);

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn rejected_pin_leaves_the_flag_alone() {
    let mock = MockHttpClient::new();
    mock.push(routes::OPLOG, MockReply::ok(bodies::base_error(1)));
    mock.push(routes::OPLOG, MockReply::error("connection reset"));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let err = client.pin("@@g1").await.unwrap_err();
    assert!(matches!(err, ClientError::Server { ret: 1, .. }), "got {err:?}");
    assert!(!pinned(&bot, "@@g1"));

    let err = client.pin("@@g1").await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)), "got {err:?}");
    assert!(!pinned(&bot, "@@g1"));

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn unknown_contact_is_rejected_before_any_request() {
    let mock = MockHttpClient::new();
    let bot = logged_in(&mock).await;
    let client = bot.client();

    assert!(matches!(
        client.pin("@stranger").await,
        Err(ClientError::InvalidTarget(_))
    ));
    assert!(matches!(client.unpin("").await, Err(ClientError::InvalidTarget(_))));
    assert!(mock.requests_to(routes::OPLOG).is_empty());

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn remark_is_applied_after_the_server_accepts_it() {
    let mock = MockHttpClient::new();
    mock.fallback(routes::OPLOG, MockReply::ok(bodies::ok()));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    client.set_remark("@u1", "Ally").await.unwrap();
    let contact = client.contacts().get("@u1").unwrap();
    assert_eq!(contact.profile().remark_name, "Ally");
    assert_eq!(contact.profile().display_name(), "Ally");

    let body: serde_json::Value =
        serde_json::from_str(&mock.requests_to(routes::OPLOG)[0].body_string()).unwrap();
    assert_eq!(body["CmdId"], 2);
    assert_eq!(body["RemarkName"], "Ally");

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn sync_applies_contact_changes() {
    let mock = MockHttpClient::new();
    mock.push(routes::SYNC_CHECK, MockReply::ok(bodies::sync_check(0, 2)));
    mock.push(
        routes::SYNC,
        MockReply::ok(
            json!({
                "BaseResponse": { "Ret": 0, "ErrMsg": "" },
                "ModContactCount": 1,
                "ModContactList": [bodies::contact("@u2", "Bob")],
                "DelContactCount": 1,
                "DelContactList": [{ "UserName": "@u1" }],
                "SyncKey": bodies::cursor(&[(1, 101)]),
            })
            .to_string(),
        ),
    );
    init_logging();
    script_login(&mock, &[("@u1", "Alice"), ("@@g1", "Team")]);
    let bot = builder(&mock, test_config()).build();
    let recorder = EventRecorder::attach(&bot);
    bot.login().await.unwrap();
    let client = bot.client();

    wait_until(|| client.contacts().contains("@u2")).await;
    assert!(!client.contacts().contains("@u1"));
    assert!(client.contacts().contains("@@g1"));
    assert_eq!(client.contacts().groups().len(), 1);

    let removal = || {
        recorder.events().into_iter().find_map(|e| match e {
            Event::ContactsChanged { upserted, removed } if !removed.is_empty() => {
                Some((upserted, removed))
            }
            _ => None,
        })
    };
    wait_until(|| removal().is_some()).await;
    let changed = removal();
    assert_eq!(
        changed,
        Some((vec!["@u2".to_string()], vec!["@u1".to_string()]))
    );

    bot.logout().await.unwrap();
}

#[tokio::test]
async fn group_members_are_fetched_and_cached() {
    let mock = MockHttpClient::new();
    mock.push(
        "webwxbatchgetcontact",
        MockReply::ok(
            json!({
                "BaseResponse": { "Ret": 0, "ErrMsg": "" },
                "Count": 1,
                "ContactList": [{
                    "UserName": "@@g1",
                    "NickName": "Team",
                    "MemberCount": 2,
                    "MemberList": [
                        { "UserName": "@u1", "NickName": "Alice", "DisplayName": "Al" },
                        { "UserName": SELF, "NickName": "me", "DisplayName": "" },
                    ],
                }],
            })
            .to_string(),
        ),
    );
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let fetched = client.fetch_group_members(&["@@g1"]).await.unwrap();
    assert_eq!(fetched.len(), 1);

    let groups = client.contacts().groups();
    let team = groups.iter().find(|g| g.profile.user_name == "@@g1").unwrap();
    assert_eq!(team.members.len(), 2);
    assert_eq!(team.member("@u1").unwrap().display_name, "Al");

    let request = &mock.requests_to("webwxbatchgetcontact")[0];
    let body: serde_json::Value = serde_json::from_str(&request.body_string()).unwrap();
    assert_eq!(body["Count"], 1);
    assert_eq!(body["List"][0]["UserName"], "@@g1");

    assert!(matches!(
        client.fetch_group_members(&[" "]).await,
        Err(ClientError::InvalidTarget(_))
    ));
    bot.logout().await.unwrap();
}

#[tokio::test]
async fn full_fetch_follows_the_page_sequence() {
    let mock = MockHttpClient::new();
    let page = |members: serde_json::Value, seq: u64| {
        MockReply::ok(
            json!({
                "BaseResponse": { "Ret": 0, "ErrMsg": "" },
                "MemberList": members,
                "Seq": seq,
            })
            .to_string(),
        )
    };
    mock.push(routes::GET_CONTACT, page(json!([bodies::contact("@u2", "Bob")]), 7));
    mock.push(routes::GET_CONTACT, page(json!([bodies::contact("@u3", "Carol")]), 0));
    let bot = logged_in(&mock).await;
    let client = bot.client();

    let contacts = client.contacts();
    assert!(contacts.contains("@u2") && contacts.contains("@u3"));
    // Contacts from init are kept even though the full fetch did not list them.
    assert!(contacts.contains("@u1"));

    let fetches = mock.requests_to(routes::GET_CONTACT);
    assert_eq!(fetches.len(), 2);
    assert!(fetches[0].request.url.contains("seq=0"));
    assert!(fetches[1].request.url.contains("seq=7"));

    bot.logout().await.unwrap();
}
