//! E2E tests for the unified feed

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::fakes::FakeTwitter;
use common::{TestOptions, TestServer};
use crosspost::data::{BlueskyPost, TwitterPost};
use serde_json::Value;

async fn seed(server: &TestServer) {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    server
        .state
        .db
        .upsert_tweets(&[
            TwitterPost {
                id: "t-merged".to_string(),
                text: "hello\nworld".to_string(),
                posted_at: t0,
            },
            TwitterPost {
                id: "t-only".to_string(),
                text: "twitter only".to_string(),
                posted_at: t0 + Duration::minutes(10),
            },
        ])
        .await
        .unwrap();

    server
        .state
        .db
        .upsert_bluesky_posts(&[
            BlueskyPost {
                id: "at://did:plc:x/app.bsky.feed.post/merged".to_string(),
                text: "hello\r\nworld".to_string(),
                posted_at: t0 + Duration::seconds(30),
            },
            BlueskyPost {
                id: "at://did:plc:x/app.bsky.feed.post/only".to_string(),
                text: "<b>bluesky</b> only".to_string(),
                posted_at: t0 + Duration::minutes(5),
            },
        ])
        .await
        .unwrap();
}

async fn get_feed(server: &TestServer) -> Value {
    let response = server
        .client
        .get(server.url("/api/feed"))
        .header("Authorization", server.bearer())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_empty_feed() {
    let server = TestServer::new().await;

    let body = get_feed(&server).await;

    assert_eq!(body["posts"], serde_json::json!([]));
    assert!(body.get("twitterUsername").is_none());
    assert!(body.get("blueskyUsername").is_none());
}

#[tokio::test]
async fn test_feed_merges_and_orders_posts() {
    let server = TestServer::new().await;
    seed(&server).await;

    let body = get_feed(&server).await;
    let posts = body["posts"].as_array().unwrap();

    assert_eq!(posts.len(), 3);

    assert_eq!(posts[0]["twitterId"], "t-only");
    assert!(posts[0].get("blueskyId").is_none());

    assert_eq!(posts[1]["blueskyId"], "at://did:plc:x/app.bsky.feed.post/only");
    assert!(posts[1].get("twitterId").is_none());

    assert_eq!(posts[2]["twitterId"], "t-merged");
    assert_eq!(posts[2]["blueskyId"], "at://did:plc:x/app.bsky.feed.post/merged");
    assert_eq!(posts[2]["text"], "hello\nworld");
    assert_eq!(posts[2]["postedAt"], "2024-05-01T12:00:00Z");
}

#[tokio::test]
async fn test_feed_reports_enabled_accounts() {
    let server = TestServer::start(TestOptions {
        twitter_origin: Some("http://127.0.0.1:9".to_string()),
        bluesky_origin: Some("http://127.0.0.1:9".to_string()),
        ..Default::default()
    })
    .await;

    let body = get_feed(&server).await;

    assert_eq!(body["twitterUsername"], "test_twitter");
    assert_eq!(body["blueskyUsername"], "test.bsky.social");
}

#[tokio::test]
async fn test_feed_page_renders_escaped_posts() {
    let server = TestServer::new().await;
    seed(&server).await;

    let response = server
        .client
        .get(server.url("/"))
        .header("Authorization", server.bearer())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Signed in as Test User"));
    assert!(body.contains("&lt;b&gt;bluesky&lt;/b&gt; only"));
    assert!(!body.contains("<b>bluesky</b>"));
    assert!(body.contains("name=\"twitterId\" value=\"t-merged\""));
    assert!(body.contains("action=\"/delete-post\""));
}

#[tokio::test]
async fn test_feed_page_does_not_touch_twitter_proxy() {
    let twitter = FakeTwitter::start().await;
    let server = TestServer::start(TestOptions {
        twitter_origin: Some(twitter.origin.clone()),
        ..Default::default()
    })
    .await;

    let response = server
        .client
        .get(server.url("/"))
        .header("Authorization", server.bearer())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("href=\"/confirmation-code\""));
    twitter.with(|s| assert_eq!(s.sessions_created, 0));
    assert!(
        server
            .state
            .db
            .get_latest_twitter_session()
            .await
            .unwrap()
            .is_none()
    );
}
