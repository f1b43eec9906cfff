use httpmock::prelude::*;
use lib::client::DEFAULT_PROXIED_HOSTS;
use lib::{
    Engine, HostTable, HttpSubmissionClient, Identity, ProxyPool, SenderConfig, TargetTable,
};
use regex::Regex;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine(host: String, batch_size: usize, max_batches: u64) -> Engine<HttpSubmissionClient> {
    let config = SenderConfig {
        api_host: Some(host),
        batch_size,
        max_batches: Some(max_batches),
        data: "load".to_string(),
        seed: 11,
        ..Default::default()
    };
    let client = HttpSubmissionClient::new(
        Duration::from_secs(5),
        Regex::new(DEFAULT_PROXIED_HOSTS).unwrap(),
    )
    .unwrap();

    Engine::new(
        config,
        client,
        TargetTable::default(),
        ProxyPool::new(vec!["http://127.0.0.1:3128".to_string()]),
        HostTable::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn sends_consecutive_batches_over_http() {
    let server = MockServer::start_async().await;
    let identity = Identity::from_secret_bytes([21; 32], "a.pem");
    let sender = identity.address().to_hex();

    let account = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/address/{sender}"));
            then.status(200).json_body(json!({
                "account": { "address": sender, "nonce": 5, "balance": "1000" }
            }));
        })
        .await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/transaction/send")
                .json_body_partial(json!({ "sender": sender, "gasLimit": 100_004 }).to_string());
            then.status(200).json_body(json!({ "txHash": "abc", "Error": "" }));
        })
        .await;

    let engine = engine(server.base_url(), 3, 2);
    let results = engine.run(vec![identity], CancellationToken::new()).await;
    let report = results.into_iter().next().unwrap().unwrap();

    account.assert_async().await;
    send.assert_hits_async(6).await;
    assert_eq!(report.start_nonce, 5);
    assert_eq!(report.next_nonce, 11);
    assert_eq!(report.accepted, 6);
}

#[tokio::test]
async fn rejections_do_not_affect_other_senders() {
    let server = MockServer::start_async().await;
    let broke = Identity::from_secret_bytes([31; 32], "broke.pem");
    let funded = Identity::from_secret_bytes([32; 32], "funded.pem");

    for (identity, nonce) in [(&broke, 10), (&funded, 50)] {
        let address = identity.address().to_hex();
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/address/{address}"));
                then.status(200).json_body(json!({
                    "account": { "address": address, "nonce": nonce, "balance": "0" }
                }));
            })
            .await;
    }

    let rejected = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/transaction/send")
                .json_body_partial(json!({ "sender": broke.address().to_hex() }).to_string());
            then.status(200)
                .json_body(json!({ "txHash": "", "Error": "insufficient funds" }));
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/transaction/send")
                .json_body_partial(json!({ "sender": funded.address().to_hex() }).to_string());
            then.status(200).json_body(json!({ "txHash": "ok", "Error": "" }));
        })
        .await;

    let engine = engine(server.base_url(), 3, 1);
    let results = engine
        .run(vec![broke, funded], CancellationToken::new())
        .await;
    let reports: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    rejected.assert_hits_async(3).await;
    accepted.assert_hits_async(3).await;

    assert_eq!(reports[0].rejected, 3);
    assert_eq!(reports[0].next_nonce, 13);
    assert_eq!(reports[1].accepted, 3);
    assert_eq!(reports[1].next_nonce, 53);
}

#[tokio::test]
async fn unreachable_host_fails_seeding() {
    let engine = engine("http://127.0.0.1:9".to_string(), 1, 1);
    let identity = Identity::from_secret_bytes([41; 32], "c.pem");

    let results = engine.run(vec![identity], CancellationToken::new()).await;

    assert!(matches!(
        results[0],
        Err(lib::SeedError::FetchAccount { .. })
    ));
}
