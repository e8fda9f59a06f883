//! End-to-end coverage of the ingestion pipeline over a real SQLite store,
//! plus a round-trip through the remote service's HTTP surface.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use verdant::models::{OwnerIdentity, RawReading, Sample};
use verdant::pipeline::{
    self, CredentialResolver, LiveChannel, LiveFanout, RateLimitedRecorder, ServerPolicyStore,
};
use verdant::server::{router, ServerState};
use verdant::Database;

fn open_temp_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::new(dir.path().join("verdant.sqlite3")).expect("open database");
    (db, dir)
}

fn sample_at(offset_secs: i64, temp: f64) -> Sample {
    RawReading {
        temp,
        humidity_air: 55.0,
        humidity_soil: 40.0,
        gas_flammable: 3.0,
        gas_toxic: 1.0,
        is_raining: false,
    }
    .into_sample(Utc::now() + Duration::seconds(offset_secs))
    .unwrap()
}

#[tokio::test]
async fn ingest_throttles_per_policy_while_live_sees_everything() {
    let (db, _dir) = open_temp_db();
    let token = db.ensure_user("u1@example.com").await.unwrap();
    let owner = db.resolve(&token).await.unwrap();

    db.set_policy_interval_ms(&owner, 300_000).await.unwrap();

    let recorder = RateLimitedRecorder::new(db.clone(), ServerPolicyStore::new(db.clone()));
    let fanout = LiveFanout::default();
    let (channel, mut live_rx) = LiveChannel::new(8);
    fanout.register(owner.clone(), channel);

    let decisions = [
        pipeline::ingest_sample(&recorder, &fanout, &owner, &sample_at(0, 20.0)).await,
        pipeline::ingest_sample(&recorder, &fanout, &owner, &sample_at(240, 21.0)).await,
        pipeline::ingest_sample(&recorder, &fanout, &owner, &sample_at(301, 22.0)).await,
    ];
    let decisions: Vec<bool> = decisions.into_iter().map(|d| d.unwrap()).collect();
    assert_eq!(decisions, vec![true, false, true]);

    let records = db.readings_for_owner(&owner).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sample.temp, 22.0, "newest first");

    for _ in 0..3 {
        assert!(live_rx.try_recv().is_ok(), "every sample reaches the live view");
    }
}

#[tokio::test]
async fn isolation_across_owners_through_the_full_stack() {
    let (db, _dir) = open_temp_db();
    let token_a = db.ensure_user("a@example.com").await.unwrap();
    let token_b = db.ensure_user("b@example.com").await.unwrap();
    let a = db.resolve(&token_a).await.unwrap();
    let b = db.resolve(&token_b).await.unwrap();

    let recorder = RateLimitedRecorder::new(db.clone(), ServerPolicyStore::new(db.clone()));
    let fanout = LiveFanout::default();

    assert!(pipeline::ingest_sample(&recorder, &fanout, &a, &sample_at(0, 20.0))
        .await
        .unwrap());
    for i in 0..10 {
        let _ = pipeline::ingest_sample(&recorder, &fanout, &b, &sample_at(i, 30.0))
            .await
            .unwrap();
    }

    // b's burst neither consumed nor extended a's window
    assert!(!pipeline::ingest_sample(&recorder, &fanout, &a, &sample_at(60, 20.5))
        .await
        .unwrap());

    assert_eq!(db.readings_for_owner(&a).await.unwrap().len(), 1);
    assert_eq!(db.readings_for_owner(&b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn http_surface_round_trip() {
    let (db, _dir) = open_temp_db();
    let token = db.ensure_user("u1@example.com").await.unwrap();

    let state = ServerState::new(db);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let push = |temp: f64, token: String| {
        serde_json::json!({
            "token": token,
            "temp": temp,
            "umidAr": 55,
            "umidSolo": 40,
            "gasInflamavel": 3,
            "gasToxico": 1,
            "estaChovendo": 0,
        })
    };

    // two pushes inside one interval: both succeed, one is recorded
    for temp in [20.0, 21.0] {
        let response = client
            .post(format!("{base}/api/sensor/token"))
            .json(&push(temp, token.clone()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let history: Vec<serde_json::Value> = client
        .get(format!("{base}/api/history"))
        .query(&[("token", token.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["temp"], 20.0);
    assert_eq!(history[0]["owner"], "u1@example.com");

    // out-of-range and unknown-token rejections
    let response = client
        .post(format!("{base}/api/sensor/token"))
        .json(&push(99.0, token.clone()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{base}/api/sensor/token"))
        .json(&push(20.0, "bogus".into()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // rotation: the old token stops working, the fresh one carries on
    let issued: serde_json::Value = client
        .post(format!("{base}/api/token/rotate"))
        .json(&serde_json::json!({ "token": token }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let fresh = issued["token"].as_str().unwrap().to_string();

    let response = client
        .get(format!("{base}/api/history"))
        .query(&[("token", token.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base}/api/user/email"))
        .query(&[("token", fresh.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["partial"], "u1@exa");

    // owner-scoped clear
    let response = client
        .post(format!("{base}/api/history/clear"))
        .json(&serde_json::json!({ "token": fresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let history: Vec<serde_json::Value> = client
        .get(format!("{base}/api/history"))
        .query(&[("token", fresh.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn arc_shared_state_survives_concurrent_owners() {
    let (db, _dir) = open_temp_db();
    let recorder = Arc::new(RateLimitedRecorder::new(
        db.clone(),
        ServerPolicyStore::new(db.clone()),
    ));
    let fanout = Arc::new(LiveFanout::default());

    let mut handles = Vec::new();
    for i in 0..8 {
        let recorder = recorder.clone();
        let fanout = fanout.clone();
        let owner = OwnerIdentity::new(format!("user{i}@example.com"));
        handles.push(tokio::spawn(async move {
            for j in 0..5 {
                let _ = pipeline::ingest_sample(&recorder, &fanout, &owner, &sample_at(j, 20.0))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // one record per owner: all five samples per owner fell inside one window
    for i in 0..8 {
        let owner = OwnerIdentity::new(format!("user{i}@example.com"));
        assert_eq!(db.readings_for_owner(&owner).await.unwrap().len(), 1);
    }
}
