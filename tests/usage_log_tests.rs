use castor::db::{DbActorHandle, QuotaClass, UsageDraft, UsageFinal, UserCreate};
use castor::service::UsageLogger;
use chrono::{Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;
use tokio::fs;

async fn spawn_temp_db(tag: &str) -> (DbActorHandle, std::path::PathBuf) {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    tag.hash(&mut hasher);
    let db_path = std::env::temp_dir().join(format!("castor_usage_{}.sqlite", hasher.finish()));
    let database_url = format!("sqlite:{}", db_path.to_str().unwrap());
    (castor::db::spawn(&database_url).await, db_path)
}

async fn cleanup(db_path: &std::path::Path) {
    let wal = std::path::PathBuf::from(format!("{}-wal", db_path.to_string_lossy()));
    let shm = std::path::PathBuf::from(format!("{}-shm", db_path.to_string_lossy()));
    let _ = fs::remove_file(&wal).await;
    let _ = fs::remove_file(&shm).await;
    let _ = fs::remove_file(db_path).await;
}

async fn seed_user(db: &DbActorHandle) -> i64 {
    db.create_user(UserCreate {
        username: "logger".to_string(),
        password_hash: "x".to_string(),
        is_admin: false,
        daily_quota: 1000,
    })
    .await
    .unwrap()
}

fn draft(user_id: i64, model: &str) -> UsageDraft {
    UsageDraft {
        user_id,
        model: model.to_string(),
        endpoint: "/v1/chat/completions".to_string(),
        client_ip: Some("10.0.0.1".to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

#[tokio::test]
async fn placeholder_counts_immediately_and_finalises_once() {
    let (db, path) = spawn_temp_db("lifecycle").await;
    let uid = seed_user(&db).await;
    let logger = UsageLogger::new(db.clone());
    let mut events = logger.subscribe();

    let log_id = logger
        .record_placeholder(draft(uid, "gcli-gemini-2.5-flash"))
        .await
        .unwrap();

    // The in-flight row is visible to minute-window counting right away.
    let count = db
        .requests_since(uid, Utc::now() - Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(count, 1);

    let placeholder_event = events.recv().await.unwrap();
    assert_eq!(placeholder_event.log_id, log_id);
    assert_eq!(placeholder_event.status_code, 0);

    logger
        .finalize(
            uid,
            UsageFinal {
                id: log_id,
                status_code: 200,
                latency_ms: 123,
                credential_id: None,
                retry_count: 0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let final_event = events.recv().await.unwrap();
    assert_eq!(final_event.status_code, 200);

    // A second finalisation must not overwrite the first.
    logger
        .finalize(
            uid,
            UsageFinal {
                id: log_id,
                status_code: 500,
                latency_ms: 999,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let row = db.get_usage(log_id).await.unwrap().unwrap();
    assert_eq!(row.status_code, 200);
    assert_eq!(row.latency_ms, 123);
    assert_eq!(row.client_ip.as_deref(), Some("10.0.0.1"));

    let (flash_count, total) = db
        .daily_usage(uid, Utc::now() - Duration::hours(1), QuotaClass::Flash)
        .await
        .unwrap();
    assert_eq!(flash_count, 1);
    assert_eq!(total, 1);

    cleanup(&path).await;
}

#[tokio::test]
async fn daily_usage_splits_classes_by_model_pattern() {
    let (db, path) = spawn_temp_db("classes").await;
    let uid = seed_user(&db).await;

    for model in [
        "gcli-gemini-2.5-flash",
        "gcli-gemini-2.5-flash",
        "gcli-gemini-2.5-pro",
        "gcli-gemini-3-pro-preview",
    ] {
        db.insert_usage(draft(uid, model)).await.unwrap();
    }

    let since = Utc::now() - Duration::hours(1);

    let (flash, total) = db.daily_usage(uid, since, QuotaClass::Flash).await.unwrap();
    assert_eq!(flash, 2);
    assert_eq!(total, 4);

    let (pro_shared, _) = db
        .daily_usage(uid, since, QuotaClass::ProShared)
        .await
        .unwrap();
    assert_eq!(pro_shared, 2);

    let (pro_only, _) = db.daily_usage(uid, since, QuotaClass::ProOnly).await.unwrap();
    assert_eq!(pro_only, 2);

    cleanup(&path).await;
}

#[tokio::test]
async fn requests_since_scopes_to_user_and_window() {
    let (db, path) = spawn_temp_db("window").await;
    let uid = seed_user(&db).await;
    let other = db
        .create_user(UserCreate {
            username: "other".to_string(),
            password_hash: "x".to_string(),
            is_admin: false,
            daily_quota: 1000,
        })
        .await
        .unwrap();

    db.insert_usage(draft(uid, "gcli-gemini-2.5-flash")).await.unwrap();
    db.insert_usage(draft(other, "gcli-gemini-2.5-flash"))
        .await
        .unwrap();

    let count = db
        .requests_since(uid, Utc::now() - Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(count, 1);

    // A window starting in the future sees nothing.
    let count = db
        .requests_since(uid, Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(count, 0);

    cleanup(&path).await;
}
