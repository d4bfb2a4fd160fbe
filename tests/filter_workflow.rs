//! Staff filter workflow: form submission through to admission.

mod common;

use std::collections::HashMap;

use chanwarden::filter::ActiveSelector;
use chanwarden::{
    AdmissionPipeline, Config, Database, FilterEngine, FilterForm, Outcome, SqlitePostHistory,
};

use common::{ctx, new_thread, setup_db, test_config, BOARD};

fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// New posters on a board may not start threads with links.
#[tokio::test]
async fn test_form_filter_with_first_time_condition() {
    let db = setup_db().await;
    let config = test_config();
    let ctx = ctx();
    let history = SqlitePostHistory::new(&db);

    let new_filter = FilterForm::parse(&form(&[
        ("action", "reject"),
        ("detail", "Post a few replies before linking."),
        ("field0", "body"),
        ("matchmode0", "regex"),
        ("search0", r"https?://"),
        ("field1", "firsttimeboard"),
        ("field2", "isop"),
        ("applyboard1", "on"),
    ]))
    .unwrap()
    .with_staff(7);

    let filter = FilterEngine::new(&db)
        .create_filter(&ctx, new_filter)
        .await
        .unwrap();
    assert_eq!(filter.board_ids, vec![BOARD]);
    assert_eq!(filter.staff_id, Some(7));

    let pipeline = AdmissionPipeline::new(&db, &config).with_history(&history);

    let mut newcomer = new_thread("198.51.100.50", "see https://example.com");
    let outcome = pipeline.admit(&ctx, &mut newcomer, None).await.unwrap();
    assert_eq!(outcome.message(), Some("Post a few replies before linking."));

    history
        .record_post(newcomer.ip, BOARD, ctx.now())
        .await
        .unwrap();
    let mut regular = new_thread("198.51.100.50", "see https://example.com");
    assert!(pipeline
        .admit(&ctx, &mut regular, None)
        .await
        .unwrap()
        .is_continue());
}

/// Disabled filters stop applying and reappear when re-enabled.
#[tokio::test]
async fn test_disable_and_enable_filter() {
    let db = setup_db().await;
    let config = test_config();
    let ctx = ctx();
    let engine = FilterEngine::new(&db);

    let filter = engine
        .create_filter(
            &ctx,
            FilterForm::parse(&form(&[
                ("action", "reject"),
                ("field0", "subject"),
                ("isregex0", "on"),
                ("search0", "(?i)^sale"),
            ]))
            .unwrap(),
        )
        .await
        .unwrap();

    let pipeline = AdmissionPipeline::new(&db, &config);
    let post = || new_thread("198.51.100.60", "body").with_subject("SALE today");

    let mut p = post();
    assert!(matches!(
        pipeline.admit(&ctx, &mut p, None).await.unwrap(),
        Outcome::Reject(_)
    ));

    engine.set_filter_active(&ctx, filter.id, false).await.unwrap();
    let mut p = post();
    assert!(pipeline.admit(&ctx, &mut p, None).await.unwrap().is_continue());
    assert_eq!(
        engine
            .list_filters(&ctx, ActiveSelector::Inactive, None)
            .await
            .unwrap()
            .len(),
        1
    );

    engine.set_filter_active(&ctx, filter.id, true).await.unwrap();
    let mut p = post();
    assert!(!pipeline.admit(&ctx, &mut p, None).await.unwrap().is_continue());
}

/// Configuration from disk drives an on-disk database.
#[tokio::test]
async fn test_config_file_and_disk_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("warden.db");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[database]\npath = {:?}\n\n[admission]\nquery_timeout_ms = 2000\n",
            db_path.to_string_lossy()
        ),
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.admission.query_timeout_ms, 2000);

    let db = Database::open(&config.database.path).await.unwrap();
    assert!(db_path.exists());
    assert!(db.table_exists("filter_conditions").await.unwrap());

    let pipeline = AdmissionPipeline::new(&db, &config);
    let ctx = pipeline.query_context();
    let mut post = new_thread("192.0.2.1", "hello");
    assert!(pipeline.admit(&ctx, &mut post, None).await.unwrap().is_continue());
    db.close().await;
}
