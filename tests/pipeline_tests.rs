use bigdecimal::BigDecimal;
use hunter_leads_api::errors::AppError;
use hunter_leads_api::pipeline::{
    InMemoryPipelineStore, LeadStatus, PipelineStore, PipelineSummary, PipelineUpdate,
};
use std::str::FromStr;

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn money(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

fn update(company_id: &str, status: LeadStatus) -> PipelineUpdate {
    PipelineUpdate {
        company_id: company_id.to_string(),
        status,
        value: None,
        note: None,
    }
}

#[tokio::test]
async fn add_is_insert_or_ignore() {
    let store = InMemoryPipelineStore::new();
    assert_eq!(store.add_leads(&ids(&["1", "2"])).await.unwrap(), 2);
    assert_eq!(store.add_leads(&ids(&["2", "3"])).await.unwrap(), 1);

    let entries = store.list(10).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.status == LeadStatus::New));
}

#[tokio::test]
async fn status_follows_the_lifecycle() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1"])).await.unwrap();

    store.update_status("1", LeadStatus::Attempted).await.unwrap();
    store.update_status("1", LeadStatus::Attempted).await.unwrap();
    store.update_status("1", LeadStatus::Negotiating).await.unwrap();
    store.update_status("1", LeadStatus::Sold).await.unwrap();

    let err = store.update_status("1", LeadStatus::New).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    let err = store.update_status("missing", LeadStatus::Lost).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn details_keep_absent_fields() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1"])).await.unwrap();

    store
        .update_details("1", Some(money("1500.50")), Some("Ligar na segunda".to_string()))
        .await
        .unwrap();
    store.update_details("1", None, None).await.unwrap();

    let entry = store.list(1).await.unwrap().remove(0);
    assert_eq!(entry.value, money("1500.50"));
    assert_eq!(entry.note.as_deref(), Some("Ligar na segunda"));

    let err = store
        .update_details("1", Some(money("-1")), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1", "2"])).await.unwrap();

    let bad = vec![
        update("1", LeadStatus::Attempted),
        update("2", LeadStatus::Sold),
    ];
    assert!(store.apply_batch(&bad).await.is_err());
    let untouched = store.list(10).await.unwrap();
    assert!(untouched.iter().all(|e| e.status == LeadStatus::New));

    let good = vec![
        update("1", LeadStatus::Attempted),
        PipelineUpdate {
            value: Some(money("200")),
            ..update("2", LeadStatus::Lost)
        },
    ];
    assert_eq!(store.apply_batch(&good).await.unwrap(), 2);

    let entries = store.list(10).await.unwrap();
    let second = entries.iter().find(|e| e.company_id == "2").unwrap();
    assert_eq!(second.status, LeadStatus::Lost);
    assert_eq!(second.value, money("200"));
}

#[tokio::test]
async fn list_puts_recent_updates_first() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1", "2", "3"])).await.unwrap();
    store.update_status("1", LeadStatus::Attempted).await.unwrap();

    let entries = store.list(2).await.unwrap();
    let order: Vec<&str> = entries.iter().map(|e| e.company_id.as_str()).collect();
    assert_eq!(order, ["1", "3"]);
}

#[tokio::test]
async fn removal() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1", "2", "3"])).await.unwrap();

    store.remove("1").await.unwrap();
    assert!(matches!(store.remove("1").await, Err(AppError::NotFound(_))));
    assert_eq!(store.remove_batch(&ids(&["2", "9"])).await.unwrap(), 1);
    assert_eq!(store.list(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn summary_figures() {
    let store = InMemoryPipelineStore::new();
    store.add_leads(&ids(&["1", "2", "3", "4"])).await.unwrap();
    store
        .apply_batch(&[
            update("1", LeadStatus::Attempted),
            update("1", LeadStatus::Negotiating),
            PipelineUpdate {
                value: Some(money("1000")),
                ..update("1", LeadStatus::Sold)
            },
            update("2", LeadStatus::Attempted),
            PipelineUpdate {
                value: Some(money("250.25")),
                ..update("2", LeadStatus::Negotiating)
            },
        ])
        .await
        .unwrap();

    let summary = PipelineSummary::from_entries(&store.list(10).await.unwrap());
    assert_eq!(summary.total, 4);
    assert_eq!(summary.sold, 1);
    assert_eq!(summary.sold_value, money("1000"));
    assert_eq!(summary.negotiating, 1);
    assert_eq!(summary.negotiating_value, money("250.25"));
    assert_eq!(summary.new, 2);
    assert_eq!(summary.total_value, money("1250.25"));
    assert!((summary.conversion_rate - 25.0).abs() < f64::EPSILON);
}

#[test]
fn empty_summary_has_zero_rate() {
    let summary = PipelineSummary::from_entries(&[]);
    assert_eq!(summary.total, 0);
    assert_eq!(summary.conversion_rate, 0.0);
}
