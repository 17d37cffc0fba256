#![allow(clippy::unwrap_used, clippy::expect_used)]

use pretty_assertions::assert_eq;
use turbomarket_common::{DeliverySummary, EmailAddress, Recipient};
use turbomarket_gateway::{
    DeliveryGateway, DryRunGateway, ScriptedGateway, TemplateSend, destination_for,
};

fn template() -> TemplateSend {
    TemplateSend {
        from: EmailAddress::named("news@turbomarket.io", "TurboMarket"),
        template_name: "welcome".into(),
        default_data: serde_json::Map::new(),
        configuration_set: None,
        tags: Default::default(),
    }
}

fn recipients(n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient::new(format!("r{i}"), format!("user{i}@example.com")))
        .collect()
}

#[tokio::test]
async fn test_bulk_returns_one_outcome_per_destination() {
    let gateway = ScriptedGateway::new()
        .reject_address("user1@example.com")
        .reject_address("user3@example.com");

    let destinations: Vec<_> = recipients(5)
        .iter()
        .map(|r| destination_for(r, &serde_json::Map::new()))
        .collect();

    let outcomes = gateway.send_bulk(&template(), &destinations).await.unwrap();
    let summary = DeliverySummary::from_outcomes(outcomes);

    assert_eq!(summary.total(), 5);
    assert_eq!((summary.sent, summary.failed), (3, 2));
    assert_eq!(summary.sent + summary.failed, summary.total());
}

#[tokio::test]
async fn test_bulk_transport_error_fails_whole_request() {
    let gateway = ScriptedGateway::new().then_transport_error("connection reset");
    let destinations: Vec<_> = recipients(2)
        .iter()
        .map(|r| destination_for(r, &serde_json::Map::new()))
        .collect();

    let err = gateway.send_bulk(&template(), &destinations).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(gateway.bulk_calls().len(), 1);
}

#[tokio::test]
async fn test_dry_run_bulk() {
    let gateway = DryRunGateway::new();
    let destinations: Vec<_> = recipients(4)
        .iter()
        .map(|r| destination_for(r, &serde_json::Map::new()))
        .collect();

    let outcomes = gateway.send_bulk(&template(), &destinations).await.unwrap();
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(gateway.sent(), 4);
}
