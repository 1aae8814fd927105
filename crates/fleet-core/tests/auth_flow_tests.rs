//! End-to-end login flows through the fleet

mod common;

use std::time::Duration;

use common::{OPERATOR, memory_fleet};
use voicefleet_core::sim::{SIM_LOGIN_CODE, SimProvider};
use voicefleet_core::{AuthStage, FleetError, FleetEvent, FlowStep, UserId};

#[tokio::test]
async fn login_creates_and_registers_session() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    let mut events = fleet.subscribe_events();

    assert_eq!(fleet.begin_login(OPERATOR).await, AuthStage::AwaitingName);
    assert_eq!(
        fleet.submit_login(OPERATOR, "work_phone").await.unwrap(),
        FlowStep::Advanced(AuthStage::AwaitingPhone)
    );
    assert_eq!(
        fleet.submit_login(OPERATOR, "+989123456789").await.unwrap(),
        FlowStep::Advanced(AuthStage::AwaitingCode)
    );

    let step = fleet.submit_login(OPERATOR, SIM_LOGIN_CODE).await.unwrap();
    let session = match step {
        FlowStep::Completed(session) => session,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(session.session_name, "work_phone");
    assert_eq!(session.phone_number, "+989123456789");

    // Registered in the pool and persisted; the login connection is closed.
    assert_eq!(fleet.session_names(), vec!["work_phone".to_string()]);
    assert_eq!(fleet.pool().stored_count().await.unwrap(), 1);
    assert_eq!(provider.open_connections(), 0);
    assert!(fleet.auth().stage(OPERATOR).is_none());

    let handle = fleet.pool().get("work_phone").unwrap();
    assert_eq!(handle.metadata().phone_number, "+989123456789");

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let FleetEvent::AuthFlowFinished { success, session, .. } = event.event {
            assert!(success);
            assert_eq!(session.as_deref(), Some("work_phone"));
            finished = true;
        }
    }
    assert!(finished);
}

#[tokio::test]
async fn login_with_two_step_password() {
    let provider = SimProvider::new();
    provider.require_password("correct horse");
    let fleet = memory_fleet(&provider).await;

    fleet.begin_login(OPERATOR).await;
    fleet.submit_login(OPERATOR, "secure").await.unwrap();
    fleet.submit_login(OPERATOR, "+15550002").await.unwrap();

    assert_eq!(
        fleet.submit_login(OPERATOR, SIM_LOGIN_CODE).await.unwrap(),
        FlowStep::Advanced(AuthStage::AwaitingPassword)
    );
    let step = fleet.submit_login(OPERATOR, "battery staple").await.unwrap();
    assert!(matches!(step, FlowStep::Retry { stage: AuthStage::AwaitingPassword, .. }));

    let step = fleet.submit_login(OPERATOR, "correct horse").await.unwrap();
    assert!(matches!(step, FlowStep::Completed(_)));
    assert!(fleet.pool().contains("secure"));
}

#[tokio::test]
async fn name_collision_reprompts() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    common::add_sessions(&fleet, &["taken"]).await;

    fleet.begin_login(OPERATOR).await;
    let step = fleet.submit_login(OPERATOR, "taken").await.unwrap();

    assert!(matches!(step, FlowStep::Retry { stage: AuthStage::AwaitingName, .. }));
    assert_eq!(fleet.auth().stage(OPERATOR), Some(AuthStage::AwaitingName));
}

#[tokio::test]
async fn rejected_phone_ends_flow() {
    let provider = SimProvider::new();
    provider.reject_phone("+10000000");
    let fleet = memory_fleet(&provider).await;

    fleet.begin_login(OPERATOR).await;
    fleet.submit_login(OPERATOR, "acc").await.unwrap();

    let step = fleet.submit_login(OPERATOR, "+10000000").await.unwrap();
    assert!(matches!(step, FlowStep::Failed { .. }));
    assert!(!fleet.auth().is_active(OPERATOR));
    assert_eq!(provider.open_connections(), 0);
}

#[tokio::test]
async fn malformed_phone_reprompts_without_connecting() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;

    fleet.begin_login(OPERATOR).await;
    fleet.submit_login(OPERATOR, "acc").await.unwrap();

    let step = fleet.submit_login(OPERATOR, "0912 345").await.unwrap();
    assert!(matches!(step, FlowStep::Retry { stage: AuthStage::AwaitingPhone, .. }));
    assert_eq!(provider.open_connections(), 0);
}

#[tokio::test]
async fn flows_are_independent_per_user() {
    let provider = SimProvider::new();
    let fleet = memory_fleet(&provider).await;
    let other = UserId(2002);

    fleet.begin_login(OPERATOR).await;
    fleet.begin_login(other).await;
    fleet.submit_login(OPERATOR, "first").await.unwrap();

    assert_eq!(fleet.auth().stage(OPERATOR), Some(AuthStage::AwaitingPhone));
    assert_eq!(fleet.auth().stage(other), Some(AuthStage::AwaitingName));
    assert_eq!(fleet.auth().len(), 2);
}

#[tokio::test]
async fn cancel_during_provider_call_discards_result() {
    let provider = SimProvider::new();
    provider.set_step_delay(Duration::from_millis(100));
    let fleet = memory_fleet(&provider).await;

    fleet.begin_login(OPERATOR).await;
    fleet.submit_login(OPERATOR, "slow").await.unwrap();

    let (step, busy, cancelled) = tokio::join!(
        fleet.submit_login(OPERATOR, "+15550003"),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fleet.submit_login(OPERATOR, "+15550004").await
        },
        async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            fleet.cancel_login(OPERATOR).await
        }
    );

    assert!(matches!(busy, Err(FleetError::FlowBusy { .. })));
    assert!(cancelled);
    assert_eq!(step.unwrap(), FlowStep::Discarded);
    assert!(!fleet.auth().is_active(OPERATOR));
    assert_eq!(provider.open_connections(), 0);
}
