//! Concurrent access: single-use enforcement and contended session updates.

use cas_core::services::Service;
use cas_test_utils::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validation_succeeds_once() -> Result<(), anyhow::Error> {
    let harness = Arc::new(CasTestHarness::new());

    for _ in 0..10 {
        let tgt = harness.login(TEST_USER).await?;
        let st = harness.grant(&tgt.id, SERVICE_A).await?;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let harness = Arc::clone(&harness);
                let id = st.id.clone();
                tokio::spawn(async move { harness.validate(&id, SERVICE_A).await })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            if task.await?.is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "Ticket {} validated {} times", st.id, successes);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_all_recorded() -> Result<(), anyhow::Error> {
    let harness = Arc::new(
        CasTestHarness::builder()
            .configure(|c| c.ticket_update_max_attempts = 64)
            .build(),
    );
    let tgt = harness.login(TEST_USER).await?;

    let services: Vec<String> = (0..12)
        .map(|i| format!("https://app{i}.example.org"))
        .collect();
    let tasks: Vec<_> = services
        .iter()
        .cloned()
        .map(|service| {
            let harness = Arc::clone(&harness);
            let tgt_id = tgt.id.clone();
            tokio::spawn(async move { harness.grant(&tgt_id, &service).await })
        })
        .collect();

    for task in tasks {
        task.await??;
    }

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    for service in &services {
        session.assert_tracks_service(service);
    }
    assert_eq!(session.count_of_uses, 12);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_racing_grants_leaves_no_session() -> Result<(), anyhow::Error> {
    let harness = Arc::new(CasTestHarness::new());
    let tgt = harness.login(TEST_USER).await?;

    let grants: Vec<_> = (0..8)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let tgt_id = tgt.id.clone();
            tokio::spawn(async move { harness.grant(&tgt_id, SERVICE_A).await })
        })
        .collect();
    harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?;

    for task in grants {
        // Either outcome is fine for an individual grant
        let _ = task.await?;
    }

    assert!(harness.cas.get_ticket_granting_ticket(&tgt.id).await.is_err());
    assert!(
        !harness
            .cas
            .is_authenticated_to(&tgt.id, &Service::new(SERVICE_A))
            .await?
    );
    Ok(())
}
