//! Ticket lifecycle tests: issuing, validating, expiring and destroying
//! tickets through the orchestrator.

use cas_core::services::Service;
use cas_core::tickets::TicketType;
use cas_test_utils::*;
use std::collections::HashSet;

// ============================================================================
// Issuing
// ============================================================================

#[tokio::test]
async fn test_ticket_ids_are_unique_and_well_formed() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let mut seen = HashSet::new();

    for _ in 0..100 {
        let tgt = harness.login(TEST_USER).await?;
        tgt.assert_ticket_granting_ticket().assert_well_formed_id();
        assert!(seen.insert(tgt.id.clone()), "Duplicate ticket id {}", tgt.id);

        let st = harness.grant(&tgt.id, SERVICE_A).await?;
        st.assert_service_ticket().assert_well_formed_id();
        assert!(seen.insert(st.id.clone()), "Duplicate ticket id {}", st.id);
    }
    Ok(())
}

#[tokio::test]
async fn test_ticket_ids_carry_configured_suffix() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| c.ticket_id_suffix = Some("node-1".to_string()))
        .build();

    let tgt = harness.login(TEST_USER).await?;
    assert!(tgt.id.ends_with("-node-1"), "Unexpected id {}", tgt.id);
    assert_eq!(TicketType::from_id(&tgt.id), Some(TicketType::TicketGranting));
    Ok(())
}

#[tokio::test]
async fn test_grant_records_service_on_session() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;

    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    st.assert_granted_by(&tgt.id).assert_for_service(SERVICE_A);

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    session
        .assert_principal(TEST_USER)
        .assert_tracks_service(SERVICE_A);
    assert_eq!(session.count_of_uses, 1);
    assert!(
        harness
            .cas
            .is_authenticated_to(&tgt.id, &Service::new(SERVICE_A))
            .await?
    );
    assert!(
        !harness
            .cas
            .is_authenticated_to(&tgt.id, &Service::new(SERVICE_B))
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn test_first_grant_is_from_new_login() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;

    let first = harness.grant(&tgt.id, SERVICE_A).await?;
    let second = harness.grant(&tgt.id, SERVICE_B).await?;

    assert!(harness.validate(&first.id, SERVICE_A).await?.from_new_login);
    assert!(!harness.validate(&second.id, SERVICE_B).await?.from_new_login);
    Ok(())
}

#[tokio::test]
async fn test_only_most_recent_ticket_tracked_per_service() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| c.only_track_most_recent_session = true)
        .build();
    let tgt = harness.login(TEST_USER).await?;

    let first = harness.grant(&tgt.id, SERVICE_A).await?;
    let second = harness.grant(&tgt.id, SERVICE_A).await?;

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    let tracked = &session.granting().unwrap().services[SERVICE_A];
    assert_eq!(tracked, &vec![second.id.clone()]);

    // Replaced tickets are revoked, the latest still validates
    assert!(!harness.exists(&first.id).await);
    harness
        .validate(&first.id, SERVICE_A)
        .await
        .assert_invalid_ticket();
    harness.validate(&second.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_all_tickets_tracked_when_configured() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| c.only_track_most_recent_session = false)
        .build();
    let tgt = harness.login(TEST_USER).await?;

    let first = harness.grant(&tgt.id, SERVICE_A).await?;
    let second = harness.grant(&tgt.id, SERVICE_A).await?;

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    let tracked = &session.granting().unwrap().services[SERVICE_A];
    assert_eq!(tracked, &vec![first.id, second.id]);
    Ok(())
}

#[tokio::test]
async fn test_empty_authentication_cannot_start_session() {
    let harness = CasTestHarness::new();
    let result = TestAuthenticationBuilder::new(TEST_USER)
        .without_handlers()
        .build_result();

    harness
        .cas
        .create_ticket_granting_ticket(&result)
        .await
        .assert_error_code("AUTHENTICATION_FAILED");
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_service_ticket_validates_once() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let assertion = harness.validate(&st.id, SERVICE_A).await?;
    assert_eq!(assertion.principal.id, TEST_USER);
    assert_eq!(assertion.service, Service::new(SERVICE_A));
    assert!(!assertion.is_proxied());
    assert_eq!(assertion.chained_authentications.len(), 1);

    harness.validate(&st.id, SERVICE_A).await.assert_invalid_ticket();
    assert!(!harness.exists(&st.id).await);
    Ok(())
}

#[tokio::test]
async fn test_service_mismatch_spends_ticket() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness.validate(&st.id, SERVICE_B).await.assert_invalid_ticket();
    harness.validate(&st.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_fragment_ignored_when_matching_service() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let assertion = harness
        .validate(&st.id, &format!("{SERVICE_A}#section"))
        .await?;
    assert_eq!(assertion.principal.id, TEST_USER);
    Ok(())
}

#[tokio::test]
async fn test_wrong_ticket_type_rejected() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;

    // A TGT is not a service ticket
    harness.validate(&tgt.id, SERVICE_A).await.assert_invalid_ticket();
    harness
        .validate("ST-1-doesnotexist", SERVICE_A)
        .await
        .assert_invalid_ticket();
    harness.validate("garbage", SERVICE_A).await.assert_invalid_ticket();

    // The session survives a rejected validation
    harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    Ok(())
}

#[tokio::test]
async fn test_service_ticket_with_multiple_uses() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| c.st_number_of_uses = 2)
        .build();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness.validate(&st.id, SERVICE_A).await?;
    harness.validate(&st.id, SERVICE_A).await?;
    harness.validate(&st.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

// ============================================================================
// Expiration
// ============================================================================

#[tokio::test]
async fn test_session_hard_ceiling() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| {
            c.tgt_max_time_to_live_secs = 2;
            c.tgt_time_to_idle_secs = 10;
        })
        .build();
    let tgt = harness.login(TEST_USER).await?;

    harness.advance_secs(1);
    harness.grant(&tgt.id, SERVICE_A).await?;

    harness.advance_secs(2);
    harness.grant(&tgt.id, SERVICE_A).await.assert_invalid_ticket();
    assert!(harness.cas.get_ticket_granting_ticket(&tgt.id).await.is_err());
    assert!(!harness.exists(&tgt.id).await);
    Ok(())
}

#[tokio::test]
async fn test_session_idle_timeout_reset_by_use() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| {
            c.tgt_max_time_to_live_secs = 3_600;
            c.tgt_time_to_idle_secs = 10;
        })
        .build();
    let tgt = harness.login(TEST_USER).await?;

    harness.advance_secs(8);
    harness.grant(&tgt.id, SERVICE_A).await?;
    harness.advance_secs(8);
    harness.grant(&tgt.id, SERVICE_A).await?;

    harness.advance_secs(11);
    harness.grant(&tgt.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_remember_me_session_outlives_default_ceiling() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| {
            c.tgt_max_time_to_live_secs = 2;
            c.tgt_time_to_idle_secs = 2;
            c.tgt_remember_me_time_to_live_secs = 100;
        })
        .build();
    let result = TestAuthenticationBuilder::new(TEST_USER)
        .remember_me()
        .build_result();
    let tgt = harness.cas.create_ticket_granting_ticket(&result).await?;

    harness.advance_secs(50);
    harness.grant(&tgt.id, SERVICE_A).await?;

    harness.advance_secs(51);
    harness.grant(&tgt.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_service_ticket_time_to_kill() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| c.st_time_to_kill_secs = 10)
        .build();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness.advance_secs(11);
    harness.validate(&st.id, SERVICE_A).await.assert_invalid_ticket();

    // The session itself is still good
    harness.grant(&tgt.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_expired_session_invalidates_outstanding_service_ticket() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .configure(|c| {
            c.tgt_max_time_to_live_secs = 5;
            c.st_time_to_kill_secs = 60;
        })
        .build();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness.advance_secs(6);
    harness.validate(&st.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

// ============================================================================
// Destruction
// ============================================================================

#[tokio::test]
async fn test_destroy_cascades_to_service_tickets() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st_a = harness.grant(&tgt.id, SERVICE_A).await?;
    let st_b = harness.grant(&tgt.id, SERVICE_B).await?;

    let removed = harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?;
    assert_eq!(removed, 3);

    assert!(!harness.exists(&tgt.id).await);
    harness.validate(&st_a.id, SERVICE_A).await.assert_invalid_ticket();
    harness.validate(&st_b.id, SERVICE_B).await.assert_invalid_ticket();
    harness.grant(&tgt.id, SERVICE_A).await.assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_destroy_leaves_no_ticket_for_repeated_service() -> Result<(), anyhow::Error> {
    // Default configuration tracks only the latest ticket per service
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let s1 = harness.grant(&tgt.id, SERVICE_A).await?;
    let s2 = harness.grant(&tgt.id, SERVICE_A).await?;

    harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?;

    assert!(harness.registry.get_ticket(&s1.id).await?.is_none());
    assert!(harness.registry.get_ticket(&s2.id).await?.is_none());
    assert!(harness.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_destroy_is_idempotent() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;

    assert_eq!(harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?, 1);
    assert_eq!(harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?, 0);
    assert_eq!(
        harness
            .cas
            .destroy_ticket_granting_ticket("TGT-99-unknown")
            .await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn test_destroy_ignores_non_session_ids() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    assert_eq!(harness.cas.destroy_ticket_granting_ticket(&st.id).await?, 0);
    assert!(harness.exists(&st.id).await);
    Ok(())
}

#[tokio::test]
async fn test_session_count_per_principal() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let first = harness.login(TEST_USER).await?;
    harness.login(TEST_USER).await?;
    harness.login(OTHER_USER).await?;

    assert_eq!(harness.cas.count_sessions_for(TEST_USER).await?, 2);
    assert_eq!(harness.cas.count_sessions_for(OTHER_USER).await?, 1);

    harness.cas.destroy_ticket_granting_ticket(&first.id).await?;
    assert_eq!(harness.cas.count_sessions_for(TEST_USER).await?, 1);
    assert_eq!(harness.cas.count_sessions_for(UNKNOWN_USER).await?, 0);
    Ok(())
}
