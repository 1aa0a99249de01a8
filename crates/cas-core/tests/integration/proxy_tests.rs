//! Proxy chains: proxy-granting tickets, proxy tickets and the assertions
//! they produce.

use cas_core::services::{ProxyPolicy, RegisteredService, Service};
use cas_core::tickets::TicketType;
use cas_test_utils::*;
use regex::Regex;

fn proxying_service() -> RegisteredService {
    RegisteredService::new(10, "Proxying portal", SERVICE_A)
        .unwrap()
        .with_proxy_policy(ProxyPolicy::Allow {
            callback_pattern: Regex::new(r"^https://proxy\.example\.org/.*$").unwrap(),
        })
}

fn proxy_harness() -> CasTestHarness {
    CasTestHarness::builder()
        .service(proxying_service())
        .service(catch_all_service().with_evaluation_order(100))
        .build()
}

fn callback_authentication() -> cas_core::authentication::AuthenticationResult {
    TestAuthenticationBuilder::new(PROXY_CALLBACK)
        .with_handler("http-based-service-credentials")
        .build_result()
}

#[tokio::test]
async fn test_proxy_chain_produces_proxied_assertion() -> Result<(), anyhow::Error> {
    let harness = proxy_harness();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let issued = harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await?;
    assert_eq!(
        TicketType::from_id(&issued.pgt_id),
        Some(TicketType::ProxyGranting)
    );
    assert_eq!(
        TicketType::from_id(&issued.pgt_iou),
        Some(TicketType::ProxyGrantingIou)
    );

    let pt = harness
        .cas
        .grant_proxy_ticket(&issued.pgt_id, &Service::new(PROXIED_SERVICE))
        .await?;
    pt.assert_ticket_type(TicketType::Proxy)
        .assert_granted_by(&issued.pgt_id)
        .assert_for_service(PROXIED_SERVICE);

    let assertion = harness.validate(&pt.id, PROXIED_SERVICE).await?;
    assert!(assertion.is_proxied());
    assert_eq!(assertion.proxies, vec![Service::new(PROXY_CALLBACK)]);
    assert_eq!(assertion.principal.id, TEST_USER);
    assert_eq!(assertion.chained_authentications.len(), 2);
    assert_eq!(assertion.chained_authentications[0].principal.id, PROXY_CALLBACK);

    // Proxy tickets are single-use too
    harness
        .validate(&pt.id, PROXIED_SERVICE)
        .await
        .assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_session_records_proxy_granting_ticket() -> Result<(), anyhow::Error> {
    let harness = proxy_harness();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let issued = harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await?;

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    assert!(session
        .granting()
        .unwrap()
        .proxy_granting_tickets
        .contains(&issued.pgt_id));

    let pgt = harness.registry.get_ticket(&issued.pgt_id).await?.unwrap();
    assert_eq!(pgt.parent_id(), Some(tgt.id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_service_without_proxy_policy_refused() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    Ok(())
}

#[tokio::test]
async fn test_callback_outside_pattern_refused() -> Result<(), anyhow::Error> {
    let harness = proxy_harness();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    harness
        .cas
        .create_proxy_granting_ticket(
            &st.id,
            &Service::new("https://attacker.example.net/callback"),
            &callback_authentication(),
        )
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    Ok(())
}

#[tokio::test]
async fn test_destroying_session_revokes_proxy_chain() -> Result<(), anyhow::Error> {
    let harness = proxy_harness();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    let issued = harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await?;
    let pt = harness
        .cas
        .grant_proxy_ticket(&issued.pgt_id, &Service::new(PROXIED_SERVICE))
        .await?;

    // TGT, ST, PGT and PT
    assert_eq!(harness.cas.destroy_ticket_granting_ticket(&tgt.id).await?, 4);

    harness
        .cas
        .grant_proxy_ticket(&issued.pgt_id, &Service::new(PROXIED_SERVICE))
        .await
        .assert_invalid_ticket();
    harness
        .validate(&pt.id, PROXIED_SERVICE)
        .await
        .assert_invalid_ticket();
    assert!(harness.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_expired_root_session_blocks_proxy_tickets() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .service(proxying_service())
        .service(catch_all_service().with_evaluation_order(100))
        .configure(|c| {
            c.tgt_max_time_to_live_secs = 60;
            c.pgt_max_time_to_live_secs = 3_600;
            c.pgt_time_to_idle_secs = 3_600;
        })
        .build();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    let issued = harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await?;

    harness.advance_secs(61);
    harness
        .cas
        .grant_proxy_ticket(&issued.pgt_id, &Service::new(PROXIED_SERVICE))
        .await
        .assert_invalid_ticket();
    Ok(())
}

#[tokio::test]
async fn test_proxy_granting_ticket_cannot_be_validated() -> Result<(), anyhow::Error> {
    let harness = proxy_harness();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    let issued = harness
        .cas
        .create_proxy_granting_ticket(&st.id, &Service::new(PROXY_CALLBACK), &callback_authentication())
        .await?;

    harness
        .validate(&issued.pgt_id, PROXIED_SERVICE)
        .await
        .assert_invalid_ticket();
    harness
        .validate(&issued.pgt_iou, PROXIED_SERVICE)
        .await
        .assert_invalid_ticket();
    Ok(())
}
