//! Registered service policy tests: registration, access strategy,
//! required handlers and attribute release.

use cas_core::authentication::AuthenticationError;
use cas_core::errors::CasError;
use cas_core::mfa::RequestContext;
use cas_core::services::{AccessStrategy, AttributeReleasePolicy, RegisteredService, Service};
use cas_test_utils::*;
use std::collections::BTreeMap;

fn service_a() -> RegisteredService {
    RegisteredService::new(10, "Service A", SERVICE_A).unwrap()
}

#[tokio::test]
async fn test_unregistered_service_refused() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder().service(service_a()).build();
    let tgt = harness.login(TEST_USER).await?;

    harness.grant(&tgt.id, SERVICE_A).await?;
    harness
        .grant(&tgt.id, SERVICE_B)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");

    // A refused grant leaves nothing behind on the session
    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    assert_eq!(session.granting().unwrap().services.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_service_pattern_is_anchored() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder().service(service_a()).build();
    let tgt = harness.login(TEST_USER).await?;

    harness
        .grant(&tgt.id, &format!("{SERVICE_A}.evil.example"))
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    Ok(())
}

#[tokio::test]
async fn test_lower_evaluation_order_wins() -> Result<(), anyhow::Error> {
    let disabled = service_a()
        .with_evaluation_order(0)
        .with_access_strategy(AccessStrategy {
            enabled: false,
            ..AccessStrategy::default()
        });
    let harness = CasTestHarness::builder()
        .service(catch_all_service().with_evaluation_order(100))
        .service(disabled)
        .build();
    let tgt = harness.login(TEST_USER).await?;

    harness
        .grant(&tgt.id, SERVICE_A)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    harness.grant(&tgt.id, SERVICE_B).await?;
    Ok(())
}

#[tokio::test]
async fn test_disabled_service_refused() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    // Disabled between grant and validation
    harness
        .services
        .save(catch_all_service().with_access_strategy(AccessStrategy {
            enabled: false,
            ..AccessStrategy::default()
        }))
        .await;

    harness
        .validate(&st.id, SERVICE_A)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    Ok(())
}

#[tokio::test]
async fn test_required_attributes_gate_access() -> Result<(), anyhow::Error> {
    let mut required = BTreeMap::new();
    required.insert("memberOf".to_string(), vec!["faculty".to_string()]);
    let harness = CasTestHarness::builder()
        .service(service_a().with_access_strategy(AccessStrategy {
            required_attributes: required,
            ..AccessStrategy::default()
        }))
        .build();

    let student = TestAuthenticationBuilder::new(OTHER_USER)
        .with_principal_attribute("memberOf", "student")
        .build_result();
    let tgt = harness.cas.create_ticket_granting_ticket(&student).await?;
    harness
        .grant(&tgt.id, SERVICE_A)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");

    let faculty = TestAuthenticationBuilder::new(TEST_USER)
        .with_principal_attribute("memberOf", "faculty")
        .build_result();
    let tgt = harness.cas.create_ticket_granting_ticket(&faculty).await?;
    harness.grant(&tgt.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_login_for_forbidden_service_creates_no_session() -> Result<(), anyhow::Error> {
    let mut required = BTreeMap::new();
    required.insert("memberOf".to_string(), Vec::new());
    let harness = CasTestHarness::builder()
        .service(service_a().with_access_strategy(AccessStrategy {
            required_attributes: required,
            ..AccessStrategy::default()
        }))
        .build();

    let result = TestAuthenticationBuilder::new(TEST_USER)
        .for_service(SERVICE_A)
        .build_result();
    harness
        .cas
        .create_ticket_granting_ticket(&result)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");
    assert_eq!(harness.cas.count_sessions_for(TEST_USER).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_sso_opt_out_requires_credentials() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .service(service_a().with_access_strategy(AccessStrategy {
            sso_enabled: false,
            ..AccessStrategy::default()
        }))
        .build();
    let tgt = harness.login(TEST_USER).await?;

    harness
        .grant(&tgt.id, SERVICE_A)
        .await
        .assert_error_code("UNAUTHORIZED_SERVICE");

    let renewed = TestAuthenticationBuilder::new(TEST_USER).build_result();
    let st = harness
        .cas
        .grant_service_ticket(
            &tgt.id,
            &Service::new(SERVICE_A),
            Some(&renewed),
            &RequestContext::new(),
        )
        .await?;
    assert!(harness.validate(&st.id, SERVICE_A).await?.from_new_login);
    Ok(())
}

#[tokio::test]
async fn test_required_handlers_enforced() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .service(service_a().with_required_handlers([PRIMARY_HANDLER, SECONDARY_HANDLER]))
        .build();
    let tgt = harness.login(TEST_USER).await?;

    let err = harness.grant(&tgt.id, SERVICE_A).await.unwrap_err();
    assert_eq!(
        err,
        CasError::UnsatisfiedAuthenticationPolicy {
            required: vec![SECONDARY_HANDLER.to_string()]
        }
    );

    // Step up with both handlers; the session keeps the stronger authentication
    let both = TestAuthenticationBuilder::new(TEST_USER)
        .with_handler(PRIMARY_HANDLER)
        .with_handler(SECONDARY_HANDLER)
        .build_result();
    harness
        .cas
        .grant_service_ticket(&tgt.id, &Service::new(SERVICE_A), Some(&both), &RequestContext::new())
        .await?;
    harness.grant(&tgt.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_mixed_principal_rejected() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let tgt = harness.login(TEST_USER).await?;

    let other = TestAuthenticationBuilder::new(OTHER_USER).build_result();
    let err = harness
        .cas
        .grant_service_ticket(&tgt.id, &Service::new(SERVICE_A), Some(&other), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err, CasError::Authentication(AuthenticationError::MixedPrincipal));

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    session.assert_principal(TEST_USER);
    Ok(())
}

#[tokio::test]
async fn test_attribute_release_and_username_attribute() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::builder()
        .service(
            service_a()
                .with_attribute_release(AttributeReleasePolicy::ReturnAllowed(vec![
                    "mail".to_string(),
                ]))
                .with_username_attribute("uid"),
        )
        .build();
    let result = TestAuthenticationBuilder::new(TEST_USER)
        .with_principal_attribute("mail", "casuser@example.org")
        .with_principal_attribute("uid", "cu1234")
        .with_principal_attribute("ssn", "redacted")
        .build_result();
    let tgt = harness.cas.create_ticket_granting_ticket(&result).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let assertion = harness.validate(&st.id, SERVICE_A).await?;
    assert_eq!(assertion.principal.id, "cu1234");
    assert_eq!(
        assertion.principal.attribute("mail"),
        Some(&["casuser@example.org".to_string()][..])
    );
    assert!(assertion.principal.attribute("ssn").is_none());
    assert!(assertion.principal.attribute("uid").is_none());

    // The primary authentication keeps the full principal
    assert_eq!(assertion.primary_authentication.principal.id, TEST_USER);
    Ok(())
}
