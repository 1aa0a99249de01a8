//! Multifactor enforcement through service ticket grants.

use cas_core::clock::Clock;
use cas_core::errors::CasError;
use cas_core::mfa::{
    AuthenticationEventRepository, FailureMode, GlobalTrigger, InMemoryAuthenticationEventRepository,
    IpAddressRiskCalculator, MultifactorEngine, MultifactorProviderRegistry,
    PrincipalAttributeBypass, RegisteredServiceTrigger, RequestContext, RequestParameterTrigger,
    RiskBasedTrigger, UserAgentRiskCalculator,
};
use cas_core::services::{MultifactorPolicy, RegisteredService, Service};
use cas_test_utils::*;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn service_requiring(provider: &str, failure_mode: FailureMode) -> RegisteredService {
    RegisteredService::new(10, "Protected", SERVICE_A)
        .unwrap()
        .with_multifactor_policy(MultifactorPolicy {
            providers: vec![provider.to_string()],
            failure_mode,
            ..MultifactorPolicy::default()
        })
}

fn engine_for(provider: Arc<MockMultifactorProvider>) -> MultifactorEngine {
    MultifactorEngine::builder(MultifactorProviderRegistry::new().with_provider(provider))
        .trigger(Arc::new(RegisteredServiceTrigger::new()))
        .global_failure_mode(FailureMode::Closed)
        .build()
}

fn harness_with(service: RegisteredService, engine: MultifactorEngine) -> CasTestHarness {
    CasTestHarness::builder()
        .service(service)
        .service(catch_all_service().with_evaluation_order(100))
        .multifactor(engine)
        .build()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_available_provider_requires_step_up() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO));
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Closed),
        engine_for(duo.clone()),
    );
    let tgt = harness.login(TEST_USER).await?;

    let err = harness.grant(&tgt.id, SERVICE_A).await.unwrap_err();
    assert_eq!(
        err,
        CasError::MultifactorRequired {
            provider: MFA_DUO.to_string()
        }
    );
    assert_eq!(duo.availability_checks(), 1);

    // Services without a policy are unaffected
    harness.grant(&tgt.id, SERVICE_B).await?;
    Ok(())
}

#[tokio::test]
async fn test_step_up_satisfies_session() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO));
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Closed),
        engine_for(duo.clone()),
    );
    let tgt = harness.login(TEST_USER).await?;

    let stepped_up = TestAuthenticationBuilder::new(TEST_USER)
        .with_provider(MFA_DUO)
        .build_result();
    harness
        .cas
        .grant_service_ticket(
            &tgt.id,
            &Service::new(SERVICE_A),
            Some(&stepped_up),
            &RequestContext::new(),
        )
        .await?;

    // The session now carries the provider; no further step-up needed
    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    let assertion = harness.validate(&st.id, SERVICE_A).await?;
    assert!(assertion.primary_authentication.satisfied_by_provider(MFA_DUO));
    assert_eq!(duo.availability_checks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_provider_fails_closed() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO).unavailable());
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Closed),
        engine_for(duo),
    );
    let tgt = harness.login(TEST_USER).await?;

    let err = harness.grant(&tgt.id, SERVICE_A).await.unwrap_err();
    assert!(
        matches!(&err, CasError::MultifactorFailed { provider: Some(p), .. } if p == MFA_DUO),
        "Unexpected error: {err:?}"
    );

    let session = harness.cas.get_ticket_granting_ticket(&tgt.id).await?;
    assert!(session.granting().unwrap().services.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unavailable_provider_fails_open() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO).unavailable());
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Open),
        engine_for(duo),
    );
    let tgt = harness.login(TEST_USER).await?;

    let st = harness.grant(&tgt.id, SERVICE_A).await?;
    let assertion = harness.validate(&st.id, SERVICE_A).await?;
    assert!(!assertion.primary_authentication.satisfied_by_provider(MFA_DUO));
    Ok(())
}

#[tokio::test]
async fn test_unavailable_provider_phantom_continues() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO).unavailable());
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Phantom),
        engine_for(duo),
    );
    let tgt = harness.login(TEST_USER).await?;

    harness.grant(&tgt.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_provider_failure_mode_used_when_service_undefined() -> Result<(), anyhow::Error> {
    let duo = Arc::new(
        MockMultifactorProvider::new(MFA_DUO)
            .with_failure_mode(FailureMode::Open)
            .unavailable(),
    );
    let harness = harness_with(
        service_requiring(MFA_DUO, FailureMode::Undefined),
        engine_for(duo.clone()),
    );
    let tgt = harness.login(TEST_USER).await?;

    harness.grant(&tgt.id, SERVICE_A).await?;

    // Recovered provider is enforced again
    duo.set_available(true);
    harness
        .grant(&tgt.id, SERVICE_A)
        .await
        .assert_error_code("MULTIFACTOR_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn test_bypass_skips_provider() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO));
    let engine = MultifactorEngine::builder(MultifactorProviderRegistry::new().with_provider(duo.clone()))
        .trigger(Arc::new(RegisteredServiceTrigger::new()))
        .bypass(Arc::new(
            PrincipalAttributeBypass::matching("affiliation", "^guest$").unwrap(),
        ))
        .build();
    let harness = harness_with(service_requiring(MFA_DUO, FailureMode::Closed), engine);

    let guest = TestAuthenticationBuilder::new(OTHER_USER)
        .with_principal_attribute("affiliation", "guest")
        .build_result();
    let tgt = harness.cas.create_ticket_granting_ticket(&guest).await?;
    harness.grant(&tgt.id, SERVICE_A).await?;
    assert_eq!(duo.availability_checks(), 0);

    let staff = harness.login(TEST_USER).await?;
    harness
        .grant(&staff.id, SERVICE_A)
        .await
        .assert_error_code("MULTIFACTOR_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn test_service_bypass_flag_disables_policy() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO));
    let service = RegisteredService::new(10, "Protected", SERVICE_A)
        .unwrap()
        .with_multifactor_policy(MultifactorPolicy {
            providers: vec![MFA_DUO.to_string()],
            bypass_enabled: true,
            ..MultifactorPolicy::default()
        });
    let harness = harness_with(service, engine_for(duo));
    let tgt = harness.login(TEST_USER).await?;

    harness.grant(&tgt.id, SERVICE_A).await?;
    Ok(())
}

#[tokio::test]
async fn test_request_parameter_selects_provider() -> Result<(), anyhow::Error> {
    let totp = Arc::new(MockMultifactorProvider::new(MFA_TOTP));
    let engine = MultifactorEngine::builder(MultifactorProviderRegistry::new().with_provider(totp))
        .trigger(Arc::new(RequestParameterTrigger::default()))
        .build();
    let harness = CasTestHarness::builder().multifactor(engine).build();
    let tgt = harness.login(TEST_USER).await?;

    harness.grant(&tgt.id, SERVICE_A).await?;

    let context = RequestContext::new().with_parameter("authn_method", MFA_TOTP);
    let err = harness
        .cas
        .grant_service_ticket(&tgt.id, &Service::new(SERVICE_A), None, &context)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CasError::MultifactorRequired {
            provider: MFA_TOTP.to_string()
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_provider_reported() -> Result<(), anyhow::Error> {
    let engine = MultifactorEngine::builder(MultifactorProviderRegistry::new())
        .trigger(Arc::new(GlobalTrigger::new(MFA_WEBAUTHN)))
        .build();
    let harness = CasTestHarness::builder().multifactor(engine).build();
    let tgt = harness.login(TEST_USER).await?;

    harness
        .grant(&tgt.id, SERVICE_A)
        .await
        .assert_error_code("MULTIFACTOR_FAILED");
    Ok(())
}

#[tokio::test]
async fn test_risk_history_built_from_completed_logins() -> Result<(), anyhow::Error> {
    let duo = Arc::new(MockMultifactorProvider::new(MFA_DUO));
    let events = Arc::new(InMemoryAuthenticationEventRepository::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let trigger = RiskBasedTrigger::new(events.clone(), 0.5, MFA_DUO, clock)
        .with_calculator(IpAddressRiskCalculator)
        .with_calculator(UserAgentRiskCalculator);
    let engine = MultifactorEngine::builder(MultifactorProviderRegistry::new().with_provider(duo))
        .trigger(Arc::new(trigger))
        .build();
    let harness = CasTestHarness::builder()
        .multifactor(engine)
        .authentication_events(events.clone())
        .build();

    let office = RequestContext::new()
        .with_remote_address("192.0.2.10")
        .with_user_agent("Firefox/128.0");

    // No history yet: the first login must step up
    let first = harness.login(TEST_USER).await?;
    harness
        .grant_from(&first.id, SERVICE_A, &office)
        .await
        .assert_error_code("MULTIFACTOR_REQUIRED");
    assert!(events.events_for(TEST_USER).await.is_empty());

    let stepped_up = TestAuthenticationBuilder::new(TEST_USER)
        .with_provider(MFA_DUO)
        .build_result();
    harness
        .cas
        .grant_service_ticket(&first.id, &Service::new(SERVICE_A), Some(&stepped_up), &office)
        .await?;
    assert_eq!(events.events_for(TEST_USER).await.len(), 1);

    // Same address and agent: low risk, no step-up
    let second = harness.login(TEST_USER).await?;
    harness.grant_from(&second.id, SERVICE_A, &office).await?;

    // Unfamiliar address and agent: step-up again
    let elsewhere = RequestContext::new()
        .with_remote_address("203.0.113.77")
        .with_user_agent("curl/8.5");
    let third = harness.login(TEST_USER).await?;
    harness
        .grant_from(&third.id, SERVICE_A, &elsewhere)
        .await
        .assert_error_code("MULTIFACTOR_REQUIRED");
    Ok(())
}
