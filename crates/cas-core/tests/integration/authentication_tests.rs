//! Authentication manager tests: handler chains, failure aggregation and
//! the hand-off from a login to the orchestrator.

use cas_core::authentication::{
    AcceptUsersAuthenticationHandler, AllHandlersSucceededPolicy, AnyAuthenticationPolicy,
    AuthenticationError, AuthenticationManager, Credential, CredentialType, HandlerError,
};
use cas_core::clock::Clock;
use cas_core::services::Service;
use cas_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

/// Lowest cost bcrypt accepts; keeps the tests fast.
const TEST_BCRYPT_COST: u32 = 4;

fn accept_users() -> Arc<AcceptUsersAuthenticationHandler> {
    Arc::new(
        AcceptUsersAuthenticationHandler::from_plaintext(
            PRIMARY_HANDLER,
            [(TEST_USER, TEST_PASSWORD)],
            TEST_BCRYPT_COST,
        )
        .unwrap(),
    )
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::starting_now())
}

#[tokio::test]
async fn test_known_user_authenticates() -> Result<(), anyhow::Error> {
    let otp = Arc::new(
        MockAuthenticationHandler::succeeding(SECONDARY_HANDLER)
            .supporting(CredentialType::OneTimePassword),
    );
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .handler(otp.clone())
        .build();

    let authentication = manager
        .authenticate(&[Credential::username_password(TEST_USER, TEST_PASSWORD)])
        .await?;

    assert_eq!(authentication.principal.id, TEST_USER);
    assert!(authentication.satisfied_by_handler(PRIMARY_HANDLER));
    assert!(!authentication.satisfied_by_handler(SECONDARY_HANDLER));
    assert!(authentication.failures.is_empty());
    assert_eq!(otp.calls(), 0, "Unsupported handler must not be consulted");
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_reports_only_consulted_handlers() {
    let otp = Arc::new(
        MockAuthenticationHandler::succeeding(SECONDARY_HANDLER)
            .supporting(CredentialType::OneTimePassword),
    );
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .handler(otp)
        .build();

    let err = manager
        .authenticate(&[Credential::username_password(UNKNOWN_USER, TEST_PASSWORD)])
        .await
        .unwrap_err();

    let failures = err.failures().expect("failure map");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures.get(PRIMARY_HANDLER), Some(&HandlerError::AccountNotFound));
}

#[tokio::test]
async fn test_wrong_password_is_failed_login() {
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .build();

    let err = manager
        .authenticate(&[Credential::username_password(TEST_USER, "wrong")])
        .await
        .unwrap_err();

    assert_eq!(
        err.failures().and_then(|f| f.get(PRIMARY_HANDLER)),
        Some(&HandlerError::FailedLogin)
    );
}

#[tokio::test]
async fn test_no_credentials_rejected() {
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .build();

    let err = manager.authenticate(&[]).await.unwrap_err();
    assert_eq!(err, AuthenticationError::NoCredentials);
}

#[tokio::test]
async fn test_failures_do_not_stop_the_chain() -> Result<(), anyhow::Error> {
    let locked = Arc::new(MockAuthenticationHandler::failing(
        "locked-directory",
        HandlerError::AccountLocked,
    ));
    let manager = AuthenticationManager::builder(clock())
        .handler(locked.clone())
        .handler(accept_users())
        .build();

    let authentication = manager
        .authenticate(&[Credential::username_password(TEST_USER, TEST_PASSWORD)])
        .await?;

    assert_eq!(locked.calls(), 1);
    assert!(authentication.satisfied_by_handler(PRIMARY_HANDLER));
    assert_eq!(
        authentication.failures.get("locked-directory"),
        Some(&HandlerError::AccountLocked)
    );
    Ok(())
}

#[tokio::test]
async fn test_all_handlers_policy_rejects_partial_success() {
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .handler(Arc::new(MockAuthenticationHandler::failing(
            "locked-directory",
            HandlerError::AccountLocked,
        )))
        .policy(Arc::new(AllHandlersSucceededPolicy))
        .build();

    let err = manager
        .authenticate(&[Credential::username_password(TEST_USER, TEST_PASSWORD)])
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::PolicyNotSatisfied { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_reported_as_prevented() {
    let slow = Arc::new(
        MockAuthenticationHandler::succeeding("slow-directory").with_delay(Duration::from_secs(30)),
    );
    let manager = AuthenticationManager::builder(clock())
        .handler(slow)
        .handler_timeout(Duration::from_millis(100))
        .build();

    let err = manager
        .authenticate(&[Credential::username_password(TEST_USER, TEST_PASSWORD)])
        .await
        .unwrap_err();

    let failure = err
        .failures()
        .and_then(|f| f.get("slow-directory"))
        .expect("slow handler failure");
    assert!(failure.is_prevented());
    assert!(err.is_prevented());
}

#[tokio::test]
async fn test_first_success_ends_chain_unless_try_all() -> Result<(), anyhow::Error> {
    let credential = [Credential::username_password(TEST_USER, TEST_PASSWORD)];

    let secondary = Arc::new(MockAuthenticationHandler::succeeding(SECONDARY_HANDLER));
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .handler(secondary.clone())
        .build();
    let authentication = manager.authenticate(&credential).await?;
    assert_eq!(authentication.successes.len(), 1);
    assert_eq!(secondary.calls(), 0);

    let secondary = Arc::new(MockAuthenticationHandler::succeeding(SECONDARY_HANDLER));
    let manager = AuthenticationManager::builder(clock())
        .handler(accept_users())
        .handler(secondary.clone())
        .policy(Arc::new(AnyAuthenticationPolicy { try_all: true }))
        .build();
    let authentication = manager.authenticate(&credential).await?;
    assert_eq!(secondary.calls(), 1);
    assert!(authentication.satisfied_by_handler(PRIMARY_HANDLER));
    assert!(authentication.satisfied_by_handler(SECONDARY_HANDLER));
    assert_eq!(authentication.principal.id, TEST_USER);
    Ok(())
}

#[tokio::test]
async fn test_login_to_validation_round_trip() -> Result<(), anyhow::Error> {
    let harness = CasTestHarness::new();
    let manager = AuthenticationManager::builder(harness.clock.clone())
        .handler(accept_users())
        .build();

    let result = manager
        .authenticate_for(
            Some(Service::new(SERVICE_A)),
            &[Credential::username_password(TEST_USER, TEST_PASSWORD)],
        )
        .await?;
    let tgt = harness.cas.create_ticket_granting_ticket(&result).await?;
    let st = harness.grant(&tgt.id, SERVICE_A).await?;

    let assertion = harness.validate(&st.id, SERVICE_A).await?;
    assert_eq!(assertion.principal.id, TEST_USER);
    assert!(assertion
        .primary_authentication
        .satisfied_by_handler(PRIMARY_HANDLER));
    Ok(())
}
