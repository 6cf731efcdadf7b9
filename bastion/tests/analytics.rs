#![cfg(feature = "sqlite")]

use bastion::{
    Bastion, BastionBuilder, LockRequest, LockType, LoginAttemptRequest, NewSecurityEvent,
    PasswordHashingConfig, SqliteRepositoryProvider, ThreatLevel, TimeWindow, UserId,
};
use chrono::Duration;

const TARGET: &str = "heidi@example.com";
const GOOD_IP: &str = "198.51.100.10";
const BAD_IP: &str = "203.0.113.66";

async fn setup() -> Bastion<SqliteRepositoryProvider> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    BastionBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .with_password_hashing(PasswordHashingConfig::insecure_fast())
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Bastion")
}

/// Two successful logins, three failures against one account and an admin lock.
async fn seed(bastion: &Bastion<SqliteRepositoryProvider>, user: &UserId) {
    for _ in 0..2 {
        bastion
            .record_login(LoginAttemptRequest::success(TARGET, GOOD_IP).user(user.clone()))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        bastion
            .record_login(
                LoginAttemptRequest::failure(TARGET, BAD_IP, "invalid password").user(user.clone()),
            )
            .await
            .unwrap();
    }
    bastion
        .lock_account(LockRequest::new(user.clone(), LockType::AdminAction).reason("Under review"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_dashboard() {
    let bastion = setup().await;

    let dashboard = bastion
        .security_dashboard(&TimeWindow::last(Duration::hours(1)))
        .await
        .unwrap();
    assert_eq!(dashboard.total_attempts, 0);
    assert_eq!(dashboard.failure_rate, 0.0);
    assert_eq!(dashboard.total_events, 0);
    assert_eq!(dashboard.active_lockouts, 0);
}

#[tokio::test]
async fn test_dashboard_and_report() {
    let bastion = setup().await;
    let user = UserId::new("usr_heidi");
    seed(&bastion, &user).await;

    let window = TimeWindow::last(Duration::hours(1));
    let dashboard = bastion.security_dashboard(&window).await.unwrap();
    assert_eq!(dashboard.total_attempts, 5);
    assert_eq!(dashboard.successful_logins, 2);
    assert_eq!(dashboard.failed_logins, 3);
    assert_eq!(dashboard.unique_ip_addresses, 2);
    assert!((dashboard.failure_rate - 0.6).abs() < 1e-9);
    assert_eq!(dashboard.lockouts_created, 1);
    assert_eq!(dashboard.active_lockouts, 1);
    assert_eq!(dashboard.events_by_type.get("account_locked"), Some(&1));

    let report = bastion.security_report(&window).await.unwrap();
    assert_eq!(report.top_targeted_accounts[0], (TARGET.to_string(), 3));
    assert_eq!(report.top_failing_ip_addresses[0], (BAD_IP.to_string(), 3));
    assert_eq!(report.brute_force_detections, 0);
    assert_eq!(report.dashboard, dashboard);
}

#[tokio::test]
async fn test_risk_score_reflects_failures_events_and_lock() {
    let bastion = setup().await;
    let user = UserId::new("usr_heidi");
    seed(&bastion, &user).await;

    let window = TimeWindow::last(Duration::hours(1));
    let risk = bastion.risk_score(&user, &window).await.unwrap();
    // 3 failures, one unresolved medium event, an active lock
    assert!(risk.score > 0.44 && risk.score < 0.46, "score {}", risk.score);
    assert_eq!(risk.level, ThreatLevel::Medium);
    assert_eq!(risk.factors.len(), 3);

    let quiet = bastion
        .risk_score(&UserId::new("usr_nobody"), &window)
        .await
        .unwrap();
    assert_eq!(quiet.score, 0.0);
    assert_eq!(quiet.level, ThreatLevel::Low);
    assert!(quiet.factors.is_empty());
}

#[tokio::test]
async fn test_resolving_events_is_terminal() {
    let bastion = setup().await;
    let operator = UserId::new("usr_operator");

    let event = bastion
        .log_security_event(
            NewSecurityEvent::new("suspicious_login", ThreatLevel::High, "Impossible travel")
                .ip_address(BAD_IP),
        )
        .await
        .unwrap();
    assert!(!event.is_resolved);

    let resolved = bastion
        .resolve_security_event(&event.id, &operator, Some("Confirmed with user".to_string()))
        .await
        .unwrap();
    assert!(resolved.is_resolved);
    assert_eq!(resolved.resolved_by, Some(operator.clone()));

    let err = bastion
        .resolve_security_event(&event.id, &UserId::new("usr_other"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), bastion::ErrorKind::Conflict);

    let stored = bastion.get_security_event(&event.id).await.unwrap();
    assert_eq!(stored.resolved_by, Some(operator));
    assert_eq!(stored.resolution_notes.as_deref(), Some("Confirmed with user"));
}
