//! End-to-end tests for the login gate and attempt recording
#![cfg(feature = "sqlite")]

use bastion::{
    Bastion, BastionBuilder, BruteForceConfig, DetectionOutcome, DeviceRegistration,
    DeviceStatus, ErrorKind, LockType, LockoutConfig, LoginAttemptRequest, LoginCheck,
    PasswordHashingConfig, SecurityEventQuery, SqliteRepositoryProvider, ThreatLevel, UserId,
};

const EMAIL: &str = "carol@example.com";
const IP: &str = "203.0.113.7";

async fn setup(lockout: LockoutConfig, brute_force: BruteForceConfig) -> Bastion<SqliteRepositoryProvider> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    BastionBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .with_lockout(lockout)
        .with_brute_force(brute_force)
        .with_password_hashing(PasswordHashingConfig::insecure_fast())
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Bastion")
}

async fn record_failures(bastion: &Bastion<SqliteRepositoryProvider>, user: Option<&UserId>, count: usize) {
    for _ in 0..count {
        let mut request = LoginAttemptRequest::failure(EMAIL, IP, "invalid password");
        if let Some(user) = user {
            request = request.user(user.clone());
        }
        bastion.record_login(request).await.unwrap();
    }
}

#[tokio::test]
async fn test_gate_denies_once_attempts_are_exhausted() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;

    let gate = bastion.check_login(&LoginCheck::new(EMAIL, IP)).await.unwrap();
    assert!(gate.is_allowed);
    assert_eq!(gate.remaining_attempts, 5);

    record_failures(&bastion, None, 5).await;

    let gate = bastion.check_login(&LoginCheck::new(EMAIL, IP)).await.unwrap();
    assert!(!gate.is_allowed);
    assert!(!gate.account_locked);
    assert_eq!(gate.remaining_attempts, 0);
    assert!(gate.reason.is_some());

    let err = gate.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyState);

    // Other credentials from other addresses are unaffected
    let other = bastion
        .check_login(&LoginCheck::new("dave@example.com", "198.51.100.20"))
        .await
        .unwrap();
    assert!(other.is_allowed);
    assert_eq!(other.remaining_attempts, 5);
}

#[tokio::test]
async fn test_gate_without_auto_lock_never_creates_lockouts() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;
    let user = UserId::new("usr_carol");

    record_failures(&bastion, Some(&user), 6).await;

    let status = bastion.check_account_lockout(&user).await.unwrap();
    assert!(!status.is_locked);
}

#[tokio::test]
async fn test_auto_lock_on_exhausted_attempts() {
    let bastion = setup(
        LockoutConfig::default().auto_lock_on_threshold(true),
        BruteForceConfig::default(),
    )
    .await;
    let user = UserId::new("usr_carol");

    for attempt in 1..=5 {
        let record = bastion
            .record_login(
                LoginAttemptRequest::failure(EMAIL, IP, "invalid password").user(user.clone()),
            )
            .await
            .unwrap();
        if attempt < 5 {
            assert!(record.recorded.lockout.is_none());
        } else {
            let lockout = record.recorded.lockout.expect("fifth failure should lock");
            assert_eq!(lockout.lock_type, LockType::FailedLogin);
            assert!(lockout.unlocks_at.is_some());
        }
    }

    // A further failure while locked does not stack a second lockout
    let record = bastion
        .record_login(LoginAttemptRequest::failure(EMAIL, IP, "invalid password").user(user.clone()))
        .await
        .unwrap();
    assert!(record.recorded.lockout.is_none());

    let gate = bastion
        .check_login(&LoginCheck::new(EMAIL, IP).user(user.clone()))
        .await
        .unwrap();
    assert!(!gate.is_allowed);
    assert!(gate.account_locked);
    assert!(gate.unlocks_at.is_some());
    assert!(gate.threat_level >= ThreatLevel::Medium);

    let locked_events = bastion
        .list_security_events(&SecurityEventQuery {
            user_id: Some(user.clone()),
            event_type: Some("account_locked".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(locked_events.len(), 1);

    let admin = UserId::new("usr_admin");
    let unlocked = bastion.unlock_account(&user, Some(&admin)).await.unwrap();
    assert!(!unlocked.is_active);
    assert_eq!(unlocked.unlocked_by, Some(admin));
    assert!(!bastion.check_account_lockout(&user).await.unwrap().is_locked);
}

#[tokio::test]
async fn test_brute_force_is_reported_once_per_cooldown() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default().threshold(3)).await;

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let record = bastion
            .record_login(LoginAttemptRequest::failure(EMAIL, IP, "invalid password"))
            .await
            .unwrap();
        outcomes.push(record.recorded.detection.expect("failures run detection"));
    }

    assert_eq!(
        outcomes[0],
        DetectionOutcome::BelowThreshold { attempt_count: 1 }
    );
    assert_eq!(
        outcomes[1],
        DetectionOutcome::BelowThreshold { attempt_count: 2 }
    );
    assert!(outcomes[2].is_detected());
    assert!(matches!(
        outcomes[3],
        DetectionOutcome::Suppressed { attempt_count: 4, .. }
    ));

    let events = bastion
        .list_security_events(&SecurityEventQuery {
            event_type: Some("brute_force_detected".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].threat_level, ThreatLevel::High);
}

#[tokio::test]
async fn test_letter_case_variants_share_one_credential() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;
    let variants = [
        "carol@example.com",
        "Carol@example.com",
        "CAROL@EXAMPLE.COM",
        " carol@Example.com",
        "cArOl@example.COM ",
    ];

    for i in 0..12 {
        let ip = format!("198.51.100.{}", i + 1);
        let mut request = LoginAttemptRequest::failure(EMAIL, &ip, "invalid password");
        // Bypass the constructor so the recording path normalizes on its own
        request.email = variants[i % variants.len()].to_string();
        let record = bastion.record_login(request).await.unwrap();
        assert_eq!(record.recorded.attempt.email, EMAIL);
    }

    let gate = bastion
        .check_login(&LoginCheck::new("Carol@Example.COM", "192.0.2.44"))
        .await
        .unwrap();
    assert!(!gate.is_allowed);
    assert_eq!(gate.remaining_attempts, 0);

    let events = bastion
        .list_security_events(&SecurityEventQuery {
            event_type: Some("brute_force_detected".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_successful_logins_track_devices() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;
    let user = UserId::new("usr_erin");
    let success = || {
        LoginAttemptRequest::success("erin@example.com", IP)
            .user(user.clone())
            .device_fingerprint("fp-work-laptop")
    };

    // Unknown devices are reported, not registered
    let record = bastion.record_login(success()).await.unwrap();
    let decision = record.device.clone().expect("successful login with a fingerprint");
    assert!(!decision.is_trusted);
    assert!(decision.device.is_none());
    assert!(record.requires_mfa());
    assert!(bastion.list_devices(&user).await.unwrap().is_empty());

    let registered = bastion
        .register_device(
            DeviceRegistration::new(user.clone(), "fp-work-laptop", "Work laptop")
                .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0")
                .ip_address(IP),
        )
        .await
        .unwrap();
    assert_eq!(registered.status, DeviceStatus::Trusted);

    let record = bastion.record_login(success()).await.unwrap();
    let decision = record.device.clone().unwrap();
    assert!(decision.is_trusted);
    assert!(!record.requires_mfa());

    let devices = bastion.list_devices(&user).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].access_count, registered.access_count + 1);

    let revoked = bastion
        .revoke_device(&registered.id, "Reported stolen")
        .await
        .unwrap();
    assert_eq!(revoked.status, DeviceStatus::Blocked);

    let record = bastion.record_login(success()).await.unwrap();
    let decision = record.device.unwrap();
    assert!(decision.is_blocked);
    assert!(!decision.is_trusted);

    // A revoked device cannot come back
    let err = bastion
        .register_device(DeviceRegistration::new(user.clone(), "fp-work-laptop", "Laptop again"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let events = bastion
        .list_security_events(&SecurityEventQuery {
            user_id: Some(user.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"device_added"));
    assert!(types.contains(&"device_revoked"));
}

#[tokio::test]
async fn test_invalid_attempts_are_rejected() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;

    let err = bastion
        .record_login(LoginAttemptRequest::failure(EMAIL, "not-an-ip", "invalid password"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = bastion
        .record_login(LoginAttemptRequest::success("", IP))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_unlock_task_stops_on_shutdown() {
    let bastion = setup(LockoutConfig::default(), BruteForceConfig::default()).await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = bastion.start_unlock_task(shutdown_rx);
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("unlock task should stop")
        .unwrap();
}
