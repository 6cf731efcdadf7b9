//! Read-only security rollups over the login ledger, event log, lockouts and devices.
//!
//! Every aggregation takes a caller-supplied window and tolerates empty windows
//! by returning zeroed metrics.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    Error,
    config::ThreatConfig,
    error::ValidationError,
    id::UserId,
    repositories::{
        AccountLockoutRepository, LoginAttemptRepository, SecurityEventRepository,
        TrustedDeviceRepository,
    },
    storage::{
        AttemptFilter, AttemptGroup, EventSummary, LoginOutcome, SecurityEventQuery, ThreatLevel,
        event_types,
    },
};

/// Closed time window `[since, until]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self, ValidationError> {
        if since > until {
            return Err(ValidationError::InvalidField(
                "window start must not be after its end".to_string(),
            ));
        }
        Ok(Self { since, until })
    }

    /// The window ending now and reaching back `duration`.
    pub fn last(duration: chrono::Duration) -> Self {
        let until = Utc::now();
        Self {
            since: until - duration,
            until,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityDashboard {
    pub window: TimeWindow,
    pub total_attempts: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
    pub blocked_attempts: u64,
    pub suspicious_attempts: u64,
    /// Failed over total attempts, `0.0` for an empty window
    pub failure_rate: f64,
    pub unique_ip_addresses: u64,
    pub attempts_by_threat_level: BTreeMap<ThreatLevel, u64>,
    pub total_events: u64,
    pub unresolved_events: u64,
    /// Events at [`ThreatLevel::High`] or above
    pub high_severity_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub lockouts_created: u64,
    /// Lockouts in effect right now, independent of the window
    pub active_lockouts: u64,
    /// Device counts by status, independent of the window
    pub devices_by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    pub dashboard: SecurityDashboard,
    /// Credentials with the most failed attempts, most targeted first
    pub top_targeted_accounts: Vec<(String, u64)>,
    /// IP addresses with the most failed attempts
    pub top_failing_ip_addresses: Vec<(String, u64)>,
    pub brute_force_detections: u64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub user_id: UserId,
    /// Risk on a 0.0 to 1.0 scale
    pub score: f64,
    pub level: ThreatLevel,
    pub factors: Vec<String>,
}

const TOP_N: u32 = 5;

fn event_weight(level: ThreatLevel) -> f64 {
    match level {
        ThreatLevel::Low => 0.05,
        ThreatLevel::Medium => 0.1,
        ThreatLevel::High => 0.2,
        ThreatLevel::Critical => 0.3,
    }
}

pub struct SecurityAnalyticsService<A, E, L, D>
where
    A: LoginAttemptRepository,
    E: SecurityEventRepository,
    L: AccountLockoutRepository,
    D: TrustedDeviceRepository,
{
    attempts: Arc<A>,
    events: Arc<E>,
    lockouts: Arc<L>,
    devices: Arc<D>,
    threat: ThreatConfig,
}

impl<A, E, L, D> SecurityAnalyticsService<A, E, L, D>
where
    A: LoginAttemptRepository,
    E: SecurityEventRepository,
    L: AccountLockoutRepository,
    D: TrustedDeviceRepository,
{
    pub fn new(
        attempts: Arc<A>,
        events: Arc<E>,
        lockouts: Arc<L>,
        devices: Arc<D>,
        threat: ThreatConfig,
    ) -> Self {
        Self {
            attempts,
            events,
            lockouts,
            devices,
            threat,
        }
    }

    pub async fn get_security_dashboard(&self, window: &TimeWindow) -> Result<SecurityDashboard, Error> {
        let events = self.events.summarize(window.since, window.until).await?;
        self.build_dashboard(window, &events).await
    }

    async fn build_dashboard(
        &self,
        window: &TimeWindow,
        events: &EventSummary,
    ) -> Result<SecurityDashboard, Error> {
        let attempts = self.attempts.summarize(window.since, window.until).await?;

        let total_attempts = attempts.total();
        let failed_logins = attempts.outcome(LoginOutcome::Failed);
        let failure_rate = if total_attempts == 0 {
            0.0
        } else {
            failed_logins as f64 / total_attempts as f64
        };

        let lockouts_created = self
            .lockouts
            .count_locked_between(window.since, window.until)
            .await?;
        let active_lockouts = self.lockouts.count_active(Utc::now()).await?;

        let devices_by_status = self
            .devices
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();

        Ok(SecurityDashboard {
            window: *window,
            total_attempts,
            successful_logins: attempts.outcome(LoginOutcome::Success),
            failed_logins,
            blocked_attempts: attempts.outcome(LoginOutcome::Blocked),
            suspicious_attempts: attempts.outcome(LoginOutcome::Suspicious),
            failure_rate,
            unique_ip_addresses: attempts.unique_ip_addresses,
            attempts_by_threat_level: attempts.by_threat_level,
            total_events: events.total,
            unresolved_events: events.unresolved,
            high_severity_events: events.at_least(ThreatLevel::High),
            events_by_type: events.by_type.clone(),
            lockouts_created,
            active_lockouts,
            devices_by_status,
        })
    }

    pub async fn get_security_report(&self, window: &TimeWindow) -> Result<SecurityReport, Error> {
        let events = self.events.summarize(window.since, window.until).await?;
        let dashboard = self.build_dashboard(window, &events).await?;

        let top_targeted_accounts = self
            .attempts
            .top_failures(AttemptGroup::Email, window.since, window.until, TOP_N)
            .await?;
        let top_failing_ip_addresses = self
            .attempts
            .top_failures(AttemptGroup::IpAddress, window.since, window.until, TOP_N)
            .await?;
        let brute_force_detections = events.of_type(event_types::BRUTE_FORCE_DETECTED);

        let mut recommendations = Vec::new();
        if brute_force_detections > 0 {
            recommendations.push(format!(
                "Investigate {brute_force_detections} brute force detections and consider rate limiting the source addresses"
            ));
        }
        if dashboard.failure_rate > 0.3 {
            recommendations.push(format!(
                "Failure rate is {:.0}%, review authentication errors and credential stuffing activity",
                dashboard.failure_rate * 100.0
            ));
        }
        if dashboard.unresolved_events > 0 && dashboard.high_severity_events > 0 {
            recommendations.push("Resolve outstanding high severity security events".to_string());
        }
        if dashboard.active_lockouts > 0 {
            recommendations.push(format!(
                "Review {} accounts that are currently locked",
                dashboard.active_lockouts
            ));
        }

        Ok(SecurityReport {
            dashboard,
            top_targeted_accounts,
            top_failing_ip_addresses,
            brute_force_detections,
            recommendations,
        })
    }

    /// Aggregate risk for one user over a window.
    pub async fn get_risk_score(&self, user_id: &UserId, window: &TimeWindow) -> Result<RiskScore, Error> {
        let failures = self
            .attempts
            .get_stats(&AttemptFilter {
                user_id: Some(user_id.clone()),
                outcome: Some(LoginOutcome::Failed),
                since: Some(window.since),
                until: Some(window.until),
                ..Default::default()
            })
            .await?
            .count;

        let unresolved = self
            .events
            .list(&SecurityEventQuery {
                user_id: Some(user_id.clone()),
                is_resolved: Some(false),
                since: Some(window.since),
                until: Some(window.until),
                ..Default::default()
            })
            .await?;

        let is_locked = self
            .lockouts
            .find_active(user_id, Utc::now())
            .await?
            .is_some();
        let risky_devices = self
            .devices
            .list_for_user(user_id)
            .await?
            .iter()
            .filter(|d| !d.is_trusted())
            .count();

        let mut factors = Vec::new();
        let mut score = 0.0;

        if failures > 0 {
            score += (failures as f64 * 0.05).min(0.4);
            factors.push(format!("{failures} failed login attempts"));
        }
        if !unresolved.is_empty() {
            score += unresolved
                .iter()
                .map(|e| event_weight(e.threat_level))
                .sum::<f64>()
                .min(0.4);
            factors.push(format!("{} unresolved security events", unresolved.len()));
        }
        if is_locked {
            score += 0.2;
            factors.push("Account is currently locked".to_string());
        }
        if risky_devices > 0 {
            score += 0.1;
            factors.push(format!("{risky_devices} untrusted or revoked devices"));
        }

        let score: f64 = score.clamp(0.0, 1.0);
        Ok(RiskScore {
            user_id: user_id.clone(),
            score,
            level: ThreatLevel::from_score(score, &self.threat),
            factors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::{DeviceInfo, NewSecurityEvent, NewTrustedDevice},
        testing::InMemoryStore,
    };
    use chrono::Duration;

    type Service = SecurityAnalyticsService<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>;

    fn service(store: &Arc<InMemoryStore>) -> Service {
        SecurityAnalyticsService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            ThreatConfig::default(),
        )
    }

    #[test]
    fn test_window_must_be_ordered() {
        let now = Utc::now();
        assert!(TimeWindow::new(now, now - Duration::hours(1)).is_err());
        assert!(TimeWindow::new(now - Duration::hours(1), now).is_ok());
    }

    #[tokio::test]
    async fn test_report_ranks_and_caps_top_lists() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let now = Utc::now() - Duration::minutes(1);

        for (i, count) in [1, 3, 2, 1, 1, 1, 4].into_iter().enumerate() {
            for _ in 0..count {
                store.push_failure(&format!("u{i}@b.com"), "203.0.113.9", now);
            }
        }

        let report = service
            .get_security_report(&TimeWindow::last(Duration::hours(1)))
            .await
            .unwrap();
        let accounts = &report.top_targeted_accounts;
        assert_eq!(accounts.len(), TOP_N as usize);
        assert_eq!(accounts[0], ("u6@b.com".to_string(), 4));
        assert_eq!(accounts[1], ("u1@b.com".to_string(), 3));
        assert_eq!(accounts[2], ("u2@b.com".to_string(), 2));
        // Ties broken by value
        assert_eq!(accounts[3].0, "u0@b.com");
        assert_eq!(report.top_failing_ip_addresses, vec![("203.0.113.9".to_string(), 13)]);
    }

    #[tokio::test]
    async fn test_empty_window_is_zeroed() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let window = TimeWindow::last(Duration::days(1));

        let dashboard = service.get_security_dashboard(&window).await.unwrap();
        assert_eq!(dashboard.total_attempts, 0);
        assert_eq!(dashboard.failure_rate, 0.0);
        assert_eq!(dashboard.total_events, 0);
        assert!(dashboard.attempts_by_threat_level.is_empty());

        let report = service.get_security_report(&window).await.unwrap();
        assert!(report.top_targeted_accounts.is_empty());
        assert!(report.recommendations.is_empty());

        let risk = service
            .get_risk_score(&UserId::new("usr_nobody"), &window)
            .await
            .unwrap();
        assert_eq!(risk.score, 0.0);
        assert_eq!(risk.level, ThreatLevel::Low);
        assert!(risk.factors.is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_and_report_rollups() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let now = Utc::now();

        for _ in 0..3 {
            store.push_failure("target@b.com", "203.0.113.1", now - Duration::minutes(10));
        }
        store.push_failure("other@b.com", "203.0.113.2", now - Duration::minutes(10));
        // Outside the window
        store.push_failure("old@b.com", "203.0.113.3", now - Duration::days(3));

        SecurityEventRepository::create(
            &*store,
            NewSecurityEvent::new(event_types::BRUTE_FORCE_DETECTED, ThreatLevel::High, "bf")
                .metadata(serde_json::json!({ "email": "target@b.com" })),
        )
        .await
        .unwrap();

        let report = service
            .get_security_report(&TimeWindow::last(Duration::days(1)))
            .await
            .unwrap();

        let dashboard = &report.dashboard;
        assert_eq!(dashboard.total_attempts, 4);
        assert_eq!(dashboard.failed_logins, 4);
        assert_eq!(dashboard.failure_rate, 1.0);
        assert_eq!(dashboard.unique_ip_addresses, 2);
        assert_eq!(dashboard.high_severity_events, 1);
        assert_eq!(dashboard.events_by_type[event_types::BRUTE_FORCE_DETECTED], 1);

        assert_eq!(report.top_targeted_accounts[0], ("target@b.com".to_string(), 3));
        assert_eq!(report.brute_force_detections, 1);
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_risk_score_accumulates_factors() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = UserId::new("usr_risky");
        let now = Utc::now();

        for _ in 0..4 {
            store.push_failure("risky@b.com", "10.0.0.1", now);
        }
        for attempt in store.attempts.lock().unwrap().iter_mut() {
            attempt.user_id = Some(user.clone());
        }
        SecurityEventRepository::create(
            &*store,
            NewSecurityEvent::new(event_types::SUSPICIOUS_LOGIN, ThreatLevel::High, "odd")
                .user(user.clone()),
        )
        .await
        .unwrap();
        let device = TrustedDeviceRepository::create(
            &*store,
            NewTrustedDevice {
                user_id: user.clone(),
                fingerprint: "fp".to_string(),
                name: "Phone".to_string(),
                info: DeviceInfo::default(),
                trust_score: 0.8,
                ip_address: None,
                seen_at: now,
            },
        )
        .await
        .unwrap();
        store.revoke(&device.id, "lost", now).await.unwrap();

        let risk = service
            .get_risk_score(&user, &TimeWindow::last(Duration::hours(1)))
            .await
            .unwrap();

        // 4 * 0.05 failures + 0.2 high event + 0.1 revoked device
        assert!((risk.score - 0.5).abs() < 1e-9);
        assert_eq!(risk.level, ThreatLevel::High);
        assert_eq!(risk.factors.len(), 3);
    }
}
