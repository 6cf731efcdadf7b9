//! Threat scoring for login requests and account activity.
//!
//! Scores start neutral and accumulate weighted risk signals from
//! [`ThreatConfig`]. The score is clamped at zero and mapped onto a
//! [`ThreatLevel`] with fixed thresholds, so more signal never yields a lower
//! level.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error,
    config::ThreatConfig,
    id::UserId,
    repositories::LoginAttemptRepository,
    storage::{AttemptFilter, Location, LoginOutcome, ThreatLevel},
    validation::{IpClass, classify_ip},
};

/// Request context for a single login.
#[derive(Debug, Clone, Copy)]
pub struct ThreatContext<'a> {
    pub user_id: Option<&'a UserId>,
    /// Credential identifier the request targets
    pub email: Option<&'a str>,
    pub ip_address: &'a str,
    pub user_agent: Option<&'a str>,
}

/// Richer context for assessing a session or login after the fact.
#[derive(Debug, Clone, Default)]
pub struct ActivityContext {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub is_new_device: bool,
    /// IP address last recorded for the device, if known
    pub previous_ip_address: Option<String>,
    pub location: Option<Location>,
    /// Location of the user's previous activity, if known
    pub previous_location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
    pub score: f64,
    /// Human-readable description of each signal that added risk
    pub risk_factors: Vec<String>,
    pub recommended_actions: Vec<String>,
}

/// Score contribution of the client's network class.
///
/// Addresses that fail to parse are treated as public.
pub fn ip_weight(ip_address: &str, config: &ThreatConfig) -> f64 {
    match ip_address.trim().parse() {
        Ok(ip) => match classify_ip(&ip) {
            IpClass::Loopback | IpClass::Private => -config.private_ip_discount,
            IpClass::Public => config.public_ip_weight,
        },
        Err(_) => config.public_ip_weight,
    }
}

/// Base request score from network class, recent failures and user agent.
pub fn request_score(
    ip_address: &str,
    recent_failures: u32,
    has_user_agent: bool,
    config: &ThreatConfig,
) -> f64 {
    let mut score = ip_weight(ip_address, config);
    score += f64::from(recent_failures) * config.failure_weight;
    if !has_user_agent {
        score += config.missing_user_agent_weight;
    }
    score.max(0.0)
}

pub struct ThreatAnalyzer<A: LoginAttemptRepository> {
    attempts: Arc<A>,
    config: ThreatConfig,
}

impl<A: LoginAttemptRepository> ThreatAnalyzer<A> {
    pub fn new(attempts: Arc<A>, config: ThreatConfig) -> Self {
        Self { attempts, config }
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    /// Failed attempts in the scoring window for the request's IP or credential,
    /// whichever is higher.
    pub async fn recent_failures(&self, context: &ThreatContext<'_>) -> Result<u32, Error> {
        let since = Utc::now() - self.config.failure_window;

        let by_ip = self
            .attempts
            .get_stats(&AttemptFilter::failures_from_ip(context.ip_address, since))
            .await?
            .count;

        let by_credential = match (context.email, context.user_id) {
            (Some(email), _) => {
                self.attempts
                    .get_stats(&AttemptFilter::failures_for_email(email, since))
                    .await?
                    .count
            }
            (None, Some(user_id)) => {
                let filter = AttemptFilter {
                    user_id: Some(user_id.clone()),
                    outcome: Some(LoginOutcome::Failed),
                    since: Some(since),
                    ..Default::default()
                };
                self.attempts.get_stats(&filter).await?.count
            }
            (None, None) => 0,
        };

        Ok(by_ip.max(by_credential))
    }

    /// Classify a login request.
    pub async fn analyze_threat_level(&self, context: &ThreatContext<'_>) -> Result<ThreatLevel, Error> {
        let failures = self.recent_failures(context).await?;
        let score = request_score(
            context.ip_address,
            failures,
            context.user_agent.is_some_and(|ua| !ua.trim().is_empty()),
            &self.config,
        );
        let level = ThreatLevel::from_score(score, &self.config);

        tracing::debug!(
            ip_address = context.ip_address,
            failures,
            score,
            level = %level,
            "Analyzed threat level"
        );

        Ok(level)
    }

    /// Assess account activity with device and location signals.
    pub async fn assess_activity(&self, context: &ActivityContext) -> Result<ThreatAssessment, Error> {
        let mut risk_factors = Vec::new();
        let has_user_agent = context
            .user_agent
            .as_deref()
            .is_some_and(|ua| !ua.trim().is_empty());

        let failures = self
            .recent_failures(&ThreatContext {
                user_id: context.user_id.as_ref(),
                email: context.email.as_deref(),
                ip_address: &context.ip_address,
                user_agent: context.user_agent.as_deref(),
            })
            .await?;

        if ip_weight(&context.ip_address, &self.config) > 0.0 {
            risk_factors.push("Request from a public IP address".to_string());
        }
        if failures > 0 {
            risk_factors.push(format!("{failures} failed login attempts in the last hour"));
        }
        if !has_user_agent {
            risk_factors.push("Missing user agent".to_string());
        }

        let mut score = request_score(&context.ip_address, failures, has_user_agent, &self.config);

        if context.is_new_device {
            score += self.config.new_device_weight;
            risk_factors.push("Login from an unrecognized device".to_string());
        }

        if context
            .previous_ip_address
            .as_deref()
            .is_some_and(|previous| previous != context.ip_address)
        {
            score += self.config.ip_change_weight;
            risk_factors.push("IP address changed since the last login".to_string());
        }

        let country = context.location.as_ref().and_then(|l| l.country.as_deref());
        let previous_country = context
            .previous_location
            .as_ref()
            .and_then(|l| l.country.as_deref());
        if let (Some(country), Some(previous)) = (country, previous_country) {
            if !country.eq_ignore_ascii_case(previous) {
                score += self.config.country_change_weight;
                risk_factors.push(format!("Country changed from {previous} to {country}"));
            }
        }

        let level = ThreatLevel::from_score(score, &self.config);

        Ok(ThreatAssessment {
            level,
            score,
            risk_factors,
            recommended_actions: recommended_actions(level, context.is_new_device),
        })
    }
}

fn recommended_actions(level: ThreatLevel, is_new_device: bool) -> Vec<String> {
    let mut actions = Vec::new();
    if level >= ThreatLevel::Medium {
        actions.push("Monitor account activity".to_string());
    }
    if is_new_device {
        actions.push("Verify the new device with the account owner".to_string());
    }
    if level >= ThreatLevel::High {
        actions.push("Require multi-factor authentication".to_string());
    }
    if level >= ThreatLevel::Critical {
        actions.push("Lock the account and notify the user".to_string());
    }
    actions
}
