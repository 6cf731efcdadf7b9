//! Brute force detection for per-credential failure velocity.
//!
//! After each failed login the detector counts failures for the credential in a
//! trailing window. Crossing the configured threshold raises one
//! `brute_force_detected` security event at [`ThreatLevel::High`].
//!
//! # De-duplication
//!
//! Once an event has been raised for a credential, further detections for the
//! same credential are suppressed for the configured cool-down. The check reads
//! the persisted event log, so it holds across processes sharing one store.
//!
//! # Example
//!
//! ```rust,ignore
//! use bastion_core::services::BruteForceDetector;
//!
//! let detector = BruteForceDetector::new(attempts, events, BruteForceConfig::default());
//!
//! // After recording a failed login
//! detector
//!     .process_brute_force_detection("user@example.com", "203.0.113.7", None)
//!     .await?;
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::{
    Error,
    config::BruteForceConfig,
    id::{SecurityEventId, UserId},
    repositories::{LoginAttemptRepository, SecurityEventRepository},
    storage::{AttemptFilter, NewSecurityEvent, SecurityEvent, ThreatLevel, event_types},
    validation::normalize_email,
};

/// What a detection pass concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Detection is turned off
    Disabled,
    BelowThreshold { attempt_count: u32 },
    /// Threshold crossed, but an event for this credential is still in its cool-down
    Suppressed {
        attempt_count: u32,
        existing_event: SecurityEventId,
    },
    /// Threshold crossed and a new event was raised
    Detected(SecurityEvent),
}

impl DetectionOutcome {
    pub fn is_detected(&self) -> bool {
        matches!(self, DetectionOutcome::Detected(_))
    }
}

/// Service detecting brute force attacks against a credential.
///
/// # Thread Safety
///
/// The detector holds no mutable state and can be shared across tasks. Two
/// concurrent passes for the same credential may both miss each other's event
/// and raise two events; the cool-down collapses everything after that.
pub struct BruteForceDetector<A: LoginAttemptRepository, E: SecurityEventRepository> {
    attempts: Arc<A>,
    events: Arc<E>,
    config: BruteForceConfig,
}

impl<A: LoginAttemptRepository, E: SecurityEventRepository> BruteForceDetector<A, E> {
    pub fn new(attempts: Arc<A>, events: Arc<E>, config: BruteForceConfig) -> Self {
        Self {
            attempts,
            events,
            config,
        }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Evaluate failure velocity for `email` and raise an event if warranted.
    ///
    /// # Arguments
    ///
    /// * `email` - The credential that was attempted (may or may not exist)
    /// * `ip_address` - Client IP of the triggering attempt, recorded in the event
    /// * `user_id` - The account the credential resolved to, if any
    pub async fn process_brute_force_detection(
        &self,
        email: &str,
        ip_address: &str,
        user_id: Option<&UserId>,
    ) -> Result<DetectionOutcome, Error> {
        if !self.config.enabled {
            return Ok(DetectionOutcome::Disabled);
        }

        let email = normalize_email(email);
        let email = email.as_str();
        let now = Utc::now();
        let stats = self
            .attempts
            .get_stats(&AttemptFilter::failures_for_email(email, now - self.config.window))
            .await?;

        if stats.count < self.config.threshold {
            return Ok(DetectionOutcome::BelowThreshold {
                attempt_count: stats.count,
            });
        }

        if let Some(existing) = self
            .events
            .latest_for_credential(
                event_types::BRUTE_FORCE_DETECTED,
                email,
                now - self.config.cooldown,
            )
            .await?
        {
            tracing::debug!(
                email = email,
                count = stats.count,
                event_id = %existing.id,
                "Brute force detection suppressed during cool-down"
            );
            return Ok(DetectionOutcome::Suppressed {
                attempt_count: stats.count,
                existing_event: existing.id,
            });
        }

        let mut event = NewSecurityEvent::new(
            event_types::BRUTE_FORCE_DETECTED,
            ThreatLevel::High,
            format!(
                "{} failed login attempts in the last {} minutes",
                stats.count,
                self.config.window.num_minutes()
            ),
        )
        .ip_address(ip_address)
        .metadata(json!({
            "email": email,
            "ip_address": ip_address,
            "attempt_count": stats.count,
            "window_minutes": self.config.window.num_minutes(),
        }));
        if let Some(user_id) = user_id {
            event = event.user(user_id.clone());
        }

        let event = self.events.create(event).await?;

        tracing::warn!(
            email = email,
            ip_address = ip_address,
            count = stats.count,
            event_id = %event.id,
            "Brute force attack detected"
        );

        Ok(DetectionOutcome::Detected(event))
    }
}
