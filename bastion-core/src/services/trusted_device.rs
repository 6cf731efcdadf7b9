//! Trusted device registry.
//!
//! Devices are keyed by (user, fingerprint). Each carries a trust score on the
//! `[TRUST_SCORE_MIN, TRUST_SCORE_MAX]` scale that rises with sustained use and
//! falls when the device shows up from a different IP address. Trusted devices
//! scoring below [`DeviceTrustConfig::mfa_threshold`] require MFA.
//!
//! Revocation is terminal: a revoked device is blocked and cannot be
//! re-registered or updated.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error,
    config::DeviceTrustConfig,
    crypto::constant_time_eq,
    error::{DeviceError, ValidationError},
    id::{DeviceId, UserId},
    repositories::TrustedDeviceRepository,
    storage::{DeviceActivity, DeviceInfo, NewTrustedDevice, TrustedDevice, clamp_trust_score},
    validation::{validate_device_name, validate_ip_address},
};

#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub user_id: UserId,
    pub fingerprint: String,
    pub name: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl DeviceRegistration {
    pub fn new(user_id: UserId, fingerprint: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id,
            fingerprint: fingerprint.into(),
            name: name.into(),
            user_agent: None,
            ip_address: None,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceValidationResult {
    pub is_trusted: bool,
    pub is_blocked: bool,
    pub requires_mfa: bool,
    /// `None` for an unknown device
    pub trust_score: Option<f64>,
    pub device: Option<TrustedDevice>,
}

impl DeviceValidationResult {
    fn unknown() -> Self {
        Self {
            is_trusted: false,
            is_blocked: false,
            requires_mfa: true,
            trust_score: None,
            device: None,
        }
    }
}

pub struct TrustedDeviceService<D: TrustedDeviceRepository> {
    repository: Arc<D>,
    config: DeviceTrustConfig,
}

impl<D: TrustedDeviceRepository> TrustedDeviceService<D> {
    pub fn new(repository: Arc<D>, config: DeviceTrustConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &DeviceTrustConfig {
        &self.config
    }

    pub async fn register_trusted_device(
        &self,
        registration: DeviceRegistration,
    ) -> Result<TrustedDevice, Error> {
        validate_device_name(&registration.name)?;
        if registration.fingerprint.trim().is_empty() {
            return Err(ValidationError::MissingField("fingerprint".to_string()).into());
        }
        if let Some(ip_address) = &registration.ip_address {
            validate_ip_address(ip_address)?;
        }

        if let Some(existing) = self
            .repository
            .find_by_fingerprint(&registration.user_id, &registration.fingerprint)
            .await?
        {
            return Err(if existing.is_revoked() {
                DeviceError::AlreadyRevoked
            } else {
                DeviceError::AlreadyRegistered
            }
            .into());
        }

        let info = registration
            .user_agent
            .as_deref()
            .map(DeviceInfo::from_user_agent)
            .unwrap_or_default();

        let device = self
            .repository
            .create(NewTrustedDevice {
                user_id: registration.user_id,
                fingerprint: registration.fingerprint,
                name: registration.name.trim().to_string(),
                info,
                trust_score: clamp_trust_score(self.config.initial_score),
                ip_address: registration.ip_address,
                seen_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            user_id = %device.user_id,
            device_id = %device.id,
            device_type = %device.info.device_type,
            "Registered trusted device"
        );

        Ok(device)
    }

    async fn find(&self, user_id: &UserId, fingerprint: &str) -> Result<Option<TrustedDevice>, Error> {
        Ok(self
            .repository
            .find_by_fingerprint(user_id, fingerprint)
            .await?
            .filter(|device| constant_time_eq(&device.fingerprint, fingerprint)))
    }

    /// Decide whether a device fingerprint is trusted for a user.
    ///
    /// An unknown fingerprint is untrusted, not an error.
    pub async fn validate_device(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<DeviceValidationResult, Error> {
        let Some(device) = self.find(user_id, fingerprint).await? else {
            return Ok(DeviceValidationResult::unknown());
        };

        if device.is_blocked() {
            return Ok(DeviceValidationResult {
                is_trusted: false,
                is_blocked: true,
                requires_mfa: false,
                trust_score: Some(device.trust_score),
                device: Some(device),
            });
        }

        let is_trusted = device.is_trusted();
        let requires_mfa = !is_trusted || device.trust_score < self.config.mfa_threshold;

        Ok(DeviceValidationResult {
            is_trusted,
            is_blocked: false,
            requires_mfa,
            trust_score: Some(device.trust_score),
            device: Some(device),
        })
    }

    /// Trust score after one more recognised login from `ip_address`.
    pub fn next_trust_score(&self, device: &TrustedDevice, ip_address: &str) -> f64 {
        let mut score = device.trust_score;

        if device.access_count.saturating_add(1) > self.config.sustained_use_after {
            score += self.config.sustained_use_bonus;
        }
        if device
            .last_ip_address
            .as_deref()
            .is_some_and(|last| last != ip_address)
        {
            score -= self.config.ip_change_penalty;
        }

        clamp_trust_score(score)
    }

    /// Record a recognised login from a known device.
    pub async fn update_device_activity(
        &self,
        user_id: &UserId,
        fingerprint: &str,
        ip_address: &str,
    ) -> Result<TrustedDevice, Error> {
        validate_ip_address(ip_address)?;

        let device = self
            .find(user_id, fingerprint)
            .await?
            .ok_or(DeviceError::NotFound)?;
        if device.is_revoked() {
            return Err(DeviceError::AlreadyRevoked.into());
        }

        let trust_score = self.next_trust_score(&device, ip_address);
        let updated = self
            .repository
            .record_activity(
                &device.id,
                DeviceActivity {
                    seen_at: Utc::now(),
                    ip_address: ip_address.to_string(),
                    trust_score,
                },
            )
            .await?;

        tracing::debug!(
            device_id = %updated.id,
            access_count = updated.access_count,
            trust_score = updated.trust_score,
            "Updated device activity"
        );

        Ok(updated)
    }

    /// Revoke a device. Revocation is terminal.
    pub async fn revoke_trusted_device(
        &self,
        device_id: &DeviceId,
        reason: &str,
    ) -> Result<TrustedDevice, Error> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingField("reason".to_string()).into());
        }

        let device = self
            .repository
            .find_by_id(device_id)
            .await?
            .ok_or(DeviceError::NotFound)?;
        if device.is_revoked() {
            return Err(DeviceError::AlreadyRevoked.into());
        }

        let revoked = self
            .repository
            .revoke(device_id, reason.trim(), Utc::now())
            .await?;

        tracing::info!(
            user_id = %revoked.user_id,
            device_id = %revoked.id,
            reason = reason,
            "Revoked trusted device"
        );

        Ok(revoked)
    }

    /// Devices for a user, most recently seen first.
    pub async fn list_devices(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error> {
        self.repository.list_for_user(user_id).await
    }
}
