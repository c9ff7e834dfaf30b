use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, instrument, warn};

/// OS capabilities needed before the radio may be used.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Location access, required for scanning on older mobile platforms.
    Location,
    /// BLE scan permission.
    BluetoothScan,
    /// BLE connect permission.
    BluetoothConnect,
}

/// Platform hook that shows permission prompts.
#[async_trait]
pub trait PermissionPrompt: Send + Sync + Debug {
    /// Returns whether the platform gates BLE behind runtime grants.
    fn requires_runtime_grants(&self) -> bool;

    /// Requests one capability and reports whether it was granted.
    async fn request(&self, capability: Capability) -> bool;
}

/// Prompt for platforms that do not gate BLE behind runtime permissions.
#[derive(Debug, Default)]
pub struct UngatedPlatform;

#[async_trait]
impl PermissionPrompt for UngatedPlatform {
    fn requires_runtime_grants(&self) -> bool {
        false
    }

    async fn request(&self, _capability: Capability) -> bool {
        true
    }
}

/// Fixture prompt that denies a configured set of capabilities.
#[derive(Debug, Clone, Default)]
pub struct FakePermissionPrompt {
    denied: HashSet<Capability>,
    requested: Arc<Mutex<Vec<Capability>>>,
}

impl FakePermissionPrompt {
    /// Creates a prompt that grants everything except `denied`.
    #[must_use]
    pub fn denying(denied: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
            requested: Arc::default(),
        }
    }

    /// Returns every capability requested so far, in request order.
    #[must_use]
    pub fn requested(&self) -> Vec<Capability> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PermissionPrompt for FakePermissionPrompt {
    fn requires_runtime_grants(&self) -> bool {
        true
    }

    async fn request(&self, capability: Capability) -> bool {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(capability);
        !self.denied.contains(&capability)
    }
}

/// Obtains the permissions needed to scan for and connect to sensors.
#[derive(Debug)]
pub struct PermissionNegotiator {
    prompt: Box<dyn PermissionPrompt>,
}

impl PermissionNegotiator {
    /// Creates a negotiator around a platform prompt.
    #[must_use]
    pub fn new(prompt: Box<dyn PermissionPrompt>) -> Self {
        Self { prompt }
    }

    /// Requests every capability in order and succeeds only if all are granted.
    ///
    /// Each call repeats the whole sequence; earlier outcomes are not cached.
    #[instrument(skip(self), level = "debug")]
    pub async fn request_permissions(&mut self) -> bool {
        if !self.prompt.requires_runtime_grants() {
            debug!("platform does not gate BLE behind runtime permissions");
            return true;
        }

        for capability in Capability::iter() {
            if !self.prompt.request(capability).await {
                warn!(%capability, "permission denied");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[tokio::test]
    async fn ungated_platform_grants_without_prompting() {
        let mut negotiator = PermissionNegotiator::new(Box::new(UngatedPlatform));
        assert!(negotiator.request_permissions().await);
    }

    #[tokio::test]
    async fn all_capabilities_are_requested_in_order() {
        let prompt = FakePermissionPrompt::default();
        let mut negotiator = PermissionNegotiator::new(Box::new(prompt.clone()));

        assert!(negotiator.request_permissions().await);
        assert_eq!(
            vec![
                Capability::Location,
                Capability::BluetoothScan,
                Capability::BluetoothConnect,
            ],
            prompt.requested()
        );
    }

    #[tokio::test]
    async fn denial_stops_the_sequence_and_is_not_cached() {
        let prompt = FakePermissionPrompt::denying([Capability::BluetoothScan]);
        let mut negotiator = PermissionNegotiator::new(Box::new(prompt.clone()));

        assert!(!negotiator.request_permissions().await);
        assert!(!negotiator.request_permissions().await);
        assert_eq!(
            vec![
                Capability::Location,
                Capability::BluetoothScan,
                Capability::Location,
                Capability::BluetoothScan,
            ],
            prompt.requested()
        );
    }

    #[rstest]
    #[case("location", Capability::Location)]
    #[case("bluetooth_scan", Capability::BluetoothScan)]
    #[case("bluetooth_connect", Capability::BluetoothConnect)]
    fn capability_parses_snake_case(#[case] raw: &str, #[case] expected: Capability) {
        assert_eq!(Ok(expected), raw.parse::<Capability>());
    }
}
