//! Authorization profile resolution.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use nutritrack_auth::{AuthorizationProfile, Identity};

use crate::fetch::BoundedFetch;
use crate::provider::AuthorizationService;

/// Resolves role/coach/admin for a signed-in identity.
///
/// The three lookups are independent: one failing or hanging never costs
/// the others their value. The whole resolution is bounded by `timeout`.
#[derive(Clone)]
pub struct AuthorizationResolver {
    service: Arc<dyn AuthorizationService>,
    timeout: Duration,
}

impl AuthorizationResolver {
    pub fn new(service: Arc<dyn AuthorizationService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Always returns a complete profile; unresolved fields take defaults.
    pub async fn resolve(&self, identity: &Identity) -> AuthorizationProfile {
        let span = tracing::info_span!("resolve_authorization", user_id = %identity.id);
        async {
            let defaults = AuthorizationProfile::default();
            let fetch = BoundedFetch::within(self.timeout);

            let (role, is_coach, is_admin) = tokio::join!(
                fetch.settle("role", self.service.user_role(), defaults.role),
                fetch.settle("is_coach", self.service.is_coach(), defaults.is_coach),
                fetch.settle("is_admin", self.service.is_admin(), defaults.is_admin),
            );

            tracing::debug!(
                role = ?role.outcome,
                is_coach = ?is_coach.outcome,
                is_admin = ?is_admin.outcome,
                "authorization lookups settled"
            );

            AuthorizationProfile {
                role: role.into_value(),
                is_coach: is_coach.into_value(),
                is_admin: is_admin.into_value(),
            }
        }
        .instrument(span)
        .await
    }
}

impl core::fmt::Debug for AuthorizationResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationResolver")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use nutritrack_auth::Role;
    use tokio::time::Instant;

    use super::*;
    use crate::memory::{Reply, ScriptedAuthorizationService};

    fn identity() -> Identity {
        Identity::new("u-1", "alice@example.com", "Alice")
    }

    fn resolver(service: ScriptedAuthorizationService) -> AuthorizationResolver {
        AuthorizationResolver::new(Arc::new(service), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_all_three_fields() {
        let service = ScriptedAuthorizationService::new()
            .with_role(Reply::Ready(Role::admin()))
            .with_coach(Reply::Ready(true))
            .with_admin(Reply::Ready(true));

        let profile = resolver(service).resolve(&identity()).await;
        assert_eq!(profile, AuthorizationProfile::new(Role::admin(), true, true));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_field_keeps_the_others() {
        let service = ScriptedAuthorizationService::new()
            .with_role(Reply::Ready(Role::new("coach")))
            .with_coach(Reply::Ready(true))
            .with_admin(Reply::Fail("rpc is_admin failed".into()));

        let profile = resolver(service).resolve(&identity()).await;
        assert_eq!(profile, AuthorizationProfile::new(Role::new("coach"), true, false));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_lookup_defaults_at_timeout() {
        let start = Instant::now();
        let service = ScriptedAuthorizationService::new()
            .with_role(Reply::Pending)
            .with_coach(Reply::Ready(true))
            .with_admin(Reply::Delayed(Duration::from_secs(30), true));

        let profile = resolver(service).resolve(&identity()).await;

        assert_eq!(profile, AuthorizationProfile::new(Role::user(), true, false));
        assert!(Instant::now() - start < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_is_the_default_profile() {
        let service = ScriptedAuthorizationService::new()
            .with_role(Reply::Fail("down".into()))
            .with_coach(Reply::Fail("down".into()))
            .with_admin(Reply::Fail("down".into()));

        let profile = resolver(service).resolve(&identity()).await;
        assert_eq!(profile, AuthorizationProfile::default());
    }
}
