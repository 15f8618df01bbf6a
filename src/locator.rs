//! Instance rediscovery by the canonical Name tag.

use std::net::IpAddr;

use crate::provider::{InstanceSummary, Provider};

/// Looks up live instances through a provider. Stateless; every call
/// re-queries the provider so stale handles are never reused.
#[derive(Clone, Copy, Debug)]
pub struct InstanceLocator<'a, P: Provider> {
    provider: &'a P,
}

impl<'a, P: Provider> InstanceLocator<'a, P> {
    /// Creates a locator over the given provider.
    #[must_use]
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Returns the first instance tagged with `name` whose state is
    /// `running`, in provider order, or `None` when nothing matches. Multiple
    /// reservations under the same tag are tolerated.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the query fails.
    pub async fn running_instance(
        &self,
        name: &str,
    ) -> Result<Option<InstanceSummary>, P::Error> {
        let instances = self.provider.instances_by_name(name).await?;
        Ok(instances
            .into_iter()
            .find(|instance| instance.state == "running"))
    }

    /// Returns the public address of the running instance tagged `name`, when
    /// both the instance and its address exist.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the query fails.
    pub async fn public_address(&self, name: &str) -> Result<Option<IpAddr>, P::Error> {
        Ok(self
            .running_instance(name)
            .await?
            .and_then(|instance| instance.public_ip))
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::provider::InstanceSummary;
    use crate::test_support::FakeProvider;

    fn summary(id: &str, state: &str, ip: Option<IpAddr>) -> InstanceSummary {
        InstanceSummary {
            id: id.to_owned(),
            state: state.to_owned(),
            public_ip: ip,
        }
    }

    #[tokio::test]
    async fn picks_first_running_match_in_provider_order() {
        let provider = FakeProvider::new();
        provider.push_describe(vec![
            summary("i-stopped", "stopped", None),
            summary("i-first", "running", None),
            summary("i-second", "running", None),
        ]);

        let locator = InstanceLocator::new(&provider);
        let found = locator
            .running_instance("builder")
            .await
            .expect("query succeeds")
            .expect("instance found");
        assert_eq!(found.id, "i-first");
    }

    #[tokio::test]
    async fn absent_when_nothing_runs() {
        let provider = FakeProvider::new();
        provider.push_describe(vec![summary("i-stopped", "stopped", None)]);

        let locator = InstanceLocator::new(&provider);
        let found = locator
            .running_instance("builder")
            .await
            .expect("query succeeds");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn public_address_requires_running_instance() {
        let provider = FakeProvider::new();
        let address = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        provider.push_describe(vec![
            summary("i-pending", "pending", Some(address)),
            summary("i-live", "running", Some(address)),
        ]);

        let locator = InstanceLocator::new(&provider);
        let found = locator
            .public_address("builder")
            .await
            .expect("query succeeds");
        assert_eq!(found, Some(address));
    }
}
