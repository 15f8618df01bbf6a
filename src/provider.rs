//! Provider abstraction for the compute API consumed by the lifecycle.
//!
//! The controller only ever talks to this trait; the EC2 implementation lives
//! in [`crate::ec2`] and test doubles in [`crate::test_support`].

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Parameters for launching exactly one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Machine image identifier.
    pub image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Security groups; `sg-` prefixed entries are identifiers.
    pub security_groups: Vec<String>,
    /// Provider key pair name.
    pub key_name: String,
    /// Block devices attached at launch.
    pub block_devices: Vec<BlockDeviceSpec>,
    /// Tags applied to the instance, in document order.
    pub tags: Vec<(String, String)>,
    /// Whether enclave support is requested.
    pub enclave_enabled: bool,
}

/// Block device mapping requested at launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDeviceSpec {
    /// Device name as exposed to the guest.
    pub device_name: String,
    /// Volume size in gigabytes.
    pub volume_size_gb: i32,
    /// Optional volume type.
    pub volume_type: Option<String>,
    /// Whether the volume is deleted with the instance.
    pub delete_on_termination: Option<bool>,
}

/// Point-in-time view of one instance, re-queried on every use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSummary {
    /// Provider-assigned instance identifier.
    pub id: String,
    /// Runtime state name (for example `running`).
    pub state: String,
    /// Public address, once assigned.
    pub public_ip: Option<IpAddr>,
}

/// Minimal interface implemented by compute providers.
pub trait Provider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists all instances carrying the given Name tag, in provider order,
    /// regardless of state.
    fn instances_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Vec<InstanceSummary>, Self::Error>;

    /// Launches exactly one instance and returns its identifier.
    fn launch<'a>(&'a self, spec: &'a LaunchSpec) -> ProviderFuture<'a, String, Self::Error>;

    /// Blocks until the instance run-state is `running`. The wait is owned by
    /// the provider client and carries no local ceiling.
    fn wait_until_running<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Returns the summarised health status (for example `ok`), when the
    /// provider has one.
    fn health_status<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error>;

    /// Requests an image capture without rebooting the instance and returns
    /// the image identifier.
    fn create_image<'a>(
        &'a self,
        instance_id: &'a str,
        image_name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Returns the current state of an image (for example `available`).
    fn image_state<'a>(
        &'a self,
        image_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error>;

    /// Terminates the instance.
    fn terminate<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}
