//! Amazon EC2 implementation of the provider interface.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use aws_sdk_ec2::Client;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, EnclaveOptionsRequest, Filter, InstanceStateName,
    InstanceType, ResourceType, Tag, TagSpecification, VolumeType,
};
use thiserror::Error;
use tokio::time::sleep;

use crate::provider::{InstanceSummary, LaunchSpec, Provider, ProviderFuture};

const RUNNING_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors raised by the EC2 provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Ec2Error {
    /// Wrapper for API level failures.
    #[error("{action} failed: {message}")]
    Api {
        /// Operation that failed.
        action: &'static str,
        /// Diagnostic rendered from the SDK error chain.
        message: String,
    },
    /// Raised when a response is missing an expected field.
    #[error("provider response missing {what}")]
    Malformed {
        /// Description of the absent field.
        what: &'static str,
    },
    /// Raised when an instance leaves the pending/running path while waited
    /// on.
    #[error("instance {instance_id} entered unexpected state {state}")]
    UnexpectedState {
        /// Instance being waited on.
        instance_id: String,
        /// State reported by the API.
        state: String,
    },
}

fn api_error<E>(action: &'static str, err: E) -> Ec2Error
where
    E: std::error::Error,
{
    Ec2Error::Api {
        action,
        message: format!("{}", DisplayErrorContext(err)),
    }
}

/// Provider backed by the AWS SDK EC2 client.
#[derive(Clone, Debug)]
pub struct Ec2Provider {
    client: Client,
    poll_interval: Duration,
}

impl Ec2Provider {
    /// Builds a provider for the given region using the default credential
    /// chain.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_owned()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
            poll_interval: RUNNING_POLL_INTERVAL,
        }
    }

    async fn describe_by_name(&self, name: &str) -> Result<Vec<InstanceSummary>, Ec2Error> {
        let response = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("tag:Name")
                    .values(name)
                    .build(),
            )
            .send()
            .await
            .map_err(|err| api_error("describe-instances", err))?;

        let mut summaries = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };
                let state = instance
                    .state()
                    .and_then(|state| state.name())
                    .map_or_else(|| String::from("unknown"), |name| name.as_str().to_owned());
                let public_ip = instance
                    .public_ip_address()
                    .and_then(|address| IpAddr::from_str(address).ok());
                summaries.push(InstanceSummary {
                    id: id.to_owned(),
                    state,
                    public_ip,
                });
            }
        }
        Ok(summaries)
    }

    async fn instance_state(&self, instance_id: &str) -> Result<Option<InstanceStateName>, Ec2Error> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|err| api_error("describe-instances", err))?;

        Ok(response
            .reservations()
            .first()
            .and_then(|reservation| reservation.instances().first())
            .and_then(|instance| instance.state())
            .and_then(|state| state.name())
            .cloned())
    }

    async fn run_instance(&self, spec: &LaunchSpec) -> Result<String, Ec2Error> {
        let mut tag_spec = TagSpecification::builder().resource_type(ResourceType::Instance);
        for (key, value) in &spec.tags {
            tag_spec = tag_spec.tags(Tag::builder().key(key).value(value).build());
        }

        let mut request = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .key_name(&spec.key_name)
            .min_count(1)
            .max_count(1)
            .enclave_options(
                EnclaveOptionsRequest::builder()
                    .enabled(spec.enclave_enabled)
                    .build(),
            )
            .tag_specifications(tag_spec.build());

        for group in &spec.security_groups {
            request = if group.starts_with("sg-") {
                request.security_group_ids(group)
            } else {
                request.security_groups(group)
            };
        }

        for device in &spec.block_devices {
            let mut ebs = EbsBlockDevice::builder().volume_size(device.volume_size_gb);
            if let Some(volume_type) = &device.volume_type {
                ebs = ebs.volume_type(VolumeType::from(volume_type.as_str()));
            }
            if let Some(delete) = device.delete_on_termination {
                ebs = ebs.delete_on_termination(delete);
            }
            request = request.block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&device.device_name)
                    .ebs(ebs.build())
                    .build(),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|err| api_error("run-instances", err))?;

        let instance_id = response
            .instances()
            .first()
            .and_then(|instance| instance.instance_id())
            .ok_or(Ec2Error::Malformed {
                what: "instance id in run-instances response",
            })?;

        tracing::info!(instance_id = %instance_id, "instance launched");
        Ok(instance_id.to_owned())
    }

    async fn poll_until_running(&self, instance_id: &str) -> Result<(), Ec2Error> {
        tracing::info!(instance_id = %instance_id, "waiting for instance to run");
        loop {
            match self.instance_state(instance_id).await? {
                Some(InstanceStateName::Running) => return Ok(()),
                Some(InstanceStateName::Pending) | None => {
                    tracing::debug!(instance_id = %instance_id, "instance still pending");
                    sleep(self.poll_interval).await;
                }
                Some(other) => {
                    return Err(Ec2Error::UnexpectedState {
                        instance_id: instance_id.to_owned(),
                        state: other.as_str().to_owned(),
                    });
                }
            }
        }
    }
}

impl Provider for Ec2Provider {
    type Error = Ec2Error;

    fn instances_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Vec<InstanceSummary>, Self::Error> {
        Box::pin(async move { self.describe_by_name(name).await })
    }

    fn launch<'a>(&'a self, spec: &'a LaunchSpec) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move { self.run_instance(spec).await })
    }

    fn wait_until_running<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.poll_until_running(instance_id).await })
    }

    fn health_status<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let response = self
                .client
                .describe_instance_status()
                .instance_ids(instance_id)
                .include_all_instances(true)
                .send()
                .await
                .map_err(|err| api_error("describe-instance-status", err))?;

            Ok(response
                .instance_statuses()
                .first()
                .and_then(|status| status.instance_status())
                .and_then(|summary| summary.status())
                .map(|status| status.as_str().to_owned()))
        })
    }

    fn create_image<'a>(
        &'a self,
        instance_id: &'a str,
        image_name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let response = self
                .client
                .create_image()
                .instance_id(instance_id)
                .name(image_name)
                .no_reboot(true)
                .send()
                .await
                .map_err(|err| api_error("create-image", err))?;

            response
                .image_id()
                .map(str::to_owned)
                .ok_or(Ec2Error::Malformed {
                    what: "image id in create-image response",
                })
        })
    }

    fn image_state<'a>(
        &'a self,
        image_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let response = self
                .client
                .describe_images()
                .image_ids(image_id)
                .send()
                .await
                .map_err(|err| api_error("describe-images", err))?;

            Ok(response
                .images()
                .first()
                .and_then(|image| image.state())
                .map(|state| state.as_str().to_owned()))
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .terminate_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|err| api_error("terminate-instances", err))?;
            tracing::info!(instance_id = %instance_id, "instance terminated");
            Ok(())
        })
    }
}
