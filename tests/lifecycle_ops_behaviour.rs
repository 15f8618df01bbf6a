//! Behavioural coverage for the terminate, report, snapshot, and
//! interactive-shell operations.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use sysup::document::Document;
use sysup::lifecycle::{LifecycleController, LifecycleError, LifecycleTiming};
use sysup::provider::InstanceSummary;
use sysup::test_support::{FakeProvider, FakeTransport};

const DOCUMENT: &str = r"
region: us-east-1
image_id: ami-0123456789abcdef0
instance_type: t3.micro
key_name: provision-key
tags:
  - key: Name
    value: myname
connection:
  username: ubuntu
  private_key: /keys/myname.pem
";

fn controller(provider: FakeProvider) -> LifecycleController<FakeProvider, FakeTransport> {
    let document = Document::from_yaml(DOCUMENT, &|_| None).expect("document loads");
    LifecycleController::new(provider, FakeTransport::new(), document, 22).with_timing(
        LifecycleTiming {
            health_poll_interval: Duration::from_millis(1),
            image_initial_wait: Duration::from_secs(90),
            image_poll_interval: Duration::from_secs(5),
        },
    )
}

fn running(id: &str, ip: Option<IpAddr>) -> Vec<InstanceSummary> {
    vec![InstanceSummary {
        id: id.to_owned(),
        state: String::from("running"),
        public_ip: ip,
    }]
}

#[tokio::test]
async fn destroy_without_instance_fails_loudly() {
    let provider = FakeProvider::new();
    let err = controller(provider.clone())
        .destroy()
        .await
        .expect_err("nothing to destroy");

    assert!(
        err.to_string().contains("\"myname\" is NOT running"),
        "error: {err}"
    );
    assert!(provider.terminated().is_empty());
}

#[tokio::test]
async fn destroy_terminates_and_reports_the_identifier() {
    let provider = FakeProvider::new();
    provider.push_describe(running("i-doomed", None));

    let id = controller(provider.clone())
        .destroy()
        .await
        .expect("terminates");
    assert_eq!(id, "i-doomed");
    assert_eq!(provider.terminated(), vec![String::from("i-doomed")]);
}

#[tokio::test]
async fn report_requires_a_running_instance() {
    let provider = FakeProvider::new();
    let err = controller(provider)
        .report()
        .await
        .expect_err("nothing to report");
    assert!(matches!(err, LifecycleError::NotRunning { .. }));
}

#[tokio::test]
async fn report_yields_the_identifier() {
    let provider = FakeProvider::new();
    provider.push_describe(running("i-live", None));

    let id = controller(provider).report().await.expect("reports");
    assert_eq!(id, "i-live");
}

#[tokio::test]
async fn save_image_is_a_noop_without_an_instance() {
    let provider = FakeProvider::new();
    let outcome = controller(provider.clone())
        .save_image()
        .await
        .expect("no-op success");

    assert_eq!(outcome, None);
    assert!(provider.created_images().is_empty());
}

#[tokio::test(start_paused = true)]
async fn save_image_waits_then_polls_until_available() {
    let provider = FakeProvider::new();
    provider.push_describe(running("i-live", None));
    provider.push_image_state(Some("pending"));
    provider.push_image_state(Some("available"));

    let started = tokio::time::Instant::now();
    let outcome = controller(provider.clone())
        .save_image()
        .await
        .expect("image captured");
    let elapsed = started.elapsed();

    assert_eq!(outcome, Some(String::from("ami-fake")));
    assert!(
        elapsed >= Duration::from_secs(95),
        "must wait the initial settle plus one poll, elapsed {elapsed:?}"
    );

    let images = provider.created_images();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].0, "i-live");
    assert!(
        images[0].1.starts_with("myname-"),
        "image name derives from the system name: {}",
        images[0].1
    );
}

#[tokio::test]
async fn ssh_invocation_targets_the_public_address() {
    let provider = FakeProvider::new();
    let address = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 23));
    provider.push_describe(running("i-live", Some(address)));

    let invocation = controller(provider)
        .ssh_invocation()
        .await
        .expect("invocation built");

    assert_eq!(invocation.program, "ssh");
    assert_eq!(
        invocation.args,
        vec![
            String::from("-i"),
            String::from("/keys/myname.pem"),
            String::from("ubuntu@198.51.100.23"),
        ]
    );
}

#[tokio::test]
async fn ssh_without_instance_fails_loudly() {
    let provider = FakeProvider::new();
    let err = controller(provider)
        .ssh_invocation()
        .await
        .expect_err("nothing to connect to");
    assert!(matches!(err, LifecycleError::NotRunning { .. }));
}

#[tokio::test]
async fn ssh_without_public_address_fails_loudly() {
    let provider = FakeProvider::new();
    provider.push_describe(running("i-live", None));

    let err = controller(provider)
        .ssh_invocation()
        .await
        .expect_err("no address to connect to");
    assert!(matches!(err, LifecycleError::NoPublicAddress { .. }));
}
