//! Behavioural coverage for document loading, placeholder resolution, and
//! validation.

use rstest::rstest;
use sysup::document::{Document, DocumentError, Step, WaitPolicy};

const BASE_DOCUMENT: &str = r"
region: us-east-1
image_id: ami-0123456789abcdef0
instance_type: t3.micro
security_groups:
  - sg-0a1b2c3d
key_name: provision-key
tags:
  - key: Name
    value: builder
  - key: role
    value: ci
connection:
  username: ubuntu
  private_key: /keys/builder.pem
";

fn no_env(_name: &str) -> Option<String> {
    None
}

fn load(raw: &str) -> Result<Document, DocumentError> {
    Document::from_yaml(raw, &no_env)
}

#[test]
fn minimal_document_loads_with_defaults() {
    let document = load(BASE_DOCUMENT).expect("document loads");

    assert_eq!(document.name(), "builder");
    assert_eq!(document.wait_for, WaitPolicy::Fixed(10));
    assert!(!document.enclave.enabled);
    assert!(!document.fail_fast);
    assert!(document.steps.is_empty());
}

#[test]
fn placeholders_resolve_against_the_environment() {
    let raw = BASE_DOCUMENT.replace("/keys/builder.pem", "${KEY_DIR}/builder.pem");
    let env = |name: &str| (name == "KEY_DIR").then(|| String::from("/srv/keys"));

    let document = Document::from_yaml(&raw, &env).expect("document loads");
    assert_eq!(
        document.connection.private_key.as_str(),
        "/srv/keys/builder.pem"
    );
}

#[test]
fn unresolved_placeholder_fails_the_whole_load() {
    let raw = BASE_DOCUMENT.replace("/keys/builder.pem", "${ABSENT_KEY_DIR}/builder.pem");

    let err = load(&raw).expect_err("load fails");
    assert_eq!(
        err,
        DocumentError::MissingEnvVar {
            name: String::from("ABSENT_KEY_DIR")
        }
    );
}

#[test]
fn first_tag_must_be_the_name_tag() {
    let raw = BASE_DOCUMENT.replace(
        "  - key: Name\n    value: builder\n  - key: role\n    value: ci",
        "  - key: role\n    value: ci\n  - key: Name\n    value: builder",
    );

    let err = load(&raw).expect_err("load fails");
    assert_eq!(
        err,
        DocumentError::FirstTagNotName {
            found: String::from("role")
        }
    );
}

#[rstest]
#[case("wait_for: 5", WaitPolicy::Fixed(5))]
#[case("wait_for: 0", WaitPolicy::Fixed(0))]
#[case("wait_for: ok", WaitPolicy::UntilHealthy)]
#[case("wait_for: OK", WaitPolicy::UntilHealthy)]
fn wait_policy_variants_parse(#[case] line: &str, #[case] expected: WaitPolicy) {
    let raw = format!("{BASE_DOCUMENT}\n{line}\n");
    let document = load(&raw).expect("document loads");
    assert_eq!(document.wait_for, expected);
}

#[rstest]
#[case("wait_for: 5.5")]
#[case("wait_for: soon")]
#[case("wait_for: -3")]
fn malformed_wait_policies_are_fatal(#[case] line: &str) {
    let raw = format!("{BASE_DOCUMENT}\n{line}\n");
    assert!(matches!(load(&raw), Err(DocumentError::Parse { .. })));
}

#[test]
fn steps_preserve_document_order() {
    let raw = format!(
        "{BASE_DOCUMENT}
steps:
  - shell:
      commands:
        - name: first
          run: echo first
  - copy_folder:
      folders:
        - source: ./pubkeys
          destination: pubkeys
  - reboot
  - shell:
      commands:
        - name: last
          run: echo last
          sudo: true
          user: deploy
"
    );

    let document = load(&raw).expect("document loads");
    assert_eq!(document.steps.len(), 4);
    assert!(matches!(&document.steps[0], Step::Shell { commands } if commands[0].name == "first"));
    assert!(matches!(&document.steps[1], Step::CopyFolder { folders } if folders.len() == 1));
    assert!(matches!(&document.steps[2], Step::Reboot));
    assert!(matches!(
        &document.steps[3],
        Step::Shell { commands } if commands[0].sudo && commands[0].user.as_deref() == Some("deploy")
    ));
}

#[test]
fn unknown_step_tag_names_the_offender() {
    let raw = format!(
        "{BASE_DOCUMENT}
steps:
  - frobnicate:
      target: everything
"
    );

    let err = load(&raw).expect_err("load fails");
    match err {
        DocumentError::Parse { message } => {
            assert!(message.contains("frobnicate"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn block_devices_require_positive_sizes() {
    let raw = format!(
        "{BASE_DOCUMENT}
block_devices:
  - device_name: /dev/sda1
    volume_size_gb: 0
"
    );

    let err = load(&raw).expect_err("load fails");
    assert_eq!(
        err,
        DocumentError::InvalidBlockDevice {
            device: String::from("/dev/sda1")
        }
    );
}

#[test]
fn launch_spec_carries_every_tag_in_order() {
    let document = load(BASE_DOCUMENT).expect("document loads");
    let spec = document.launch_spec();

    assert_eq!(
        spec.tags,
        vec![
            (String::from("Name"), String::from("builder")),
            (String::from("role"), String::from("ci")),
        ]
    );
    assert!(!spec.enclave_enabled);
    assert_eq!(spec.key_name, "provision-key");
}
