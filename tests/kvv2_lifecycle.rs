#![cfg(feature = "backend-mock")]
use std::collections::HashSet;
use std::time::Duration;

use reqwest::Method;
use vault_bench::backend::VaultBackend;
use vault_bench::backend::mock::MockBackend;
use vault_bench::config::BenchConfig;
use vault_bench::harness;
use vault_bench::target::{
    MountNaming, ProvisioningError, Readiness, ReadyTarget, Registry, SetupOptions,
    TargetProvider,
};

fn provider(kind: &str, config: &str) -> Box<dyn TargetProvider> {
    let registry = Registry::builtin().expect("registry");
    let mut provider = registry.build(kind).expect("known type");
    let block: serde_yaml::Value = serde_yaml::from_str(config).expect("yaml");
    provider.parse_config(&block).expect("decode");
    provider
}

fn fixed(name: &str) -> SetupOptions {
    SetupOptions::new(MountNaming::Fixed(name.into())).with_readiness(Readiness::Fixed(Duration::ZERO))
}

fn index_of(url: &str) -> usize {
    url.rsplit("secret-")
        .next()
        .and_then(|s| s.parse().ok())
        .expect("secret index in url")
}

#[tokio::test]
async fn setup_provisions_exactly_numkvs_entries() {
    for numkvs in [1usize, 2, 17] {
        let backend = MockBackend::new();
        let p = provider("kvv2_read", &format!("numkvs: {numkvs}\nkvsize: 8"));
        p.setup(&backend, &fixed("bench")).await.expect("setup");

        let expected: HashSet<String> = (1..=numkvs).map(|i| format!("secret-{i}")).collect();
        let actual: HashSet<String> = backend.keys("bench").into_iter().collect();
        assert_eq!(actual, expected);
        assert_eq!(backend.write_count(), numkvs);
    }
}

#[tokio::test]
async fn mount_is_a_versioned_kv_engine() {
    let backend = MockBackend::new();
    provider("kvv2_read", "numkvs: 1")
        .setup(&backend, &fixed("bench"))
        .await
        .expect("setup");
    let input = backend.mount_options("bench").expect("mounted");
    assert_eq!(input.kind, "kv");
    assert_eq!(input.options.get("version").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn ready_target_carries_backend_headers() {
    let backend = MockBackend::new().with_namespace("team-a");
    let ready = provider("kvv2_read", "numkvs: 3")
        .setup(&backend, &fixed("bench"))
        .await
        .expect("setup");
    let t = ready.target();
    assert_eq!(t.headers.get("X-Vault-Token").unwrap(), "mock-token");
    assert_eq!(t.headers.get("X-Vault-Namespace").unwrap(), "team-a");
    assert!(t.url.starts_with("http://vault.mock:8200/v1/bench/data/secret-"));
}

#[tokio::test]
async fn populate_failure_reports_index_and_stops() {
    let backend = MockBackend::new();
    backend.fail_writes_ending_with("/secret-4");
    let err = provider("kvv2_write", "numkvs: 10")
        .setup(&backend, &fixed("bench"))
        .await
        .err()
        .expect("setup must fail");
    match err {
        ProvisioningError::Populate { index, ref path, .. } => {
            assert_eq!(index, 4);
            assert_eq!(path, "bench/data/secret-4");
        }
        other => panic!("unexpected error: {other}"),
    }
    // fail-fast: nothing after the failing index was attempted
    assert_eq!(backend.write_count(), 3);
}

#[tokio::test]
async fn mount_rejection_aborts_before_any_write() {
    let backend = MockBackend::new();
    backend.fail_mounts("permission denied");
    let err = provider("kvv2_read", "numkvs: 5")
        .setup(&backend, &fixed("bench"))
        .await
        .err()
        .expect("setup must fail");
    assert!(matches!(err, ProvisioningError::Mount { ref path, .. } if path == "bench"));
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test]
async fn reusing_a_fixed_name_collides() {
    let backend = MockBackend::new();
    let p = provider("kvv2_read", "numkvs: 2");
    p.setup(&backend, &fixed("bench")).await.expect("first setup");
    let err = p.setup(&backend, &fixed("bench")).await.err().expect("collision");
    assert!(matches!(err, ProvisioningError::Mount { .. }));
}

#[tokio::test]
async fn random_naming_creates_a_new_mount_each_time() {
    let backend = MockBackend::new();
    let p = provider("kvv2_read", "numkvs: 2");
    let opts = SetupOptions::new(MountNaming::Random).with_readiness(Readiness::Fixed(Duration::ZERO));
    let a = p.setup(&backend, &opts).await.expect("setup a");
    let b = p.setup(&backend, &opts).await.expect("setup b");
    assert_ne!(a.info().path_prefix, b.info().path_prefix);
    assert_eq!(backend.mounts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fixed_settle_delay_waits_out_upgrade_window() {
    let backend = MockBackend::new().with_settle(Duration::from_secs(2));
    let opts = SetupOptions::new(MountNaming::Fixed("bench".into()));
    provider("kvv2_read", "numkvs: 5")
        .setup(&backend, &opts)
        .await
        .expect("default readiness covers the upgrade window");
    assert_eq!(backend.keys("bench").len(), 5);
}

#[tokio::test(start_paused = true)]
async fn writing_before_the_mount_settles_fails() {
    let backend = MockBackend::new().with_settle(Duration::from_secs(2));
    let err = provider("kvv2_read", "numkvs: 5")
        .setup(&backend, &fixed("bench"))
        .await
        .err()
        .expect("no wait means the first write hits the upgrade window");
    assert!(matches!(err, ProvisioningError::Populate { index: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn polling_readiness_waits_for_the_mount() {
    let backend = MockBackend::new().with_settle(Duration::from_millis(750));
    let opts = SetupOptions::new(MountNaming::Fixed("bench".into())).with_readiness(Readiness::Poll {
        interval: Duration::from_millis(100),
        timeout: Duration::from_secs(5),
    });
    provider("kvv2_read", "numkvs: 3")
        .setup(&backend, &opts)
        .await
        .expect("setup");
    assert_eq!(backend.keys("bench").len(), 3);
    assert!(backend.probe_count() > 1);
}

#[tokio::test(start_paused = true)]
async fn polling_readiness_gives_up_after_timeout() {
    let backend = MockBackend::new().with_settle(Duration::from_secs(60));
    let opts = SetupOptions::new(MountNaming::Fixed("bench".into())).with_readiness(Readiness::Poll {
        interval: Duration::from_millis(100),
        timeout: Duration::from_secs(1),
    });
    let err = provider("kvv2_read", "numkvs: 3")
        .setup(&backend, &opts)
        .await
        .err()
        .expect("never ready");
    assert!(matches!(err, ProvisioningError::NotReady { .. }));
    assert_eq!(backend.write_count(), 0);
}

#[tokio::test]
async fn teardown_removes_the_mount() {
    let backend = MockBackend::new();
    let ready = provider("kvv2_read", "numkvs: 4")
        .setup(&backend, &fixed("bench"))
        .await
        .expect("setup");
    assert!(backend.read("bench/data/secret-1").await.expect("read").is_some());

    ready.cleanup(&backend).await.expect("cleanup");
    assert!(backend.mounts().is_empty());
    for i in 1..=4 {
        let got = backend.read(&format!("bench/data/secret-{i}")).await.expect("read");
        assert!(got.is_none(), "secret-{i} still readable");
    }
}

#[tokio::test]
async fn teardown_failure_is_surfaced() {
    let backend = MockBackend::new();
    let ready = provider("kvv2_read", "numkvs: 1")
        .setup(&backend, &fixed("bench"))
        .await
        .expect("setup");
    backend.fail_deletes("permission denied");
    let err = ready.cleanup(&backend).await.unwrap_err();
    assert_eq!(err.path, "sys/mounts/bench");
    assert_eq!(backend.mounts(), vec!["bench".to_string()]);
}

#[tokio::test]
async fn concurrent_generation_stays_in_range() {
    let backend = MockBackend::new();
    let numkvs = 50;
    let ready = provider("kvv2_write", &format!("numkvs: {numkvs}\nkvsize: 2"))
        .setup(&backend, &fixed("bench"))
        .await
        .expect("setup");
    let ready: &dyn ReadyTarget = ready.as_ref();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..64)
            .map(|_| {
                scope.spawn(move || {
                    let mut seen_low = false;
                    let mut seen_high = false;
                    for _ in 0..10_000 {
                        let index = index_of(&ready.target().url);
                        assert!((1..=numkvs).contains(&index), "index {index} out of range");
                        seen_low |= index == 1;
                        seen_high |= index == numkvs;
                    }
                    (seen_low, seen_high)
                })
            })
            .collect();
        let results: Vec<(bool, bool)> = handles
            .into_iter()
            .map(|h| h.join().expect("generator thread panicked"))
            .collect();
        assert!(results.iter().any(|(low, _)| *low));
        assert!(results.iter().any(|(_, high)| *high));
    });
}

#[tokio::test]
async fn write_scenario_end_to_end() {
    let backend = MockBackend::new();
    let ready = provider("kvv2_write", "numkvs: 5\nkvsize: 3")
        .setup(&backend, &fixed("scenario"))
        .await
        .expect("setup");
    assert_eq!(
        backend.keys("scenario"),
        (1..=5).map(|i| format!("secret-{i}")).collect::<Vec<_>>()
    );
    let placeholder = backend
        .read("scenario/data/secret-3")
        .await
        .expect("read")
        .expect("placeholder");
    assert_eq!(placeholder["data"]["foo"], 1);

    for _ in 0..1000 {
        let t = ready.target();
        assert_eq!(t.method, Method::POST);
        let index = index_of(&t.url);
        assert!((1..=5).contains(&index));
        let body: serde_json::Value =
            serde_json::from_slice(t.body.as_ref().expect("write body")).expect("json body");
        assert_eq!(body["data"]["foo"], "aaa");
    }

    ready.cleanup(&backend).await.expect("cleanup");
    assert!(backend.mounts().is_empty());

    // metadata does not depend on backend state
    let info = ready.info();
    assert_eq!(info.method, Method::POST);
    assert_eq!(info.path_prefix, "/v1/scenario");
}

const TWO_TESTS: &str = r#"
random_mounts: false
tests:
  - type: kvv2_read
    name: first
    config:
      numkvs: 3
  - type: kvv2_write
    name: second
    config:
      numkvs: 3
"#;

#[tokio::test]
async fn failed_setup_tears_down_earlier_tests() {
    let backend = MockBackend::new();
    backend.fail_writes_ending_with("second/data/secret-2");
    let bench = BenchConfig::parse(TWO_TESTS).expect("config");
    let providers = harness::decode_all(&Registry::builtin().expect("registry"), &bench).expect("decode");

    let err = harness::setup_all(&backend, &bench, providers, &Readiness::Fixed(Duration::ZERO))
        .await
        .err()
        .expect("second test fails to populate");
    assert!(format!("{err:#}").contains("setting up test second"), "{err:#}");
    // first: 3 writes, second: 1 before the failing index
    assert_eq!(backend.write_count(), 4);
    // only completed setups are torn down; the failing test's mount stays
    assert_eq!(backend.mounts(), vec!["second".to_string()]);
    assert!(backend.keys("first").is_empty());
}

#[tokio::test]
async fn cleanup_all_removes_every_mount() {
    let backend = MockBackend::new();
    let bench = BenchConfig::parse(TWO_TESTS).expect("config");
    let providers = harness::decode_all(&Registry::builtin().expect("registry"), &bench).expect("decode");

    let ready = harness::setup_all(&backend, &bench, providers, &Readiness::Fixed(Duration::ZERO))
        .await
        .expect("setup");
    assert_eq!(backend.mounts(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(ready[0].info().method, Method::GET);
    assert_eq!(ready[1].info().method, Method::POST);

    harness::cleanup_all(&backend, &bench, &ready).await;
    assert!(backend.mounts().is_empty());
}

#[test]
fn decode_all_rejects_unknown_types_before_setup() {
    let bench = BenchConfig::parse(
        "tests:\n  - type: pki_issue\n    name: certs\n",
    )
    .expect("config");
    let err = harness::decode_all(&Registry::builtin().expect("registry"), &bench)
        .err()
        .expect("unknown type");
    assert!(format!("{err:#}").contains("certs"), "{err:#}");
}
