//! End-to-end dry run: tag push, both families, one downstream dispatch.

use std::path::Path;
use std::sync::Arc;

use relay_cli::{AppOptions, RelayApp};
use relay_core::{GateOutcome, InboundEvent, ReportDetail};

const MANIFEST: &str = "[package]\nname = \"tod\"\nversion = \"2.3.1\"\n";

const CONFIG: &str = r#"
tool_name = "tod"

[[targets]]
triple = "x86_64-unknown-linux-gnu"
runner = "ubuntu-latest"

[[targets]]
triple = "aarch64-apple-darwin"
runner = "macos-14"

[downstream]
repository = "acme/homebrew-tod"

[forge]
repository = "acme/tod"
create_release = true

[toolchain]
test_command = ["sh", "-c", "exit 0"]
build_command = ["sh", "-c", 'mkdir -p "$CARGO_TARGET_DIR/$1/release" && printf bin > "$CARGO_TARGET_DIR/$1/release/tod"']
timeout_secs = 60
"#;

fn workspace(config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();
    std::fs::write(dir.path().join("relay.toml"), config).unwrap();
    dir
}

fn dry_run(dir: &Path) -> RelayApp {
    RelayApp::load(&dir.join("relay.toml"), AppOptions { dry_run: true }).unwrap()
}

#[tokio::test]
async fn tag_push_dispatches_once_after_both_families() {
    let dir = workspace(CONFIG);
    let app = dry_run(dir.path());
    let router = app.router(Arc::new(app.launcher().unwrap())).unwrap();

    let reports = router
        .handle(InboundEvent::TagPushed {
            tag: "v2.3.1".to_string(),
        })
        .await;
    assert!(reports.iter().all(|r| !r.is_error()), "{reports:?}");

    let dispatched = reports
        .iter()
        .filter(|r| {
            matches!(
                &r.detail,
                ReportDetail::Gate {
                    outcome: GateOutcome::Dispatched { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(dispatched, 1);

    let record = app
        .read_only_gate()
        .unwrap()
        .status("v2.3.1")
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_dispatched());

    let runs = app.ledger().list_runs(Some("v2.3.1")).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.is_finalized()));

    assert!(dir.path().join("dist/tod-2.3.1-linux-x86_64.tar.gz").is_file());
    assert!(dir.path().join("dist/tod-2.3.1-macos-aarch64.tar.gz.sha256").is_file());
}

#[tokio::test]
async fn gate_state_survives_restart() {
    let dir = workspace(CONFIG);
    {
        let app = dry_run(dir.path());
        let router = app.router(Arc::new(app.launcher().unwrap())).unwrap();
        router
            .handle(InboundEvent::ManualRun {
                family: relay_core::OsFamily::Linux,
                tag: Some("v2.3.1".to_string()),
            })
            .await;
    }

    let app = dry_run(dir.path());
    let gate = app.gate().unwrap();
    let outcome = gate
        .notify(
            "v2.3.1",
            relay_core::OsFamily::Macos,
            relay_state::Conclusion::Success,
            None,
            chrono::Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, GateOutcome::Dispatched { .. }));
}

#[tokio::test]
async fn failing_tests_block_dispatch() {
    let config = CONFIG.replace(r#"["sh", "-c", "exit 0"]"#, r#"["sh", "-c", "exit 101"]"#);
    let dir = workspace(&config);
    let app = dry_run(dir.path());
    let router = app.router(Arc::new(app.launcher().unwrap())).unwrap();

    let reports = router
        .handle(InboundEvent::TagPushed {
            tag: "v2.3.1".to_string(),
        })
        .await;
    assert!(reports.iter().all(|r| !matches!(
        &r.detail,
        ReportDetail::Gate {
            outcome: GateOutcome::Dispatched { .. },
            ..
        }
    )));

    let gate = app.read_only_gate().unwrap();
    let record = gate.status("v2.3.1").await.unwrap().unwrap();
    assert!(!record.is_dispatched());
    assert_eq!(record.failed_families(gate.required_families()), vec!["linux", "macos"]);
    assert!(!dir.path().join("dist").join("tod-2.3.1-linux-x86_64.tar.gz").exists());
}
