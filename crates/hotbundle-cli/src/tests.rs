use super::*;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::error::ErrorKind;
use hotbundle_core::{CheckOutcome, HostReloader, PatchCodec, UpdateDescriptor, UpdateError};
use hotbundle_installer::CleanupReport;

use crate::completion::write_completions_script;
use crate::dispatch::{format_check_outcome_lines, format_cleanup_lines, format_status_lines};
use crate::host::{
    build_engine, load_settings, package_file_name, parse_extras, parse_settings,
    ProcessReloader, UnsupportedPatchCodec,
};
use crate::render::{render_progress_line, render_status_line, resolve_output_style, OutputStyle};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

const SAMPLE_CONFIG: &str = r#"
app_key = "demo-app"
root_dir = "/var/lib/demo-app/updates"
check_window_ms = 2000

[server]
main = "https://main.test/api"
backups = ["https://backup.test/api"]

[host]
package_version = "1.0.0"
build_time = "build-1"
"#;

fn build_test_root_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "hotbundle-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    build_test_root_path(nanos)
}

fn sample_descriptor() -> UpdateDescriptor {
    UpdateDescriptor {
        hash: "v2".to_string(),
        name: "2.0".to_string(),
        description: "bug fixes".to_string(),
        meta_info: String::new(),
        paths: vec!["cdn.test".to_string()],
        diff: Some("v1-v2.zip".to_string()),
        pdiff: None,
        full: Some("v2.full.zip".to_string()),
        rollout: Some(50),
    }
}

#[test]
fn build_test_root_path_disambiguates_same_timestamp_calls() {
    let first = build_test_root_path(42);
    let second = build_test_root_path(42);
    assert_ne!(
        first, second,
        "test root paths must remain unique when timestamp granularity is coarse"
    );
}

#[test]
fn cli_parses_check_with_repeatable_extras() {
    let cli = Cli::try_parse_from([
        "hotbundle",
        "check",
        "--extra",
        "channel=beta",
        "--extra",
        "region=eu",
    ])
    .expect("command must parse");

    assert_eq!(cli.config, PathBuf::from("hotbundle.toml"));
    match cli.command {
        Commands::Check { extra } => {
            assert_eq!(extra, vec!["channel=beta", "region=eu"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_download_with_switch_mode() {
    let cli = Cli::try_parse_from(["hotbundle", "download", "--switch", "restart"])
        .expect("command must parse");
    match cli.command {
        Commands::Download { switch, extra } => {
            assert_eq!(switch, Some(SwitchMode::Restart));
            assert!(extra.is_empty());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_rejects_unknown_switch_mode() {
    let err = Cli::try_parse_from(["hotbundle", "download", "--switch", "later"])
        .expect_err("unknown switch mode must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn cli_parses_switch_with_global_overrides_after_subcommand() {
    let cli = Cli::try_parse_from([
        "hotbundle",
        "switch",
        "v2",
        "--now",
        "--config",
        "/etc/demo/hotbundle.toml",
        "--root",
        "/data/updates",
    ])
    .expect("command must parse");

    assert_eq!(cli.config, PathBuf::from("/etc/demo/hotbundle.toml"));
    assert_eq!(cli.root, Some(PathBuf::from("/data/updates")));
    match cli.command {
        Commands::Switch { hash, now } => {
            assert_eq!(hash, "v2");
            assert!(now);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_rejects_switch_without_hash() {
    let err = Cli::try_parse_from(["hotbundle", "switch"]).expect_err("missing hash must fail");
    assert!(err.to_string().contains("<HASH>"));
}

#[test]
fn cli_parses_fetch_package_with_file_name() {
    let cli = Cli::try_parse_from([
        "hotbundle",
        "fetch-package",
        "https://cdn.test/app.apk",
        "--file-name",
        "demo.apk",
    ])
    .expect("command must parse");
    match cli.command {
        Commands::FetchPackage { url, file_name } => {
            assert_eq!(url, "https://cdn.test/app.apk");
            assert_eq!(file_name.as_deref(), Some("demo.apk"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_lifecycle_commands() {
    let parse = |name: &str| {
        Cli::try_parse_from(["hotbundle", name])
            .expect("command must parse")
            .command
    };

    assert!(matches!(parse("mark-success"), Commands::MarkSuccess));
    assert!(matches!(parse("clear-rollback"), Commands::ClearRollback));
    assert!(matches!(parse("resolve"), Commands::Resolve));
    assert!(matches!(parse("cleanup"), Commands::Cleanup));
    assert!(matches!(parse("status"), Commands::Status { json: false }));
}

#[test]
fn cli_parses_completions_for_each_supported_shell() {
    let cases = vec![
        ("bash", CliCompletionShell::Bash),
        ("zsh", CliCompletionShell::Zsh),
        ("fish", CliCompletionShell::Fish),
        ("powershell", CliCompletionShell::Powershell),
    ];

    for (shell, expected) in cases {
        let cli =
            Cli::try_parse_from(["hotbundle", "completions", shell]).expect("command parses");
        match cli.command {
            Commands::Completions { shell } => {
                assert_eq!(shell, expected);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

#[test]
fn cli_rejects_unsupported_completion_shell() {
    let err = Cli::try_parse_from(["hotbundle", "completions", "elvish"])
        .expect_err("unsupported shell must fail");
    let rendered = err.to_string();
    assert!(rendered.contains("elvish"));
    assert!(rendered.contains("possible values"));
}

#[test]
fn write_completions_script_emits_binary_name() {
    let mut output = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut output)
        .expect("must generate completions");
    let script = String::from_utf8(output).expect("script must be utf8");
    assert!(script.contains("hotbundle"));
    assert!(script.contains("mark-success"));
}

#[test]
fn parse_settings_reads_engine_and_host_sections() {
    let settings = parse_settings(SAMPLE_CONFIG, None).expect("must parse settings");

    assert_eq!(settings.engine.app_key, "demo-app");
    assert_eq!(
        settings.engine.root_dir,
        PathBuf::from("/var/lib/demo-app/updates")
    );
    assert_eq!(settings.engine.server.backups, vec!["https://backup.test/api"]);
    assert_eq!(settings.engine.check_window(), Duration::from_millis(2000));
    assert_eq!(settings.engine.retention_days, 7);
    assert_eq!(settings.host.package_version, "1.0.0");
    assert_eq!(settings.host.build_time, "build-1");
    assert_eq!(
        settings.origin_dir(),
        PathBuf::from("/var/lib/demo-app/updates/.origin")
    );
}

#[test]
fn parse_settings_applies_root_override() {
    let settings = parse_settings(SAMPLE_CONFIG, Some(Path::new("/data/updates")))
        .expect("must parse settings");
    assert_eq!(settings.engine.root_dir, PathBuf::from("/data/updates"));
    assert_eq!(
        settings.origin_dir(),
        PathBuf::from("/data/updates/.origin")
    );
}

#[test]
fn parse_settings_rejects_missing_package_version() {
    let raw = SAMPLE_CONFIG.replace("package_version = \"1.0.0\"\n", "");
    let err = parse_settings(&raw, None).expect_err("missing package version must fail");
    assert!(err.to_string().contains("host.package_version"));
}

#[test]
fn parse_settings_rejects_empty_app_key() {
    let raw = SAMPLE_CONFIG.replace("app_key = \"demo-app\"", "app_key = \" \"");
    let err = parse_settings(&raw, None).expect_err("empty app key must fail");
    assert!(format!("{err:#}").contains("app_key must not be empty"));
}

#[test]
fn load_settings_reports_missing_file() {
    let path = test_root().join("hotbundle.toml");
    let err = load_settings(&path, None).expect_err("missing file must fail");
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn parse_extras_builds_string_fields() {
    let extras = parse_extras(&["channel=beta".to_string(), "note=a=b".to_string()])
        .expect("must parse extras");
    assert_eq!(extras.get("channel"), Some(&serde_json::json!("beta")));
    assert_eq!(extras.get("note"), Some(&serde_json::json!("a=b")));
}

#[test]
fn parse_extras_rejects_malformed_pairs() {
    let err = parse_extras(&["channel".to_string()]).expect_err("missing '=' must fail");
    assert!(err.to_string().contains("expected KEY=VALUE"));

    let err = parse_extras(&["=beta".to_string()]).expect_err("empty key must fail");
    assert!(err.to_string().contains("key must not be empty"));
}

#[test]
fn package_file_name_prefers_explicit_then_url_segment() {
    assert_eq!(
        package_file_name("https://cdn.test/app.apk", Some("demo.apk")),
        "demo.apk"
    );
    assert_eq!(
        package_file_name("https://cdn.test/builds/app.apk?token=1", None),
        "app.apk"
    );
    assert_eq!(package_file_name("https://cdn.test/", None), "package.bin");
    assert_eq!(package_file_name("https://cdn.test/app.apk", Some("  ")), "app.apk");
}

#[test]
fn unsupported_patch_codec_reports_patch_apply_error() {
    let err = UnsupportedPatchCodec
        .apply(b"base", b"patch")
        .expect_err("codec must refuse");
    assert!(matches!(err, UpdateError::PatchApply(_)));
}

#[test]
fn process_reloader_records_requested_bundle() {
    let reloader = ProcessReloader::default();
    assert_eq!(reloader.requested(), None);

    reloader
        .reload(Some(Path::new("/data/updates/v2/index.bundlejs")))
        .expect("reload must succeed");
    assert_eq!(
        reloader.requested(),
        Some(PathBuf::from("/data/updates/v2/index.bundlejs"))
    );
}

#[test]
fn build_engine_persists_installation_id_across_runs() {
    let root = test_root();
    let settings = parse_settings(SAMPLE_CONFIG, Some(&root)).expect("must parse settings");

    let (engine, _) = build_engine(&settings).expect("must build engine");
    let status = engine.status().expect("must read status");
    assert_eq!(status.state, "no-version");
    assert_eq!(status.package_version, "1.0.0");
    let installation_id = engine.installation_id().to_string();
    drop(engine);

    let (reopened, _) = build_engine(&settings).expect("must reopen engine");
    assert_eq!(reopened.installation_id(), installation_id);
    assert_eq!(reopened.resolve_bundle().expect("must resolve"), None);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn resolve_output_style_uses_rich_only_for_tty_stdout() {
    assert_eq!(resolve_output_style(true, true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "downloaded version v2"),
        "downloaded version v2"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "downloaded version v2"),
        "[OK] downloaded version v2"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "version v2 was not downloaded"),
        "[WARN] version v2 was not downloaded"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "info", "packaged bundle"),
        "[..] packaged bundle"
    );
}

#[test]
fn render_progress_line_is_hidden_for_plain_output() {
    assert_eq!(
        render_progress_line(OutputStyle::Plain, "download", 5, 10, None),
        None
    );
}

#[test]
fn render_progress_line_rich_reports_percent_and_elapsed() {
    let line = render_progress_line(
        OutputStyle::Rich,
        "download",
        512,
        1024,
        Some(Duration::from_millis(1_250)),
    )
    .expect("rich output must render");
    assert!(line.contains(" 50% "), "{line}");
    assert!(line.contains("complete in 1.250s"), "{line}");
}

#[test]
fn format_check_outcome_lines_describes_update() {
    let lines = format_check_outcome_lines(
        &CheckOutcome::Update(sample_descriptor()),
        OutputStyle::Rich,
    );
    assert_eq!(
        lines,
        vec![
            "[OK] update available: v2".to_string(),
            "  name: 2.0".to_string(),
            "  description: bug fixes".to_string(),
            "  strategies: diff,full".to_string(),
            "  rollout: 50%".to_string(),
        ]
    );
}

#[test]
fn format_check_outcome_lines_plain_up_to_date() {
    assert_eq!(
        format_check_outcome_lines(&CheckOutcome::UpToDate, OutputStyle::Plain),
        vec!["up to date".to_string()]
    );
    assert_eq!(
        format_check_outcome_lines(
            &CheckOutcome::Unavailable {
                message: "network error: offline".to_string()
            },
            OutputStyle::Rich
        ),
        vec!["[ERR] update check unavailable: network error: offline".to_string()]
    );
}

#[test]
fn format_cleanup_lines_lists_removed_and_failed_entries() {
    let report = CleanupReport {
        removed: vec!["old-a".to_string(), "old.full.zip".to_string()],
        retained: vec!["v2".to_string()],
        failed: vec!["locked".to_string()],
    };
    assert_eq!(
        format_cleanup_lines(&report, OutputStyle::Plain),
        vec![
            "cleanup: removed=2 retained=1 failed=1".to_string(),
            "  removed old-a".to_string(),
            "  removed old.full.zip".to_string(),
            "  failed to remove locked".to_string(),
        ]
    );
}

#[test]
fn format_status_lines_uses_placeholders_for_missing_versions() {
    let root = test_root();
    let settings = parse_settings(SAMPLE_CONFIG, Some(&root)).expect("must parse settings");
    let (engine, _) = build_engine(&settings).expect("must build engine");
    let status = engine.status().expect("must read status");

    let lines = format_status_lines(&status);
    assert_eq!(lines[0], "app: demo-app");
    assert!(lines.contains(&"current: -".to_string()));
    assert!(lines.contains(&"package: 1.0.0 (build build-1)".to_string()));
    assert!(lines.contains(&"first boot: no".to_string()));

    let _ = std::fs::remove_dir_all(&root);
}
