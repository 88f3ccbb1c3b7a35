use anyhow::{Context, Result};
use hotbundle_core::{CheckOutcome, PausedScope, UpdateDescriptor};
use hotbundle_installer::CleanupReport;
use hotbundle_registry::{EngineStatus, UpdateEngine};

use crate::completion::write_completions_script;
use crate::host::{build_engine, load_settings, package_file_name, parse_extras, ProcessReloader};
use crate::render::{
    lock_progress, progress_callback, render_status_line, OutputStyle, TerminalRenderer,
};
use crate::{Cli, Commands, SwitchMode};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout();
        return write_completions_script(*shell, &mut stdout);
    }

    let settings = load_settings(&cli.config, cli.root.as_deref())?;
    let (engine, reloader) = build_engine(&settings)?;
    if let Some(rolled_back) = engine.take_rollback_report() {
        renderer.print_status(
            "warn",
            &format!("version {rolled_back} failed to boot and was rolled back"),
        );
    }

    match cli.command {
        Commands::Check { extra } => {
            let outcome = engine.check(parse_extras(&extra)?).await?;
            renderer.print_lines(&format_check_outcome_lines(&outcome, renderer.style()));
        }
        Commands::Download { extra, switch } => {
            let outcome = engine.check(parse_extras(&extra)?).await?;
            let descriptor = match outcome {
                CheckOutcome::Update(descriptor) => descriptor,
                other => {
                    renderer.print_lines(&format_check_outcome_lines(&other, renderer.style()));
                    return Ok(());
                }
            };
            let Some(hash) = download_version(&engine, renderer, &descriptor).await? else {
                return Ok(());
            };
            match switch {
                Some(SwitchMode::Now) => switch_now(&engine, &reloader, renderer, &hash)?,
                Some(SwitchMode::Restart) => switch_on_restart(&engine, renderer, &hash)?,
                None => {}
            }
        }
        Commands::Switch { hash, now } => {
            if now {
                switch_now(&engine, &reloader, renderer, &hash)?;
            } else {
                switch_on_restart(&engine, renderer, &hash)?;
            }
        }
        Commands::MarkSuccess => {
            if engine.mark_boot_success().await? {
                let current = engine.store().current_version()?.unwrap_or_default();
                renderer.print_status("ok", &format!("confirmed version {current}"));
            } else {
                renderer.print_status("info", "no version is awaiting confirmation");
            }
        }
        Commands::ClearRollback => {
            engine.clear_rollback_marker()?;
            renderer.print_status("ok", "cleared rollback marker");
        }
        Commands::Resolve => match engine.resolve_bundle()? {
            Some(path) => println!("{}", path.display()),
            None => renderer.print_status("info", "packaged bundle"),
        },
        Commands::Status { json } => {
            let status = engine.status()?;
            if json {
                let rendered = serde_json::to_string_pretty(&status)
                    .context("failed to serialize engine status")?;
                println!("{rendered}");
            } else {
                renderer.print_lines(&format_status_lines(&status));
            }
        }
        Commands::Cleanup => {
            let report = engine.cleanup().await?;
            renderer.print_lines(&format_cleanup_lines(&report, renderer.style()));
        }
        Commands::FetchPackage { url, file_name } => {
            let file_name = package_file_name(&url, file_name.as_deref());
            renderer.print_section("package");
            let progress = renderer.start_progress("package");
            let result = engine
                .download_package(&url, &file_name, Some(progress_callback(&progress)))
                .await;
            match result {
                Ok(Some(path)) => {
                    lock_progress(&progress).finish_success();
                    renderer.print_status("ok", &format!("saved {}", path.display()));
                }
                Ok(None) => {
                    lock_progress(&progress).finish_abandon();
                    renderer.print_status("warn", &format!("package {url} was not downloaded"));
                }
                Err(err) => {
                    lock_progress(&progress).finish_abandon();
                    return Err(err).with_context(|| format!("failed to download package {url}"));
                }
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn download_version(
    engine: &UpdateEngine,
    renderer: TerminalRenderer,
    descriptor: &UpdateDescriptor,
) -> Result<Option<String>> {
    renderer.print_section("download");
    let progress = renderer.start_progress("download");
    let result = engine
        .download(descriptor, Some(progress_callback(&progress)))
        .await;

    match result {
        Ok(Some(hash)) => {
            lock_progress(&progress).finish_success();
            renderer.print_status("ok", &format!("downloaded version {hash}"));
            Ok(Some(hash))
        }
        Ok(None) => {
            lock_progress(&progress).finish_abandon();
            renderer.print_status(
                "warn",
                &format!("version {} was not downloaded", descriptor.hash),
            );
            Ok(None)
        }
        Err(err) => {
            lock_progress(&progress).finish_abandon();
            Err(err).with_context(|| format!("failed to download version {}", descriptor.hash))
        }
    }
}

fn switch_now(
    engine: &UpdateEngine,
    reloader: &ProcessReloader,
    renderer: TerminalRenderer,
    hash: &str,
) -> Result<()> {
    engine
        .switch_now(hash)
        .with_context(|| format!("failed to switch to version {hash}"))?;
    renderer.print_status("ok", &format!("switched to version {hash}"));
    if let Some(bundle) = reloader.requested() {
        println!("load: {}", bundle.display());
    }
    Ok(())
}

fn switch_on_restart(engine: &UpdateEngine, renderer: TerminalRenderer, hash: &str) -> Result<()> {
    engine
        .switch_on_next_restart(hash)
        .with_context(|| format!("failed to switch to version {hash}"))?;
    renderer.print_status("ok", &format!("version {hash} loads on next restart"));
    Ok(())
}

pub(crate) fn format_check_outcome_lines(
    outcome: &CheckOutcome,
    style: OutputStyle,
) -> Vec<String> {
    match outcome {
        CheckOutcome::UpToDate => vec![render_status_line(style, "ok", "up to date")],
        CheckOutcome::Expired {
            download_url,
            message,
        } => {
            let mut lines = vec![render_status_line(
                style,
                "warn",
                "installed package has expired",
            )];
            if let Some(url) = download_url {
                lines.push(format!("  download: {url}"));
            }
            if let Some(message) = message {
                lines.push(format!("  message: {message}"));
            }
            lines
        }
        CheckOutcome::Paused { scope, message } => {
            let scope = match scope {
                PausedScope::App => "app",
                PausedScope::Package => "package",
            };
            let mut lines = vec![render_status_line(
                style,
                "warn",
                &format!("updates paused (scope={scope})"),
            )];
            if let Some(message) = message {
                lines.push(format!("  message: {message}"));
            }
            lines
        }
        CheckOutcome::Update(descriptor) => {
            let mut lines = vec![render_status_line(
                style,
                "ok",
                &format!("update available: {}", descriptor.hash),
            )];
            if !descriptor.name.is_empty() {
                lines.push(format!("  name: {}", descriptor.name));
            }
            if !descriptor.description.is_empty() {
                lines.push(format!("  description: {}", descriptor.description));
            }
            let strategies = [
                ("diff", &descriptor.diff),
                ("pdiff", &descriptor.pdiff),
                ("full", &descriptor.full),
            ]
            .iter()
            .filter(|(_, file)| file.is_some())
            .map(|(kind, _)| *kind)
            .collect::<Vec<_>>();
            lines.push(format!("  strategies: {}", strategies.join(",")));
            if let Some(rollout) = descriptor.rollout {
                lines.push(format!("  rollout: {rollout}%"));
            }
            lines
        }
        CheckOutcome::Unavailable { message } => vec![render_status_line(
            style,
            "err",
            &format!("update check unavailable: {message}"),
        )],
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub(crate) fn format_status_lines(status: &EngineStatus) -> Vec<String> {
    let unset = || "-".to_string();
    let mut lines = vec![
        format!("app: {}", status.app_key),
        format!("root: {}", status.root.display()),
        format!("state: {}", status.state),
        format!(
            "current: {}",
            status.current_version.clone().unwrap_or_else(unset)
        ),
        format!("last: {}", status.last_version.clone().unwrap_or_else(unset)),
        format!(
            "rolled back: {}",
            status.rolled_back_version.clone().unwrap_or_else(unset)
        ),
    ];
    if let Some(info) = status.current_info.as_ref().filter(|info| !info.name.is_empty()) {
        lines.push(format!("current name: {}", info.name));
    }
    lines.push(format!(
        "package: {} (build {})",
        status.package_version, status.build_time
    ));
    lines.push(format!("installation: {}", status.installation_id));
    lines.push(format!("first boot: {}", yes_no(status.first_time)));
    lines.push(format!("debug channel: {}", yes_no(status.debug_channel)));
    lines
}

pub(crate) fn format_cleanup_lines(report: &CleanupReport, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!(
            "cleanup: removed={} retained={} failed={}",
            report.removed.len(),
            report.retained.len(),
            report.failed.len()
        ),
    )];
    lines.extend(report.removed.iter().map(|name| format!("  removed {name}")));
    lines.extend(
        report
            .failed
            .iter()
            .map(|name| render_status_line(style, "warn", &format!("  failed to remove {name}"))),
    );
    lines
}
