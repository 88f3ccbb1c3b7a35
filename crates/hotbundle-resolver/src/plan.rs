use hotbundle_core::{TaskKind, UpdateDescriptor};

use crate::StrategyStep;

/// Strategies to attempt for `descriptor`, cheapest first.
pub fn plan_strategies(
    descriptor: &UpdateDescriptor,
    bootable_current: Option<&str>,
) -> Vec<StrategyStep> {
    let mut steps = Vec::with_capacity(3);

    if let (Some(file), Some(current)) = (&descriptor.diff, bootable_current) {
        if current != descriptor.hash {
            steps.push(StrategyStep {
                kind: TaskKind::DeltaFromPrevious,
                file: file.clone(),
                origin_hash: Some(current.to_string()),
            });
        }
    }
    if let Some(file) = &descriptor.pdiff {
        steps.push(StrategyStep {
            kind: TaskKind::DeltaFromOrigin,
            file: file.clone(),
            origin_hash: None,
        });
    }
    if let Some(file) = &descriptor.full {
        steps.push(StrategyStep {
            kind: TaskKind::Full,
            file: file.clone(),
            origin_hash: None,
        });
    }

    steps
}

/// One URL per host path; absolute file URLs are used as-is.
pub fn candidate_urls(paths: &[String], file: &str) -> Vec<String> {
    let file = file.trim();
    if file.is_empty() {
        return Vec::new();
    }
    if file.starts_with("https://") || file.starts_with("http://") {
        return vec![file.to_string()];
    }

    let file = file.trim_start_matches('/');
    paths
        .iter()
        .map(|path| path.trim().trim_end_matches('/'))
        .filter(|path| !path.is_empty())
        .map(|path| {
            if path.starts_with("https://") || path.starts_with("http://") {
                format!("{path}/{file}")
            } else {
                format!("https://{path}/{file}")
            }
        })
        .collect()
}
