use hotbundle_core::{CheckOutcome, CheckResponse, UpdateDescriptor};
use hotbundle_security::in_rollout;
use tracing::debug;

use crate::SelectionContext;

pub fn select_outcome(response: &CheckResponse, ctx: &SelectionContext) -> CheckOutcome {
    if let Some(scope) = response.paused {
        return CheckOutcome::Paused {
            scope,
            message: response.message.clone(),
        };
    }
    if response.expired {
        return CheckOutcome::Expired {
            download_url: response.download_url.clone(),
            message: response.message.clone(),
        };
    }
    if response.up_to_date || !response.update {
        return CheckOutcome::UpToDate;
    }

    for candidate in response.candidates() {
        let Some(descriptor) =
            UpdateDescriptor::from_version_info(&candidate, &response.paths, &ctx.package_version)
        else {
            continue;
        };

        if ctx.rolled_back_version.as_deref() == Some(descriptor.hash.as_str()) {
            debug!(hash = %descriptor.hash, "skipping rolled back version");
            continue;
        }

        if let Some(percentage) = descriptor.rollout {
            if !in_rollout(&ctx.installation_id, percentage) {
                debug!(
                    hash = %descriptor.hash,
                    name = %descriptor.name,
                    percentage,
                    "installation not in rollout"
                );
                continue;
            }
        }

        return CheckOutcome::Update(descriptor);
    }

    CheckOutcome::UpToDate
}
