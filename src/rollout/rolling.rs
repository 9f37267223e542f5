use anyhow::Result;
use tracing::warn;

use super::{RolloutContext, RolloutSlot};
use crate::error::TakoError;
use crate::output;
use crate::verify::Outcome;

/// Rolling strategy: replace at most
/// `maxUnavailable` slots at a time, keeping the rest serving traffic.
/// Each slot's previous image tag is captured before it is torn down so a
/// mid-rollout failure can restore it; the in-memory tag list does not
/// survive a process crash (documented open question — see DESIGN.md).
pub async fn roll(ctx: &RolloutContext<'_>) -> Result<()> {
    let slots = ctx.slots();
    let batch_size = ctx.spec.deploy.max_unavailable.max(1) as usize;

    let mut committed: Vec<(RolloutSlot, Option<String>)> = Vec::new();

    for batch in slots.chunks(batch_size) {
        let mut prior_images = Vec::new();

        for slot in batch {
            let prior = ctx
                .session
                .exec(&format!(
                    "docker inspect --format '{{{{.Config.Image}}}}' {} 2>/dev/null || true",
                    slot.container_name
                ))
                .await
                .unwrap_or_default()
                .trim()
                .to_string();
            prior_images.push((slot.clone(), if prior.is_empty() { None } else { Some(prior) }));
        }

        for (slot, _) in &prior_images {
            ctx.remove_container(&slot.container_name).await?;
        }

        for (slot, _) in &prior_images {
            ctx.run_container(slot, 100).await?;
        }

        for (slot, _) in &prior_images {
            let outcome = ctx.verify_slot(slot, ctx.spec.health_check.as_ref()).await?;
            if outcome != Outcome::Healthy {
                output::warning(&format!("{} failed verification ({:?}), rolling back batch", slot.container_name, outcome));
                // Restore this batch first, then every batch already committed
                // in an earlier iteration — a failure partway through a rolling
                // deploy must leave every replica back on its prior image, not
                // just the one that just failed.
                restore_batch(ctx, &prior_images).await;
                restore_batch(ctx, &committed).await;
                return Err(TakoError::Rollout(format!(
                    "{}: slot {} {:?}",
                    ctx.service_name, slot.index, outcome
                ))
                .into());
            }
        }

        committed.extend(prior_images);
    }

    Ok(())
}

async fn restore_batch(ctx: &RolloutContext<'_>, batch: &[(RolloutSlot, Option<String>)]) {
    for (slot, prior_image) in batch {
        ctx.remove_container(&slot.container_name).await.ok();
        if let Some(image) = prior_image {
            let restore_ctx = RolloutContext {
                session: ctx.session,
                project: ctx.project,
                environment: ctx.environment,
                service_name: ctx.service_name,
                spec: ctx.spec,
                image,
            };
            if let Err(e) = restore_ctx.run_container(slot, 100).await {
                warn!("failed to restore slot {} to prior image {}: {}", slot.container_name, image, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_chunking_matches_max_unavailable() {
        let slots: Vec<u32> = (0..5).collect();
        let batches: Vec<&[u32]> = slots.chunks(2).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 1);
    }
}
