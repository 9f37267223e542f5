use anyhow::Result;
use std::time::Duration;

use super::RolloutContext;
use crate::error::TakoError;
use crate::output;
use crate::verify::Outcome;

const DRAIN_DELAY: Duration = Duration::from_secs(10);

/// Blue-green strategy: start a full
/// parallel "green" fleet at Traefik weight 0, verify every green slot
/// healthy over its container IP (unaffected by routing weight), then
/// atomically cut traffic over and drain the "blue" fleet. The weight label
/// can't be mutated on a running container, so the cutover step recreates
/// each already-verified green container at weight 100 — a brief
/// re-creation rather than a config-only flip, but the container image has
/// already passed its health check by that point.
pub async fn roll(ctx: &RolloutContext<'_>) -> Result<()> {
    let blue_slots = ctx.slots();
    let green_slots: Vec<_> = blue_slots
        .iter()
        .map(|s| {
            let mut green = s.clone();
            green.container_name = format!("{}-green", s.container_name);
            green
        })
        .collect();

    output::info(&format!("{}: starting green fleet", ctx.service_name));
    for slot in &green_slots {
        ctx.run_container(slot, 0).await?;
    }

    for slot in &green_slots {
        let outcome = ctx.verify_slot(slot, ctx.spec.health_check.as_ref()).await?;
        if outcome != Outcome::Healthy {
            output::warning(&format!("{}: green slot {} {:?}, aborting cutover", ctx.service_name, slot.index, outcome));
            for g in &green_slots {
                ctx.remove_container(&g.container_name).await.ok();
            }
            return Err(TakoError::Rollout(format!("{}: green fleet failed verification", ctx.service_name)).into());
        }
    }

    output::info(&format!("{}: cutting traffic over to green", ctx.service_name));
    for slot in &green_slots {
        ctx.remove_container(&slot.container_name).await?;
        ctx.run_container(slot, 100).await?;
    }

    tokio::time::sleep(DRAIN_DELAY).await;

    output::info(&format!("{}: draining blue fleet", ctx.service_name));
    for slot in &blue_slots {
        ctx.remove_container(&slot.container_name).await?;
    }

    for slot in &green_slots {
        ctx.remove_container(&slot.container_name).await.ok();
        ctx.run_container(
            &super::RolloutSlot {
                index: slot.index,
                container_name: format!("{}-{}-{}", ctx.project, ctx.service_name, slot.index),
                previous_image: None,
            },
            100,
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_delay_is_nonzero() {
        assert!(DRAIN_DELAY.as_secs() > 0);
    }
}
