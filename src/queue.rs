use anyhow::Result;

use crate::constants::{QUEUE_KEY_PREFIX, QUEUES_KEY, WILDCARD_QUEUE, queue_key};
use crate::gateway::RedisGateway;
use crate::job::JobPayload;

/// Append a payload to a queue and record the queue name in the known set.
pub async fn push(gateway: &mut RedisGateway, queue: &str, payload: &JobPayload) -> Result<()> {
    gateway.sadd(QUEUES_KEY, queue).await?;
    gateway.rpush(&queue_key(queue), &payload.encode()?).await?;
    Ok(())
}

/// All queue names that have ever been pushed to, lexically sorted.
pub async fn known_queues(gateway: &mut RedisGateway) -> Result<Vec<String>> {
    let mut queues = gateway.smembers(QUEUES_KEY).await?;
    queues.sort();
    Ok(queues)
}

/// Expand a declared queue list for one reservation. A `*` anywhere in the
/// declaration replaces the whole list with the currently known queues, so
/// the effective list can change between reservations.
pub async fn effective_queues(
    gateway: &mut RedisGateway,
    declared: &[String],
) -> Result<Vec<String>> {
    if declared.iter().any(|queue| queue == WILDCARD_QUEUE) {
        known_queues(gateway).await
    } else {
        Ok(declared.to_vec())
    }
}

/// Non-blocking reservation: pop the head of the first non-empty queue, in
/// declaration order. Lower-priority queues starve while earlier ones have
/// work.
pub async fn reserve(
    gateway: &mut RedisGateway,
    queues: &[String],
) -> Result<Option<JobPayload>> {
    for queue in queues {
        if let Some(raw) = gateway.lpop(&queue_key(queue)).await? {
            return Ok(decode_popped(&raw, queue));
        }
    }
    Ok(None)
}

/// Blocking reservation: one multi-key blocking pop across the ordered
/// queue list, bounded by `timeout` seconds. An empty queue list sleeps for
/// the timeout instead so the caller's pacing stays uniform.
pub async fn reserve_blocking(
    gateway: &mut RedisGateway,
    queues: &[String],
    timeout: f64,
) -> Result<Option<JobPayload>> {
    if queues.is_empty() {
        tokio::time::sleep(std::time::Duration::from_secs_f64(timeout.max(0.0))).await;
        return Ok(None);
    }
    let keys: Vec<String> = queues.iter().map(|queue| queue_key(queue)).collect();
    match gateway.blpop(&keys, timeout).await? {
        Some((key, raw)) => {
            let queue = key.strip_prefix(QUEUE_KEY_PREFIX).unwrap_or(&key);
            Ok(decode_popped(&raw, queue))
        }
        None => Ok(None),
    }
}

/// A popped payload that fails to parse is logged and dropped; it has
/// already left the queue and is not requeued.
fn decode_popped(raw: &str, queue: &str) -> Option<JobPayload> {
    match JobPayload::decode(raw) {
        Ok(mut payload) => {
            payload.queue = queue.to_string();
            Some(payload)
        }
        Err(err) => {
            tracing::error!(queue, error = %err, raw, "discarding malformed payload");
            None
        }
    }
}

pub async fn length(gateway: &mut RedisGateway, queue: &str) -> Result<usize> {
    gateway.llen(&queue_key(queue)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RedisTestContext;
    use serde_json::json;

    fn payload(class: &str, queue: &str) -> JobPayload {
        JobPayload::new(class, vec![json!(1)], queue)
    }

    #[tokio::test]
    async fn push_registers_queue_and_appends() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        push(&mut ctx.gateway, "alpha", &payload("A", "alpha"))
            .await
            .unwrap();
        push(&mut ctx.gateway, "alpha", &payload("B", "alpha"))
            .await
            .unwrap();

        assert_eq!(length(&mut ctx.gateway, "alpha").await.unwrap(), 2);
        assert_eq!(
            known_queues(&mut ctx.gateway).await.unwrap(),
            vec!["alpha".to_string()]
        );
    }

    #[tokio::test]
    async fn reserve_respects_declaration_order() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        push(&mut ctx.gateway, "low", &payload("LowJob", "low"))
            .await
            .unwrap();
        push(&mut ctx.gateway, "high", &payload("HighJob", "high"))
            .await
            .unwrap();

        let queues = vec!["high".to_string(), "low".to_string()];
        let first = reserve(&mut ctx.gateway, &queues).await.unwrap().unwrap();
        assert_eq!(first.class, "HighJob");
        assert_eq!(first.queue, "high");

        let second = reserve(&mut ctx.gateway, &queues).await.unwrap().unwrap();
        assert_eq!(second.class, "LowJob");

        assert!(reserve(&mut ctx.gateway, &queues).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserve_is_fifo_within_a_queue() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        push(&mut ctx.gateway, "q", &payload("First", "q"))
            .await
            .unwrap();
        push(&mut ctx.gateway, "q", &payload("Second", "q"))
            .await
            .unwrap();

        let queues = vec!["q".to_string()];
        let first = reserve(&mut ctx.gateway, &queues).await.unwrap().unwrap();
        assert_eq!(first.class, "First");
        let second = reserve(&mut ctx.gateway, &queues).await.unwrap().unwrap();
        assert_eq!(second.class, "Second");
    }

    #[tokio::test]
    async fn wildcard_expands_to_known_queues_sorted() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        for queue in ["zeta", "x-ray", "yankee"] {
            push(&mut ctx.gateway, queue, &payload("A", queue))
                .await
                .unwrap();
        }

        let declared = vec!["*".to_string()];
        let effective = effective_queues(&mut ctx.gateway, &declared).await.unwrap();
        assert_eq!(effective, vec!["x-ray", "yankee", "zeta"]);

        let explicit = vec!["b".to_string(), "a".to_string()];
        let unchanged = effective_queues(&mut ctx.gateway, &explicit).await.unwrap();
        assert_eq!(unchanged, explicit);
    }

    #[tokio::test]
    async fn malformed_payload_is_discarded_not_requeued() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        ctx.gateway
            .rpush(&queue_key("bad"), "{not json")
            .await
            .unwrap();

        let queues = vec!["bad".to_string()];
        assert!(reserve(&mut ctx.gateway, &queues).await.unwrap().is_none());
        assert_eq!(length(&mut ctx.gateway, "bad").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocking_reserve_pops_highest_priority_first() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        push(&mut ctx.gateway, "low", &payload("LowJob", "low"))
            .await
            .unwrap();
        push(&mut ctx.gateway, "high", &payload("HighJob", "high"))
            .await
            .unwrap();

        let queues = vec!["high".to_string(), "low".to_string()];
        let popped = reserve_blocking(&mut ctx.gateway, &queues, 1.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.class, "HighJob");
        assert_eq!(popped.queue, "high");
    }

    #[tokio::test]
    async fn blocking_reserve_times_out_empty() {
        let mut ctx = RedisTestContext::new().await.unwrap();
        let queues = vec!["nothing-here".to_string()];
        let popped = reserve_blocking(&mut ctx.gateway, &queues, 0.1).await.unwrap();
        assert!(popped.is_none());

        let no_queues: Vec<String> = Vec::new();
        let started = std::time::Instant::now();
        let popped = reserve_blocking(&mut ctx.gateway, &no_queues, 0.1).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= std::time::Duration::from_millis(90));
    }
}
