//! Property tests for the dead-letter queue capacity invariants.

use proptest::prelude::*;
use weft_events::{DeadLetterQueue, DlqConfig, EventEnvelope};

proptest! {
    // Under any push sequence, the global bound and every per-channel
    // bound hold, and evictions are counted exactly.
    #[test]
    fn bounds_hold_for_any_push_sequence(
        channels in prop::collection::vec(0u8..5, 1..60),
        max_size in 1usize..30,
        max_size_per_channel in 1usize..10,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let dlq = DeadLetterQueue::new(
                DlqConfig::new()
                    .with_max_size(max_size)
                    .with_max_size_per_channel(max_size_per_channel),
            );

            let total_pushed = channels.len() as u64;
            for channel in channels {
                let name = format!("ch-{}", channel);
                let envelope = EventEnvelope::new(&name, "t", "1.0.0", "{}").unwrap();
                dlq.push(envelope, "handler failure", None).await;

                let stats = dlq.get_stats().await;
                prop_assert!(stats.total <= max_size);
                for count in stats.per_channel.values() {
                    prop_assert!(*count <= max_size_per_channel);
                }
            }

            let stats = dlq.get_stats().await;
            prop_assert_eq!(stats.total as u64 + stats.total_evicted, total_pushed);
            Ok(())
        })?;
    }
}
