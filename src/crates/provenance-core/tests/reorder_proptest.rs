//! Property tests for the reorder buffer
//!
//! Rows may finish in any order, but the buffer must hand them back in the
//! order they were submitted, and it must never lose or duplicate one. These
//! properties are checked against arbitrary completion permutations.

use proptest::prelude::*;
use provenance_core::RowReorderBuffer;

/// A random permutation of `0..n` for small `n`
fn completion_order() -> impl Strategy<Value = Vec<usize>> {
    (1usize..=24).prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
}

proptest! {
    /// Whatever order completions arrive in, drains release the submitted
    /// values as an in-order prefix, and every row comes out exactly once.
    #[test]
    fn releases_preserve_submission_order(order in completion_order()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let n = order.len();
            let buffer = RowReorderBuffer::new(n);

            let mut tickets = Vec::with_capacity(n);
            for i in 0..n {
                let ticket = buffer.submit().await.unwrap();
                prop_assert_eq!(ticket.sequence(), i as u64);
                tickets.push(ticket);
            }

            let mut released = Vec::new();
            for &idx in &order {
                buffer.complete(tickets[idx], idx).unwrap();
                let batch = buffer.drain_ready();

                // A drain only ever extends the in-order prefix
                for value in batch {
                    prop_assert_eq!(value, released.len());
                    released.push(value);
                }

                // Conservation holds after every operation
                prop_assert_eq!(
                    buffer.total_submitted(),
                    buffer.total_released() + buffer.in_flight()
                );
            }

            let expected: Vec<usize> = (0..n).collect();
            prop_assert_eq!(released, expected);
            prop_assert_eq!(buffer.in_flight(), 0);
            prop_assert_eq!(buffer.total_released(), n as u64);
            Ok(())
        })?;
    }

    /// Draining between every completion or only once at the end yields the
    /// same total release sequence.
    #[test]
    fn single_final_drain_matches(order in completion_order()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let n = order.len();
            let buffer = RowReorderBuffer::new(n);

            let mut tickets = Vec::with_capacity(n);
            for _ in 0..n {
                tickets.push(buffer.submit().await.unwrap());
            }
            for &idx in &order {
                buffer.complete(tickets[idx], idx).unwrap();
            }

            let released = buffer.drain_ready();
            let expected: Vec<usize> = (0..n).collect();
            prop_assert_eq!(released, expected);
            prop_assert_eq!(buffer.next_release_seq(), n as u64);
            Ok(())
        })?;
    }
}
