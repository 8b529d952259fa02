// ABOUTME: Chooses where to cut a room's history before it is written to disk.
// ABOUTME: Cuts always land on an event carrying a pagination token so older history stays reachable.

use roomstore_core::Event;

use crate::config::StoreConfig;

/// Index of the oldest event to keep when persisting `events`.
///
/// A ceiling of zero is treated as one. Logs within `max_stored_messages`
/// are kept whole. Otherwise the cut
/// starts `max_stored_messages` from the end and walks back to the nearest
/// token-bearing event (or the very start). If that still keeps more than
/// `overflow_multiplier * max_stored_messages` events, the walk is retried
/// from `fallback_tail` events before the end.
pub fn retention_start(events: &[Event], config: &StoreConfig) -> usize {
    let len = events.len();
    let ceiling = config.max_stored_messages.max(1);
    if len <= ceiling {
        return 0;
    }

    let mut start = token_at_or_before(events, len - ceiling);

    if len - start > config.overflow_multiplier.saturating_mul(ceiling) {
        tracing::debug!(
            "{} events kept after token-aligned cut, retrying from the last {}",
            len - start,
            config.fallback_tail
        );
        let tail_start = len.saturating_sub(config.fallback_tail.max(1));
        start = token_at_or_before(events, tail_start);
    }

    start
}

fn token_at_or_before(events: &[Event], index: usize) -> usize {
    (0..=index)
        .rev()
        .find(|&i| events[i].has_token())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_with_tokens(len: usize, tokened: &[usize]) -> Vec<Event> {
        (0..len)
            .map(|i| {
                let event = Event::new(format!("$e{}", i), "!r:hs", "m.room.message", "@a:hs", json!({}));
                if tokened.contains(&i) {
                    event.with_token(format!("t{}", i))
                } else {
                    event
                }
            })
            .collect()
    }

    fn config(max: usize) -> StoreConfig {
        StoreConfig {
            max_stored_messages: max,
            ..StoreConfig::with_home("/unused")
        }
    }

    #[test]
    fn short_logs_are_kept_whole() {
        let events = log_with_tokens(50, &[]);
        assert_eq!(retention_start(&events, &config(50)), 0);
    }

    #[test]
    fn cut_walks_back_to_token() {
        let events = log_with_tokens(200, &[120]);
        assert_eq!(retention_start(&events, &config(50)), 120);
    }

    #[test]
    fn cut_at_exact_position_when_token_there() {
        let events = log_with_tokens(200, &[120, 150]);
        assert_eq!(retention_start(&events, &config(50)), 150);
    }

    #[test]
    fn tokenless_history_is_kept_whole_when_no_boundary_exists() {
        let events = log_with_tokens(200, &[]);
        assert_eq!(retention_start(&events, &config(50)), 0);
    }

    #[test]
    fn overflow_retries_from_tail() {
        // Nearest boundary behind the 50-event cut is at 20, which would keep
        // 180 events; the tail retry finds the boundary at 185 instead.
        let events = log_with_tokens(200, &[20, 185]);
        let start = retention_start(&events, &config(50));
        assert!(events[start].has_token());
        assert_eq!(start, 185);
    }

    #[test]
    fn zero_ceiling_is_treated_as_one() {
        let events = log_with_tokens(3, &[1]);
        assert_eq!(retention_start(&events, &config(0)), 1);

        let tokenless = log_with_tokens(3, &[]);
        assert_eq!(retention_start(&tokenless, &config(0)), 0);
    }

    #[test]
    fn overflow_without_closer_boundary_keeps_original_token() {
        let events = log_with_tokens(200, &[20]);
        assert_eq!(retention_start(&events, &config(50)), 20);
    }
}
