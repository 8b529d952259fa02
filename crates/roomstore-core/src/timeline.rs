// ABOUTME: Ordered per-room event log plus the merge and pagination-window algorithms over it.
// ABOUTME: Forward chunks append, backward chunks prepend, and pages always end on a token boundary.

use indexmap::IndexMap;

use crate::event::{Event, PageResult, TokenChunk};

/// Insertion-ordered mapping of event id to event. Order is arrival order,
/// which the feeder keeps chronological.
pub type EventLog = IndexMap<String, Event>;

/// Append a forward chunk in the order given. An event id already present
/// keeps its position and takes the new value.
pub fn merge_forwards(log: &mut EventLog, chunk: Vec<Event>) {
    for event in chunk {
        log.insert(event.event_id.clone(), event);
    }
}

/// Prepend a backward chunk (delivered newest first) in front of `log`.
///
/// Events whose id is already cached are dropped from the chunk: the cached
/// copy and its position are kept. Returns how many events were added.
pub fn merge_backwards(log: &mut EventLog, chunk: Vec<Event>) -> usize {
    let mut merged = EventLog::with_capacity(log.len() + chunk.len());

    for event in chunk.into_iter().rev() {
        if log.contains_key(&event.event_id) || merged.contains_key(&event.event_id) {
            tracing::debug!("dropping redelivered event {} from backward chunk", event.event_id);
            continue;
        }
        merged.insert(event.event_id.clone(), event);
    }

    let added = merged.len();
    merged.extend(log.drain(..));
    *log = merged;
    added
}

/// Serve a page of older history out of the cached window.
///
/// The log is walked newest first. Without a token, a window that fits in
/// `limit` is returned whole. Otherwise the page starts right after the
/// event carrying `from_token` (or at the newest event when no token is
/// given) and runs for `limit` events, extended until an event that carries
/// its own token so the caller can continue paginating from the page's end.
/// `room_token` stands in for the end token when the last event has none.
pub fn earlier_messages(
    log: &EventLog,
    room_token: Option<&str>,
    from_token: Option<&str>,
    limit: usize,
) -> PageResult {
    if log.is_empty() {
        return PageResult::UnknownToken;
    }

    let newest_first: Vec<&Event> = log.values().rev().collect();

    let page: Vec<Event> = if from_token.is_none() && newest_first.len() <= limit {
        newest_first.iter().map(|e| (*e).clone()).collect()
    } else {
        let begin = match from_token {
            None => 0,
            Some(token) => match newest_first
                .iter()
                .position(|e| e.token.as_deref() == Some(token))
            {
                Some(found) => found + 1,
                None => return PageResult::UnknownToken,
            },
        };

        let mut page = Vec::new();
        for event in &newest_first[begin..] {
            page.push((*event).clone());
            if page.len() >= limit && event.has_token() {
                break;
            }
        }
        page
    };

    let (Some(first), Some(last)) = (page.first(), page.last()) else {
        return PageResult::UnknownToken;
    };

    let start = first.token.clone();
    let end = last
        .token
        .clone()
        .or_else(|| room_token.map(str::to_string));

    PageResult::Page(TokenChunk::new(start, end, page))
}
