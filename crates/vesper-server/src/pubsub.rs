//! Publish/subscribe routing tables (spec §4.12).
//!
//! Kept independent of [`vesper_kernel::Database`] — pub/sub channels are
//! not keyspace keys and are never persisted to RDB/AOF or replicated
//! (spec §4.12's Non-goals) — so this is plain server-side bookkeeping:
//! which [`ClientId`]s are listening on which exact channel, and which on
//! which glob pattern.

use std::collections::{HashMap, HashSet};

use vesper_types::ClientId;

/// Minimal glob matcher shared with `vesper-config`'s CONFIG GET: `*`
/// matches any run, `?` matches one character, `[...]`/escapes are not
/// supported (spec §4.12 doesn't require them).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern, text)
}

/// Server-wide pub/sub registry.
#[derive(Default)]
pub struct PubSub {
    channels: HashMap<Vec<u8>, HashSet<ClientId>>,
    patterns: HashMap<Vec<u8>, HashSet<ClientId>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: Vec<u8>, client: ClientId) {
        self.channels.entry(channel).or_default().insert(client);
    }

    /// Returns whether `client` was actually subscribed to `channel`.
    pub fn unsubscribe(&mut self, channel: &[u8], client: ClientId) -> bool {
        let Some(set) = self.channels.get_mut(channel) else { return false };
        let removed = set.remove(&client);
        if set.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    pub fn psubscribe(&mut self, pattern: Vec<u8>, client: ClientId) {
        self.patterns.entry(pattern).or_default().insert(client);
    }

    pub fn punsubscribe(&mut self, pattern: &[u8], client: ClientId) -> bool {
        let Some(set) = self.patterns.get_mut(pattern) else { return false };
        let removed = set.remove(&client);
        if set.is_empty() {
            self.patterns.remove(pattern);
        }
        removed
    }

    /// Drops every subscription a disconnecting client held.
    pub fn remove_client(&mut self, client: ClientId) {
        self.channels.retain(|_, set| {
            set.remove(&client);
            !set.is_empty()
        });
        self.patterns.retain(|_, set| {
            set.remove(&client);
            !set.is_empty()
        });
    }

    /// Every client that should receive a PUBLISH on `channel`: exact
    /// subscribers, plus pattern subscribers whose pattern matches,
    /// paired with the pattern that matched (or `None` for an exact
    /// match), per spec §4.12's `pmessage` vs `message` reply shape.
    pub fn receivers(&self, channel: &[u8]) -> Vec<(ClientId, Option<Vec<u8>>)> {
        let mut out: Vec<(ClientId, Option<Vec<u8>>)> = self
            .channels
            .get(channel)
            .into_iter()
            .flat_map(|set| set.iter().copied())
            .map(|id| (id, None))
            .collect();
        for (pattern, set) in &self.patterns {
            if glob_match(pattern, channel) {
                for id in set {
                    out.push((*id, Some(pattern.clone())));
                }
            }
        }
        out
    }

    pub fn channel_count(&self) -> usize {
        self.channels.values().filter(|set| !set.is_empty()).count()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.values().filter(|set| !set.is_empty()).count()
    }

    /// Channels matching `pattern` with at least one subscriber (PUBSUB
    /// CHANNELS).
    pub fn channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        self.channels
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .filter(|(name, _)| pattern.is_none_or(|p| glob_match(p, name)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_pattern_subscribers_both_receive() {
        let mut ps = PubSub::new();
        ps.subscribe(b"news".to_vec(), ClientId::new(1));
        ps.psubscribe(b"n*".to_vec(), ClientId::new(2));
        let receivers = ps.receivers(b"news");
        assert_eq!(receivers.len(), 2);
        assert!(receivers.contains(&(ClientId::new(1), None)));
        assert!(receivers.contains(&(ClientId::new(2), Some(b"n*".to_vec()))));
    }

    #[test]
    fn removing_a_client_clears_all_its_subscriptions() {
        let mut ps = PubSub::new();
        ps.subscribe(b"a".to_vec(), ClientId::new(1));
        ps.psubscribe(b"b*".to_vec(), ClientId::new(1));
        ps.remove_client(ClientId::new(1));
        assert!(ps.receivers(b"a").is_empty());
        assert!(ps.receivers(b"bxx").is_empty());
    }
}
