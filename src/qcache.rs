//! Short-lived query cache.
//!
//! Caches decoded replies keyed by question, for at most the smallest TTL
//! seen in the reply, further bounded by `qcache_max_ttl`. Only NOERROR
//! and NXDOMAIN replies are cacheable; anything else reflects transient
//! server state. Served entries have their TTLs aged by the time spent in
//! the cache.

use crate::types::{Class, Message, Rcode, Type};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct CacheKey {
    /// Lowercased question name without its trailing dot.
    name: String,
    qtype: Type,
    qclass: Class,
}

impl CacheKey {
    fn from_message(m: &Message) -> Option<CacheKey> {
        let q = m.questions.first()?;
        Some(CacheKey {
            name: q.name.trim_end_matches('.').to_ascii_lowercase(),
            qtype: q.qtype,
            qclass: q.qclass,
        })
    }
}

struct CacheEntry {
    reply: Message,
    inserted: Instant,
    expires: Instant,
}

pub(crate) struct QueryCache {
    max_ttl: u32,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl QueryCache {
    pub fn new(max_ttl: u32) -> QueryCache {
        QueryCache {
            max_ttl,
            entries: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_ttl > 0
    }

    /// Stores a reply if it is cacheable. TTL-less replies (an NXDOMAIN
    /// without an SOA, say) are not worth keeping.
    pub fn insert(&mut self, reply: &Message, now: Instant) {
        if !self.enabled() {
            return;
        }

        if reply.rcode != Rcode::NoError && reply.rcode != Rcode::NXDomain {
            return;
        }

        // Truncated replies were retried over TCP; never cache them.
        if reply.tc {
            return;
        }

        let key = match CacheKey::from_message(reply) {
            Some(key) => key,
            None => return,
        };

        let record_ttls = reply
            .answers
            .iter()
            .chain(&reply.authorities)
            .map(|r| r.ttl)
            .min();

        let ttl = match record_ttls {
            Some(ttl) => ttl.min(self.max_ttl),
            None => return,
        };
        if ttl == 0 {
            return;
        }

        self.entries.insert(
            key,
            CacheEntry {
                reply: reply.clone(),
                inserted: now,
                expires: now + Duration::from_secs(ttl as u64),
            },
        );
    }

    /// Serves a cached reply for this query, with TTLs aged and the id
    /// rewritten to match.
    pub fn lookup(&mut self, query: &Message, now: Instant) -> Option<Message> {
        if !self.enabled() {
            return None;
        }

        let key = CacheKey::from_message(query)?;

        let entry = self.entries.get(&key)?;
        if entry.expires <= now {
            self.entries.remove(&key);
            return None;
        }

        let age = now.duration_since(entry.inserted).as_secs() as u32;
        let mut reply = entry.reply.clone();
        reply.id = query.id;
        for r in reply
            .answers
            .iter_mut()
            .chain(reply.authorities.iter_mut())
            .chain(reply.additionals.iter_mut())
        {
            r.ttl = r.ttl.saturating_sub(age);
        }

        Some(reply)
    }

    /// Drops everything. Called when the server set changes and on
    /// channel destruction.
    pub fn flush(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::types::{Record, QR};

    fn reply(name: &str, ttl: u32) -> Message {
        let mut m = Message::query(name, Type::A, Class::Internet);
        m.id = 42;
        m.qr = QR::Response;
        m.answers.push(Record {
            name: name.to_string(),
            class: Class::Internet,
            ttl,
            resource: Resource::A("1.2.3.4".parse().unwrap()),
        });
        m
    }

    #[test]
    fn serves_until_expiry() {
        let mut cache = QueryCache::new(3600);
        let now = Instant::now();

        cache.insert(&reply("example.com", 10), now);

        let mut query = Message::query("EXAMPLE.COM.", Type::A, Class::Internet);
        query.id = 7;

        let hit = cache.lookup(&query, now + Duration::from_secs(5)).unwrap();
        assert_eq!(hit.id, 7);
        assert_eq!(hit.answers[0].ttl, 5);

        assert!(cache.lookup(&query, now + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn max_ttl_caps_lifetime() {
        let mut cache = QueryCache::new(2);
        let now = Instant::now();

        cache.insert(&reply("example.com", 3600), now);

        let query = Message::query("example.com", Type::A, Class::Internet);
        assert!(cache.lookup(&query, now + Duration::from_secs(1)).is_some());
        assert!(cache.lookup(&query, now + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn only_matching_questions_hit() {
        let mut cache = QueryCache::new(3600);
        let now = Instant::now();

        cache.insert(&reply("example.com", 60), now);

        let aaaa = Message::query("example.com", Type::AAAA, Class::Internet);
        assert!(cache.lookup(&aaaa, now).is_none());
    }

    #[test]
    fn servfail_not_cached() {
        let mut cache = QueryCache::new(3600);
        let now = Instant::now();

        let mut m = reply("example.com", 60);
        m.rcode = Rcode::ServFail;
        cache.insert(&m, now);

        let query = Message::query("example.com", Type::A, Class::Internet);
        assert!(cache.lookup(&query, now).is_none());
    }

    #[test]
    fn disabled_cache_is_inert() {
        let mut cache = QueryCache::new(0);
        let now = Instant::now();

        cache.insert(&reply("example.com", 60), now);
        let query = Message::query("example.com", Type::A, Class::Internet);
        assert!(cache.lookup(&query, now).is_none());
    }
}
