//! The table of in-flight queries.
//!
//! Two indexes cover the same set of queries: a hash by DNS id for O(1)
//! dispatch of inbound replies, and a deadline-ordered priority queue for
//! O(1) discovery of the next timeout. The pair is updated together on
//! every insert, remove and deadline change.

use crate::addrinfo::HostByAddrState;
use crate::errors::Error;
use crate::search::SearchState;
use crate::types::Message;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::{Instant, SystemTime};

/// Opaque handle identifying an in-flight query, usable with
/// [`Channel::cancel`](crate::Channel::cancel).
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct QueryHandle(pub(crate) u64);

/// Callback invoked when a raw query completes. Receives the decoded
/// reply (or a status) and the number of timeouts observed on the way.
pub type QueryCallback = Box<dyn FnOnce(Result<Message, Error>, usize) + Send + 'static>;

/// What to do when a query reaches a terminal state. Either the user gets
/// called directly, or an internal pipeline consumes the result and
/// possibly issues follow-up queries.
pub(crate) enum Completion {
    Raw(QueryCallback),
    Search(SearchState),
    HostByAddr(HostByAddrState),
}

/// One in-flight query.
pub(crate) struct Query {
    pub handle: QueryHandle,
    pub dns_id: u16,

    /// The query message as sent, for reply validation and re-encoding.
    pub message: Message,

    /// Encoded question bytes (no TCP length prefix).
    pub wire: Vec<u8>,

    pub deadline: Instant,

    /// Timeout-driven attempts, bounded by `tries`.
    pub attempts: usize,

    /// Hard per-server failures, bounded by `tries * nservers`.
    pub failovers: usize,

    /// Index of the server this attempt went to.
    pub server_idx: usize,

    /// TCP stream generation at send time, so replies on a reused stream
    /// are never attributed to queries from before a reconnect.
    pub conn_generation: u64,

    pub using_tcp: bool,

    /// Timeouts observed so far, reported to the callback.
    pub timeouts: usize,

    pub started_wall: SystemTime,
    pub started: Instant,

    pub completion: Completion,
}

#[derive(Default)]
pub(crate) struct QueryTable {
    queries: HashMap<u64, Query>,
    by_dns_id: HashMap<u16, u64>,
    by_deadline: PriorityQueue<u64, Reverse<Instant>>,
    next_handle: u64,
}

impl QueryTable {
    pub fn alloc_handle(&mut self) -> QueryHandle {
        self.next_handle += 1;
        QueryHandle(self.next_handle)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn contains_dns_id(&self, id: u16) -> bool {
        self.by_dns_id.contains_key(&id)
    }

    pub fn insert(&mut self, query: Query) {
        let key = query.handle.0;
        self.by_dns_id.insert(query.dns_id, key);
        self.by_deadline.push(key, Reverse(query.deadline));
        self.queries.insert(key, query);
    }

    pub fn get(&self, handle: QueryHandle) -> Option<&Query> {
        self.queries.get(&handle.0)
    }

    pub fn handle_for_dns_id(&self, id: u16) -> Option<QueryHandle> {
        self.by_dns_id.get(&id).map(|&key| QueryHandle(key))
    }

    /// Unlinks a query from both indexes. A retry that resets the
    /// deadline removes here and re-inserts, so the indexes can never
    /// disagree.
    pub fn remove(&mut self, handle: QueryHandle) -> Option<Query> {
        let query = self.queries.remove(&handle.0)?;
        self.by_dns_id.remove(&query.dns_id);
        self.by_deadline.remove(&handle.0);
        Some(query)
    }

    /// The nearest upcoming deadline, if any query is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.peek().map(|(_, Reverse(at))| *at)
    }

    /// Removes and returns one expired query, oldest deadline first.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Query> {
        match self.by_deadline.peek() {
            Some((&key, Reverse(at))) if *at <= now => {
                self.by_deadline.pop();
                let query = self.queries.remove(&key)?;
                self.by_dns_id.remove(&query.dns_id);
                Some(query)
            }
            _ => None,
        }
    }

    /// Empties the table, returning every live query.
    pub fn drain(&mut self) -> Vec<Query> {
        self.by_dns_id.clear();
        self.by_deadline.clear();
        self.queries.drain().map(|(_, q)| q).collect()
    }

    /// Handles of queries currently assigned to a connection, identified
    /// by server and transport.
    pub fn on_connection(
        &self,
        server_idx: usize,
        using_tcp: bool,
        generation: u64,
    ) -> Vec<QueryHandle> {
        self.queries
            .values()
            .filter(|q| {
                q.server_idx == server_idx
                    && q.using_tcp == using_tcp
                    && (!using_tcp || q.conn_generation == generation)
            })
            .map(|q| q.handle)
            .collect()
    }

    #[cfg(test)]
    pub fn indexes_agree(&self) -> bool {
        self.queries.len() == self.by_dns_id.len()
            && self.queries.len() == self.by_deadline.len()
            && self
                .queries
                .values()
                .all(|q| self.by_dns_id.get(&q.dns_id) == Some(&q.handle.0))
    }
}
