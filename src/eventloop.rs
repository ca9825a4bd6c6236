//! Owned event-thread mode.
//!
//! [`Resolver`] wraps a [`Channel`] behind a mutex and spawns one thread
//! that polls the channel's sockets and drives timeouts. Public calls
//! enqueue work under the lock and nudge the thread through the poller's
//! notify primitive; callbacks run on the event thread.

#![cfg(unix)]

use crate::addrinfo::{AddrInfo, AddrInfoHints, HostResults};
use crate::channel::Channel;
use crate::config::Config;
use crate::errors::Error;
use crate::queries::QueryHandle;
use crate::sockets::SocketId;
use crate::types::{Class, Family, Message, Type};
use log::{debug, warn};
use polling::{Event, Events, Poller};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

/// Interest changes recorded by the socket-state hook, drained by the
/// event thread at safe points.
type Updates = Arc<Mutex<Vec<(SocketId, bool, bool)>>>;

struct Shared {
    channel: Mutex<Channel>,
    poller: Poller,
    updates: Updates,
    shutdown: AtomicBool,

    /// Signalled whenever the in-flight count may have reached zero.
    empty: Condvar,
}

/// An asynchronous DNS resolver driving its own event thread.
///
/// Completion callbacks are invoked on the event thread; they must not
/// re-enter the resolver from there with blocking calls.
pub struct Resolver {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Resolver {
    /// Creates a channel for `config` and starts its event thread.
    pub fn new(config: Config) -> io::Result<Resolver> {
        Resolver::with_channel(Channel::new(config))
    }

    /// Starts an event thread for an existing channel.
    pub fn with_channel(mut channel: Channel) -> io::Result<Resolver> {
        let poller = Poller::new()?;
        let updates: Updates = Arc::new(Mutex::new(Vec::new()));

        let hook_updates = Arc::clone(&updates);
        channel.set_socket_state_callback(move |id, read, write| {
            hook_updates.lock().unwrap().push((id, read, write));
        });

        let shared = Arc::new(Shared {
            channel: Mutex::new(channel),
            poller,
            updates,
            shutdown: AtomicBool::new(false),
            empty: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("stubdns-event-loop".to_string())
            .spawn(move || event_loop(&thread_shared))?;

        Ok(Resolver {
            shared,
            thread: Some(thread),
        })
    }

    fn nudge(&self) {
        if let Err(e) = self.shared.poller.notify() {
            warn!("failed to wake event loop: {}", e);
        }
    }

    /// See [`Channel::search`].
    pub fn search(
        &self,
        search_name: &str,
        qtype: Type,
        qclass: Class,
        callback: impl FnOnce(Result<Message, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let handle = self
            .shared
            .channel
            .lock()
            .unwrap()
            .search(search_name, qtype, qclass, callback);
        self.nudge();
        handle
    }

    /// See [`Channel::send_raw`].
    pub fn send_raw(
        &self,
        wire: &[u8],
        callback: impl FnOnce(Result<Message, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let handle = self.shared.channel.lock().unwrap().send_raw(wire, callback);
        self.nudge();
        handle
    }

    /// See [`Channel::get_host_by_name`].
    pub fn get_host_by_name(
        &self,
        node: &str,
        family: Family,
        callback: impl FnOnce(Result<HostResults, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let handle = self
            .shared
            .channel
            .lock()
            .unwrap()
            .get_host_by_name(node, family, callback);
        self.nudge();
        handle
    }

    /// See [`Channel::get_host_by_addr`].
    pub fn get_host_by_addr(
        &self,
        addr: IpAddr,
        callback: impl FnOnce(Result<HostResults, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let handle = self
            .shared
            .channel
            .lock()
            .unwrap()
            .get_host_by_addr(addr, callback);
        self.nudge();
        handle
    }

    /// See [`Channel::get_addr_info`].
    pub fn get_addr_info(
        &self,
        node: &str,
        service: Option<&str>,
        hints: AddrInfoHints,
        callback: impl FnOnce(Result<AddrInfo, Error>, usize) + Send + 'static,
    ) -> Option<QueryHandle> {
        let handle = self
            .shared
            .channel
            .lock()
            .unwrap()
            .get_addr_info(node, service, hints, callback);
        self.nudge();
        handle
    }

    /// See [`Channel::set_servers`].
    pub fn set_servers(&self, servers: Vec<crate::config::ServerSpec>) {
        self.shared.channel.lock().unwrap().set_servers(servers);
        self.nudge();
    }

    /// See [`Channel::cancel`].
    pub fn cancel(&self, handle: QueryHandle) {
        self.shared.channel.lock().unwrap().cancel(handle);
        self.nudge();
    }

    /// Blocks until no queries are in flight.
    pub fn wait_empty(&self) {
        let mut channel = self.shared.channel.lock().unwrap();
        while channel.active_queries() > 0 {
            channel = self.shared.empty.wait(channel).unwrap();
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shared.poller.notify();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared.channel.lock().unwrap().destroy();
    }
}

fn event_loop(shared: &Shared) {
    // SocketId -> registered fd and interest.
    let mut registered: HashMap<u64, (i32, bool, bool)> = HashMap::new();
    let mut events = Events::new();

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let timeout = {
            let channel = shared.channel.lock().unwrap();
            apply_updates(shared, &channel, &mut registered);
            channel.timeout(Instant::now(), None)
        };

        events.clear();
        if let Err(e) = shared.poller.wait(&mut events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("poller failed, stopping event loop: {}", e);
            break;
        }

        let mut readable = Vec::new();
        let mut writable = Vec::new();
        for ev in events.iter() {
            if ev.readable {
                readable.push(SocketId(ev.key as u64));
            }
            if ev.writable {
                writable.push(SocketId(ev.key as u64));
            }
        }

        {
            let mut channel = shared.channel.lock().unwrap();
            channel.process(&readable, &writable);

            // Level-triggered interest needs re-arming after a wait.
            for id in readable.iter().chain(&writable) {
                if let Some(&(fd, read, write)) = registered.get(&id.0) {
                    rearm(shared, fd, id.0, read, write);
                }
            }
            apply_updates(shared, &channel, &mut registered);

            if channel.active_queries() == 0 {
                shared.empty.notify_all();
            }
        }
    }

    debug!("event loop stopped");
}

/// Applies queued interest changes to the poller.
fn apply_updates(shared: &Shared, channel: &Channel, registered: &mut HashMap<u64, (i32, bool, bool)>) {
    let updates: Vec<_> = shared.updates.lock().unwrap().drain(..).collect();

    for (id, read, write) in updates {
        if !read && !write {
            if let Some((fd, _, _)) = registered.remove(&id.0) {
                // The fd is usually closed already; removal is advisory.
                let _ = shared.poller.delete(unsafe { BorrowedFd::borrow_raw(fd) });
            }
            continue;
        }

        let interest = event_for(id.0, read, write);
        match registered.get_mut(&id.0) {
            Some(entry) => {
                entry.1 = read;
                entry.2 = write;
                let source = unsafe { BorrowedFd::borrow_raw(entry.0) };
                if let Err(e) = shared.poller.modify(source, interest) {
                    warn!("failed to update poll interest for {}: {}", id, e);
                }
            }
            None => {
                let fd = match channel.raw_fd(id) {
                    Some(fd) => fd,
                    None => continue,
                };
                if let Err(e) = unsafe { shared.poller.add(fd, interest) } {
                    warn!("failed to register {} with poller: {}", id, e);
                    continue;
                }
                registered.insert(id.0, (fd, read, write));
            }
        }
    }
}

fn rearm(shared: &Shared, fd: i32, key: u64, read: bool, write: bool) {
    let source = unsafe { BorrowedFd::borrow_raw(fd) };
    if let Err(e) = shared.poller.modify(source, event_for(key, read, write)) {
        debug!("failed to re-arm fd {}: {}", fd, e);
    }
}

fn event_for(key: u64, read: bool, write: bool) -> Event {
    let mut event = Event::none(key as usize);
    event.readable = read;
    event.writable = write;
    event
}
