//! Search-domain expansion.
//!
//! A lookup for an unqualified name walks a list of candidate names built
//! from the configured search domains and the ndots heuristic: names with
//! at least `ndots` labels are tried as-is first, otherwise last. The walk
//! stops at the first authoritative success; NXDOMAIN everywhere with at
//! least one empty answer along the way surfaces as `NoData` so that
//! dual-family lookups know an A retry may still help.

use crate::addrinfo::AddrInfoState;
use crate::config::Config;
use crate::errors::Error;
use crate::name;
use crate::queries::QueryCallback;
use crate::types::{Class, Type};
use std::env;
use std::fs;

/// Who receives the outcome of a whole search walk.
pub(crate) enum SearchDone {
    Raw(QueryCallback),
    AddrInfo(AddrInfoState),
}

pub(crate) struct SearchState {
    /// Candidate names, in try order. `true` marks the as-is entry.
    names: Vec<(String, bool)>,

    /// Next candidate to try.
    next: usize,

    pub qtype: Type,
    pub qclass: Class,

    /// Outcome of the as-is attempt, once tried.
    status_as_is: Option<Error>,

    /// Whether any candidate came back NOERROR-with-no-data.
    ever_got_nodata: bool,

    /// Timeouts accumulated across all candidates.
    pub timeouts: usize,

    pub done: SearchDone,
}

impl SearchState {
    /// Builds the candidate list for `search_name`. At most
    /// `len(search domains) + 1` names are ever tried.
    pub fn new(
        search_name: &str,
        qtype: Type,
        qclass: Class,
        config: &Config,
        done: SearchDone,
    ) -> SearchState {
        let mut names = Vec::new();

        if let Some(single) = single_domain(search_name, config) {
            names.push((single, true));
        } else if name::label_count(search_name) >= config.ndots {
            names.push((search_name.to_string(), true));
            for domain in &config.search {
                names.push((name::cat_domain(search_name, domain), false));
            }
        } else {
            for domain in &config.search {
                names.push((name::cat_domain(search_name, domain), false));
            }
            names.push((search_name.to_string(), true));
        }

        SearchState {
            names,
            next: 0,
            qtype,
            qclass,
            status_as_is: None,
            ever_got_nodata: false,
            timeouts: 0,
            done,
        }
    }

    /// The next candidate name to query, advancing the walk.
    pub fn next_name(&mut self) -> Option<(String, bool)> {
        let entry = self.names.get(self.next).cloned();
        self.next += 1;
        entry
    }

    /// Whether the candidate currently in flight is the as-is name.
    pub fn current_as_is(&self) -> bool {
        self.next
            .checked_sub(1)
            .and_then(|i| self.names.get(i))
            .map_or(false, |entry| entry.1)
    }

    /// Records the outcome of one candidate. Returns `true` when the walk
    /// should continue with the next name.
    pub fn note_candidate_status(&mut self, was_as_is: bool, status: Error) -> bool {
        if was_as_is {
            self.status_as_is = Some(status);
        }
        if status == Error::NoData {
            self.ever_got_nodata = true;
        }
        matches!(status, Error::NoData | Error::ServFail | Error::NotFound)
    }

    /// Final status once every candidate has been tried and none
    /// succeeded.
    pub fn final_status(&self, last: Error) -> Error {
        let status = self.status_as_is.unwrap_or(last);
        if status == Error::NotFound && self.ever_got_nodata {
            Error::NoData
        } else {
            status
        }
    }
}

/// Decides whether `search_name` yields exactly one query, returning that
/// query's name if so.
///
/// Trailing-dot names are fully qualified and bypass the search list, as
/// do all names when no search domains are configured. Dot-less names may
/// be rewritten by a HOSTALIASES file unless aliases are disabled.
fn single_domain(search_name: &str, config: &Config) -> Option<String> {
    if let Some(fqdn) = search_name.strip_suffix('.') {
        if !search_name.ends_with("\\.") {
            return Some(fqdn.to_string());
        }
    }

    if !config.flags.noaliases && !search_name.contains('.') {
        if let Some(target) = host_alias(search_name) {
            return Some(target);
        }
    }

    if config.search.is_empty() {
        return Some(search_name.to_string());
    }

    None
}

/// Resolves a single-label name through the file named by the HOSTALIASES
/// environment variable: lines of `alias canonical`. Unreadable files and
/// unmatched names fall through silently.
fn host_alias(search_name: &str) -> Option<String> {
    let path = env::var_os("HOSTALIASES")?;
    let text = fs::read_to_string(path).ok()?;

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some(alias) if alias.eq_ignore_ascii_case(search_name) => {
                return fields.next().map(str::to_string);
            }
            _ => continue,
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(search: &[&str], ndots: usize) -> Config {
        Config {
            search: search.iter().map(|s| s.to_string()).collect(),
            ndots,
            ..Config::default()
        }
    }

    fn names(state: &mut SearchState) -> Vec<(String, bool)> {
        std::iter::from_fn(|| state.next_name()).collect()
    }

    fn state(search_name: &str, config: &Config) -> SearchState {
        SearchState::new(
            search_name,
            Type::A,
            Class::Internet,
            config,
            SearchDone::Raw(Box::new(|_, _| {})),
        )
    }

    #[test]
    fn below_ndots_tries_bare_name_last() {
        let config = config(&["corp.lan", "example.com"], 2);
        let mut s = state("host", &config);

        assert_eq!(
            names(&mut s),
            vec![
                ("host.corp.lan".to_string(), false),
                ("host.example.com".to_string(), false),
                ("host".to_string(), true),
            ]
        );
    }

    #[test]
    fn at_ndots_tries_bare_name_first() {
        let config = config(&["corp.lan"], 1);
        let mut s = state("db.internal", &config);

        assert_eq!(
            names(&mut s),
            vec![
                ("db.internal".to_string(), true),
                ("db.internal.corp.lan".to_string(), false),
            ]
        );
    }

    #[test]
    fn trailing_dot_is_single_query() {
        let config = config(&["corp.lan"], 1);
        let mut s = state("db.example.com.", &config);

        assert_eq!(names(&mut s), vec![("db.example.com".to_string(), true)]);
    }

    #[test]
    fn no_search_domains_is_single_query() {
        let config = config(&[], 1);
        let mut s = state("host", &config);

        assert_eq!(names(&mut s), vec![("host".to_string(), true)]);
    }

    #[test]
    fn candidate_count_is_bounded() {
        let config = config(&["a.example", "b.example", "c.example"], 5);
        let mut s = state("x.y.z", &config);
        assert_eq!(names(&mut s).len(), config.search.len() + 1);
    }

    #[test]
    fn walk_continues_on_soft_statuses() {
        let config = config(&["corp.lan"], 1);
        let mut s = state("host", &config);

        assert!(s.note_candidate_status(false, Error::NotFound));
        assert!(s.note_candidate_status(false, Error::NoData));
        assert!(s.note_candidate_status(false, Error::ServFail));
        assert!(!s.note_candidate_status(false, Error::Timeout));
        assert!(!s.note_candidate_status(false, Error::Refused));
    }

    #[test]
    fn nxdomain_with_nodata_surfaces_nodata() {
        let config = config(&["corp.lan"], 1);
        let mut s = state("host", &config);

        s.note_candidate_status(false, Error::NoData);
        s.note_candidate_status(true, Error::NotFound);
        assert_eq!(s.final_status(Error::NotFound), Error::NoData);
    }

    #[test]
    fn as_is_status_wins() {
        let config = config(&["corp.lan"], 5);
        let mut s = state("host", &config);

        s.note_candidate_status(false, Error::NotFound);
        s.note_candidate_status(true, Error::ServFail);
        assert_eq!(s.final_status(Error::NotFound), Error::ServFail);
    }
}
