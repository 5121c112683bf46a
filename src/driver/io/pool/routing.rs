// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::address_::Address;
use crate::driver::RoutingControl;
use crate::time::Instant;
use crate::value::ValueReceive;

/// Per-database view of the cluster: which members currently serve as
/// routers, readers, and writers, valid until `created + ttl`.
#[derive(Debug)]
pub(crate) struct RoutingTable {
    pub(crate) routers: Vec<Arc<Address>>,
    pub(crate) readers: Vec<Arc<Address>>,
    pub(crate) writers: Vec<Arc<Address>>,
    pub(crate) database: Option<Arc<String>>,
    pub(crate) initialized_without_writers: bool,
    created: Instant,
    ttl: Duration,
}

impl RoutingTable {
    pub(crate) fn new(initial_router: Arc<Address>) -> Self {
        Self {
            routers: Vec::new(),
            readers: vec![initial_router],
            writers: Vec::new(),
            database: None,
            initialized_without_writers: true,
            created: Instant::now(),
            ttl: Duration::new(0, 0),
        }
    }

    pub(crate) fn servers_for_mode(&self, mode: RoutingControl) -> &[Arc<Address>] {
        match mode {
            RoutingControl::Read => &self.readers,
            RoutingControl::Write => &self.writers,
        }
    }

    pub(crate) fn try_parse(
        mut data: HashMap<String, ValueReceive>,
    ) -> Result<Self, RoutingTableParseError> {
        let ttl = data.remove("ttl").ok_or(RoutingTableParseError {
            reason: "missing \"ttl\"",
        })?;
        let ttl: i64 = ttl.try_into().map_err(|_| RoutingTableParseError {
            reason: "\"ttl\" was not integer",
        })?;
        if ttl < 0 {
            return Err(RoutingTableParseError {
                reason: "negative \"ttl\"",
            });
        }
        let ttl = Duration::from_secs(ttl as u64);
        let db = match data.remove("db") {
            None => Ok(None),
            Some(ValueReceive::String(db)) => Ok(Some(db)),
            Some(_) => Err(RoutingTableParseError {
                reason: "\"db\" was not string",
            }),
        }?;
        let servers = data.remove("servers").ok_or(RoutingTableParseError {
            reason: "missing \"servers\"",
        })?;
        let mut routers = Vec::new();
        let mut readers = Vec::new();
        let mut writers = Vec::new();

        let servers = servers
            .try_into_list()
            .map_err(|_| RoutingTableParseError {
                reason: "\"servers\" was not list",
            })?;
        for server in servers.into_iter() {
            match Self::parse_server(server)? {
                (ServerRole::Router, addresses) => routers = addresses,
                (ServerRole::Reader, addresses) => readers = addresses,
                (ServerRole::Writer, addresses) => writers = addresses,
                (ServerRole::Unknown, _) => {}
            }
        }

        let initialized_without_writers = writers.is_empty();
        Ok(Self {
            routers,
            readers,
            writers,
            database: db.map(Arc::new),
            initialized_without_writers,
            created: Instant::now(),
            ttl,
        })
    }

    fn parse_server(
        server: ValueReceive,
    ) -> Result<(ServerRole, Vec<Arc<Address>>), RoutingTableParseError> {
        let mut server = server.try_into_map().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry was not map",
        })?;
        let role = server.remove("role").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"role\"",
        })?;
        let role: String = role.try_into().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry \"role\" was not string",
        })?;
        let role = match role.as_str().into() {
            ServerRole::Unknown => {
                warn!("ignoring unknown server role {}", role);
                return Ok((ServerRole::Unknown, vec![]));
            }
            role => role,
        };
        let addresses = server.remove("addresses").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"addresses\"",
        })?;
        let addresses: Vec<ValueReceive> =
            addresses.try_into().map_err(|_| RoutingTableParseError {
                reason: "\"servers\" entry \"addresses\" was not list",
            })?;
        let addresses = addresses
            .into_iter()
            .map(|address| {
                let address: String = address.try_into().map_err(|_| RoutingTableParseError {
                    reason: "\"servers\" entry \"addresses\" contained non-string",
                })?;
                let address = Address::from(&*address);
                Ok(Arc::new(address))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((role, addresses))
    }

    /// An expired or incomplete table must be refreshed before it may be used
    /// to pick a server.
    pub(crate) fn is_fresh(&self, mode: RoutingControl) -> bool {
        if self.routers.is_empty() {
            debug!("routing table expired: no routers left {:?}", self);
            return false;
        }
        if self.servers_for_mode(mode).is_empty() {
            debug!(
                "routing table expired: no servers for {:?} mode left {:?}",
                mode, self
            );
            return false;
        }
        if self.created.elapsed() > self.ttl {
            debug!(
                "routing table expired: ttl ({:?}) < age ({:?}) {:?}",
                self.ttl,
                self.created.elapsed(),
                self
            );
            return false;
        }
        debug!("routing table is fresh {:?}", self);
        true
    }

    pub(crate) fn deactivate(&mut self, addr: &Address) {
        self.routers = mem::take(&mut self.routers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
        self.readers = mem::take(&mut self.readers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
        self.deactivate_writer(addr);
    }

    pub(crate) fn deactivate_writer(&mut self, addr: &Address) {
        self.writers = mem::take(&mut self.writers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
    }
}

#[derive(Error, Debug)]
#[error("failed to parse routing table: {reason}")]
pub(crate) struct RoutingTableParseError {
    reason: &'static str,
}

enum ServerRole {
    Router,
    Reader,
    Writer,
    Unknown,
}

impl From<&str> for ServerRole {
    fn from(s: &str) -> Self {
        match s {
            "ROUTE" => ServerRole::Router,
            "READ" => ServerRole::Reader,
            "WRITE" => ServerRole::Writer,
            _ => ServerRole::Unknown,
        }
    }
}

/// Round-robin server selection: one wrapping cursor per role so that
/// consecutive acquisitions spread over all members of that role.
#[derive(Debug, Default)]
pub(crate) struct RoundRobinStrategy {
    readers: RoundRobinIndex,
    writers: RoundRobinIndex,
}

impl RoundRobinStrategy {
    pub(crate) fn select<'addrs>(
        &self,
        mode: RoutingControl,
        addresses: &'addrs [Arc<Address>],
    ) -> Option<&'addrs Arc<Address>> {
        match mode {
            RoutingControl::Read => self.readers.next(addresses),
            RoutingControl::Write => self.writers.next(addresses),
        }
    }
}

#[derive(Debug, Default)]
struct RoundRobinIndex {
    offset: AtomicUsize,
}

impl RoundRobinIndex {
    fn next<'addrs>(&self, addresses: &'addrs [Arc<Address>]) -> Option<&'addrs Arc<Address>> {
        if addresses.is_empty() {
            return None;
        }
        let offset = self.offset.fetch_add(1, Ordering::Relaxed);
        Some(&addresses[offset % addresses.len()])
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value_map;

    fn addr(host: &str) -> Arc<Address> {
        Arc::new(Address::from((host, 7687)))
    }

    fn parse_rt(ttl: i64, servers: Vec<(&str, Vec<&str>)>) -> RoutingTable {
        let servers = servers
            .into_iter()
            .map(|(role, addresses)| {
                ValueReceive::Map(
                    [
                        ("role".into(), ValueReceive::String(role.into())),
                        (
                            "addresses".into(),
                            ValueReceive::List(
                                addresses
                                    .into_iter()
                                    .map(|a| ValueReceive::String(a.into()))
                                    .collect(),
                            ),
                        ),
                    ]
                    .into_iter()
                    .collect(),
                )
            })
            .collect();
        let mut meta: HashMap<String, ValueReceive> = value_map!({"ttl": ttl})
            .into_iter()
            .map(|(k, v)| (k, v.into()))
            .collect();
        meta.insert("servers".into(), ValueReceive::List(servers));
        RoutingTable::try_parse(meta).unwrap()
    }

    #[test]
    fn test_try_parse() {
        let rt = parse_rt(
            300,
            vec![
                ("ROUTE", vec!["router1:7687", "router2:7687"]),
                ("READ", vec!["reader1:7687"]),
                ("WRITE", vec!["writer1:7687"]),
            ],
        );
        assert_eq!(rt.routers, vec![addr("router1"), addr("router2")]);
        assert_eq!(rt.readers, vec![addr("reader1")]);
        assert_eq!(rt.writers, vec![addr("writer1")]);
        assert!(!rt.initialized_without_writers);
        assert!(rt.is_fresh(RoutingControl::Read));
        assert!(rt.is_fresh(RoutingControl::Write));
    }

    #[test]
    fn test_unknown_roles_are_ignored() {
        let rt = parse_rt(
            300,
            vec![
                ("ROUTE", vec!["router1:7687"]),
                ("READ", vec!["reader1:7687"]),
                ("WRITE", vec!["writer1:7687"]),
                ("SCribE", vec!["scribe1:7687"]),
            ],
        );
        assert_eq!(rt.readers, vec![addr("reader1")]);
    }

    #[test]
    fn test_missing_ttl_fails() {
        let mut meta = HashMap::new();
        meta.insert("servers".into(), ValueReceive::List(vec![]));
        assert!(RoutingTable::try_parse(meta).is_err());
    }

    #[test]
    fn test_expired_ttl_is_stale() {
        let rt = parse_rt(
            0,
            vec![
                ("ROUTE", vec!["router1:7687"]),
                ("READ", vec!["reader1:7687"]),
                ("WRITE", vec!["writer1:7687"]),
            ],
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(!rt.is_fresh(RoutingControl::Read));
    }

    #[rstest]
    #[case(RoutingControl::Read)]
    #[case(RoutingControl::Write)]
    fn test_empty_role_is_stale(#[case] mode: RoutingControl) {
        let rt = parse_rt(300, vec![("ROUTE", vec!["router1:7687"])]);
        assert!(!rt.is_fresh(mode));
    }

    #[test]
    fn test_deactivate_removes_address_everywhere() {
        let mut rt = parse_rt(
            300,
            vec![
                ("ROUTE", vec!["a:7687", "b:7687"]),
                ("READ", vec!["a:7687", "c:7687"]),
                ("WRITE", vec!["a:7687"]),
            ],
        );
        rt.deactivate(&addr("a"));
        assert_eq!(rt.routers, vec![addr("b")]);
        assert_eq!(rt.readers, vec![addr("c")]);
        assert!(rt.writers.is_empty());
    }

    #[test]
    fn test_deactivate_writer_only_touches_writers() {
        let mut rt = parse_rt(
            300,
            vec![
                ("ROUTE", vec!["a:7687"]),
                ("READ", vec!["a:7687"]),
                ("WRITE", vec!["a:7687"]),
            ],
        );
        rt.deactivate_writer(&addr("a"));
        assert_eq!(rt.routers, vec![addr("a")]);
        assert_eq!(rt.readers, vec![addr("a")]);
        assert!(rt.writers.is_empty());
    }

    #[test]
    fn test_round_robin_wraps_around() {
        let strategy = RoundRobinStrategy::default();
        let readers = vec![addr("r1"), addr("r2"), addr("r3")];
        let picks = (0..5)
            .map(|_| {
                strategy
                    .select(RoutingControl::Read, &readers)
                    .unwrap()
                    .host()
                    .to_string()
            })
            .collect::<Vec<_>>();
        assert_eq!(picks, vec!["r1", "r2", "r3", "r1", "r2"]);
    }

    #[test]
    fn test_round_robin_cursors_are_independent_per_role() {
        let strategy = RoundRobinStrategy::default();
        let readers = vec![addr("r1"), addr("r2")];
        let writers = vec![addr("w1"), addr("w2")];
        assert_eq!(
            strategy
                .select(RoutingControl::Read, &readers)
                .unwrap()
                .host(),
            "r1"
        );
        assert_eq!(
            strategy
                .select(RoutingControl::Write, &writers)
                .unwrap()
                .host(),
            "w1"
        );
        assert_eq!(
            strategy
                .select(RoutingControl::Write, &writers)
                .unwrap()
                .host(),
            "w2"
        );
    }

    #[test]
    fn test_round_robin_on_empty_list_yields_none() {
        let strategy = RoundRobinStrategy::default();
        assert!(strategy.select(RoutingControl::Write, &[]).is_none());
    }
}
