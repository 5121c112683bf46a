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

//! Query metadata (summary) as received after a result stream has been fully
//! consumed. Version-specific metadata keys are normalized here so callers
//! never see raw protocol names.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use super::io::bolt::BoltMeta;
use crate::address_::Address;
use crate::error_::{DriverError, Result};
use crate::value::ValueReceive;

#[derive(Debug, Clone)]
pub struct Summary {
    /// Time it took the server to have the result available.
    pub result_available_after: Option<Duration>,
    /// Time it took the server to consume the result stream.
    pub result_consumed_after: Option<Duration>,
    pub counters: Counters,
    pub query_type: Option<SummaryQueryType>,
    /// The database the query took effect on.
    pub database: Option<String>,
    pub server_info: ServerInfo,
}

impl Summary {
    pub(crate) fn new(address: Arc<Address>, server_agent: Arc<String>, version: (u8, u8)) -> Self {
        Self {
            result_available_after: None,
            result_consumed_after: None,
            counters: Default::default(),
            query_type: None,
            database: None,
            server_info: ServerInfo {
                address,
                server_agent,
                protocol_version: version,
            },
        }
    }

    pub(crate) fn load_run_meta(&mut self, meta: &mut BoltMeta) -> Result<()> {
        self.result_available_after = take_millis(meta, "t_first")?;
        Ok(())
    }

    pub(crate) fn load_pull_meta(&mut self, meta: &mut BoltMeta) -> Result<()> {
        self.result_consumed_after = take_millis(meta, "t_last")?;
        if let Some(query_type) = meta.remove("type") {
            let ValueReceive::String(query_type) = query_type else {
                return Err(DriverError::protocol_error(
                    "SUCCESS after PULL 'type' was not a string",
                ));
            };
            self.query_type = Some(match query_type.as_str() {
                "r" => SummaryQueryType::Read,
                "w" => SummaryQueryType::Write,
                "rw" => SummaryQueryType::ReadWrite,
                "s" => SummaryQueryType::Schema,
                _ => {
                    warn!("server sent unexpected query type {query_type:?}");
                    SummaryQueryType::Unknown
                }
            });
        }
        if let Some(ValueReceive::String(db)) = meta.remove("db") {
            self.database = Some(db);
        }
        if let Some(stats) = meta.remove("stats") {
            let ValueReceive::Map(stats) = stats else {
                return Err(DriverError::protocol_error(
                    "SUCCESS after PULL 'stats' was not a map",
                ));
            };
            self.counters = Counters::load(stats);
        }
        Ok(())
    }
}

fn take_millis(meta: &mut BoltMeta, key: &str) -> Result<Option<Duration>> {
    match meta.remove(key) {
        None => Ok(None),
        Some(ValueReceive::Integer(millis)) if millis >= 0 => {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
        Some(v) => Err(DriverError::protocol_error(format!(
            "SUCCESS '{key}' was not a non-negative integer but {v:?}"
        ))),
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SummaryQueryType {
    /// read-only query
    Read,
    /// write-only query
    Write,
    /// read-write query
    ReadWrite,
    /// schema-changing query
    Schema,
    /// the server sent a query type this driver version does not know
    Unknown,
}

/// Counters of changes the query inflicted on the database.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
    pub contains_updates: bool,
    pub contains_system_updates: bool,
}

impl Counters {
    fn load(mut stats: BoltMeta) -> Self {
        let mut counters = Counters {
            nodes_created: take_int(&mut stats, "nodes-created"),
            nodes_deleted: take_int(&mut stats, "nodes-deleted"),
            relationships_created: take_int(&mut stats, "relationships-created"),
            relationships_deleted: take_int(&mut stats, "relationships-deleted"),
            properties_set: take_int(&mut stats, "properties-set"),
            labels_added: take_int(&mut stats, "labels-added"),
            labels_removed: take_int(&mut stats, "labels-removed"),
            indexes_added: take_int(&mut stats, "indexes-added"),
            indexes_removed: take_int(&mut stats, "indexes-removed"),
            constraints_added: take_int(&mut stats, "constraints-added"),
            constraints_removed: take_int(&mut stats, "constraints-removed"),
            system_updates: take_int(&mut stats, "system-updates"),
            contains_updates: false,
            contains_system_updates: false,
        };
        counters.contains_system_updates = match stats.remove("contains-system-updates") {
            Some(ValueReceive::Boolean(b)) => b,
            _ => counters.system_updates > 0,
        };
        counters.contains_updates = match stats.remove("contains-updates") {
            Some(ValueReceive::Boolean(b)) => b,
            _ => {
                counters.nodes_created > 0
                    || counters.nodes_deleted > 0
                    || counters.relationships_created > 0
                    || counters.relationships_deleted > 0
                    || counters.properties_set > 0
                    || counters.labels_added > 0
                    || counters.labels_removed > 0
                    || counters.indexes_added > 0
                    || counters.indexes_removed > 0
                    || counters.constraints_added > 0
                    || counters.constraints_removed > 0
            }
        };
        counters
    }
}

fn take_int(meta: &mut BoltMeta, key: &str) -> i64 {
    match meta.remove(key) {
        Some(ValueReceive::Integer(i)) => i,
        _ => 0,
    }
}

/// Information about the server a result was produced by.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub address: Arc<Address>,
    pub server_agent: Arc<String>,
    pub protocol_version: (u8, u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::hash_map;

    fn new_summary() -> Summary {
        Summary::new(
            Arc::new(Address::from(("localhost", 7687))),
            Arc::new(String::from("TestServer/5.0")),
            (5, 0),
        )
    }

    #[test]
    fn test_timing_keys_are_normalized() {
        let mut summary = new_summary();
        let mut run_meta = hash_map!(
            String::from("t_first") => ValueReceive::Integer(7),
        );
        summary.load_run_meta(&mut run_meta).unwrap();
        let mut pull_meta = hash_map!(
            String::from("t_last") => ValueReceive::Integer(13),
        );
        summary.load_pull_meta(&mut pull_meta).unwrap();

        assert_eq!(
            summary.result_available_after,
            Some(Duration::from_millis(7))
        );
        assert_eq!(
            summary.result_consumed_after,
            Some(Duration::from_millis(13))
        );
    }

    #[test]
    fn test_counters_imply_contains_updates() {
        let stats = hash_map!(
            String::from("nodes-created") => ValueReceive::Integer(3),
        );
        let counters = Counters::load(stats);
        assert_eq!(counters.nodes_created, 3);
        assert!(counters.contains_updates);
        assert!(!counters.contains_system_updates);
    }

    #[test]
    fn test_query_type_parsing() {
        let mut summary = new_summary();
        let mut pull_meta = hash_map!(
            String::from("type") => ValueReceive::String(String::from("rw")),
            String::from("db") => ValueReceive::String(String::from("movies")),
        );
        summary.load_pull_meta(&mut pull_meta).unwrap();
        assert_eq!(summary.query_type, Some(SummaryQueryType::ReadWrite));
        assert_eq!(summary.database.as_deref(), Some("movies"));
    }
}
