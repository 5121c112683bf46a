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

mod routing;
mod single_pool;

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, mem};

use log::{debug, error, info, warn};
use parking_lot::RwLockReadGuard;
use rustls::ClientConfig;

use super::bolt::message_parameters::RouteParameters;
use super::bolt::{BoltData, ResponseCallbacks};
use crate::address_::resolution::AddressResolver;
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::driver::config::KeepAliveConfig;
use crate::driver::session::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{DriverError, Result, ServerError};
use crate::sync::MostlyRLock;
use crate::time::Instant;
use crate::value::{ValueReceive, ValueSend};
use atomic_refcell::AtomicRefCell;
use routing::{RoundRobinStrategy, RoutingTable};
pub(crate) use single_pool::SessionAuth;
use single_pool::{SimplePool, SinglePooledBolt, UnpreparedSinglePooledBolt};

// 7 is a reasonable common upper bound for the size of clusters
// this is, however, not a hard limit
const DEFAULT_CLUSTER_SIZE: usize = 7;

/// A pooled connection lent to one caller at a time. Dropping it returns the
/// connection to its pool (resetting it first if it carries server-side
/// state).
#[derive(Debug)]
pub(crate) struct PooledBolt<'pool> {
    bolt: Option<SinglePooledBolt>,
    pool: &'pool Pool,
}

impl PooledBolt<'_> {
    fn wrap_io(&mut self, mut io_op: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        let was_broken = self.deref().unexpectedly_closed();
        let res = io_op(self);
        if !was_broken && self.deref().unexpectedly_closed() {
            self.pool.deactivate_server(&self.deref().address())
        }
        res
    }

    #[inline]
    pub(crate) fn read_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| {
            let mut cb = Self::new_server_error_handler(this.pool);
            this.bolt
                .as_mut()
                .expect("bolt option should be Some from init to drop")
                .deref_mut()
                .read_one(deadline, Some(&mut cb))
        })
    }

    #[inline]
    pub(crate) fn read_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| {
            let mut cb = Self::new_server_error_handler(this.pool);
            this.bolt
                .as_mut()
                .expect("bolt option should be Some from init to drop")
                .deref_mut()
                .read_all(deadline, Some(&mut cb))
        })
    }

    fn new_server_error_handler<'pool, RW: Read + Write>(
        pool: &'pool Pool,
    ) -> impl FnMut(&mut BoltData<RW>, &mut ServerError) -> Result<()> + 'pool {
        move |bolt_data, error| pool.handle_server_error(bolt_data, error)
    }

    #[inline]
    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| this.deref_mut().write_all(deadline))
    }
}

impl Deref for PooledBolt<'_> {
    type Target = SinglePooledBolt;

    fn deref(&self) -> &Self::Target {
        self.bolt
            .as_ref()
            .expect("bolt option should be Some from init to drop")
    }
}

impl DerefMut for PooledBolt<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bolt
            .as_mut()
            .expect("bolt option should be Some from init to drop")
    }
}

#[derive(Debug)]
pub(crate) struct PoolConfig {
    pub(crate) routing_context: Option<HashMap<String, ValueSend>>,
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) keep_alive: Option<KeepAliveConfig>,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
}

impl PoolConfig {
    pub(crate) fn connection_acquisition_deadline(&self) -> Option<Instant> {
        self.connection_acquisition_timeout
            .map(|t| Instant::now() + t)
    }
}

/// The connection provider: resolves "which physical connection satisfies
/// this logical request", either directly against a single server or via
/// routing tables across a cluster.
#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) config: Arc<PoolConfig>,
    pools: Pools,
}

impl Pool {
    pub(crate) fn new(address: Arc<Address>, config: PoolConfig) -> Self {
        let config = Arc::new(config);
        let pools = Pools::new(address, Arc::clone(&config));
        Self { config, pools }
    }

    pub(crate) fn acquire(&self, args: AcquireConfig) -> Result<PooledBolt<'_>> {
        Ok(PooledBolt {
            bolt: Some(match &self.pools {
                Pools::Direct(single_pool) => {
                    let mut connection = None;
                    while connection.is_none() {
                        connection = single_pool.acquire(args.update_rt_args.deadline)?.prepare(
                            args.update_rt_args.deadline,
                            args.update_rt_args.idle_time_before_connection_test,
                            args.update_rt_args.session_auth,
                            None,
                        )?;
                    }
                    connection.expect("loop above asserts existence")
                }
                Pools::Routing(routing_pool) => routing_pool.acquire(args)?,
            }),
            pool: self,
        })
    }

    fn handle_server_error<RW: Read + Write>(
        &self,
        bolt_data: &mut BoltData<RW>,
        error: &mut ServerError,
    ) -> Result<()> {
        match &self.pools {
            Pools::Direct(_) => Ok(()),
            Pools::Routing(pool) => pool.handle_server_error(bolt_data.address(), error),
        }
    }

    fn deactivate_server(&self, addr: &Address) {
        if let Pools::Routing(routing_pool) = &self.pools {
            routing_pool.deactivate_server(addr)
        }
    }
}

#[derive(Debug)]
enum Pools {
    Direct(SimplePool),
    Routing(RoutingPool),
}

impl Pools {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        match config.routing_context {
            None => Pools::Direct(SimplePool::new(address, config)),
            Some(_) => Pools::Routing(RoutingPool::new(address, config)),
        }
    }
}

type RoutingTables = HashMap<Option<Arc<String>>, RoutingTable>;
type RoutingPools = HashMap<Arc<Address>, SimplePool>;

#[derive(Debug)]
struct RoutingPool {
    pools: MostlyRLock<RoutingPools>,
    routing_tables: MostlyRLock<RoutingTables>,
    strategy: RoundRobinStrategy,
    address: Arc<Address>,
    config: Arc<PoolConfig>,
}

impl RoutingPool {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        assert!(config.routing_context.is_some());
        Self {
            pools: MostlyRLock::new(HashMap::with_capacity(DEFAULT_CLUSTER_SIZE)),
            routing_tables: MostlyRLock::new(HashMap::new()),
            strategy: RoundRobinStrategy::default(),
            address,
            config,
        }
    }

    fn acquire(&self, args: AcquireConfig) -> Result<SinglePooledBolt> {
        debug!(
            "acquiring {:?} connection towards {}",
            args.mode,
            args.update_rt_args
                .db
                .as_ref()
                .map(|db| format!("{db:?}"))
                .unwrap_or(String::from("default database"))
        );
        let servers = self.choose_addresses_from_fresh_rt(args)?;
        let Some(first) = self.strategy.select(args.mode, &servers) else {
            return Err(DriverError::disconnect(format!(
                "no server available for {} access",
                match args.mode {
                    RoutingControl::Read => "read",
                    RoutingControl::Write => "write",
                }
            )));
        };
        let first_idx = servers
            .iter()
            .position(|address| address == first)
            .expect("selected address from this very list");

        let mut last_err = None;
        for retry in 0..servers.len() {
            let target = &servers[(first_idx + retry) % servers.len()];
            match self.acquire_routing_address(target, args.update_rt_args) {
                Ok(connection) => return Ok(connection),
                Err(err @ DriverError::Disconnect { .. }) => {
                    info!("failed to acquire connection from {target}: {err}");
                    self.deactivate_server(target);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(DriverError::disconnect(format!(
            "unable to acquire a connection from any known server; last error: {}",
            last_err.expect("servers list was not empty")
        )))
    }

    /// Returns the role's servers from a table that was refreshed if expired
    /// or lacking servers for the requested mode.
    fn choose_addresses_from_fresh_rt(&self, args: AcquireConfig) -> Result<Vec<Arc<Address>>> {
        let (lock, db) = self.get_fresh_rt(args)?;
        let rt = lock.get(&db).expect("get_fresh_rt made sure the table exists");
        Ok(rt.servers_for_mode(args.mode).to_vec())
    }

    fn get_fresh_rt(
        &self,
        args: AcquireConfig,
    ) -> Result<(RwLockReadGuard<'_, RoutingTables>, Option<Arc<String>>)> {
        let rt_args = args.update_rt_args;
        let db_key: Option<Arc<String>> = rt_args.db.clone();
        let lock = self.routing_tables.maybe_write(
            |rts| {
                rts.get(&db_key)
                    .map(|rt| !rt.is_fresh(args.mode))
                    .unwrap_or(true)
            },
            |mut rts| {
                let rt = rts.entry(db_key.clone()).or_insert_with(|| self.empty_rt());
                if !rt.is_fresh(args.mode) {
                    self.update_rts(rt_args, &mut rts)?;
                }
                Ok(())
            },
        )?;
        Ok((lock, db_key))
    }

    fn acquire_routing_address(
        &self,
        target: &Arc<Address>,
        args: UpdateRtArgs,
    ) -> Result<SinglePooledBolt> {
        let mut connection = None;
        while connection.is_none() {
            let unprepared_connection = {
                let pools = self.ensure_pool_exists(target);
                pools
                    .get(target)
                    .expect("just created above")
                    .acquire(args.deadline)
            }?;
            let mut on_server_error =
                |bolt_data: &mut BoltData<_>, error: &mut ServerError| {
                    self.handle_server_error(bolt_data.address(), error)
                };
            connection = unprepared_connection.prepare(
                args.deadline,
                args.idle_time_before_connection_test,
                args.session_auth,
                Some(&mut on_server_error),
            )?;
        }
        Ok(connection.expect("loop above asserts existence"))
    }

    fn ensure_pool_exists(&self, target: &Arc<Address>) -> RwLockReadGuard<'_, RoutingPools> {
        self.pools
            .maybe_write(
                |pools| pools.get(target).is_none(),
                |mut pools| {
                    pools.insert(
                        Arc::clone(target),
                        SimplePool::new(Arc::clone(target), Arc::clone(&self.config)),
                    );
                    Ok(())
                },
            )
            .expect("updater is infallible")
    }

    /// Fetch a new routing table, asking each known router in turn and the
    /// initial router as fallback, and store it for the requested database.
    fn update_rts(&self, args: UpdateRtArgs, rts: &mut RoutingTables) -> Result<()> {
        debug!("fetching new routing table for {:?}", args.db);
        let rt = rts.entry(args.db.clone()).or_insert_with(|| self.empty_rt());
        let pref_init_router = rt.initialized_without_writers;
        let routers = rt
            .routers
            .iter()
            .filter(|&r| r != &self.address)
            .map(Arc::clone)
            .collect::<Vec<_>>();
        let mut new_rt: Result<RoutingTable>;
        if pref_init_router {
            new_rt = self.fetch_rt_from_routers(&[Arc::clone(&self.address)], args, rts)?;
            if new_rt.is_err() && !routers.is_empty() {
                new_rt = self.fetch_rt_from_routers(&routers, args, rts)?;
            }
        } else {
            new_rt = self.fetch_rt_from_routers(&routers, args, rts)?;
            if new_rt.is_err() {
                new_rt = self.fetch_rt_from_routers(&[Arc::clone(&self.address)], args, rts)?;
            }
        }
        match new_rt {
            Err(err) => {
                error!("failed to update routing table; last error: {err}");
                Err(DriverError::disconnect(format!(
                    "unable to retrieve routing information; last error: {err}"
                )))
            }
            Ok(new_rt) => {
                let db = new_rt.database.clone();
                debug!("storing new routing table for {:?}: {new_rt:?}", args.db);
                rts.insert(args.db.clone(), new_rt);
                self.clean_up_pools(rts);
                if let Some(cb) = args.db_resolution_cb {
                    cb(db);
                }
                Ok(())
            }
        }
    }

    /// The outer `Result` is a hard failure that aborts discovery (e.g., a
    /// configuration error like a missing routing procedure); the inner one
    /// moves on to the next router.
    fn fetch_rt_from_routers(
        &self,
        routers: &[Arc<Address>],
        args: UpdateRtArgs,
        rts: &mut RoutingTables,
    ) -> Result<Result<RoutingTable>> {
        let mut last_err = None;
        for router in routers {
            for resolution in Arc::clone(router).fully_resolve(self.config.resolver.as_deref())? {
                let Ok(resolved) = resolution else {
                    self.deactivate_server_locked_rts(router, rts);
                    continue;
                };
                match Self::wrap_discovery_error(
                    self.acquire_routing_address(&resolved, args)
                        .and_then(|mut con| self.fetch_rt_from_router(&mut con, args)),
                )? {
                    Ok(rt) => return Ok(Ok(rt)),
                    Err(err) => last_err = Some(err),
                };
                self.deactivate_server_locked_rts(&resolved, rts);
            }
        }
        Ok(Err(last_err.unwrap_or_else(|| {
            DriverError::disconnect("no known routers left")
        })))
    }

    fn fetch_rt_from_router(
        &self,
        con: &mut SinglePooledBolt,
        args: UpdateRtArgs,
    ) -> Result<RoutingTable> {
        let rt = Arc::new(AtomicRefCell::new(None));
        con.route(
            RouteParameters::new(
                self.config
                    .routing_context
                    .as_ref()
                    .expect("a routing pool always has a routing context"),
                args.bookmarks,
                args.db.as_ref().map(|db| db.as_str()),
                args.imp_user,
            ),
            ResponseCallbacks::new().with_on_success({
                let rt = Arc::clone(&rt);
                move |mut meta| {
                    let new_rt = match meta.remove("rt") {
                        Some(ValueReceive::Map(rt_meta)) => RoutingTable::try_parse(rt_meta)
                            .map_err(|e| DriverError::protocol_error(format!("{e}"))),
                        _ => Err(DriverError::protocol_error(
                            "ROUTE response did not contain an \"rt\" map",
                        )),
                    };
                    let mut res = Some(match new_rt {
                        Ok(new_rt) => Ok(new_rt),
                        Err(e) => {
                            warn!("failed to parse routing table: {e}");
                            Err(e)
                        }
                    });
                    mem::swap(rt.deref().borrow_mut().deref_mut(), &mut res);
                    Ok(())
                }
            }),
        )?;
        con.write_all(None)?;
        con.read_all(None, None)?;
        let rt = Arc::try_unwrap(rt).expect("read_all flushes all ResponseCallbacks");
        let rt = rt.into_inner().ok_or_else(|| {
            DriverError::protocol_error(
                "server did not reply with SUCCESS or FAILURE to ROUTE request",
            )
        })?;
        if let Ok(rt) = &rt {
            if rt.routers.is_empty() {
                debug!("received routing table without routers -> discarded");
                // Not technically a disconnect error, but it signals that this
                // table must not be used, the server should be invalidated,
                // and another router, if available, should be tried.
                return Err(DriverError::disconnect(
                    "received routing table without routers",
                ));
            }
            if rt.readers.is_empty() {
                debug!("received routing table without readers -> discarded");
                return Err(DriverError::disconnect(
                    "received routing table without readers",
                ));
            }
            // If no writers are available, this likely indicates a temporary
            // state, such as a leader switch, so no error is raised here.
        }
        rt
    }

    fn empty_rt(&self) -> RoutingTable {
        RoutingTable::new(Arc::clone(&self.address))
    }

    /// Drop per-address pools of servers no routing table references anymore.
    fn clean_up_pools(&self, rts: &mut RoutingTables) {
        drop(self.pools.update(|mut pools| {
            let used_addresses = rts
                .values()
                .map(|rt| {
                    [&rt.readers, &rt.routers, &rt.writers]
                        .into_iter()
                        .flat_map(|addrs| addrs.iter().map(Arc::clone))
                        .collect::<Vec<_>>()
                })
                .fold(
                    HashSet::with_capacity(DEFAULT_CLUSTER_SIZE),
                    |mut set, addrs| {
                        addrs.into_iter().for_each(|addr| {
                            set.insert(addr);
                        });
                        set
                    },
                );
            let existing_addresses = pools.keys().map(Arc::clone).collect::<HashSet<_>>();
            for addr in existing_addresses {
                if !used_addresses.contains(&addr) {
                    pools.remove(&addr);
                }
            }
            Ok(())
        }));
    }

    fn deactivate_server(&self, addr: &Address) {
        drop(self.routing_tables.update(|mut rts| {
            drop(self.pools.update(|mut pools| {
                Self::deactivate_server_locked(addr, &mut rts, &mut pools);
                Ok(())
            }));
            Ok(())
        }));
    }

    fn deactivate_server_locked_rts(&self, addr: &Address, rts: &mut RoutingTables) {
        drop(self.pools.update(|mut pools| {
            Self::deactivate_server_locked(addr, rts, &mut pools);
            Ok(())
        }));
    }

    fn deactivate_server_locked(addr: &Address, rts: &mut RoutingTables, pools: &mut RoutingPools) {
        debug!("deactivating address: {addr:?}");
        rts.iter_mut().for_each(|(_, rt)| rt.deactivate(addr));
        pools.remove(addr);
    }

    fn deactivate_writer(&self, addr: &Address) {
        drop(self.routing_tables.update(|mut rts| {
            debug!("deactivating writer: {addr:?}");
            rts.iter_mut()
                .for_each(|(_, rt)| rt.deactivate_writer(addr));
            Ok(())
        }));
    }

    fn handle_server_error(&self, address: &Arc<Address>, error: &mut ServerError) -> Result<()> {
        if error.deactivates_server() {
            self.deactivate_server(address);
        } else if error.invalidates_writer() {
            self.deactivate_writer(address);
        }
        Ok(())
    }

    fn wrap_discovery_error<T>(res: Result<T>) -> Result<Result<T>> {
        match res {
            Ok(t) => Ok(Ok(t)),
            Err(e) => {
                if e.fatal_during_discovery() {
                    Err(e)
                } else {
                    info!("ignored error during discovery: {e:?}");
                    Ok(Err(e))
                }
            }
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct AcquireConfig<'a> {
    pub(crate) mode: RoutingControl,
    pub(crate) update_rt_args: UpdateRtArgs<'a>,
}

#[derive(Copy, Clone)]
pub(crate) struct UpdateRtArgs<'a> {
    pub(crate) db: &'a Option<Arc<String>>,
    pub(crate) bookmarks: Option<&'a Bookmarks>,
    pub(crate) imp_user: Option<&'a str>,
    pub(crate) session_auth: SessionAuth<'a>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
    pub(crate) db_resolution_cb: Option<&'a dyn Fn(Option<Arc<String>>)>,
}

impl Debug for UpdateRtArgs<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRtArgs")
            .field("db", &self.db)
            .field("bookmarks", &self.bookmarks)
            .field("imp_user", &self.imp_user)
            .field("session_auth", &self.session_auth)
            .field("deadline", &self.deadline)
            .field(
                "idle_time_before_connection_test",
                &self.idle_time_before_connection_test,
            )
            .field(
                "db_resolution_cb",
                &self.db_resolution_cb.as_ref().map(|_| "..."),
            )
            .finish()
    }
}
