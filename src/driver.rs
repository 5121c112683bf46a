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

pub(crate) mod config;
pub(crate) mod eager_result;
pub(crate) mod io;
pub(crate) mod record;
pub mod record_stream;
pub(crate) mod session;
pub(crate) mod summary;
pub mod transaction;

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use crate::error_::{DriverError, Result};
use crate::value::ValueSend;
use config::auth::AuthToken;
pub use config::{
    ConfigureFetchSizeError, ConnectionConfig, ConnectionConfigParseError, DriverConfig,
    KeepAliveConfig, TlsConfigError,
};
pub use eager_result::{EagerResult, ScalarError};
use io::{Pool, PoolConfig};
pub use record::Record;
use session::bookmarks::{bookmark_managers, BookmarkManager};
use session::config::InternalSessionConfig;
use session::retry::RetryPolicy;
use session::{Session, SessionConfig};
pub use summary::ServerInfo;
use transaction::TransactionTimeout;

/// Authentication tokens.
pub mod auth {
    pub use super::config::auth::*;
}

/// The driver hands out [`Session`]s and multiplexes all their work over a
/// managed pool of connections.
///
/// There is no need to pool driver objects; usually, each application uses
/// one global driver.
#[derive(Debug)]
pub struct Driver {
    pub(crate) config: ReducedDriverConfig,
    pub(crate) pool: Pool,
    execute_query_bookmark_manager: Arc<dyn BookmarkManager>,
}

impl Driver {
    pub fn new(mut connection_config: ConnectionConfig, config: DriverConfig) -> Self {
        if let Some(routing_context) = &mut connection_config.routing_context {
            let before = routing_context.insert(
                String::from("address"),
                connection_config.address.to_string().into(),
            );
            assert!(
                before.is_none(),
                "address was already set in routing context"
            );
        }
        let pool_config = PoolConfig {
            routing_context: connection_config.routing_context,
            tls_config: connection_config.tls_config.map(Arc::new),
            user_agent: config.user_agent,
            auth: config.auth,
            max_connection_lifetime: config.max_connection_lifetime,
            max_connection_pool_size: config.max_connection_pool_size,
            connection_timeout: config.connection_timeout,
            keep_alive: config.keep_alive,
            connection_acquisition_timeout: config.connection_acquisition_timeout,
            resolver: config.resolver,
        };
        Driver {
            config: ReducedDriverConfig {
                fetch_size: config.fetch_size,
                idle_time_before_connection_test: config.idle_time_before_connection_test,
            },
            pool: Pool::new(Arc::new(connection_config.address), pool_config),
            execute_query_bookmark_manager: Arc::new(bookmark_managers::simple()),
        }
    }

    /// Spawn a new [`Session`] with the given configuration.
    ///
    /// Session creation is cheap; it's recommended to create a new session
    /// for each piece of work (unless using [`Driver::execute_query()`]).
    pub fn session(&self, config: SessionConfig) -> Session {
        let config = InternalSessionConfig {
            config,
            idle_time_before_connection_test: self.config.idle_time_before_connection_test,
            eager_begin: true,
        };
        Session::new(config, &self.pool, &self.config)
    }

    /// Run a single query in a managed transaction inside a freshly spawned
    /// session and return the eagerly collected result.
    ///
    /// This is the easiest way to run a query; prefer it whenever possible as
    /// it allows the driver to apply optimizations (like pipelining BEGIN
    /// with RUN). All `execute_query` invocations of one driver share a
    /// [`BookmarkManager`] by default
    /// ([`Driver::execute_query_bookmark_manager()`]) and are therefore
    /// [causally chained](crate#causal-consistency).
    ///
    /// Use the returned [`ExecuteQueryBuilder`] to configure the query and
    /// run it with or without a retry policy.
    pub fn execute_query<Q: AsRef<str>>(
        &self,
        query: Q,
    ) -> ExecuteQueryBuilder<Q, DefaultParamKey, DefaultParam> {
        ExecuteQueryBuilder::new(self, query)
    }

    /// The [`BookmarkManager`] chaining all [`Driver::execute_query()`]
    /// invocations together.
    ///
    /// Can be shared with sessions ([`SessionConfig::with_bookmark_manager`])
    /// to make their work part of the same causal chain.
    pub fn execute_query_bookmark_manager(&self) -> Arc<dyn BookmarkManager> {
        Arc::clone(&self.execute_query_bookmark_manager)
    }

    /// Establish a connection to the server/cluster to check connectivity
    /// (including authentication).
    pub fn verify_connectivity(&self) -> Result<()> {
        self.acquire_connectivity_checked().map(drop)
    }

    /// Like [`Driver::verify_connectivity()`], but also return information
    /// about the contacted server.
    pub fn get_server_info(&self) -> Result<ServerInfo> {
        self.acquire_connectivity_checked()
    }

    /// Whether the remote server supports addressing multiple databases
    /// (protocol version 4.0 and above).
    pub fn supports_multi_db(&self) -> Result<bool> {
        let config = InternalSessionConfig {
            config: SessionConfig::default(),
            idle_time_before_connection_test: None,
            eager_begin: true,
        };
        Session::new(config, &self.pool, &self.config)
            .protocol_version()
            .map(|version| version >= (4, 0))
    }

    fn acquire_connectivity_checked(&self) -> Result<ServerInfo> {
        let config = InternalSessionConfig {
            config: SessionConfig::default(),
            idle_time_before_connection_test: Some(Duration::ZERO),
            eager_begin: true,
        };
        Session::new(config, &self.pool, &self.config).verify_connectivity()
    }
}

#[derive(Debug)]
pub(crate) struct ReducedDriverConfig {
    pub(crate) fetch_size: i64,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
}

/// Whether work is sent to a reader or a writer member of the cluster.
///
/// Against a single (non-clustered) server, this makes no difference.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RoutingControl {
    /// Request a connection to a reader (also known as follower or
    /// secondary).
    Read,
    /// Request a connection to a writer (also known as leader or primary).
    Write,
}

impl RoutingControl {
    pub(crate) fn as_protocol_str(&self) -> Option<&'static str> {
        match self {
            RoutingControl::Read => Some("r"),
            RoutingControl::Write => None,
        }
    }
}

/// Builder for [`Driver::execute_query()`]: opens a session, runs the query
/// in a managed transaction, commits, and closes the session.
pub struct ExecuteQueryBuilder<'driver, Q, KP, P> {
    driver: &'driver Driver,
    query: Q,
    _kp: PhantomData<KP>,
    param: P,
    database: Option<Arc<String>>,
    impersonated_user: Option<Arc<String>>,
    mode: RoutingControl,
    timeout: TransactionTimeout,
    bookmark_manager: Option<Arc<dyn BookmarkManager>>,
}

pub(crate) type DefaultParamKey = String;
pub(crate) type DefaultParam = HashMap<DefaultParamKey, ValueSend>;

impl<'driver, Q: AsRef<str>> ExecuteQueryBuilder<'driver, Q, DefaultParamKey, DefaultParam> {
    fn new(driver: &'driver Driver, query: Q) -> Self {
        Self {
            driver,
            query,
            _kp: PhantomData,
            param: Default::default(),
            database: None,
            impersonated_user: None,
            mode: RoutingControl::Write,
            timeout: Default::default(),
            bookmark_manager: Some(Arc::clone(&driver.execute_query_bookmark_manager)),
        }
    }
}

impl<'driver, Q: AsRef<str>, KP: Borrow<str> + Debug, P: Borrow<HashMap<KP, ValueSend>>>
    ExecuteQueryBuilder<'driver, Q, KP, P>
{
    /// Configure query parameters.
    ///
    /// Always prefer this over query string manipulation to avoid injection
    /// vulnerabilities and to allow the server to cache the query plan.
    #[inline]
    pub fn with_parameters<KP_: Borrow<str> + Debug, P_: Borrow<HashMap<KP_, ValueSend>>>(
        self,
        param: P_,
    ) -> ExecuteQueryBuilder<'driver, Q, KP_, P_> {
        let Self {
            driver,
            query,
            _kp: _,
            param: _,
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        } = self;
        ExecuteQueryBuilder {
            driver,
            query,
            _kp: PhantomData,
            param,
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        }
    }

    /// Configure the query to not use any parameters.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_parameters(
        self,
    ) -> ExecuteQueryBuilder<'driver, Q, DefaultParamKey, DefaultParam> {
        let Self {
            driver,
            query,
            _kp: _,
            param: _,
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        } = self;
        ExecuteQueryBuilder {
            driver,
            query,
            _kp: PhantomData,
            param: Default::default(),
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        }
    }

    /// Select the database to run the query against.
    ///
    /// Always specify the database when you can.
    #[inline]
    pub fn with_database(mut self, database: Arc<String>) -> Self {
        self.database = Some(database);
        self
    }

    /// Run the query impersonating the given user.
    #[inline]
    pub fn with_impersonated_user(mut self, user: Arc<String>) -> Self {
        self.impersonated_user = Some(user);
        self
    }

    /// Specify whether the query should be sent to a reader or writer in the
    /// cluster.
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Instruct the server to abort the transaction after the given timeout.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout: TransactionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use the given [`BookmarkManager`] instead of the driver's default one.
    #[inline]
    pub fn with_bookmark_manager(mut self, manager: Arc<dyn BookmarkManager>) -> Self {
        self.bookmark_manager = Some(manager);
        self
    }

    /// Use no [`BookmarkManager`] at all, opting out of causal chaining with
    /// other `execute_query` invocations.
    #[inline]
    pub fn without_bookmark_manager(mut self) -> Self {
        self.bookmark_manager = None;
        self
    }

    /// Run the query and return the eagerly collected result.
    pub fn run(self) -> Result<EagerResult> {
        let Self {
            driver,
            query,
            _kp: _,
            param,
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        } = self;
        let mut session =
            Self::new_session(driver, database, impersonated_user, bookmark_manager);
        Self::session_run(&mut session, &query, &param, mode, timeout)
    }

    /// Run the query with a retry policy and return the eagerly collected
    /// result.
    ///
    /// The query is retried (in a fresh managed transaction) when it fails
    /// with an error deemed retryable by the given `retry_policy`.
    pub fn run_with_retry<POL: RetryPolicy>(
        self,
        retry_policy: POL,
    ) -> StdResult<EagerResult, POL::Error> {
        let Self {
            driver,
            query,
            _kp: _,
            param,
            database,
            impersonated_user,
            mode,
            timeout,
            bookmark_manager,
        } = self;
        let mut session =
            Self::new_session(driver, database, impersonated_user, bookmark_manager);
        retry_policy.execute(|| Self::session_run(&mut session, &query, &param, mode, timeout))
    }

    fn new_session(
        driver: &'driver Driver,
        database: Option<Arc<String>>,
        impersonated_user: Option<Arc<String>>,
        bookmark_manager: Option<Arc<dyn BookmarkManager>>,
    ) -> Session<'driver> {
        let mut session_config = SessionConfig::new();
        session_config.database = database;
        session_config.impersonated_user = impersonated_user;
        session_config.bookmark_manager = bookmark_manager;
        let config = InternalSessionConfig {
            config: session_config,
            idle_time_before_connection_test: driver.config.idle_time_before_connection_test,
            // pipeline BEGIN with RUN, saving a round trip
            eager_begin: false,
        };
        Session::new(config, &driver.pool, &driver.config)
    }

    fn session_run(
        session: &mut Session,
        query: &Q,
        param: &P,
        mode: RoutingControl,
        timeout: TransactionTimeout,
    ) -> Result<EagerResult> {
        let param: &HashMap<KP, ValueSend> = param.borrow();
        session
            .transaction()
            .with_routing_control(mode)
            .with_transaction_timeout(timeout)
            .run(|tx| {
                let mut stream = tx
                    .query(query.as_ref())
                    .with_parameters(param)
                    .run()?;
                let result = stream.try_as_eager_result()?.ok_or_else(|| {
                    DriverError::protocol_error(
                        "fresh result stream could not be collected eagerly",
                    )
                })?;
                drop(stream);
                tx.commit()?;
                Ok(result)
            })
    }
}

impl<Q: AsRef<str>, KP: Borrow<str> + Debug, P: Borrow<HashMap<KP, ValueSend>>> Debug
    for ExecuteQueryBuilder<'_, Q, KP, P>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteQueryBuilder")
            .field("query", &self.query.as_ref())
            .field("param", &self.param.borrow())
            .field("database", &self.database)
            .field("impersonated_user", &self.impersonated_user)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field(
                "bookmark_manager",
                &self.bookmark_manager.as_ref().map(|_| "..."),
            )
            .finish()
    }
}
