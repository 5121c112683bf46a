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

pub(crate) mod bookmarks;
pub(crate) mod config;
pub(crate) mod holder;
pub(crate) mod retry;

use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::rc::Rc;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;
use log::{debug, info};

use super::io::bolt::message_parameters::{BeginParameters, RunParameters};
use super::io::bolt::ResponseCallbacks;
use super::io::{AcquireConfig, Pool, PooledBolt, SessionAuth, UpdateRtArgs};
use super::record_stream::{ErrorPropagator, RecordStream, SharedErrorPropagator};
use super::summary::ServerInfo;
use super::transaction::{Transaction, TransactionTimeout};
use super::{EagerResult, ReducedDriverConfig, RoutingControl};
use crate::driver::config::auth::AuthToken;
use crate::error_::Result;
use crate::transaction::InnerTransaction;
use crate::value::ValueSend;
use bookmarks::{bookmark_managers, BookmarkManager, Bookmarks};
use config::InternalSessionConfig;
pub use config::SessionConfig;
use holder::{ConnectionHolder, ConnectionLease, ConnectionProvider};
use retry::RetryPolicy;

// imports for docs
#[allow(unused)]
use super::Driver;

/// The shared lease through which a session, its transaction, and the
/// transaction's pending result streams all use one pooled connection.
pub(crate) type SessionConnectionHolder<'driver> =
    Rc<RefCell<ConnectionHolder<SessionConnectionProvider<'driver>>>>;

/// A session is a container for a series of transactions.
///
/// Sessions, besides being a configuration container, automatically provide
/// [causal chaining](crate#causal-consistency): each transaction can read the
/// results of any previous transaction in the same session.
/// To establish a causal chain between two sessions, pass bookmarks manually
/// ([`Session::last_bookmarks()`]) or share a [`BookmarkManager`]
/// ([`SessionConfig::with_bookmark_manager()`]).
///
/// A session owns at most one connection at a time, leased lazily from the
/// pool when work is first requested and returned when the last pending use
/// (transaction or result stream) completes.
///
/// There are two ways to run queries in a session:
///  * [`Session::transaction()`] runs an explicit transaction managed by the
///    client.
///  * [`Session::auto_commit()`] leaves transaction management up to the
///    server. This mode is necessary for queries that manage their own
///    transactions, such as `CALL {...} IN TRANSACTION`. The only guarantee
///    given is that the transaction has been successfully committed once all
///    results have been consumed.
///
/// See also [`Driver::session()`].
#[derive(Debug)]
pub struct Session<'driver> {
    config: InternalSessionConfig,
    driver_config: &'driver ReducedDriverConfig,
    holder: SessionConnectionHolder<'driver>,
    target_db: Arc<AtomicRefCell<Option<Arc<String>>>>,
    session_bookmarks: SessionBookmarks,
}

impl<'driver> Session<'driver> {
    pub(super) fn new(
        config: InternalSessionConfig,
        pool: &'driver Pool,
        driver_config: &'driver ReducedDriverConfig,
    ) -> Self {
        let bookmarks = config.config.bookmarks.clone();
        let manager = config.config.bookmark_manager.clone();
        let target_db = Arc::new(AtomicRefCell::new(config.config.database.clone()));
        let provider = SessionConnectionProvider {
            pool,
            target_db: Arc::clone(&target_db),
            impersonated_user: config.config.impersonated_user.clone(),
            auth: config.config.auth.clone(),
            idle_time_before_connection_test: config.idle_time_before_connection_test,
        };
        Session {
            config,
            driver_config,
            holder: Rc::new(RefCell::new(ConnectionHolder::new(
                provider,
                RoutingControl::Write,
            ))),
            target_db,
            session_bookmarks: SessionBookmarks::new(bookmarks, manager),
        }
    }

    /// Prepare an auto-commit transaction (RUN without explicit BEGIN),
    /// leaving transaction management up to the server.
    ///
    /// Use the returned [`AutoCommitBuilder`] to configure the query and run
    /// it.
    pub fn auto_commit<'session, Q: AsRef<str>>(
        &'session mut self,
        query: Q,
    ) -> AutoCommitBuilder<
        'driver,
        'session,
        Q,
        DefaultParamKey,
        DefaultParam,
        DefaultMetaKey,
        DefaultMeta,
        DefaultReceiver,
    > {
        AutoCommitBuilder::new(self, query)
    }

    fn auto_commit_run<
        'session,
        Q: AsRef<str>,
        KP: Borrow<str> + Debug,
        P: Borrow<HashMap<KP, ValueSend>>,
        KM: Borrow<str> + Debug,
        M: Borrow<HashMap<KM, ValueSend>>,
        R,
        FRes: FnOnce(&mut RecordStream) -> Result<R>,
    >(
        &'session mut self,
        builder: AutoCommitBuilder<'driver, 'session, Q, KP, P, KM, M, FRes>,
    ) -> Result<R> {
        let bookmarks_db = self.bookmarks_db();
        let bookmarks = self.session_bookmarks.get_bookmarks_for_work(&bookmarks_db)?;
        {
            let mut holder = self.holder.borrow_mut();
            holder.set_mode(builder.mode);
            holder.initialize_connection(Some(&*bookmarks))?;
        }
        let connection = RefCell::borrow(&self.holder)
            .get_connection()
            .expect("connection was just initialized");

        let mut record_stream = RecordStream::new(connection, self.fetch_size(), true, None);
        let target_db = AtomicRefCell::borrow(&self.target_db).clone();
        let res = record_stream
            .run(RunParameters::new_auto_commit_run(
                builder.query.as_ref(),
                Some(builder.param.borrow()),
                Some(&*bookmarks),
                builder.timeout.raw(),
                Some(builder.meta.borrow()),
                builder.mode.as_protocol_str(),
                target_db.as_deref().map(String::as_str),
                self.config
                    .config
                    .impersonated_user
                    .as_ref()
                    .map(|imp| imp.as_str()),
            ))
            .and_then(|_| (builder.receiver)(&mut record_stream));
        let res = match res {
            Ok(r) => record_stream.consume().map(|_| r),
            Err(e) => {
                let _ = record_stream.consume();
                Err(e)
            }
        };
        let bookmark = record_stream.into_bookmark();
        self.holder.borrow_mut().release_connection();
        if let Some(bookmark) = bookmark {
            self.session_bookmarks
                .update_bookmarks(&bookmarks_db, bookmark)?;
        }
        res
    }

    /// Prepare an explicit transaction.
    ///
    /// Use the returned [`TransactionBuilder`] to configure the transaction
    /// and run it.
    ///
    /// A session runs at most one transaction at a time, which this API
    /// enforces by borrowing the session for the duration of the transaction.
    pub fn transaction<'session>(
        &'session mut self,
    ) -> TransactionBuilder<'driver, 'session, DefaultMetaKey, DefaultMeta> {
        TransactionBuilder::new(self)
    }

    fn transaction_run<
        'session,
        KM: Borrow<str> + Debug,
        M: Borrow<HashMap<KM, ValueSend>>,
        R,
        FTx: for<'tx> FnOnce(Transaction<'driver, 'tx>) -> Result<R>,
    >(
        &'session mut self,
        builder: &TransactionBuilder<'driver, 'session, KM, M>,
        receiver: FTx,
    ) -> Result<R> {
        let bookmarks_db = self.bookmarks_db();
        let bookmarks = self.session_bookmarks.get_bookmarks_for_work(&bookmarks_db)?;
        {
            let mut holder = self.holder.borrow_mut();
            holder.set_mode(builder.mode);
            holder.initialize_connection(Some(&*bookmarks))?;
        }
        let connection = RefCell::borrow(&self.holder)
            .get_connection()
            .expect("connection was just initialized");

        let error_propagator = SharedErrorPropagator::default();
        let mut tx = InnerTransaction::new(
            connection,
            Rc::clone(&self.holder),
            self.fetch_size(),
            Arc::clone(&error_propagator),
        );
        let target_db = AtomicRefCell::borrow(&self.target_db).clone();
        let parameters = BeginParameters::new(
            Some(&*bookmarks),
            builder.timeout.raw(),
            Some(builder.meta.borrow()),
            builder.mode.as_protocol_str(),
            target_db.as_deref().map(String::as_str),
            self.config
                .config
                .impersonated_user
                .as_ref()
                .map(|imp| imp.as_str()),
        );

        let res = tx
            .begin(
                parameters,
                self.config.eager_begin,
                ResponseCallbacks::new().with_on_failure(ErrorPropagator::make_on_error_cb(
                    Arc::clone(&error_propagator),
                )),
            )
            .and_then(|_| receiver(Transaction::new(&mut tx)));
        let res = match res {
            Ok(r) => tx.close().map(|_| r),
            Err(e) => {
                if let Err(close_err) = tx.close() {
                    info!(
                        "while propagating user code error: \
                        ignored tx.close() error in transaction_run: {}",
                        close_err
                    )
                }
                Err(e)
            }
        };
        let bookmark = tx.into_bookmark();
        self.holder.borrow_mut().release_connection();
        if let Some(bookmark) = bookmark {
            self.session_bookmarks
                .update_bookmarks(&bookmarks_db, bookmark)?;
        }
        res
    }

    /// Close the session: cancel anything still pending, return the
    /// connection (if any) to the pool. Further use of the session fails.
    ///
    /// Closing is idempotent. Dropping a session closes it implicitly.
    pub fn close(&mut self) {
        self.holder.borrow_mut().close();
    }

    pub(super) fn verify_connectivity(&mut self) -> Result<ServerInfo> {
        {
            let mut holder = self.holder.borrow_mut();
            holder.set_mode(RoutingControl::Read);
            holder.initialize_connection(None)?;
        }
        let connection = RefCell::borrow(&self.holder)
            .get_connection()
            .expect("connection was just initialized");
        let res = {
            let mut connection = connection.borrow_mut();
            connection
                .write_all(None)
                .and_then(|_| connection.read_all(None))
                .map(|_| ServerInfo {
                    address: connection.address(),
                    server_agent: connection.server_agent(),
                    protocol_version: connection.protocol_version(),
                })
        };
        self.holder.borrow_mut().release_connection();
        res
    }

    pub(super) fn protocol_version(&mut self) -> Result<(u8, u8)> {
        self.verify_connectivity().map(|info| info.protocol_version)
    }

    /// Get the bookmarks last received by the session or the ones it was
    /// initialized with.
    ///
    /// This can be used to [causally chain](crate#causal-consistency)
    /// sessions together.
    #[inline]
    pub fn last_bookmarks(&self) -> Arc<Bookmarks> {
        self.session_bookmarks.get_current_bookmarks()
    }

    #[inline]
    fn fetch_size(&self) -> i64 {
        self.config
            .config
            .fetch_size
            .unwrap_or(self.driver_config.fetch_size)
    }

    /// The database name under which a shared [`BookmarkManager`] tracks this
    /// session's bookmarks: the configured database, or `""` for the
    /// server-side default database.
    #[inline]
    fn bookmarks_db(&self) -> Arc<String> {
        self.config.config.database.clone().unwrap_or_default()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pool-backed [`ConnectionProvider`]: carries the session's fixed
/// acquisition parameters (database, impersonation, auth override) and pins
/// the lazily resolved default database on first acquisition.
pub(crate) struct SessionConnectionProvider<'driver> {
    pool: &'driver Pool,
    target_db: Arc<AtomicRefCell<Option<Arc<String>>>>,
    impersonated_user: Option<Arc<String>>,
    auth: Option<Arc<AuthToken>>,
    idle_time_before_connection_test: Option<Duration>,
}

impl Debug for SessionConnectionProvider<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnectionProvider")
            .field("target_db", &self.target_db)
            .field("impersonated_user", &self.impersonated_user)
            .field(
                "idle_time_before_connection_test",
                &self.idle_time_before_connection_test,
            )
            .finish()
    }
}

impl<'driver> ConnectionProvider for SessionConnectionProvider<'driver> {
    type Connection = PooledBolt<'driver>;

    fn acquire_connection(
        &self,
        mode: RoutingControl,
        bookmarks: Option<&Bookmarks>,
    ) -> Result<PooledBolt<'driver>> {
        let deadline = self.pool.config.connection_acquisition_deadline();
        let db = AtomicRefCell::borrow(&self.target_db).clone();
        let target_db = Arc::clone(&self.target_db);
        let db_resolution_cb = move |resolved: Option<Arc<String>>| {
            let mut target_db = AtomicRefCell::borrow_mut(&target_db);
            if target_db.is_none() {
                debug!(
                    "pinning session database: {:?}",
                    resolved.as_ref().map(|db| db.as_str())
                );
                *target_db = resolved;
            }
        };
        self.pool.acquire(AcquireConfig {
            mode,
            update_rt_args: UpdateRtArgs {
                db: &db,
                bookmarks,
                imp_user: self.impersonated_user.as_ref().map(|imp| imp.as_str()),
                session_auth: match &self.auth {
                    Some(auth) => SessionAuth::Forced(auth),
                    None => SessionAuth::None,
                },
                deadline,
                idle_time_before_connection_test: self.idle_time_before_connection_test,
                db_resolution_cb: Some(&db_resolution_cb),
            },
        })
    }
}

/// Builder type to prepare an auto-commit transaction.
///
/// Use [`Session::auto_commit()`] for creating one and call
/// [`AutoCommitBuilder::run()`] to execute it when you're done configuring.
pub struct AutoCommitBuilder<'driver, 'session, Q, KP, P, KM, M, FRes> {
    session: Option<&'session mut Session<'driver>>,
    query: Q,
    _kp: PhantomData<KP>,
    param: P,
    _km: PhantomData<KM>,
    meta: M,
    timeout: TransactionTimeout,
    mode: RoutingControl,
    receiver: FRes,
}

pub(crate) fn default_receiver(res: &mut RecordStream) -> Result<EagerResult> {
    res.try_as_eager_result().map(|r| {
        r.expect("default receiver does not consume stream before turning it into an eager result")
    })
}

pub(crate) type DefaultReceiver = fn(&mut RecordStream) -> Result<EagerResult>;
pub(crate) type DefaultParamKey = String;
pub(crate) type DefaultParam = HashMap<DefaultParamKey, ValueSend>;
pub(crate) type DefaultMetaKey = String;
pub(crate) type DefaultMeta = HashMap<DefaultMetaKey, ValueSend>;

impl<'driver, 'session, Q: AsRef<str>>
    AutoCommitBuilder<
        'driver,
        'session,
        Q,
        DefaultParamKey,
        DefaultParam,
        DefaultMetaKey,
        DefaultMeta,
        DefaultReceiver,
    >
{
    fn new(session: &'session mut Session<'driver>, query: Q) -> Self {
        Self {
            session: Some(session),
            query,
            _kp: PhantomData,
            param: Default::default(),
            _km: PhantomData,
            meta: Default::default(),
            timeout: Default::default(),
            mode: RoutingControl::Write,
            receiver: default_receiver,
        }
    }
}

impl<
        'driver,
        'session,
        Q: AsRef<str>,
        KP: Borrow<str> + Debug,
        P: Borrow<HashMap<KP, ValueSend>>,
        KM: Borrow<str> + Debug,
        M: Borrow<HashMap<KM, ValueSend>>,
        R,
        FRes: FnOnce(&mut RecordStream) -> Result<R>,
    > AutoCommitBuilder<'driver, 'session, Q, KP, P, KM, M, FRes>
{
    /// Configure query parameters.
    ///
    /// Always prefer this over query string manipulation to avoid injection
    /// vulnerabilities and to allow the server to cache the query plan.
    ///
    /// # Example
    /// ```no_run
    /// use graphbolt::value_map;
    ///
    /// # let driver = graphbolt::driver::Driver::new(
    /// #     "bolt://localhost:7687".try_into().unwrap(),
    /// #     Default::default(),
    /// # );
    /// # let mut session = driver.session(graphbolt::session::SessionConfig::new());
    /// let result = session
    ///     .auto_commit("CREATE (n:Node {id: $id}) RETURN n")
    ///     .with_parameters(value_map!({"id": 1}))
    ///     .run()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn with_parameters<KP_: Borrow<str> + Debug, P_: Borrow<HashMap<KP_, ValueSend>>>(
        self,
        param: P_,
    ) -> AutoCommitBuilder<'driver, 'session, Q, KP_, P_, KM, M, FRes> {
        let Self {
            session,
            query,
            _kp: _,
            param: _,
            _km,
            meta,
            timeout,
            mode,
            receiver,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp: PhantomData,
            param,
            _km,
            meta,
            timeout,
            mode,
            receiver,
        }
    }

    /// Configure the query to not use any parameters.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_parameters(
        self,
    ) -> AutoCommitBuilder<'driver, 'session, Q, DefaultParamKey, DefaultParam, KM, M, FRes> {
        let Self {
            session,
            query,
            _kp: _,
            param: _,
            _km,
            meta,
            timeout,
            mode,
            receiver,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp: PhantomData,
            param: Default::default(),
            _km,
            meta,
            timeout,
            mode,
            receiver,
        }
    }

    /// Attach transaction metadata to the query.
    ///
    /// Transaction metadata is logged in the server's query log and shows up
    /// when listing active transactions on the server.
    #[inline]
    pub fn with_transaction_meta<KM_: Borrow<str> + Debug, M_: Borrow<HashMap<KM_, ValueSend>>>(
        self,
        meta: M_,
    ) -> AutoCommitBuilder<'driver, 'session, Q, KP, P, KM_, M_, FRes> {
        let Self {
            session,
            query,
            _kp,
            param,
            _km: _,
            meta: _,
            timeout,
            mode,
            receiver,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp,
            param,
            _km: PhantomData,
            meta,
            timeout,
            mode,
            receiver,
        }
    }

    /// Configure the query to not use any transaction metadata.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_transaction_meta(
        self,
    ) -> AutoCommitBuilder<'driver, 'session, Q, KP, P, DefaultMetaKey, DefaultMeta, FRes> {
        let Self {
            session,
            query,
            _kp,
            param,
            _km: _,
            meta: _,
            timeout,
            mode,
            receiver,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp,
            param,
            _km: PhantomData,
            meta: Default::default(),
            timeout,
            mode,
            receiver,
        }
    }

    /// Instruct the server to abort the transaction after the given timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout: TransactionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Specify whether the query should be sent to a reader or writer in the
    /// cluster.
    ///
    /// See [`TransactionBuilder::with_routing_control()`] for more
    /// information.
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Specify a custom receiver to handle the result stream.
    ///
    /// By default ([`AutoCommitBuilder::with_default_receiver()`]), the
    /// result stream is collected into memory and returned as
    /// [`EagerResult`].
    #[inline]
    pub fn with_receiver<R_, FRes_: FnOnce(&mut RecordStream) -> Result<R_>>(
        self,
        receiver: FRes_,
    ) -> AutoCommitBuilder<'driver, 'session, Q, KP, P, KM, M, FRes_> {
        let Self {
            session,
            query,
            _kp,
            param,
            _km,
            meta,
            timeout,
            mode,
            receiver: _,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp,
            param,
            _km,
            meta,
            timeout,
            mode,
            receiver,
        }
    }

    /// Set the receiver back to the default, which collects the result stream
    /// into memory and returns it as [`EagerResult`].
    #[inline]
    pub fn with_default_receiver(
        self,
    ) -> AutoCommitBuilder<'driver, 'session, Q, KP, P, KM, M, DefaultReceiver> {
        let Self {
            session,
            query,
            _kp,
            param,
            _km,
            meta,
            timeout,
            mode,
            receiver: _,
        } = self;
        AutoCommitBuilder {
            session,
            query,
            _kp,
            param,
            _km,
            meta,
            timeout,
            mode,
            receiver: default_receiver,
        }
    }

    /// Run the query and return the result.
    pub fn run(mut self) -> Result<R> {
        let session = self.session.take().unwrap();
        session.auto_commit_run(self)
    }
}

impl<
        Q: AsRef<str>,
        KP: Borrow<str> + Debug,
        P: Borrow<HashMap<KP, ValueSend>>,
        KM: Borrow<str> + Debug,
        M: Borrow<HashMap<KM, ValueSend>>,
        FRes,
    > Debug for AutoCommitBuilder<'_, '_, Q, KP, P, KM, M, FRes>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoCommitBuilder")
            .field(
                "session",
                &match self.session {
                    None => "None",
                    Some(_) => "Some(...)",
                },
            )
            .field("query", &self.query.as_ref())
            .field("param", &self.param.borrow())
            .field("meta", &self.meta.borrow())
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .field("receiver", &"...")
            .finish()
    }
}

/// Builder type to prepare an explicit transaction.
///
/// Use [`Session::transaction()`] for creating one and call
/// [`TransactionBuilder::run()`] to execute the transaction when you're done
/// configuring it.
pub struct TransactionBuilder<'driver, 'session, KM, M> {
    session: Option<&'session mut Session<'driver>>,
    _km: PhantomData<KM>,
    meta: M,
    timeout: TransactionTimeout,
    mode: RoutingControl,
}

impl<'driver, 'session> TransactionBuilder<'driver, 'session, DefaultMetaKey, DefaultMeta> {
    fn new(session: &'session mut Session<'driver>) -> Self {
        Self {
            session: Some(session),
            _km: PhantomData,
            meta: Default::default(),
            timeout: Default::default(),
            mode: RoutingControl::Write,
        }
    }
}

impl<'driver, 'session, KM: Borrow<str> + Debug, M: Borrow<HashMap<KM, ValueSend>>>
    TransactionBuilder<'driver, 'session, KM, M>
{
    /// Attach transaction metadata to the transaction.
    ///
    /// Transaction metadata is logged in the server's query log and shows up
    /// when listing active transactions on the server.
    #[inline]
    pub fn with_transaction_meta<KM_: Borrow<str> + Debug, M_: Borrow<HashMap<KM_, ValueSend>>>(
        self,
        meta: M_,
    ) -> TransactionBuilder<'driver, 'session, KM_, M_> {
        let Self {
            session,
            _km: _,
            meta: _,
            timeout,
            mode,
        } = self;
        TransactionBuilder {
            session,
            _km: PhantomData,
            meta,
            timeout,
            mode,
        }
    }

    /// Configure the transaction to not use any transaction metadata (this is
    /// the default).
    #[inline]
    pub fn without_transaction_meta(
        self,
    ) -> TransactionBuilder<'driver, 'session, DefaultMetaKey, DefaultMeta> {
        let Self {
            session,
            _km: _,
            meta: _,
            timeout,
            mode,
        } = self;
        TransactionBuilder {
            session,
            _km: PhantomData,
            meta: Default::default(),
            timeout,
            mode,
        }
    }

    /// Instruct the server to abort the transaction after the given timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout: TransactionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Specify whether the transaction should be sent to a reader or writer
    /// in the cluster.
    ///
    /// Writers (*default*) can handle reads and writes.
    /// However, when running read-only queries, it's more efficient to send
    /// them to a reader to avoid overloading the writer.
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Run the transaction. The work to be done is specified by the given
    /// `receiver`.
    ///
    /// The `receiver` is called with a [`Transaction`] that can be used to
    /// execute queries and control the transaction (commit, rollback, ...).
    ///
    /// Especially when running against a clustered DBMS, it's recommended to
    /// use [`TransactionBuilder::run_with_retry()`] over this method because
    /// many intermittent errors can occur in such deployments (e.g., leader
    /// switches, connections killed by load balancers, ...).
    pub fn run<R>(mut self, receiver: impl FnOnce(Transaction) -> Result<R>) -> Result<R> {
        let session = self.session.take().unwrap();
        session.transaction_run(&self, receiver)
    }

    /// Run the transaction with a retry policy.
    ///
    /// This is pretty much the same as [`TransactionBuilder::run()`], except
    /// that the `receiver` will be retried if it returns an error deemed
    /// retryable by the given `retry_policy`.
    ///
    /// See also [`RetryPolicy`].
    pub fn run_with_retry<R, P: RetryPolicy>(
        mut self,
        retry_policy: P,
        mut receiver: impl FnMut(Transaction) -> Result<R>,
    ) -> StdResult<R, P::Error> {
        let session = self.session.take().unwrap();
        retry_policy.execute(|| session.transaction_run(&self, &mut receiver))
    }
}

impl<KM, M: Debug> Debug for TransactionBuilder<'_, '_, KM, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field(
                "session",
                &match self.session {
                    None => "None",
                    Some(_) => "Some(...)",
                },
            )
            .field("meta", &self.meta)
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .finish()
    }
}

/// The session's own bookmark state, folded together with a
/// [`BookmarkManager`] when one is configured: work is sent with the union of
/// both, and new bookmarks are fed back into the manager as
/// `update(db, previous, new)`.
#[derive(Debug)]
enum SessionBookmarks {
    Unmanaged {
        bookmarks: Arc<Bookmarks>,
    },
    ManagedInit {
        bookmarks: Arc<Bookmarks>,
        manager: Arc<dyn BookmarkManager>,
    },
    ManagedGet {
        bookmarks: Arc<Bookmarks>,
        previous_bookmarks: Arc<Bookmarks>,
        manager: Arc<dyn BookmarkManager>,
    },
    ManagedUpdated {
        bookmarks: Arc<Bookmarks>,
        previous_bookmarks: Arc<Bookmarks>,
        manager: Arc<dyn BookmarkManager>,
    },
}

impl SessionBookmarks {
    fn new(bookmarks: Option<Arc<Bookmarks>>, manager: Option<Arc<dyn BookmarkManager>>) -> Self {
        match manager {
            None => Self::Unmanaged {
                bookmarks: bookmarks.unwrap_or_default(),
            },
            Some(manager) => Self::ManagedInit {
                bookmarks: bookmarks.unwrap_or_default(),
                manager,
            },
        }
    }

    fn get_current_bookmarks(&self) -> Arc<Bookmarks> {
        match &self {
            Self::Unmanaged { bookmarks }
            | Self::ManagedInit { bookmarks, .. }
            | Self::ManagedGet { bookmarks, .. }
            | Self::ManagedUpdated { bookmarks, .. } => Arc::clone(bookmarks),
        }
    }

    fn get_bookmarks_for_work(&mut self, db: &str) -> Result<Arc<Bookmarks>> {
        match self {
            Self::Unmanaged { bookmarks } => Ok(Arc::clone(bookmarks)),
            Self::ManagedInit { bookmarks, manager }
            | Self::ManagedGet {
                bookmarks, manager, ..
            } => {
                let manager_bookmarks = bookmark_managers::get_bookmarks(&**manager, db)?;
                let previous_bookmarks = Arc::new(&*manager_bookmarks + &**bookmarks);
                *self = Self::ManagedGet {
                    bookmarks: Arc::clone(bookmarks),
                    previous_bookmarks: Arc::clone(&previous_bookmarks),
                    manager: Arc::clone(manager),
                };
                Ok(previous_bookmarks)
            }
            Self::ManagedUpdated {
                manager,
                previous_bookmarks,
                ..
            } => {
                *previous_bookmarks = bookmark_managers::get_bookmarks(&**manager, db)?;
                Ok(Arc::clone(previous_bookmarks))
            }
        }
    }

    fn update_bookmarks(&mut self, db: &str, bookmark: String) -> Result<()> {
        match self {
            SessionBookmarks::Unmanaged { bookmarks } => {
                *bookmarks = Arc::new(Bookmarks::from_raw([bookmark]));
            }
            SessionBookmarks::ManagedInit { .. } => {
                panic!("cannot update bookmarks before first get")
            }
            SessionBookmarks::ManagedGet {
                bookmarks,
                previous_bookmarks,
                manager,
            } => {
                *bookmarks = Arc::new(Bookmarks::from_raw([bookmark]));
                bookmark_managers::update_bookmarks(
                    &**manager,
                    db,
                    Arc::clone(previous_bookmarks),
                    Arc::clone(bookmarks),
                )?;
                *self = Self::ManagedUpdated {
                    bookmarks: Arc::clone(bookmarks),
                    previous_bookmarks: Arc::clone(previous_bookmarks),
                    manager: Arc::clone(manager),
                };
            }
            SessionBookmarks::ManagedUpdated {
                bookmarks,
                previous_bookmarks,
                manager,
            } => {
                *bookmarks = Arc::new(Bookmarks::from_raw([bookmark]));
                bookmark_managers::update_bookmarks(
                    &**manager,
                    db,
                    Arc::clone(previous_bookmarks),
                    Arc::clone(bookmarks),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RecordingManager {
        calls: parking_lot::Mutex<Vec<String>>,
        bookmarks: Arc<Bookmarks>,
    }

    impl BookmarkManager for RecordingManager {
        fn get_bookmarks(
            &self,
            database: &str,
        ) -> StdResult<Arc<Bookmarks>, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().push(format!("get {database}"));
            Ok(Arc::clone(&self.bookmarks))
        }

        fn get_all_bookmarks(
            &self,
        ) -> StdResult<Arc<Bookmarks>, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().push("get_all".into());
            Ok(Arc::clone(&self.bookmarks))
        }

        fn update_bookmarks(
            &self,
            database: &str,
            previous: Arc<Bookmarks>,
            new: Arc<Bookmarks>,
        ) -> StdResult<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().push(format!(
                "update {database} -{} +{}",
                previous.len(),
                new.len()
            ));
            Ok(())
        }

        fn forget(
            &self,
            databases: &[&str],
        ) -> StdResult<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().push(format!("forget {databases:?}"));
            Ok(())
        }
    }

    fn bms(bookmarks: &[&str]) -> Arc<Bookmarks> {
        Arc::new(Bookmarks::from_raw(
            bookmarks.iter().map(|bm| String::from(*bm)),
        ))
    }

    #[test]
    fn test_work_bookmarks_are_union_of_manager_and_session() {
        let manager = Arc::new(RecordingManager {
            calls: Default::default(),
            bookmarks: bms(&["managed"]),
        });
        let mut session_bookmarks =
            SessionBookmarks::new(Some(bms(&["own"])), Some(Arc::clone(&manager) as _));

        let work_bookmarks = session_bookmarks.get_bookmarks_for_work("db").unwrap();
        assert_eq!(
            work_bookmarks
                .raw()
                .collect::<std::collections::HashSet<_>>(),
            ["managed", "own"].into_iter().collect()
        );
        assert_eq!(&*manager.calls.lock(), &[String::from("get db")]);
    }

    #[test]
    fn test_commit_bookmark_updates_manager_and_session() {
        let manager = Arc::new(RecordingManager {
            calls: Default::default(),
            bookmarks: bms(&["managed"]),
        });
        let mut session_bookmarks =
            SessionBookmarks::new(Some(bms(&["own"])), Some(Arc::clone(&manager) as _));

        session_bookmarks.get_bookmarks_for_work("db").unwrap();
        session_bookmarks
            .update_bookmarks("db", String::from("new-bookmark"))
            .unwrap();

        assert_eq!(
            session_bookmarks
                .get_current_bookmarks()
                .raw()
                .collect::<Vec<_>>(),
            vec!["new-bookmark"]
        );
        assert_eq!(
            &*manager.calls.lock(),
            &[String::from("get db"), String::from("update db -2 +1")]
        );
    }

    #[test]
    fn test_unmanaged_bookmarks_track_last_bookmark() {
        let mut session_bookmarks = SessionBookmarks::new(Some(bms(&["a", "b"])), None);
        session_bookmarks
            .update_bookmarks("", String::from("c"))
            .unwrap();
        assert_eq!(
            session_bookmarks
                .get_current_bookmarks()
                .raw()
                .collect::<Vec<_>>(),
            vec!["c"]
        );
    }
}
