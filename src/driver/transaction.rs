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

use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::Deref;
use std::rc::Rc;
use std::result;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use super::eager_result::EagerResult;
use super::io::bolt::message_parameters::{BeginParameters, RunParameters};
use super::io::bolt::ResponseCallbacks;
use super::io::PooledBolt;
use super::record_stream::{GetSingleRecordError, RecordStream, SharedErrorPropagator};
use super::session::SessionConnectionHolder;
use super::session::holder::ConnectionLease;
use super::Record;
use crate::error_::{DriverError, Result};
use crate::summary::Summary;
use crate::value::{ValueReceive, ValueSend};

/// A transaction that can be used to execute queries.
///
/// A transaction is `active` until it was committed or rolled back (also
/// implicitly by being dropped); both states are terminal, which the API
/// enforces by having [`Transaction::commit()`] and
/// [`Transaction::rollback()`] consume the transaction.
///
/// **NOTE:**
/// Once any associated function of the transaction or any
/// [`TransactionRecordStream`] spawned from it returns an error, the
/// transaction is closed.
#[derive(Debug)]
pub struct Transaction<'driver, 'tx> {
    inner_tx: &'tx mut InnerTransaction<'driver>,
    drop_result: RefCell<Result<()>>,
}

impl<'driver, 'tx> Transaction<'driver, 'tx> {
    pub(crate) fn new(inner: &'tx mut InnerTransaction<'driver>) -> Self {
        Self {
            inner_tx: inner,
            drop_result: RefCell::new(Ok(())),
        }
    }

    /// Prepare a query to be executed.
    ///
    /// Use the returned [`TransactionQueryBuilder`] to add parameters and run
    /// the query.
    pub fn query<Q: AsRef<str>>(
        &'tx self,
        query: Q,
    ) -> TransactionQueryBuilder<'driver, 'tx, Q, DefaultKey, DefaultParameters> {
        TransactionQueryBuilder::new(self, query)
    }

    fn run<Q: AsRef<str>, K: Borrow<str> + Debug, M: Borrow<HashMap<K, ValueSend>>>(
        &'tx self,
        builder: TransactionQueryBuilder<'driver, 'tx, Q, K, M>,
    ) -> Result<TransactionRecordStream<'driver, 'tx>> {
        let query = builder.query.as_ref();
        let parameters = builder.parameters.borrow();
        let (stream, holder) = self.inner_tx.run(query, parameters)?;
        Ok(TransactionRecordStream(Some(stream), holder, self))
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        self.drop_result.into_inner()?;
        self.inner_tx.commit()
    }

    /// Rollback the transaction.
    ///
    /// This is the default behavior when the transaction is dropped.
    /// However, when dropping the transaction, potential errors will be
    /// swallowed.
    pub fn rollback(self) -> Result<()> {
        match self.drop_result.into_inner() {
            Ok(_) => self.inner_tx.rollback(),
            Err(_) => {
                // Nothing to do here.
                // The transaction already failed and doesn't need to be
                // rolled back.
                Ok(())
            }
        }
    }
}

/// A result cursor as returned by [`TransactionQueryBuilder::run()`].
///
/// It implements [`Iterator`] and can be used to iterate over the
/// [`Record`]s.
///
/// Before ending the transaction ([`Transaction::commit()`] or
/// [`Transaction::rollback()`]), all record streams spawned from it must be
/// dropped. While calling [`drop(stream)`] works fine for this purpose, it
/// will swallow any outstanding errors. Therefore, it is recommended to use
/// [`TransactionRecordStream::consume()`] instead.
#[derive(Debug)]
pub struct TransactionRecordStream<'driver, 'tx>(
    Option<RecordStream<'driver>>,
    SessionConnectionHolder<'driver>,
    &'tx Transaction<'driver, 'tx>,
);

impl Drop for TransactionRecordStream<'_, '_> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.0.take() {
            if let Err(err) = stream.consume() {
                if self.2.drop_result.borrow().is_ok() {
                    let _ = self.2.drop_result.replace(Err(err));
                }
            }
        }
        self.1.borrow_mut().release_connection();
    }
}

impl TransactionRecordStream<'_, '_> {
    /// see [`RecordStream::consume()`] (except that this consumes `self`)
    pub fn consume(mut self) -> Result<Option<Summary>> {
        self.0
            .as_mut()
            .expect("stream option is Some until dropped")
            .consume()
    }

    /// see [`RecordStream::keys()`]
    pub fn keys(&self) -> Vec<Arc<String>> {
        self.0
            .as_ref()
            .expect("stream option is Some until dropped")
            .keys()
    }

    /// see [`RecordStream::single()`]
    pub fn single(&mut self) -> result::Result<Result<Record>, GetSingleRecordError> {
        self.0
            .as_mut()
            .expect("stream option is Some until dropped")
            .single()
    }

    /// see [`RecordStream::try_as_eager_result()`]
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        self.0
            .as_mut()
            .expect("stream option is Some until dropped")
            .try_as_eager_result()
    }
}

impl Iterator for TransactionRecordStream<'_, '_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .as_mut()
            .expect("stream option is Some until dropped")
            .next()
    }
}

#[derive(Debug)]
pub(crate) struct InnerTransaction<'driver> {
    connection: Rc<RefCell<PooledBolt<'driver>>>,
    holder: SessionConnectionHolder<'driver>,
    bookmark: Arc<AtomicRefCell<Option<String>>>,
    error_propagator: SharedErrorPropagator,
    fetch_size: i64,
    closed: bool,
}

impl<'driver> InnerTransaction<'driver> {
    pub(crate) fn new(
        connection: Rc<RefCell<PooledBolt<'driver>>>,
        holder: SessionConnectionHolder<'driver>,
        fetch_size: i64,
        error_propagator: SharedErrorPropagator,
    ) -> Self {
        Self {
            connection,
            holder,
            bookmark: Default::default(),
            error_propagator,
            fetch_size,
            closed: false,
        }
    }

    pub(crate) fn begin<K: Borrow<str> + Debug>(
        &mut self,
        parameters: BeginParameters<K>,
        eager: bool,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let mut cx = self.connection.borrow_mut();
        cx.begin(parameters, callbacks)?;
        if eager {
            cx.write_all(None)?;
            cx.read_all(None)?;
            drop(cx);
            self.check_error()?;
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.closed = true;
        self.check_error()?;
        let mut cx = self.connection.borrow_mut();
        let bookmark = Arc::clone(&self.bookmark);
        cx.write_all(None)?;
        cx.read_all(None)?;
        cx.commit(ResponseCallbacks::new().with_on_success(move |mut meta| {
            if let Some(ValueReceive::String(bms)) = meta.remove("bookmark") {
                *bookmark.borrow_mut() = Some(bms);
            };
            Ok(())
        }))?;
        cx.write_all(None)?;
        DriverError::wrap_commit(cx.read_all(None))
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.closed = true;
        if self.error_propagator.deref().borrow().error().is_some() {
            // transaction already failed, nothing to roll back
            return Ok(());
        }
        let mut cx = self.connection.borrow_mut();
        cx.rollback()?;
        cx.write_all(None)?;
        cx.read_all(None)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.error_propagator.borrow_mut().cancel_listeners();
        if self.check_error().is_err() || self.connection.borrow_mut().closed() {
            self.closed = true;
        }
        if !self.closed {
            return self.rollback();
        }
        Ok(())
    }

    pub(crate) fn into_bookmark(self) -> Option<String> {
        self.bookmark.borrow_mut().take()
    }

    pub(crate) fn run<K: Borrow<str> + Debug>(
        &self,
        query: &str,
        parameters: &HashMap<K, ValueSend>,
    ) -> Result<(RecordStream<'driver>, SessionConnectionHolder<'driver>)> {
        let cx = Rc::clone(&self.connection);

        // the stream is one more concurrent use of the session's connection
        self.holder.borrow_mut().initialize_connection(None)?;
        let mut record_stream = RecordStream::new(
            cx,
            self.fetch_size,
            false,
            Some(Arc::clone(&self.error_propagator)),
        );
        let res = record_stream.run(RunParameters::new_transaction_run(query, Some(parameters)));
        match res {
            Ok(()) => Ok((record_stream, Rc::clone(&self.holder))),
            Err(err) => {
                self.holder.borrow_mut().release_connection();
                Err(err)
            }
        }
    }

    fn check_error(&self) -> Result<()> {
        match self.error_propagator.deref().borrow().error() {
            None => Ok(()),
            Some(err) => Err(DriverError::ServerError {
                error: err.deref().clone(),
            }),
        }
    }
}

/// A builder for queries to be executed in a transaction.
///
/// See [`Transaction::query()`].
pub struct TransactionQueryBuilder<
    'driver,
    'tx,
    Q: AsRef<str>,
    K: Borrow<str> + Debug,
    M: Borrow<HashMap<K, ValueSend>>,
> {
    tx: &'tx Transaction<'driver, 'tx>,
    query: Q,
    _k: PhantomData<K>,
    parameters: M,
}

type DefaultKey = String;
type DefaultParameters = HashMap<DefaultKey, ValueSend>;

impl<'driver, 'tx, Q: AsRef<str>>
    TransactionQueryBuilder<'driver, 'tx, Q, DefaultKey, DefaultParameters>
{
    fn new(tx: &'tx Transaction<'driver, 'tx>, query: Q) -> Self {
        Self {
            tx,
            query,
            _k: PhantomData,
            parameters: Default::default(),
        }
    }
}

impl<'driver, 'tx, Q: AsRef<str>, K: Borrow<str> + Debug, M: Borrow<HashMap<K, ValueSend>>>
    TransactionQueryBuilder<'driver, 'tx, Q, K, M>
{
    /// Configure query parameters.
    ///
    /// Always prefer this over query string manipulation to avoid injection
    /// vulnerabilities and to allow the server to cache the query plan.
    pub fn with_parameters<K_: Borrow<str> + Debug, M_: Borrow<HashMap<K_, ValueSend>>>(
        self,
        parameters: M_,
    ) -> TransactionQueryBuilder<'driver, 'tx, Q, K_, M_> {
        let Self {
            tx,
            query,
            _k: _,
            parameters: _,
        } = self;
        TransactionQueryBuilder {
            tx,
            query,
            _k: PhantomData,
            parameters,
        }
    }

    /// Configure the query to not use any parameters.
    ///
    /// This is the *default*.
    pub fn without_parameters(
        self,
    ) -> TransactionQueryBuilder<'driver, 'tx, Q, DefaultKey, DefaultParameters> {
        let Self {
            tx,
            query,
            _k: _,
            parameters: _,
        } = self;
        TransactionQueryBuilder {
            tx,
            query,
            _k: PhantomData,
            parameters: Default::default(),
        }
    }

    /// Run the query as configured.
    pub fn run(self) -> Result<TransactionRecordStream<'driver, 'tx>> {
        self.tx.run(self)
    }
}

impl<Q: AsRef<str>, K: Borrow<str> + Debug, M: Borrow<HashMap<K, ValueSend>>> Debug
    for TransactionQueryBuilder<'_, '_, Q, K, M>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionQueryBuilder")
            .field("inner_tx", &self.tx)
            .field("query", &self.query.as_ref())
            .field("parameters", self.parameters.borrow())
            .finish()
    }
}

/// Controls after how long a transaction should be killed by the server.
///
/// Choices:
///  * [`TransactionTimeout::none`] never time out
///  * [`TransactionTimeout::from_millis`] time out after specified duration
///  * [`TransactionTimeout::default`] use the default timeout configured on
///    the server.
#[derive(Debug, Clone, Copy)]
pub struct TransactionTimeout {
    timeout: InternalTransactionTimeout,
}

impl TransactionTimeout {
    /// Construct a transaction timeout in milliseconds.
    ///
    /// The specified timeout overrides the default timeout configured on the
    /// server.
    ///
    /// This method returns [`None`] if the timeout is less than or equal to 0
    /// as this is not considered a valid timeout by the server.
    #[inline]
    pub fn from_millis(timeout: i64) -> Option<Self> {
        if timeout <= 0 {
            return None;
        }
        Some(Self {
            timeout: InternalTransactionTimeout::Custom(timeout),
        })
    }

    /// Construct an infinite transaction timeout.
    ///
    /// This will instruct the server to never time out the transaction.
    #[inline]
    pub fn none() -> Self {
        Self {
            timeout: InternalTransactionTimeout::None,
        }
    }

    #[inline]
    pub(crate) fn raw(&self) -> Option<i64> {
        self.timeout.raw()
    }
}

impl Default for TransactionTimeout {
    /// Construct a transaction timeout that uses the default timeout
    /// configured on the server.
    #[inline]
    fn default() -> Self {
        Self {
            timeout: InternalTransactionTimeout::Default,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum InternalTransactionTimeout {
    None,
    Default,
    Custom(i64),
}

impl Default for InternalTransactionTimeout {
    fn default() -> Self {
        Self::Default
    }
}

impl InternalTransactionTimeout {
    #[inline]
    pub(crate) fn raw(&self) -> Option<i64> {
        match self {
            Self::None => Some(0),
            Self::Default => None,
            Self::Custom(timeout) => Some(*timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_timeout_from_millis() {
        assert!(TransactionTimeout::from_millis(-1).is_none());
        assert!(TransactionTimeout::from_millis(0).is_none());
        assert!(TransactionTimeout::from_millis(1).is_some());
        assert_eq!(TransactionTimeout::from_millis(42).unwrap().raw(), Some(42));
        assert_eq!(TransactionTimeout::none().raw(), Some(0));
        assert_eq!(TransactionTimeout::default().raw(), None);
    }
}
