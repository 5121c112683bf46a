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

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use log::debug;

use super::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{DriverError, Result};

/// Resolves "which physical connection satisfies this logical request".
/// Implemented by the pool-backed provider; faked in tests.
pub(crate) trait ConnectionProvider {
    type Connection: Debug;

    fn acquire_connection(
        &self,
        mode: RoutingControl,
        bookmarks: Option<&Bookmarks>,
    ) -> Result<Self::Connection>;
}

/// Common interface of the three holder variants ([`ConnectionHolder`],
/// [`ReadOnlyConnectionHolder`], [`EmptyConnectionHolder`]); which one a
/// component gets is decided at construction.
pub(crate) trait ConnectionLease {
    type Connection;

    /// Register one use of the holder. The underlying connection is acquired
    /// only on the 0 → 1 transition; the returned bool tells whether an
    /// acquisition happened.
    fn initialize_connection(&mut self, bookmarks: Option<&Bookmarks>) -> Result<bool>;
    fn get_connection(&self) -> Option<Rc<RefCell<Self::Connection>>>;
    /// Unregister one use. Only the last release (reference count back at 0)
    /// returns the connection to the pool.
    fn release_connection(&mut self);
    /// Force the reference count to 0 and release unconditionally.
    /// Idempotent.
    fn close(&mut self);
}

/// The default holder: a lazy, reference-counted lease of a pooled
/// connection. A session acquires its connection through this on first use
/// (RUN/BEGIN); a transaction and every record stream pending on it share the
/// one acquired connection via the reference count.
#[derive(Debug)]
pub(crate) struct ConnectionHolder<P: ConnectionProvider> {
    provider: P,
    mode: RoutingControl,
    ref_count: usize,
    connection: Option<Rc<RefCell<P::Connection>>>,
    closed: bool,
}

impl<P: ConnectionProvider> ConnectionHolder<P> {
    pub(crate) fn new(provider: P, mode: RoutingControl) -> Self {
        Self {
            provider,
            mode,
            ref_count: 0,
            connection: None,
            closed: false,
        }
    }

    pub(crate) fn set_mode(&mut self, mode: RoutingControl) {
        debug_assert!(
            self.ref_count == 0,
            "cannot change mode while the connection is in use"
        );
        self.mode = mode;
    }
}

impl<P: ConnectionProvider> ConnectionLease for ConnectionHolder<P> {
    type Connection = P::Connection;

    fn initialize_connection(&mut self, bookmarks: Option<&Bookmarks>) -> Result<bool> {
        if self.closed {
            return Err(DriverError::protocol_error(
                "cannot use a closed connection holder",
            ));
        }
        if self.ref_count == 0 {
            debug!("connection holder acquiring connection ({:?})", self.mode);
            let connection = self.provider.acquire_connection(self.mode, bookmarks)?;
            self.connection = Some(Rc::new(RefCell::new(connection)));
            self.ref_count = 1;
            Ok(true)
        } else {
            self.ref_count += 1;
            Ok(false)
        }
    }

    fn get_connection(&self) -> Option<Rc<RefCell<P::Connection>>> {
        self.connection.as_ref().map(Rc::clone)
    }

    fn release_connection(&mut self) {
        if self.ref_count == 0 {
            return;
        }
        self.ref_count -= 1;
        if self.ref_count == 0 {
            debug!("connection holder releasing connection");
            // dropping the lease returns the connection to the pool
            self.connection = None;
        }
    }

    fn close(&mut self) {
        self.ref_count = 0;
        self.connection = None;
        self.closed = true;
    }
}

/// Mirrors a holder it does not own: all reads are passed through, but
/// acquire/release never happen from here. For components that must observe a
/// session's connection without affecting its lifecycle.
#[allow(dead_code)] // holder variant, selected at construction by its users
#[derive(Debug)]
pub(crate) struct ReadOnlyConnectionHolder<P: ConnectionProvider> {
    inner: Rc<RefCell<ConnectionHolder<P>>>,
}

impl<P: ConnectionProvider> ReadOnlyConnectionHolder<P> {
    #[allow(dead_code)] // holder variant, selected at construction by its users
    pub(crate) fn new(inner: Rc<RefCell<ConnectionHolder<P>>>) -> Self {
        Self { inner }
    }
}

impl<P: ConnectionProvider> ConnectionLease for ReadOnlyConnectionHolder<P> {
    type Connection = P::Connection;

    fn initialize_connection(&mut self, _bookmarks: Option<&Bookmarks>) -> Result<bool> {
        Ok(false)
    }

    fn get_connection(&self) -> Option<Rc<RefCell<P::Connection>>> {
        self.inner.borrow().get_connection()
    }

    fn release_connection(&mut self) {}

    fn close(&mut self) {}
}

/// Holder for components that are not backed by any connection (e.g., results
/// detached from their session).
#[allow(dead_code)] // holder variant, selected at construction by its users
#[derive(Debug, Default)]
pub(crate) struct EmptyConnectionHolder<C> {
    _connection: std::marker::PhantomData<C>,
}

impl<C> ConnectionLease for EmptyConnectionHolder<C> {
    type Connection = C;

    fn initialize_connection(&mut self, _bookmarks: Option<&Bookmarks>) -> Result<bool> {
        Ok(false)
    }

    fn get_connection(&self) -> Option<Rc<RefCell<C>>> {
        None
    }

    fn release_connection(&mut self) {}

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, Default)]
    struct FakeProvider {
        acquisitions: Rc<Cell<usize>>,
        fail: bool,
    }

    #[derive(Debug, PartialEq, Default)]
    struct FakeConnection {
        id: usize,
    }

    impl ConnectionProvider for FakeProvider {
        type Connection = FakeConnection;

        fn acquire_connection(
            &self,
            _mode: RoutingControl,
            _bookmarks: Option<&Bookmarks>,
        ) -> Result<FakeConnection> {
            if self.fail {
                return Err(DriverError::disconnect("scripted failure"));
            }
            let id = self.acquisitions.get();
            self.acquisitions.set(id + 1);
            Ok(FakeConnection { id })
        }
    }

    fn new_holder() -> (Rc<Cell<usize>>, ConnectionHolder<FakeProvider>) {
        let acquisitions = Rc::new(Cell::new(0));
        let provider = FakeProvider {
            acquisitions: Rc::clone(&acquisitions),
            fail: false,
        };
        (acquisitions, ConnectionHolder::new(provider, RoutingControl::Read))
    }

    #[test]
    fn test_acquires_exactly_once_while_ref_count_positive() {
        let (acquisitions, mut holder) = new_holder();

        assert!(holder.initialize_connection(None).unwrap());
        assert!(!holder.initialize_connection(None).unwrap());
        assert!(!holder.initialize_connection(None).unwrap());

        assert_eq!(acquisitions.get(), 1);
    }

    #[test]
    fn test_releases_exactly_once_at_ref_count_zero() {
        let (acquisitions, mut holder) = new_holder();

        holder.initialize_connection(None).unwrap();
        holder.initialize_connection(None).unwrap();
        holder.initialize_connection(None).unwrap();

        holder.release_connection();
        holder.release_connection();
        assert!(holder.get_connection().is_some());

        holder.release_connection();
        assert!(holder.get_connection().is_none());

        // re-initialization acquires a fresh connection
        holder.initialize_connection(None).unwrap();
        assert_eq!(acquisitions.get(), 2);
    }

    #[test]
    fn test_extra_releases_are_no_ops() {
        let (acquisitions, mut holder) = new_holder();

        holder.initialize_connection(None).unwrap();
        holder.release_connection();
        holder.release_connection();
        holder.release_connection();

        holder.initialize_connection(None).unwrap();
        assert_eq!(acquisitions.get(), 2);
    }

    #[test]
    fn test_failed_acquisition_leaves_ref_count_at_zero() {
        let acquisitions = Rc::new(Cell::new(0));
        let provider = FakeProvider {
            acquisitions: Rc::clone(&acquisitions),
            fail: true,
        };
        let mut holder = ConnectionHolder::new(provider, RoutingControl::Write);

        assert!(holder.initialize_connection(None).is_err());
        assert!(holder.get_connection().is_none());
        assert_eq!(acquisitions.get(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let (_, mut holder) = new_holder();

        holder.initialize_connection(None).unwrap();
        holder.initialize_connection(None).unwrap();
        holder.close();
        assert!(holder.get_connection().is_none());
        holder.close();

        assert!(holder.initialize_connection(None).is_err());
    }

    #[test]
    fn test_read_only_holder_does_not_affect_lifecycle() {
        let (acquisitions, mut holder) = new_holder();
        holder.initialize_connection(None).unwrap();
        let holder = Rc::new(RefCell::new(holder));

        let mut read_only = ReadOnlyConnectionHolder::new(Rc::clone(&holder));
        assert!(!read_only.initialize_connection(None).unwrap());
        assert!(read_only.get_connection().is_some());
        read_only.release_connection();
        read_only.close();

        // the mirrored holder still holds its connection
        assert!(holder.borrow().get_connection().is_some());
        assert_eq!(acquisitions.get(), 1);

        holder.borrow_mut().release_connection();
        assert!(read_only.get_connection().is_none());
    }

    #[test]
    fn test_empty_holder_has_no_connection() {
        let mut holder: EmptyConnectionHolder<FakeConnection> = Default::default();
        assert!(!holder.initialize_connection(None).unwrap());
        assert!(holder.get_connection().is_none());
        holder.release_connection();
        holder.close();
    }
}
