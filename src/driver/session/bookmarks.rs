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

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::result::Result as StdResult;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error_::{DriverError, Result, UserCallbackError};

// imports for docs
#[allow(unused)]
use crate::session::SessionConfig;

type BoxError = Box<dyn StdError + Send + Sync>;

/// An immutable set of bookmarks: opaque server-issued tokens marking points
/// in a database's transaction history, used to build a
/// [causal chain](crate#causal-consistency).
///
/// Bookmarks are never interpreted by the driver; set semantics (duplicates
/// collapse, union on merge) are the only operations defined on them.
/// For easier joining and manipulating of multiple causal chains, bookmarks
/// implement [`Add`] and [`Sub`] on both owned and borrowed values.
///
/// # Example
/// ```
/// use std::collections::HashSet;
///
/// use graphbolt::bookmarks::Bookmarks;
///
/// fn create_bookmarks<const N: usize>(raw: [&str; N]) -> Bookmarks {
///     Bookmarks::from_raw(raw.into_iter().map(String::from))
/// }
///
/// fn assert_bookmarks<const N: usize>(bookmarks: &Bookmarks, raw: [&str; N]) {
///     assert_eq!(bookmarks.raw().collect::<HashSet<_>>(), HashSet::from(raw));
/// }
///
/// let bm1 = create_bookmarks(["a", "b"]);
/// let mut bm2 = create_bookmarks(["b", "c"]);
///
/// assert_bookmarks(&(bm1 + &bm2), ["a", "b", "c"]);
///
/// bm2 -= create_bookmarks(["a", "c"]);
/// assert_bookmarks(&bm2, ["b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmarks {
    bookmarks: HashSet<Arc<String>>,
}

impl Bookmarks {
    /// Creates a new [`Bookmarks`] instance from the given raw bookmarks.
    ///
    /// This method is mainly intended for deserializing bookmarks a client
    /// persisted earlier.
    pub fn from_raw(raw: impl IntoIterator<Item = String>) -> Self {
        Bookmarks {
            bookmarks: raw.into_iter().map(Arc::new).collect(),
        }
    }

    /// Creates a new [`Bookmarks`] containing no bookmarks.
    ///
    /// This is equivalent to [`Bookmarks::default()`].
    #[inline]
    pub(crate) fn empty() -> Self {
        Default::default()
    }

    /// Return the count of contained bookmarks.
    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    /// Returns `true` if this [`Bookmarks`] contains no bookmarks.
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Turn these [`Bookmarks`] into an iterator over the raw contained
    /// bookmarks, e.g., for persisting them between process runs.
    pub fn into_raw(self) -> impl Iterator<Item = String> {
        self.bookmarks
            .into_iter()
            .map(|bm| Arc::try_unwrap(bm).unwrap_or_else(|bm| String::from(&*bm)))
    }

    /// Return an iterator over the raw contained bookmarks.
    pub fn raw(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.iter().map(|bm| bm.as_str())
    }
}

impl Add for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, mut rhs: Self) -> Self::Output {
        if self.bookmarks.len() < rhs.bookmarks.len() {
            std::mem::swap(&mut self.bookmarks, &mut rhs.bookmarks)
        }
        self.bookmarks.extend(rhs.bookmarks);
        self
    }
}

impl Add<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: &Bookmarks) -> Self::Output {
        self.bookmarks.extend(rhs.bookmarks.to_owned());
        self
    }
}

impl Add<Bookmarks> for &Bookmarks {
    type Output = Bookmarks;

    fn add(self, mut rhs: Bookmarks) -> Self::Output {
        rhs.bookmarks.extend(self.bookmarks.to_owned());
        rhs
    }
}

impl Add<&Bookmarks> for &Bookmarks {
    type Output = Bookmarks;

    fn add(self, rhs: &Bookmarks) -> Self::Output {
        #[allow(clippy::suspicious_arithmetic_impl)]
        Bookmarks {
            bookmarks: &self.bookmarks | &rhs.bookmarks,
        }
    }
}

impl AddAssign<Bookmarks> for Bookmarks {
    fn add_assign(&mut self, mut rhs: Bookmarks) {
        if self.bookmarks.len() < rhs.bookmarks.len() {
            std::mem::swap(&mut self.bookmarks, &mut rhs.bookmarks)
        }
        self.bookmarks.extend(rhs.bookmarks);
    }
}

impl AddAssign<&Bookmarks> for Bookmarks {
    fn add_assign(&mut self, rhs: &Bookmarks) {
        self.bookmarks.extend(rhs.bookmarks.to_owned());
    }
}

impl Sub for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: Self) -> Self::Output {
        for bm in rhs.bookmarks {
            self.bookmarks.remove(&bm);
        }
        self
    }
}

impl Sub<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: &Bookmarks) -> Self::Output {
        for bm in &rhs.bookmarks {
            self.bookmarks.remove(bm);
        }
        self
    }
}

impl Sub<Bookmarks> for &Bookmarks {
    type Output = Bookmarks;

    fn sub(self, mut rhs: Bookmarks) -> Self::Output {
        for bm in &self.bookmarks {
            rhs.bookmarks.remove(bm);
        }
        rhs
    }
}

impl Sub<&Bookmarks> for &Bookmarks {
    type Output = Bookmarks;

    fn sub(self, rhs: &Bookmarks) -> Self::Output {
        #[allow(clippy::suspicious_arithmetic_impl)]
        Bookmarks {
            bookmarks: self
                .bookmarks
                .difference(&rhs.bookmarks)
                .map(Arc::clone)
                .collect(),
        }
    }
}

impl SubAssign<Bookmarks> for Bookmarks {
    fn sub_assign(&mut self, rhs: Bookmarks) {
        for bm in rhs.bookmarks {
            self.bookmarks.remove(&bm);
        }
    }
}

impl SubAssign<&Bookmarks> for Bookmarks {
    fn sub_assign(&mut self, rhs: &Bookmarks) {
        for bm in &rhs.bookmarks {
            self.bookmarks.remove(bm);
        }
    }
}

/// A bookmark manager tracks bookmarks per database for automatic
/// [causal chaining](crate#causal-consistency) across sessions.
///
/// All work sharing the same manager will be part of the same causal chain.
/// It may be used with [`SessionConfig::with_bookmark_manager()`].
///
/// **⚠️ WARNING**:
/// Any bookmark manager implementation must not interact with the driver it
/// is used with to avoid deadlocks.
///
/// Pre-defined implementations are available in [`bookmark_managers`].
pub trait BookmarkManager: Debug + Send + Sync {
    /// Provide the bookmarks to send along with work against `database`.
    ///
    /// If the method fails, the driver will return [`DriverError::UserCallback`]
    /// with [`UserCallbackError::BookmarkManagerGet`].
    fn get_bookmarks(&self, database: &str) -> StdResult<Arc<Bookmarks>, BoxError>;

    /// Provide the bookmarks of all databases this manager knows about.
    fn get_all_bookmarks(&self) -> StdResult<Arc<Bookmarks>, BoxError>;

    /// Update the bookmarks tracked for `database`: remove exactly the
    /// `previous` ones, add exactly the `new` ones, leaving unrelated
    /// bookmarks (and other databases) untouched.
    ///
    /// If the method fails, the driver will return [`DriverError::UserCallback`]
    /// with [`UserCallbackError::BookmarkManagerUpdate`].
    fn update_bookmarks(
        &self,
        database: &str,
        previous: Arc<Bookmarks>,
        new: Arc<Bookmarks>,
    ) -> StdResult<(), BoxError>;

    /// Drop all tracked state for the listed databases.
    fn forget(&self, databases: &[&str]) -> StdResult<(), BoxError>;
}

pub mod bookmark_managers {
    use super::*;

    type DefaultSupplier = fn(Option<&str>) -> StdResult<Arc<Bookmarks>, BoxError>;
    type DefaultConsumer = fn(&str, Arc<Bookmarks>) -> StdResult<(), BoxError>;

    /// Can be used to pass [`None`] to [`with_callbacks()`] `supplier`.
    pub const NONE_SUPPLIER: Option<DefaultSupplier> = None;
    /// Can be used to pass [`None`] to [`with_callbacks()`] `consumer`.
    pub const NONE_CONSUMER: Option<DefaultConsumer> = None;

    /// A basic [`BookmarkManager`] implementation.
    pub fn simple() -> impl BookmarkManager {
        GraphBookmarkManager {
            by_database: RwLock::new(HashMap::new()),
            supplier: NONE_SUPPLIER,
            consumer: NONE_CONSUMER,
        }
    }

    /// A [`BookmarkManager`] implementation with hooks for injecting
    /// additional bookmarks (`supplier`) and observing updates (`consumer`).
    ///
    /// The `supplier` is called with `Some(database)` on every
    /// [`BookmarkManager::get_bookmarks()`] and with [`None`] on every
    /// [`BookmarkManager::get_all_bookmarks()`]; its bookmarks are returned in
    /// addition to the tracked ones but never stored.
    /// The `consumer` is called after every
    /// [`BookmarkManager::update_bookmarks()`] with the database name and the
    /// full resulting set for that database.
    ///
    /// **⚠️ WARNING**:
    /// Neither callback may interact with the driver the manager is used with
    /// to avoid deadlocks.
    pub fn with_callbacks<SF, CF>(supplier: Option<SF>, consumer: Option<CF>) -> impl BookmarkManager
    where
        SF: Fn(Option<&str>) -> StdResult<Arc<Bookmarks>, BoxError> + Send + Sync + 'static,
        CF: Fn(&str, Arc<Bookmarks>) -> StdResult<(), BoxError> + Send + Sync + 'static,
    {
        GraphBookmarkManager {
            by_database: RwLock::new(HashMap::new()),
            supplier,
            consumer,
        }
    }

    pub(crate) fn get_bookmarks(
        manager: &'_ dyn BookmarkManager,
        database: &str,
    ) -> Result<Arc<Bookmarks>> {
        manager
            .get_bookmarks(database)
            .map_err(|err| DriverError::UserCallback {
                error: UserCallbackError::BookmarkManagerGet(err),
            })
    }

    pub(crate) fn update_bookmarks(
        manager: &'_ dyn BookmarkManager,
        database: &str,
        previous: Arc<Bookmarks>,
        new: Arc<Bookmarks>,
    ) -> Result<()> {
        manager
            .update_bookmarks(database, previous, new)
            .map_err(|err| DriverError::UserCallback {
                error: UserCallbackError::BookmarkManagerUpdate(err),
            })
    }

    struct GraphBookmarkManager<SF, CF> {
        by_database: RwLock<HashMap<String, Arc<Bookmarks>>>,
        supplier: Option<SF>,
        consumer: Option<CF>,
    }

    impl<SF, CF> Debug for GraphBookmarkManager<SF, CF> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GraphBookmarkManager")
                .field("by_database", &self.by_database)
                .field("supplier", &self.supplier.as_ref().map(|_| "..."))
                .field("consumer", &self.consumer.as_ref().map(|_| "..."))
                .finish()
        }
    }

    impl<SF, CF> BookmarkManager for GraphBookmarkManager<SF, CF>
    where
        SF: Fn(Option<&str>) -> StdResult<Arc<Bookmarks>, BoxError> + Send + Sync + 'static,
        CF: Fn(&str, Arc<Bookmarks>) -> StdResult<(), BoxError> + Send + Sync + 'static,
    {
        fn get_bookmarks(&self, database: &str) -> StdResult<Arc<Bookmarks>, BoxError> {
            let mut bookmarks = {
                let lock = self.by_database.read();
                lock.get(database).map(Arc::clone).unwrap_or_default()
            };
            if let Some(supplier) = &self.supplier {
                let supplied = supplier(Some(database))?;
                bookmarks = Arc::new(&*bookmarks + &*supplied);
            }
            Ok(bookmarks)
        }

        fn get_all_bookmarks(&self) -> StdResult<Arc<Bookmarks>, BoxError> {
            let mut bookmarks = {
                let lock = self.by_database.read();
                lock.values()
                    .fold(Bookmarks::empty(), |acc, bms| acc + &**bms)
            };
            if let Some(supplier) = &self.supplier {
                let supplied = supplier(None)?;
                bookmarks = bookmarks + &*supplied;
            }
            Ok(Arc::new(bookmarks))
        }

        fn update_bookmarks(
            &self,
            database: &str,
            previous: Arc<Bookmarks>,
            new: Arc<Bookmarks>,
        ) -> StdResult<(), BoxError> {
            let mut lock = self.by_database.write();
            let current = lock.entry(database.to_string()).or_default();
            *current = Arc::new((**current).clone() - &*previous + &*new);
            if let Some(consumer) = &self.consumer {
                let bookmarks = Arc::clone(current);
                drop(lock);
                consumer(database, bookmarks)?;
            }
            Ok(())
        }

        fn forget(&self, databases: &[&str]) -> StdResult<(), BoxError> {
            let mut lock = self.by_database.write();
            for database in databases {
                lock.remove(*database);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use rstest::*;

    use super::*;

    fn bms(bookmarks: Vec<&str>) -> Bookmarks {
        Bookmarks::from_raw(bookmarks.into_iter().map(String::from))
    }

    fn assert_set(bookmarks: &Bookmarks, expected: Vec<&str>) {
        assert_eq!(
            bookmarks.raw().collect::<HashSet<_>>(),
            expected.into_iter().collect::<HashSet<_>>()
        );
    }

    #[rstest]
    fn bookmarks_add(#[values(true, false)] as_ref: bool) {
        let bm1 = bms(vec!["a", "b"]);
        let bm2 = bms(vec!["b", "c"]);
        let bm3 = bms(vec![]);
        let bm4 = bms(vec!["d"]);

        let bm_sum = if as_ref {
            &bm1 + bm2 + &bm3 + (&bm4 + &bm4)
        } else {
            bm1 + bm2 + bm3 + bm4
        };

        assert_eq!(bm_sum, bms(vec!["a", "b", "c", "d"]));
    }

    #[rstest]
    fn bookmarks_sub(#[values(true, false)] as_ref: bool) {
        let bm1 = bms(vec!["a", "b", "c"]);
        let bm2 = bms(vec!["b", "d"]);

        let bm_diff = if as_ref { &bm1 - &bm2 } else { bm1 - bm2 };

        assert_eq!(bm_diff, bms(vec!["a", "c"]));
    }

    #[test]
    fn bookmarks_collapse_duplicates() {
        let bm = Bookmarks::from_raw(["x", "x", "y"].map(String::from));
        assert_eq!(bm.len(), 2);
    }

    #[test]
    fn manager_update_is_set_difference_then_union() {
        let manager = bookmark_managers::simple();
        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["a", "b"])))
            .unwrap();

        manager
            .update_bookmarks(
                "db1",
                Arc::new(bms(vec!["a", "unrelated"])),
                Arc::new(bms(vec!["c"])),
            )
            .unwrap();

        let bookmarks = manager.get_bookmarks("db1").unwrap();
        assert_set(&bookmarks, vec!["b", "c"]);
    }

    #[test]
    fn manager_updates_do_not_leak_across_databases() {
        let manager = bookmark_managers::simple();
        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["a"])))
            .unwrap();
        manager
            .update_bookmarks("db2", Arc::new(bms(vec![])), Arc::new(bms(vec!["b"])))
            .unwrap();

        manager
            .update_bookmarks("db1", Arc::new(bms(vec!["a", "b"])), Arc::new(bms(vec!["c"])))
            .unwrap();

        assert_set(&manager.get_bookmarks("db1").unwrap(), vec!["c"]);
        assert_set(&manager.get_bookmarks("db2").unwrap(), vec!["b"]);
    }

    #[test]
    fn manager_get_all_unions_databases() {
        let manager = bookmark_managers::simple();
        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["a"])))
            .unwrap();
        manager
            .update_bookmarks("db2", Arc::new(bms(vec![])), Arc::new(bms(vec!["b", "c"])))
            .unwrap();

        assert_set(&manager.get_all_bookmarks().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn manager_supplier_is_unioned_but_not_stored() {
        let manager = bookmark_managers::with_callbacks(
            Some(|db: Option<&str>| {
                Ok(Arc::new(match db {
                    Some("db1") => bms(vec!["supplied"]),
                    _ => bms(vec!["all"]),
                }))
            }),
            bookmark_managers::NONE_CONSUMER,
        );
        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["own"])))
            .unwrap();

        assert_set(&manager.get_bookmarks("db1").unwrap(), vec!["own", "supplied"]);
        assert_set(&manager.get_all_bookmarks().unwrap(), vec!["own", "all"]);
    }

    #[test]
    fn manager_consumer_sees_resulting_set() {
        let consumed: Arc<Mutex<Vec<(String, Arc<Bookmarks>)>>> = Default::default();
        let manager = bookmark_managers::with_callbacks(
            bookmark_managers::NONE_SUPPLIER,
            Some({
                let consumed = Arc::clone(&consumed);
                move |db: &str, bookmarks: Arc<Bookmarks>| {
                    consumed.lock().unwrap().push((db.into(), bookmarks));
                    Ok(())
                }
            }),
        );

        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["a"])))
            .unwrap();
        manager
            .update_bookmarks("db1", Arc::new(bms(vec!["a"])), Arc::new(bms(vec!["b"])))
            .unwrap();

        let consumed = consumed.lock().unwrap();
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[0].0, "db1");
        assert_set(&consumed[0].1, vec!["a"]);
        assert_set(&consumed[1].1, vec!["b"]);
    }

    #[test]
    fn manager_forget_drops_internal_state_but_not_supplied() {
        let manager = bookmark_managers::with_callbacks(
            Some(|_: Option<&str>| Ok(Arc::new(bms(vec!["supplied"])))),
            bookmark_managers::NONE_CONSUMER,
        );
        manager
            .update_bookmarks("db1", Arc::new(bms(vec![])), Arc::new(bms(vec!["a"])))
            .unwrap();
        manager
            .update_bookmarks("db2", Arc::new(bms(vec![])), Arc::new(bms(vec!["b"])))
            .unwrap();

        manager.forget(&["db1"]).unwrap();

        assert_set(&manager.get_bookmarks("db1").unwrap(), vec!["supplied"]);
        assert_set(
            &manager.get_all_bookmarks().unwrap(),
            vec!["b", "supplied"],
        );
    }
}
