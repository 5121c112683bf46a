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
use std::collections::VecDeque;
use std::fmt::Debug;
use std::iter::FusedIterator;
use std::mem;
use std::ops::Deref;
use std::rc::Rc;
use std::result;
use std::sync::{Arc, Weak};

use atomic_refcell::AtomicRefCell;
use duplicate::duplicate_item;
use thiserror::Error;

use super::io::bolt::message_parameters::{DiscardParameters, PullParameters, RunParameters};
use super::io::bolt::{BoltMeta, BoltRecordFields, ResponseCallbacks};
use super::io::PooledBolt;
use super::summary::Summary;
use super::Record;
use crate::driver::eager_result::EagerResult;
use crate::error_::{DriverError, Result, ServerError};
use crate::value::ValueReceive;

/// Sentinel fetch size requesting the whole result in one batch.
pub(crate) const FETCH_ALL: i64 = -1;

/// Buffered-record thresholds steering when the stream pauses and resumes
/// requesting more records from the server (flow control).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct RecordWatermarks {
    pub(crate) low: usize,
    pub(crate) high: usize,
}

pub(crate) fn compute_watermarks(fetch_size: i64) -> RecordWatermarks {
    match fetch_size {
        FETCH_ALL => RecordWatermarks {
            low: usize::MAX,
            high: usize::MAX,
        },
        fetch_size => {
            debug_assert!(fetch_size > 0);
            let fetch_size = fetch_size as usize;
            RecordWatermarks {
                low: fetch_size * 3 / 10,
                high: fetch_size * 7 / 10,
            }
        }
    }
}

/// A lazy stream of [`Record`]s.
///
/// It implements [`Iterator`]; pulling is batched (`fetch_size` records per
/// `PULL`) and throttled by the stream's watermarks: while more records are
/// buffered than the high watermark, no further records are read off the
/// wire; once the buffer drains below the low watermark, the next batch is
/// requested.
#[derive(Debug)]
pub struct RecordStream<'driver> {
    connection: Rc<RefCell<PooledBolt<'driver>>>,
    fetch_size: i64,
    watermarks: RecordWatermarks,
    auto_commit: bool,
    listener: Arc<AtomicRefCell<RecordListener>>,
}

impl<'driver> RecordStream<'driver> {
    pub(crate) fn new(
        connection: Rc<RefCell<PooledBolt<'driver>>>,
        fetch_size: i64,
        auto_commit: bool,
        error_propagator: Option<SharedErrorPropagator>,
    ) -> Self {
        let watermarks = compute_watermarks(fetch_size);
        let listener = Arc::new(AtomicRefCell::new(RecordListener::new(
            &(*connection).borrow(),
            watermarks,
            error_propagator.clone(),
        )));
        if let Some(error_propagator) = error_propagator {
            error_propagator
                .borrow_mut()
                .add_listener(Arc::downgrade(&listener));
        }
        Self {
            connection,
            fetch_size,
            watermarks,
            auto_commit,
            listener,
        }
    }

    pub(crate) fn run<KP: Borrow<str> + Debug, KM: Borrow<str> + Debug>(
        &mut self,
        parameters: RunParameters<KP, KM>,
    ) -> Result<()> {
        if let RecordListenerState::ForeignError(e) = &(*self.listener).borrow().state {
            return Err(DriverError::ServerError {
                error: e.deref().clone(),
            });
        }

        let mut callbacks = self.failure_callbacks();
        let listener = Arc::downgrade(&self.listener);
        callbacks = callbacks.with_on_success(move |meta| {
            if let Some(listener) = listener.upgrade() {
                return listener.borrow_mut().run_success_cb(meta);
            }
            Ok(())
        });

        let mut res = self.connection.borrow_mut().run(parameters, callbacks);
        if self.auto_commit {
            res = res.and_then(|_| self.connection.borrow_mut().write_all(None));
            res = match res.and_then(|_| self.pull(true)) {
                Err(e) => {
                    let mut listener = self.listener.borrow_mut();
                    listener.state = RecordListenerState::Done;
                    return Err(e);
                }
                Ok(res) => Ok(res),
            }
        } else {
            res = res.and_then(|_| self.pull(true));
        }

        if let Err(e) = res.and_then(|_| {
            // read until only the response(s) to PULL is/are left
            let mut connection = self.connection.borrow_mut();
            let mut res = Ok(());
            while res.is_ok() && connection.expected_reply_len() > 1 {
                res = connection.read_one(None);
            }
            res
        }) {
            let mut listener = self.listener.borrow_mut();
            listener.state = RecordListenerState::Done;
            return Err(self.failed_commit(e));
        };

        {
            let state = &mut self.listener.borrow_mut().state;
            match state {
                RecordListenerState::Error(_) => {
                    let mut state_swap = RecordListenerState::Done;
                    mem::swap(state, &mut state_swap);
                    match state_swap {
                        RecordListenerState::Error(e) => return Err(self.failed_commit(e)),
                        _ => panic!("checked state to be error above"),
                    }
                }
                RecordListenerState::ForeignError(_) => {
                    let mut state_swap = RecordListenerState::Done;
                    mem::swap(state, &mut state_swap);
                    match state_swap {
                        RecordListenerState::ForeignError(e) => {
                            return Err(DriverError::ServerError {
                                error: e.deref().clone(),
                            })
                        }
                        _ => panic!("checked state to be error above"),
                    }
                }
                RecordListenerState::Ignored => {
                    let mut state_swap = RecordListenerState::Done;
                    mem::swap(state, &mut state_swap);
                    return Err(DriverError::protocol_error("record stream was ignored"));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Fully consumes the result and returns the [`Summary`].
    ///
    /// Returns [`None`] if
    ///  * [`RecordStream::consume()`] has been called before or
    ///  * the stream was cancelled or failed earlier.
    pub fn consume(&mut self) -> Result<Option<Summary>> {
        self.exhaust()?;

        Ok(self.listener.borrow_mut().summary.take())
    }

    pub fn keys(&self) -> Vec<Arc<String>> {
        (*self.listener)
            .borrow()
            .keys
            .as_ref()
            .expect(
                "keys were not present but should be after RUN's SUCCESS. \
                Even if they are missing, the SUCCESS handler should've caused a protocol \
                violation error before the user is handed out the stream object",
            )
            .iter()
            .map(Arc::clone)
            .collect()
    }

    /// Exhausts the stream and returns a single record.
    ///
    /// If any error occurs while consuming the stream, the error is returned
    /// as `Ok(Err(error))`.
    /// If consumption is successful, `Ok(Ok(record))` is returned if exactly
    /// one record was found; else `Err(GetSingleRecordError)`.
    pub fn single(&mut self) -> result::Result<Result<Record>, GetSingleRecordError> {
        let next = self.next();
        match next {
            Some(Ok(record)) => match self.next() {
                None => Ok(Ok(record)),
                Some(Err(e)) => Ok(Err(e)),
                Some(Ok(_)) => match self.exhaust() {
                    Ok(()) => Err(GetSingleRecordError::TooManyRecords),
                    Err(e) => Ok(Err(e)),
                },
            },
            Some(Err(e)) => Ok(Err(e)),
            None => Err(GetSingleRecordError::NoRecords),
        }
    }

    /// Collects the result into an [`EagerResult`].
    ///
    /// Returns [`None`] if the stream has already been consumed.
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        let keys = self.keys();
        let records = self.collect::<Result<_>>()?;
        let summary = self.consume()?;
        let Some(summary) = summary else {
            return Ok(None);
        };
        Ok(Some(EagerResult {
            keys,
            records,
            summary,
        }))
    }

    pub(crate) fn into_bookmark(self) -> Option<String> {
        Arc::try_unwrap(self.listener)
            .expect("stream is the only strong owner of its listener")
            .into_inner()
            .bookmark
    }

    fn exhaust(&mut self) -> Result<()> {
        if (*self.listener).borrow().state.is_streaming() {
            let mut listener = self.listener.borrow_mut();
            listener.buffer.clear();
            listener.state = RecordListenerState::Discarding;
        }

        let res = self.try_for_each(|e| e.map(drop));
        self.wrap_commit(res)?;

        Ok(())
    }

    fn pull(&mut self, flush: bool) -> Result<()> {
        let callbacks = self.pull_callbacks();
        self.connection
            .borrow_mut()
            .pull(PullParameters::new(self.fetch_size, self.qid()), callbacks)?;
        if flush {
            self.connection.borrow_mut().write_all(None)?;
        }
        Ok(())
    }

    fn discard(&mut self, flush: bool) -> Result<()> {
        let callbacks = self.discard_callbacks();
        self.connection
            .borrow_mut()
            .discard(DiscardParameters::new(-1, self.qid()), callbacks)?;
        if flush {
            self.connection.borrow_mut().write_all(None)?;
        }
        Ok(())
    }

    fn pull_callbacks(&self) -> ResponseCallbacks {
        let callbacks = self.discard_callbacks();
        let listener = Arc::downgrade(&self.listener);
        callbacks.with_on_record(move |data| {
            if let Some(listener) = listener.upgrade() {
                return listener.borrow_mut().record_cb(data);
            }
            Ok(())
        })
    }

    fn discard_callbacks(&self) -> ResponseCallbacks {
        let callbacks = self.failure_callbacks();
        let listener = Arc::downgrade(&self.listener);
        callbacks.with_on_success(move |meta| {
            if let Some(listener) = listener.upgrade() {
                return listener.borrow_mut().pull_success_cb(meta);
            }
            Ok(())
        })
    }

    fn failure_callbacks(&self) -> ResponseCallbacks {
        let mut callbacks = ResponseCallbacks::new();
        let listener = Arc::downgrade(&self.listener);
        callbacks = callbacks.with_on_failure(move |error| {
            if let Some(listener) = listener.upgrade() {
                return listener
                    .borrow_mut()
                    .failure_cb(Arc::downgrade(&listener), error);
            }
            Ok(())
        });
        let listener = Arc::downgrade(&self.listener);
        callbacks.with_on_ignored(move || {
            if let Some(listener) = listener.upgrade() {
                return listener.borrow_mut().ignored_cb();
            }
            Ok(())
        })
    }

    fn qid(&self) -> i64 {
        (*self.listener).borrow().qid.unwrap_or(-1)
    }

    fn failed_commit(&self, err: DriverError) -> DriverError {
        match self.auto_commit {
            true => err.failed_commit(),
            false => err,
        }
    }

    fn wrap_commit<T>(&self, res: Result<T>) -> Result<T> {
        match self.auto_commit {
            true => DriverError::wrap_commit(res),
            false => res,
        }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        fn need_to_pull(listener: &Arc<AtomicRefCell<RecordListener>>) -> bool {
            let listener = (**listener).borrow();
            listener.buffer.is_empty() && listener.state.is_streaming()
        }

        fn need_to_discard(listener: &Arc<AtomicRefCell<RecordListener>>) -> bool {
            let listener = (**listener).borrow();
            listener.buffer.is_empty() && listener.state.is_discarding()
        }

        if AtomicRefCell::borrow(&*self.listener).state.is_done() {
            return None;
        }

        loop {
            // drain responses off the wire, but stop above the high watermark
            while {
                let listener = (*self.listener).borrow();
                matches!(
                    listener.state,
                    RecordListenerState::Streaming | RecordListenerState::Discarding
                ) && listener.buffer.len() <= self.watermarks.high
            } && RefCell::borrow(&self.connection).expects_reply()
            {
                if let Err(err) = self.connection.borrow_mut().read_one(None) {
                    self.listener
                        .borrow_mut()
                        .set_error(self.failed_commit(err));
                }
            }
            let next_record = self.listener.borrow_mut().buffer.pop_front();
            if let Some(record) = next_record {
                // below the low watermark: request the next batch before
                // handing out the record, so the server fills the buffer
                // while the caller is processing
                let resume = {
                    let listener = (*self.listener).borrow();
                    listener.state.is_streaming()
                        && listener.buffer.len() <= self.watermarks.low
                        && !RefCell::borrow(&self.connection).expects_reply()
                };
                if resume {
                    if let Err(err) = self.pull(true) {
                        self.listener
                            .borrow_mut()
                            .set_error(self.failed_commit(err));
                    }
                }
                return Some(Ok(record));
            }
            if need_to_pull(&self.listener) {
                if !RefCell::borrow(&self.connection).expects_reply() {
                    if let Err(err) = self.pull(true) {
                        self.listener
                            .borrow_mut()
                            .set_error(self.failed_commit(err));
                    } else {
                        continue;
                    }
                } else {
                    continue;
                }
            } else if need_to_discard(&self.listener) {
                if !RefCell::borrow(&self.connection).expects_reply() {
                    if let Err(err) = self.discard(true) {
                        self.listener
                            .borrow_mut()
                            .set_error(self.failed_commit(err));
                    } else {
                        continue;
                    }
                } else {
                    continue;
                }
            }
            let mut listener = self.listener.borrow_mut();
            match listener.state {
                RecordListenerState::Error(_) => {
                    let mut state = RecordListenerState::Done;
                    mem::swap(&mut listener.state, &mut state);
                    match state {
                        RecordListenerState::Error(e) => return Some(Err(e)),
                        _ => panic!("checked state to be error above"),
                    }
                }
                RecordListenerState::ForeignError(_) => {
                    let mut state = RecordListenerState::Done;
                    mem::swap(&mut listener.state, &mut state);
                    match state {
                        RecordListenerState::ForeignError(e) => {
                            return Some(Err(DriverError::ServerError {
                                error: e.deref().clone(),
                            }))
                        }
                        _ => panic!("checked state to be foreign error above"),
                    }
                }
                RecordListenerState::Ignored => {
                    let mut state = RecordListenerState::Done;
                    mem::swap(&mut listener.state, &mut state);
                    return Some(Err(DriverError::protocol_error("record stream was ignored")));
                }
                RecordListenerState::Success => {
                    let mut state = RecordListenerState::Done;
                    mem::swap(&mut listener.state, &mut state);
                    return None;
                }
                RecordListenerState::Done => return None,
                _ => {}
            }
        }
    }
}

impl FusedIterator for RecordStream<'_> {}

#[derive(Debug)]
enum RecordListenerState {
    Streaming,
    Discarding,
    Error(DriverError),
    /// another result stream of the same transaction has failed
    ForeignError(Arc<ServerError>),
    Ignored,
    Success,
    Done,
}

impl RecordListenerState {
    #[allow(dead_code)] // cover all states
    #[duplicate_item(
        fn_name               variant;
        [ is_streaming ]      [ Streaming ];
        [ is_discarding ]     [ Discarding ];
        [ is_error ]          [ Error(_) ];
        [ is_foreign_error ]  [ ForeignError(_) ];
        [ is_ignored ]        [ Ignored ];
        [ is_success ]        [ Success ];
        [ is_done ]           [ Done ];
    )]
    pub fn fn_name(&self) -> bool {
        matches!(self, RecordListenerState::variant)
    }
}

struct RecordListener {
    buffer: VecDeque<Record>,
    keys: Option<Vec<Arc<String>>>,
    qid: Option<i64>,
    state: RecordListenerState,
    summary: Option<Summary>,
    bookmark: Option<String>,
    error_propagator: Option<SharedErrorPropagator>,
    watermarks: RecordWatermarks,
    cancelled: bool,
    cancel_hook: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Debug for RecordListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordListener")
            .field("buffer", &self.buffer)
            .field("keys", &self.keys)
            .field("qid", &self.qid)
            .field("state", &self.state)
            .field("summary", &self.summary)
            .field("bookmark", &self.bookmark)
            .field("error_propagator", &self.error_propagator)
            .field("watermarks", &self.watermarks)
            .field("cancelled", &self.cancelled)
            .field("cancel_hook", &self.cancel_hook.as_ref().map(|_| "..."))
            .finish()
    }
}

impl RecordListener {
    fn new(
        connection: &PooledBolt,
        watermarks: RecordWatermarks,
        error_propagator: Option<SharedErrorPropagator>,
    ) -> Self {
        let summary = Summary::new(
            connection.address(),
            connection.server_agent(),
            connection.protocol_version(),
        );
        Self {
            buffer: VecDeque::new(),
            keys: None,
            qid: None,
            state: RecordListenerState::Streaming,
            summary: Some(summary),
            bookmark: None,
            error_propagator,
            watermarks,
            cancelled: false,
            cancel_hook: None,
        }
    }

    fn run_success_cb(&mut self, mut meta: BoltMeta) -> Result<()> {
        if self.keys.is_some() {
            return Ok(());
        }
        if let Some(qid) = meta.remove("qid") {
            let ValueReceive::Integer(qid) = qid else {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'qid' was not an integer",
                ));
            };
            self.qid = Some(qid);
        }
        let Some(fields) = meta.remove("fields") else {
            return Err(DriverError::protocol_error(
                "SUCCESS after RUN did not contain 'fields'",
            ));
        };
        let ValueReceive::List(fields) = fields else {
            return Err(DriverError::protocol_error(
                "SUCCESS after RUN 'fields' was not a list",
            ));
        };
        let fields = fields
            .into_iter()
            .map(|field| match field {
                ValueReceive::String(field) => Ok(Arc::new(field)),
                _ => Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'fields' was not a list of strings",
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        self.keys = Some(fields);
        if let Some(summary) = self.summary.as_mut() {
            summary.load_run_meta(&mut meta)?
        }

        Ok(())
    }

    fn failure_cb(&mut self, me: Weak<AtomicRefCell<Self>>, error: DriverError) -> Result<()> {
        if let DriverError::ServerError { error } = &error {
            if let Some(error_propagator) = &self.error_propagator {
                error_propagator.borrow_mut().propagate_error(
                    Some(me),
                    error,
                    "failure in a query of this transaction caused the transaction to be closed",
                );
            }
        }
        self.state = RecordListenerState::Error(error);
        self.summary = None;
        Ok(())
    }

    fn ignored_cb(&mut self) -> Result<()> {
        if !self.state.is_foreign_error() {
            self.state = RecordListenerState::Ignored;
        }
        self.summary = None;
        Ok(())
    }

    fn record_cb(&mut self, fields: BoltRecordFields) -> Result<()> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| DriverError::protocol_error("RECORD received before RUN SUCCESS"))?;
        if keys.len() != fields.len() {
            return Err(DriverError::protocol_error(format!(
                "RECORD contained {} entries but {} keys were announced",
                fields.len(),
                keys.len()
            )));
        }
        self.buffer.push_back(Record::new(keys, fields));
        Ok(())
    }

    fn pull_success_cb(&mut self, mut meta: BoltMeta) -> Result<()> {
        let Some(ValueReceive::Boolean(true)) = meta.remove("has_more") else {
            self.state = RecordListenerState::Success;
            if let Some(ValueReceive::String(bms)) = meta.remove("bookmark") {
                self.bookmark = Some(bms);
            };
            if let Some(summary) = self.summary.as_mut() {
                summary.load_pull_meta(&mut meta)?
            }
            return Ok(());
        };
        Ok(())
    }

    fn set_error(&mut self, error: DriverError) {
        self.state = RecordListenerState::Error(error);
        self.summary = None
    }

    fn set_foreign_error(&mut self, error: Arc<ServerError>) {
        self.state = RecordListenerState::ForeignError(error);
        self.summary = None
    }

    /// Stop expecting further records. Records already buffered stay
    /// available; the terminal state becomes a clean completion without
    /// failure. Idempotent; the cancel hook fires at most once.
    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(hook) = self.cancel_hook.take() {
            hook();
        }
        if matches!(
            self.state,
            RecordListenerState::Streaming | RecordListenerState::Discarding
        ) {
            self.state = RecordListenerState::Done;
        }
        self.summary = None;
    }

    #[cfg(test)]
    fn with_cancel_hook(mut self, hook: Box<dyn FnOnce() + Send + Sync>) -> Self {
        self.cancel_hook = Some(hook);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct ErrorPropagator {
    listeners: Vec<Weak<AtomicRefCell<RecordListener>>>,
    error: Option<Arc<ServerError>>,
}

pub(crate) type SharedErrorPropagator = Arc<AtomicRefCell<ErrorPropagator>>;

impl ErrorPropagator {
    fn add_listener(&mut self, listener: Weak<AtomicRefCell<RecordListener>>) {
        if let Some(error) = &self.error {
            if let Some(listener) = listener.upgrade() {
                listener.borrow_mut().set_foreign_error(Arc::clone(error));
            } else {
                // no need to add a dead listener anyway
                return;
            }
        }
        self.listeners.push(listener);
    }

    fn propagate_error(
        &mut self,
        source: Option<Weak<AtomicRefCell<RecordListener>>>,
        error: &ServerError,
        reason: &str,
    ) {
        let error = Arc::new(error.clone_with_reason(reason));
        for listener in self.listeners.iter() {
            if let Some(source) = source.as_ref() {
                if source.ptr_eq(listener) {
                    continue;
                }
            }
            if let Some(listener) = listener.upgrade() {
                listener.borrow_mut().set_foreign_error(Arc::clone(&error));
            }
        }
        self.error = Some(error);
    }

    /// Cancel every result stream still alive, e.g., because the owning
    /// session or transaction is being closed while results are pending.
    pub(crate) fn cancel_listeners(&mut self) {
        for listener in self.listeners.iter() {
            if let Some(listener) = listener.upgrade() {
                listener.borrow_mut().cancel();
            }
        }
    }

    pub(crate) fn error(&self) -> &Option<Arc<ServerError>> {
        &self.error
    }

    pub(crate) fn make_on_error_cb(
        this: SharedErrorPropagator,
    ) -> impl FnMut(DriverError) -> Result<()> + 'static {
        move |err| {
            if let DriverError::ServerError { error } = &err {
                this.borrow_mut().propagate_error(
                    None,
                    error,
                    "the transaction could not be started",
                );
            }
            Ok(())
        }
    }
}

#[derive(Debug, Error)]
pub enum GetSingleRecordError {
    #[error("no records were found")]
    NoRecords,
    #[error("more than one record was found")]
    TooManyRecords,
}

impl From<GetSingleRecordError> for DriverError {
    fn from(err: GetSingleRecordError) -> Self {
        Self::InvalidConfig {
            message: format!("GetSingleRecordError: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;
    use crate::address_::Address;

    #[rstest]
    #[case(1000, 300, 700)]
    #[case(10, 3, 7)]
    #[case(1, 0, 0)]
    fn test_watermark_computation(#[case] fetch_size: i64, #[case] low: usize, #[case] high: usize) {
        assert_eq!(
            compute_watermarks(fetch_size),
            RecordWatermarks { low, high }
        );
    }

    #[test]
    fn test_fetch_all_collapses_watermarks() {
        assert_eq!(
            compute_watermarks(FETCH_ALL),
            RecordWatermarks {
                low: usize::MAX,
                high: usize::MAX,
            }
        );
    }

    fn new_listener(propagator: Option<SharedErrorPropagator>) -> RecordListener {
        RecordListener {
            buffer: VecDeque::new(),
            keys: Some(vec![Arc::new(String::from("n"))]),
            qid: None,
            state: RecordListenerState::Streaming,
            summary: Some(Summary::new(
                Arc::new(Address::from(("localhost", 7687))),
                Arc::new(String::from("TestServer/5.0")),
                (5, 0),
            )),
            bookmark: None,
            error_propagator: propagator,
            watermarks: compute_watermarks(1000),
            cancelled: false,
            cancel_hook: None,
        }
    }

    #[test]
    fn test_cancel_hook_is_invoked_exactly_once() {
        let cancel_count = Arc::new(AtomicUsize::new(0));
        let mut listener = new_listener(None).with_cancel_hook({
            let cancel_count = Arc::clone(&cancel_count);
            Box::new(move || {
                cancel_count.fetch_add(1, Ordering::SeqCst);
            })
        });

        listener.cancel();
        listener.cancel();
        listener.cancel();

        assert_eq!(cancel_count.load(Ordering::SeqCst), 1);
        assert!(listener.state.is_done());
    }

    #[test]
    fn test_close_with_two_pending_results_cancels_both() {
        let propagator: SharedErrorPropagator = Default::default();
        let cancel_count = Arc::new(AtomicUsize::new(0));
        let listeners = (0..2)
            .map(|_| {
                let listener = new_listener(Some(Arc::clone(&propagator))).with_cancel_hook({
                    let cancel_count = Arc::clone(&cancel_count);
                    Box::new(move || {
                        cancel_count.fetch_add(1, Ordering::SeqCst);
                    })
                });
                let listener = Arc::new(AtomicRefCell::new(listener));
                propagator
                    .borrow_mut()
                    .add_listener(Arc::downgrade(&listener));
                listener
            })
            .collect::<Vec<_>>();

        propagator.borrow_mut().cancel_listeners();
        // closing again must not re-invoke any hooks
        propagator.borrow_mut().cancel_listeners();

        assert_eq!(cancel_count.load(Ordering::SeqCst), 2);
        for listener in &listeners {
            assert!(AtomicRefCell::borrow(listener).state.is_done());
        }
    }

    #[test]
    fn test_cancelled_stream_completes_cleanly_with_partial_data() {
        let mut listener = new_listener(None);
        listener
            .record_cb(vec![ValueReceive::Integer(1)])
            .unwrap();
        listener.cancel();

        // buffered records stay available, no failure is reported
        assert_eq!(listener.buffer.len(), 1);
        assert!(listener.state.is_done());
    }

    #[test]
    fn test_error_propagates_to_sibling_listeners_but_not_source() {
        let propagator: SharedErrorPropagator = Default::default();
        let listener_a = Arc::new(AtomicRefCell::new(new_listener(Some(Arc::clone(
            &propagator,
        )))));
        let listener_b = Arc::new(AtomicRefCell::new(new_listener(Some(Arc::clone(
            &propagator,
        )))));
        propagator
            .borrow_mut()
            .add_listener(Arc::downgrade(&listener_a));
        propagator
            .borrow_mut()
            .add_listener(Arc::downgrade(&listener_b));

        listener_a
            .borrow_mut()
            .failure_cb(
                Arc::downgrade(&listener_a),
                DriverError::ServerError {
                    error: ServerError::new(
                        "Neo.ClientError.Statement.SyntaxError".into(),
                        "nope".into(),
                    ),
                },
            )
            .unwrap();

        assert!(AtomicRefCell::borrow(&listener_a).state.is_error());
        assert!(AtomicRefCell::borrow(&listener_b).state.is_foreign_error());
        assert!(AtomicRefCell::borrow(&propagator).error().is_some());
    }

    #[test]
    fn test_late_listener_receives_propagated_error() {
        let propagator: SharedErrorPropagator = Default::default();
        let listener_a = Arc::new(AtomicRefCell::new(new_listener(Some(Arc::clone(
            &propagator,
        )))));
        propagator
            .borrow_mut()
            .add_listener(Arc::downgrade(&listener_a));
        listener_a
            .borrow_mut()
            .failure_cb(
                Arc::downgrade(&listener_a),
                DriverError::ServerError {
                    error: ServerError::new(
                        "Neo.ClientError.Statement.SyntaxError".into(),
                        "nope".into(),
                    ),
                },
            )
            .unwrap();

        let late = Arc::new(AtomicRefCell::new(new_listener(Some(Arc::clone(
            &propagator,
        )))));
        propagator.borrow_mut().add_listener(Arc::downgrade(&late));

        assert!(AtomicRefCell::borrow(&late).state.is_foreign_error());
    }
}
