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

use core::fmt::{Debug, Formatter};
use std::collections::HashMap;

use crate::error_::{DriverError, Result};
use crate::value::ValueReceive;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ResponseMessage {
    Hello,
    Reset,
    Run,
    Discard,
    Pull,
    Begin,
    Commit,
    Rollback,
    Route,
}

/// One queued observer: the callbacks that will consume exactly one pending
/// request's response lifecycle. An observer receives any number of `RECORD`s
/// followed by exactly one terminal callback (`SUCCESS`, `FAILURE`, or
/// `IGNORED` replaying a previous failure), never more.
#[derive(Debug)]
pub(crate) struct BoltResponse {
    pub(crate) message: ResponseMessage,
    pub(crate) callbacks: ResponseCallbacks,
}

impl BoltResponse {
    pub(crate) fn new(message: ResponseMessage, callbacks: ResponseCallbacks) -> Self {
        Self { message, callbacks }
    }

    pub(crate) fn from_message(message: ResponseMessage) -> Self {
        Self::new(message, ResponseCallbacks::new())
    }
}

type OptBox<T> = Option<Box<T>>;
pub(crate) type BoltMeta = HashMap<String, ValueReceive>;
pub(crate) type BoltRecordFields = Vec<ValueReceive>;

pub(crate) struct ResponseCallbacks {
    on_success_pre_hook: OptBox<dyn FnMut(&mut BoltMeta) -> Result<()>>,
    on_success_cb: OptBox<dyn FnMut(BoltMeta) -> Result<()>>,
    on_failure_cb: OptBox<dyn FnMut(DriverError) -> Result<()>>,
    on_ignored_cb: OptBox<dyn FnMut() -> Result<()>>,
    on_record_cb: OptBox<dyn FnMut(BoltRecordFields) -> Result<()>>,
    on_summary_cb: OptBox<dyn FnMut()>,
}

impl ResponseCallbacks {
    pub(crate) fn new() -> Self {
        Self {
            on_success_pre_hook: None,
            on_success_cb: None,
            on_failure_cb: None,
            on_ignored_cb: None,
            on_record_cb: None,
            on_summary_cb: None,
        }
    }

    pub(crate) fn with_on_success<F: FnMut(BoltMeta) -> Result<()> + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.on_success_cb = Some(Box::new(cb));
        self
    }

    pub(crate) fn with_on_success_pre_hook<F: FnMut(&mut BoltMeta) -> Result<()> + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.on_success_pre_hook = Some(Box::new(cb));
        self
    }

    pub(crate) fn with_on_failure<F: FnMut(DriverError) -> Result<()> + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.on_failure_cb = Some(Box::new(cb));
        self
    }

    pub(crate) fn with_on_ignored<F: FnMut() -> Result<()> + 'static>(mut self, cb: F) -> Self {
        self.on_ignored_cb = Some(Box::new(cb));
        self
    }

    pub(crate) fn with_on_record<F: FnMut(BoltRecordFields) -> Result<()> + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.on_record_cb = Some(Box::new(cb));
        self
    }

    pub(crate) fn with_on_summary<F: FnMut() + 'static>(mut self, cb: F) -> Self {
        self.on_summary_cb = Some(Box::new(cb));
        self
    }

    pub(crate) fn on_success(&mut self, meta: ValueReceive) -> Result<()> {
        let is_summary = is_summary_meta(&meta);
        let res = match meta {
            ValueReceive::Map(mut meta) => {
                let hook_res = match self.on_success_pre_hook.as_mut() {
                    None => Ok(()),
                    Some(hook) => hook(&mut meta),
                };
                hook_res.and_then(|_| match self.on_success_cb.as_mut() {
                    None => Ok(()),
                    Some(cb) => cb(meta),
                })
            }
            _ => Err(DriverError::protocol_error(
                "SUCCESS meta was not a Dictionary",
            )),
        };
        if is_summary {
            self.on_summary();
        }
        res
    }

    /// Deliver the terminal failure. An observer without an `on_failure`
    /// callback has nobody to report to, so the error surfaces as `Err` to
    /// whoever drives the read loop instead.
    pub(crate) fn on_failure(&mut self, error: DriverError) -> Result<()> {
        let res = match self.on_failure_cb.as_mut() {
            None => Err(error),
            Some(cb) => cb(error),
        };
        self.on_summary();
        res
    }

    pub(crate) fn on_ignored(&mut self) -> Result<()> {
        let res = self.on_ignored_cb.as_mut().map(|cb| cb()).unwrap_or(Ok(()));
        self.on_summary();
        res
    }

    pub(crate) fn on_record(&mut self, data: ValueReceive) -> Result<()> {
        match data {
            ValueReceive::List(values) => match self.on_record_cb.as_mut() {
                None => Ok(()),
                Some(cb) => cb(values),
            },
            _ => Err(DriverError::protocol_error("RECORD data was not a List")),
        }
    }

    fn on_summary(&mut self) {
        if let Some(cb) = self.on_summary_cb.as_mut() {
            cb()
        }
    }
}

/// `SUCCESS {has_more: true}` answers a `PULL`/`DISCARD` that did not exhaust
/// the stream. It is the only non-terminal `SUCCESS`.
fn is_summary_meta(meta: &ValueReceive) -> bool {
    match &meta {
        ValueReceive::Map(m) => match m.get("has_more") {
            Some(ValueReceive::Boolean(b)) => !*b,
            _ => true,
        },
        _ => true,
    }
}

impl Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResponseCallbacks")
            .field(
                "on_success_pre_hook",
                &self.on_success_pre_hook.as_ref().map(|_| "..."),
            )
            .field("on_success", &self.on_success_cb.as_ref().map(|_| "..."))
            .field("on_failure", &self.on_failure_cb.as_ref().map(|_| "..."))
            .field("on_ignored", &self.on_ignored_cb.as_ref().map(|_| "..."))
            .field("on_record", &self.on_record_cb.as_ref().map(|_| "..."))
            .field("on_summary", &self.on_summary_cb.as_ref().map(|_| "..."))
            .finish()
    }
}
