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

#[macro_use]
mod bolt_common;
mod bolt4x4;
mod bolt5x0;
mod bolt_state;
mod chunk;
mod handshake;
mod message;
pub(crate) mod message_parameters;
mod packstream;
mod response;
mod socket;

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::ops::Deref;
use std::result;
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;
use enum_dispatch::enum_dispatch;
use log::warn;
use usize_cast::FromUsize;

use super::deadline::DeadlineIO;
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::error_::{DriverError, Result, ServerError};
use crate::time::Instant;
use crate::value::{ValueReceive, ValueSend};
use bolt4x4::{Bolt4x4, Bolt4x4StructTranslator};
use bolt5x0::{Bolt5x0, Bolt5x0StructTranslator};
use bolt_state::{BoltState, BoltStateTracker};
use chunk::{Chunker, Dechunker};
pub(crate) use handshake::{open, TcpConnector};
use message::BoltMessage;
use message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ResetParameters, RollbackParameters, RouteParameters, RunParameters,
};
use packstream::PackStreamSerializer;
pub(crate) use response::{
    BoltMeta, BoltRecordFields, BoltResponse, ResponseCallbacks, ResponseMessage,
};
pub(crate) use socket::{BufTcpStream, Socket};

macro_rules! debug_buf_start {
    ($name:ident) => {
        let mut $name = None;
        {
            #![allow(unused_imports)]
            use log::{log_enabled, Level};

            if log_enabled!(Level::Debug) {
                $name = Some(String::new());
            }
        }
    };
}
pub(crate) use debug_buf_start;

macro_rules! debug_buf {
    ($name:ident, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::{log_enabled, Level};

        if log_enabled!(Level::Debug) {
            $name.as_mut().unwrap().push_str(&format!($($args)*))
        };
    }}
}
pub(crate) use debug_buf;

macro_rules! bolt_debug_extra {
    ($meta:expr, $local_port:expr) => {
        'a: {
            {
                #![allow(unused_imports)]
                use crate::driver::io::bolt::dbg_extra;

                use crate::value::ValueReceive;

                let meta = $meta;
                let Ok(meta) = meta else {
                    break 'a dbg_extra($local_port, Some("!!!!"));
                };
                let Some(ValueReceive::String(id)) = meta.get("connection_id") else {
                    break 'a dbg_extra($local_port, None);
                };
                dbg_extra($local_port, Some(id))
            }
        }
    };
}
pub(crate) use bolt_debug_extra;

macro_rules! debug_buf_end {
    ($bolt:expr, $name:ident) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::bolt_debug_extra;

        debug!(
            "{}{}",
            bolt_debug_extra!($bolt.meta.try_borrow(), $bolt.local_port),
            $name.as_ref().map(|s| s.as_str()).unwrap_or("")
        );
    }};
}
pub(crate) use debug_buf_end;

macro_rules! bolt_debug {
    ($bolt:expr, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::bolt_debug_extra;

        debug!(
            "{}{}",
            bolt_debug_extra!($bolt.meta.try_borrow(), $bolt.local_port),
            format!($($args)*)
        );
    }};
}
pub(crate) use bolt_debug;

macro_rules! socket_debug {
    ($local_port:expr, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::dbg_extra;

        debug!(
            "{}{}",
            dbg_extra(Some($local_port), None),
            format!($($args)*)
        );
    }};
}
pub(crate) use socket_debug;

pub(crate) fn dbg_extra(port: Option<u16>, bolt_id: Option<&str>) -> String {
    format!(
        "[#{:04X} {:<10}] ",
        port.unwrap_or(0),
        bolt_id.unwrap_or("")
    )
}

pub(crate) type TcpRW = Socket<BufTcpStream>;
pub(crate) type TcpBolt = Bolt<TcpRW>;

pub(crate) type OnServerErrorCb<'a, 'b, RW> =
    Option<&'a mut (dyn FnMut(&mut BoltData<RW>, &mut ServerError) -> Result<()> + 'b)>;

/// One physical connection: a framed channel plus the protocol handler
/// negotiated for it.
///
/// Requests are dispatched to their response observers strictly in FIFO
/// order; the observer queue is what allows several in-flight requests on one
/// connection without interleaving their responses.
#[derive(Debug)]
pub(crate) struct Bolt<RW: Read + Write> {
    data: BoltData<RW>,
    protocol: BoltProtocol,
}

impl<RW: Read + Write> Bolt<RW> {
    fn new(
        version: (u8, u8),
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let protocol = match version {
            (5, 0) => Bolt5x0::<Bolt5x0StructTranslator>::default().into(),
            (4, 4) => Bolt4x4::<Bolt4x4StructTranslator>::default().into(),
            _ => panic!("implement protocol for version {version:?}"),
        };
        let data = BoltData::new(version, stream, socket, local_port, address);
        Self { data, protocol }
    }

    pub(crate) fn close(&mut self) {
        if self.data.closed() {
            return;
        }
        self.data.connection_state = ConnectionState::Closed;
        self.data.message_buff.clear();
        self.data.responses.clear();
        if self.goodbye().is_err() {
            return;
        }
        let _ = self
            .data
            .write_all(Some(Instant::now() + Duration::from_millis(100)));
        let _ = self.data.flush(Some(Instant::now() + Duration::from_millis(100)));
    }

    pub(crate) fn closed(&self) -> bool {
        self.data.closed()
    }

    pub(crate) fn unexpectedly_closed(&self) -> bool {
        self.data.unexpectedly_closed()
    }

    pub(crate) fn protocol_version(&self) -> (u8, u8) {
        self.data.version
    }

    pub(crate) fn address(&self) -> Arc<Address> {
        Arc::clone(&self.data.address)
    }

    pub(crate) fn server_agent(&self) -> Arc<String> {
        Arc::clone(self.data.server_agent.deref().borrow().deref())
    }

    pub(crate) fn auth(&self) -> Option<&Arc<AuthToken>> {
        self.data.auth.as_ref()
    }

    pub(crate) fn hello(&mut self, parameters: HelloParameters) -> Result<()> {
        self.data.reject_if_broken(None)?;
        self.protocol.hello(&mut self.data, parameters)
    }

    pub(crate) fn goodbye(&mut self) -> Result<()> {
        self.protocol
            .goodbye(&mut self.data, GoodbyeParameters::new())
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.data.reject_if_broken(None)?;
        self.protocol.reset(&mut self.data, ResetParameters::new())
    }

    /// Issue a RESET and only succeed on a clean SUCCESS response.
    /// Any RECORD or FAILURE answering the RESET marks the connection broken.
    pub(crate) fn reset_and_flush(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.reset()?;
        self.write_all(deadline)?;
        self.read_all(deadline, None)
    }

    pub(crate) fn run<KP: Borrow<str> + Debug, KM: Borrow<str> + Debug>(
        &mut self,
        parameters: RunParameters<KP, KM>,
        mut callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol.run(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn discard(
        &mut self,
        parameters: DiscardParameters,
        mut callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol.discard(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn pull(
        &mut self,
        parameters: PullParameters,
        mut callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol.pull(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn begin<K: Borrow<str> + Debug>(
        &mut self,
        parameters: BeginParameters<K>,
        mut callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol.begin(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn commit(&mut self, mut callbacks: ResponseCallbacks) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol
            .commit(&mut self.data, CommitParameters::new(), callbacks)
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.data.reject_if_broken(None)?;
        self.protocol
            .rollback(&mut self.data, RollbackParameters::new())
    }

    pub(crate) fn route(
        &mut self,
        parameters: RouteParameters,
        mut callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.data.reject_if_broken(Some(&mut callbacks))?;
        self.protocol.route(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn read_all(
        &mut self,
        deadline: Option<Instant>,
        mut on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()> {
        let on_server_error_ref = &mut on_server_error;
        while self.expects_reply() {
            self.read_one(deadline, on_server_error_ref.as_deref_mut())?;
        }
        Ok(())
    }

    pub(crate) fn read_one(
        &mut self,
        deadline: Option<Instant>,
        on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()> {
        let mut reader = DeadlineIO::new(
            &mut self.data.stream,
            deadline,
            self.data.socket.deref().as_ref(),
        );
        let mut dechunker = Dechunker::new(&mut reader);
        let message_result: Result<BoltMessage> =
            BoltMessage::load(&mut dechunker, |r| self.protocol.load_value(r));
        drop(dechunker);
        let message_result = reader.rewrite_error(message_result);
        let message = match message_result {
            Ok(message) => message,
            Err(err) => return Err(self.data.handle_fatal_error(err)),
        };
        self.data.idle_since = Instant::now();
        self.protocol
            .handle_response(&mut self.data, message, on_server_error)
    }

    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.data.idle_since = Instant::now();
        self.data.write_all(deadline)?;
        self.data.flush(deadline)
    }

    pub(crate) fn expects_reply(&self) -> bool {
        self.data.expects_reply()
    }

    pub(crate) fn expected_reply_len(&self) -> usize {
        self.data.expected_reply_len()
    }

    pub(crate) fn needs_reset(&self) -> bool {
        self.data.needs_reset()
    }

    pub(crate) fn is_older_than(&self, duration: Duration) -> bool {
        self.data.is_older_than(duration)
    }

    pub(crate) fn is_idle_for(&self, timeout: Duration) -> bool {
        self.data.is_idle_for(timeout)
    }

    #[inline(always)]
    pub(crate) fn debug_log(&self, msg: impl FnOnce() -> String) {
        bolt_debug!(self.data, "{}", msg());
    }
}

impl<RW: Read + Write> Drop for Bolt<RW> {
    fn drop(&mut self) {
        self.close();
    }
}

#[enum_dispatch]
pub(crate) trait BoltProtocolHandler {
    fn hello<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: HelloParameters,
    ) -> Result<()>;
    fn goodbye<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: GoodbyeParameters,
    ) -> Result<()>;
    fn reset<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: ResetParameters,
    ) -> Result<()>;
    fn run<RW: Read + Write, KP: Borrow<str> + Debug, KM: Borrow<str> + Debug>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: RunParameters<KP, KM>,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn discard<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn pull<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn begin<RW: Read + Write, K: Borrow<str> + Debug>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: BeginParameters<K>,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn commit<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: CommitParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn rollback<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: RollbackParameters,
    ) -> Result<()>;
    fn route<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn load_value<R: Read>(&mut self, reader: &mut R) -> Result<ValueReceive>;
    fn handle_response<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        message: BoltMessage,
        on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()>;
}

#[enum_dispatch(BoltProtocolHandler)]
#[derive(Debug)]
enum BoltProtocol {
    V4x4(Bolt4x4<Bolt4x4StructTranslator>),
    V5x0(Bolt5x0<Bolt5x0StructTranslator>),
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
enum ConnectionState {
    Healthy,
    Broken,
    Closed,
}

pub(crate) struct BoltData<RW: Read + Write> {
    message_buff: VecDeque<Vec<Vec<u8>>>,
    responses: VecDeque<BoltResponse>,
    stream: RW,
    socket: Arc<Option<TcpStream>>,
    local_port: Option<u16>,
    version: (u8, u8),
    connection_state: ConnectionState,
    bolt_state: BoltStateTracker,
    meta: Arc<AtomicRefCell<HashMap<String, ValueReceive>>>,
    server_agent: Arc<AtomicRefCell<Arc<String>>>,
    address: Arc<Address>,
    last_qid: Arc<AtomicRefCell<Option<i64>>>,
    auth: Option<Arc<AuthToken>>,
    /// Last FAILURE the server sent on this connection. Requests answered
    /// with IGNORED afterwards failed because of this very failure, so it is
    /// replayed to their observers. Cleared by a successful RESET.
    last_server_failure: Option<ServerError>,
    /// Once set, the connection is broken and this error is handed to every
    /// observer still queued and every observer enqueued afterwards.
    fatal_error: Option<DriverError>,
    created_at: Instant,
    idle_since: Instant,
}

impl<RW: Read + Write> BoltData<RW> {
    fn new(
        version: (u8, u8),
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let now = Instant::now();
        Self {
            message_buff: VecDeque::with_capacity(2048),
            responses: VecDeque::with_capacity(10),
            stream,
            socket,
            local_port,
            version,
            connection_state: ConnectionState::Healthy,
            bolt_state: BoltStateTracker::new(),
            meta: Default::default(),
            server_agent: Default::default(),
            address,
            last_qid: Default::default(),
            auth: None,
            last_server_failure: None,
            fatal_error: None,
            created_at: now,
            idle_since: now,
        }
    }

    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.address
    }

    fn closed(&self) -> bool {
        !matches!(self.connection_state, ConnectionState::Healthy)
    }

    fn unexpectedly_closed(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Broken)
            && !matches!(self.bolt_state.state(), BoltState::Failed)
    }

    fn can_omit_qid(&self, qid: i64) -> bool {
        qid == -1 || Some(qid) == *(self.last_qid.deref().borrow())
    }

    /// A broken connection serves nothing but its stored fatal error:
    /// the observer (if any) is notified and the call fails.
    fn reject_if_broken(&mut self, callbacks: Option<&mut ResponseCallbacks>) -> Result<()> {
        let Some(fatal_error) = &self.fatal_error else {
            return Ok(());
        };
        let error = fatal_error.replay();
        if let Some(callbacks) = callbacks {
            if let Err(cb_err) = callbacks.on_failure(error.replay()) {
                warn!("ignored callback error while rejecting request: {cb_err}");
            }
        }
        Err(error)
    }

    /// Transition to `Broken`, remember the error, and deliver it to every
    /// queued observer. Calling this again on an already broken connection
    /// does not re-notify anyone.
    fn handle_fatal_error(&mut self, error: DriverError) -> DriverError {
        if self.connection_state == ConnectionState::Broken {
            return error;
        }
        bolt_debug!(self, "fatal error: {}", &error);
        self.connection_state = ConnectionState::Broken;
        self.socket
            .deref()
            .as_ref()
            .map(|s| s.shutdown(Shutdown::Both));
        self.fatal_error = Some(error.replay());
        self.message_buff.clear();
        let mut responses = mem::take(&mut self.responses);
        for response in responses.iter_mut() {
            if let Err(cb_err) = response.callbacks.on_failure(error.replay()) {
                warn!("ignored callback error while failing pending observers: {cb_err}");
            }
        }
        error
    }

    fn serialize_dict<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        translator: &impl BoltStructTranslator,
        map: &HashMap<impl Borrow<str>, ValueSend>,
    ) -> result::Result<(), S::Error> {
        serializer.write_dict_header(u64::from_usize(map.len()))?;
        for (k, v) in map {
            serializer.write_string(k.borrow())?;
            self.serialize_value(serializer, translator, v)?;
        }
        Ok(())
    }

    fn serialize_str_slice<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        slice: &[impl Borrow<str>],
    ) -> result::Result<(), S::Error> {
        serializer.write_list_header(u64::from_usize(slice.len()))?;
        for v in slice {
            serializer.write_string(v.borrow())?;
        }
        Ok(())
    }

    #[inline]
    fn serialize_str_iter<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        iter: impl Iterator<Item = impl Borrow<str>>,
    ) -> result::Result<(), S::Error> {
        self.serialize_str_slice(serializer, &iter.collect::<Vec<_>>())
    }

    #[inline]
    fn serialize_value<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        translator: &impl BoltStructTranslator,
        v: &ValueSend,
    ) -> result::Result<(), S::Error> {
        translator.serialize(serializer, v)
    }

    fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        while self.has_buffered_message() {
            self.write_one(deadline)?
        }
        Ok(())
    }

    fn write_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        if let Some(message_buff) = self.message_buff.pop_front() {
            let chunker = Chunker::new(&message_buff);
            let mut writer =
                DeadlineIO::new(&mut self.stream, deadline, self.socket.deref().as_ref());
            for chunk in chunker {
                let res = DriverError::wrap_write(writer.write_all(&chunk));
                let res = writer.rewrite_error(res);
                if let Err(err) = res {
                    return Err(self.handle_fatal_error(err));
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self, deadline: Option<Instant>) -> Result<()> {
        let mut writer = DeadlineIO::new(&mut self.stream, deadline, self.socket.deref().as_ref());
        let res = DriverError::wrap_write(writer.flush());
        let res = writer.rewrite_error(res);
        if let Err(err) = res {
            return Err(self.handle_fatal_error(err));
        }
        Ok(())
    }

    fn has_buffered_message(&self) -> bool {
        !self.message_buff.is_empty()
    }

    fn expects_reply(&self) -> bool {
        !self.responses.is_empty()
    }

    fn expected_reply_len(&self) -> usize {
        self.responses.len()
    }

    fn needs_reset(&self) -> bool {
        if let Some(response) = self.responses.iter().last() {
            if response.message == ResponseMessage::Reset {
                return false;
            }
        }
        if self.connection_state != ConnectionState::Healthy {
            return false;
        }
        !(self.bolt_state.state() == BoltState::Ready && self.responses.is_empty())
    }

    fn is_older_than(&self, duration: Duration) -> bool {
        self.created_at.elapsed() >= duration
    }

    fn is_idle_for(&self, timeout: Duration) -> bool {
        self.idle_since.elapsed() >= timeout
    }
}

impl<RW: Read + Write> Debug for BoltData<RW> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltData")
            .field("message_buff", &self.message_buff)
            .field("responses", &self.responses)
            .field("connection_state", &self.connection_state)
            .finish()
    }
}

pub(crate) trait BoltStructTranslator: Debug + Default {
    fn serialize<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        value: &ValueSend,
    ) -> result::Result<(), S::Error>;

    fn deserialize_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive;
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{self, Cursor};
    use std::rc::Rc;

    use super::packstream::PackStreamSerializerImpl;
    use super::*;

    /// Feeds scripted server responses and records everything the driver
    /// writes. Reading past the script produces `UnexpectedEof`.
    #[derive(Debug)]
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
        fail_writes: bool,
    }

    impl ScriptedStream {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                written: Vec::new(),
                fail_writes: false,
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.read(buf) {
                Ok(0) if !buf.is_empty() => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "scripted input exhausted",
                )),
                res => res,
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn new_bolt(input: Vec<u8>) -> Bolt<ScriptedStream> {
        let _ = env_logger::builder().is_test(true).try_init();
        Bolt::new(
            (5, 0),
            ScriptedStream::new(input),
            Arc::new(None),
            None,
            Arc::new(Address::from(("localhost", 7687))),
        )
    }

    fn chunked(message: Vec<u8>) -> Vec<u8> {
        let mut wire = Vec::with_capacity(message.len() + 4);
        wire.extend(u16::to_be_bytes(message.len() as u16));
        wire.extend(message);
        wire.extend([0x00, 0x00]);
        wire
    }

    fn success_message() -> Vec<u8> {
        chunked(vec![0xB1, 0x70, 0xA0])
    }

    fn success_has_more_message() -> Vec<u8> {
        let mut message = vec![0xB1, 0x70];
        let mut serializer = PackStreamSerializerImpl::new(&mut message);
        serializer.write_dict_header(1).unwrap();
        serializer.write_string("has_more").unwrap();
        serializer.write_bool(true).unwrap();
        chunked(message)
    }

    fn record_message() -> Vec<u8> {
        // RECORD [1]
        chunked(vec![0xB1, 0x71, 0x91, 0x01])
    }

    fn failure_message(code: &str, error_message: &str) -> Vec<u8> {
        let mut message = vec![0xB1, 0x7F];
        let mut serializer = PackStreamSerializerImpl::new(&mut message);
        serializer.write_dict_header(2).unwrap();
        serializer.write_string("code").unwrap();
        serializer.write_string(code).unwrap();
        serializer.write_string("message").unwrap();
        serializer.write_string(error_message).unwrap();
        chunked(message)
    }

    fn ignored_message() -> Vec<u8> {
        chunked(vec![0xB0, 0x7E])
    }

    type EventLog = Rc<RefCell<Vec<(usize, String)>>>;

    fn recording_callbacks(events: &EventLog, observer: usize) -> ResponseCallbacks {
        let on_success_events = Rc::clone(events);
        let on_failure_events = Rc::clone(events);
        let on_ignored_events = Rc::clone(events);
        let on_record_events = Rc::clone(events);
        ResponseCallbacks::new()
            .with_on_success(move |_| {
                on_success_events
                    .borrow_mut()
                    .push((observer, "success".into()));
                Ok(())
            })
            .with_on_failure(move |err| {
                on_failure_events
                    .borrow_mut()
                    .push((observer, format!("failure {err}")));
                Ok(())
            })
            .with_on_ignored(move || {
                on_ignored_events
                    .borrow_mut()
                    .push((observer, "ignored".into()));
                Ok(())
            })
            .with_on_record(move |_| {
                on_record_events
                    .borrow_mut()
                    .push((observer, "record".into()));
                Ok(())
            })
    }

    fn enqueue_pulls<RW: Read + Write>(bolt: &mut Bolt<RW>, events: &EventLog, count: usize) {
        for observer in 0..count {
            bolt.pull(
                PullParameters::new(1000, -1),
                recording_callbacks(events, observer),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_responses_are_dispatched_fifo() {
        let mut input = Vec::new();
        input.extend(record_message());
        input.extend(success_message());
        input.extend(success_message());
        input.extend(success_message());
        let mut bolt = new_bolt(input);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 3);
        bolt.write_all(None).unwrap();
        bolt.read_all(None, None).unwrap();

        assert_eq!(
            *RefCell::borrow(&events),
            vec![
                (0, "record".into()),
                (0, "success".into()),
                (1, "success".into()),
                (2, "success".into()),
            ]
        );
    }

    #[test]
    fn test_each_observer_gets_exactly_one_terminal_callback() {
        let mut input = Vec::new();
        input.extend(success_message());
        input.extend(failure_message("Neo.ClientError.Statement.SyntaxError", "nope"));
        input.extend(ignored_message());
        // response to the automatically issued RESET
        input.extend(success_message());
        let mut bolt = new_bolt(input);
        let terminal_counts: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(vec![0; 3]));

        for observer in 0..3 {
            let counts = Rc::clone(&terminal_counts);
            bolt.pull(
                PullParameters::new(1000, -1),
                ResponseCallbacks::new()
                    .with_on_failure(|_| Ok(()))
                    .with_on_summary(move || {
                        counts.borrow_mut()[observer] += 1;
                    }),
            )
            .unwrap();
        }
        bolt.write_all(None).unwrap();
        bolt.read_all(None, None).unwrap();

        assert_eq!(*RefCell::borrow(&terminal_counts), vec![1, 1, 1]);
    }

    #[test]
    fn test_has_more_success_is_not_a_summary() {
        let mut bolt = new_bolt(success_has_more_message());
        let success_count = Rc::new(RefCell::new(0));
        let summary_count = Rc::new(RefCell::new(0));

        let successes = Rc::clone(&success_count);
        let summaries = Rc::clone(&summary_count);
        bolt.pull(
            PullParameters::new(1000, -1),
            ResponseCallbacks::new()
                .with_on_success(move |_| {
                    *successes.borrow_mut() += 1;
                    Ok(())
                })
                .with_on_summary(move || {
                    *summaries.borrow_mut() += 1;
                }),
        )
        .unwrap();
        bolt.write_all(None).unwrap();
        bolt.read_all(None, None).unwrap();

        assert_eq!(*RefCell::borrow(&success_count), 1);
        assert_eq!(*RefCell::borrow(&summary_count), 0);
    }

    #[test]
    fn test_ignored_replays_previous_failure() {
        let mut input = Vec::new();
        input.extend(failure_message(
            "Neo.ClientError.Statement.SyntaxError",
            "syntax error",
        ));
        input.extend(ignored_message());
        input.extend(success_message());
        // response to the automatically issued RESET
        input.extend(success_message());
        let mut bolt = new_bolt(input);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 3);
        bolt.write_all(None).unwrap();
        bolt.read_all(None, None).unwrap();

        let events = RefCell::borrow(&events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, 0);
        assert!(events[0].1.contains("SyntaxError"));
        // the IGNORED observer sees the same failure replayed, not "ignored"
        assert_eq!(events[1].0, 1);
        assert!(events[1].1.contains("SyntaxError"));
        assert_eq!(events[2], (2, "success".into()));
    }

    #[test]
    fn test_failure_enqueues_reset() {
        let mut input = Vec::new();
        input.extend(failure_message("Neo.TransientError.General.Foo", "kaputt"));
        input.extend(success_message());
        let mut bolt = new_bolt(input);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 1);
        bolt.write_all(None).unwrap();
        bolt.read_all(None, None).unwrap();

        // the RESET (B0 0F) must have been written out after the failure
        let written = &bolt.data.stream.written;
        let reset_pos = written
            .windows(2)
            .position(|w| w == [0xB0, 0x0F])
            .expect("RESET not written");
        assert!(reset_pos > 0);
        // and its SUCCESS cleared the stored failure
        assert!(bolt.data.last_server_failure.is_none());
    }

    #[test]
    fn test_broken_connection_fails_all_queued_observers() {
        // input ends before any response arrives
        let mut bolt = new_bolt(vec![]);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 3);
        bolt.write_all(None).unwrap();
        let res = bolt.read_all(None, None);

        assert!(res.is_err());
        let events = RefCell::borrow(&events);
        assert_eq!(events.len(), 3);
        for (observer, event) in events.iter().enumerate() {
            assert_eq!(event.0, observer);
            assert!(event.1.starts_with("failure"), "got {event:?}");
        }
    }

    #[test]
    fn test_broken_connection_rejects_future_observers_with_same_error() {
        let mut bolt = new_bolt(vec![]);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 1);
        bolt.write_all(None).unwrap();
        let first_err = bolt.read_all(None, None).unwrap_err();

        let res = bolt.pull(
            PullParameters::new(1000, -1),
            recording_callbacks(&events, 1),
        );
        let second_err = res.unwrap_err();
        assert_eq!(format!("{first_err}"), format!("{second_err}"));

        let events = RefCell::borrow(&events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, events[1].1);
    }

    #[test]
    fn test_record_in_response_to_reset_breaks_connection() {
        let mut input = Vec::new();
        input.extend(record_message());
        let mut bolt = new_bolt(input);

        let res = bolt.reset_and_flush(None);
        assert!(res.is_err());
        assert!(bolt.closed());
    }

    #[test]
    fn test_failure_in_response_to_reset_breaks_connection() {
        let mut input = Vec::new();
        input.extend(failure_message("Neo.DatabaseError.General.UnknownError", "?"));
        let mut bolt = new_bolt(input);

        let res = bolt.reset_and_flush(None);
        assert!(res.is_err());
        assert!(bolt.closed());
    }

    #[test]
    fn test_reset_and_flush_succeeds_on_success() {
        let mut bolt = new_bolt(success_message());
        bolt.reset_and_flush(None).unwrap();
        assert!(!bolt.closed());
    }

    #[test]
    fn test_write_error_breaks_connection() {
        let mut bolt = new_bolt(vec![]);
        let events: EventLog = Default::default();

        enqueue_pulls(&mut bolt, &events, 2);
        bolt.data.stream.fail_writes = true;
        let res = bolt.write_all(None);

        assert!(res.is_err());
        let events = RefCell::borrow(&events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(_, e)| e.starts_with("failure")));
    }
}
