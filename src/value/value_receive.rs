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

use std::collections::{HashMap, VecDeque};

use itertools::Itertools;

use super::graph;
use super::value_send::ValueSend;

/// A value as received from the database.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValueReceive {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<ValueReceive>),
    Map(HashMap<String, ValueReceive>),
    Node(graph::Node),
    Relationship(graph::Relationship),
    Path(graph::Path),
    /// The server sent a structure the driver could not decode (e.g., a type
    /// introduced in a newer protocol version). The raw data is preserved.
    BrokenValue(BrokenValue),
}

macro_rules! impl_value_receive_accessors {
    ( $(($variant:ident, $ty:ty, $is_name:ident, $as_name:ident, $try_name:ident)),* $(,)? ) => {
        $(
            impl ValueReceive {
                #[inline]
                pub fn $is_name(&self) -> bool {
                    matches!(self, ValueReceive::$variant(_))
                }

                #[inline]
                pub fn $as_name(&self) -> Option<&$ty> {
                    match self {
                        ValueReceive::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                #[inline]
                #[allow(clippy::result_large_err)]
                pub fn $try_name(self) -> Result<$ty, Self> {
                    match self {
                        ValueReceive::$variant(v) => Ok(v),
                        _ => Err(self),
                    }
                }
            }

            impl TryFrom<ValueReceive> for $ty {
                type Error = ValueReceive;

                #[inline]
                fn try_from(value: ValueReceive) -> Result<Self, Self::Error> {
                    value.$try_name()
                }
            }
        )*
    };
}

impl_value_receive_accessors!(
    (Boolean, bool, is_bool, as_bool, try_into_bool),
    (Integer, i64, is_int, as_int, try_into_int),
    (Float, f64, is_float, as_float, try_into_float),
    (Bytes, Vec<u8>, is_bytes, as_bytes, try_into_bytes),
    (String, String, is_string, as_string, try_into_string),
    (List, Vec<ValueReceive>, is_list, as_list, try_into_list),
    (
        Map,
        HashMap<String, ValueReceive>,
        is_map,
        as_map,
        try_into_map
    ),
    (Node, graph::Node, is_node, as_node, try_into_node),
    (
        Relationship,
        graph::Relationship,
        is_relationship,
        as_relationship,
        try_into_relationship
    ),
    (Path, graph::Path, is_path, as_path, try_into_path),
);

impl ValueReceive {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ValueReceive::Null)
    }

    /// Compact single-line rendering for debug logs.
    pub(crate) fn dbg_print(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Boolean(v) => v.to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bytes(v) => format!("bytes{v:02X?}"),
            Self::String(v) => format!("{v:?}"),
            Self::List(v) => format!("[{}]", v.iter().map(|e| e.dbg_print()).format(", ")),
            Self::Map(v) => format!(
                "{{{}}}",
                v.iter()
                    .map(|(k, e)| format!("{:?}: {}", k, e.dbg_print()))
                    .format(", ")
            ),
            Self::Node(v) => format!("{v:?}"),
            Self::Relationship(v) => format!("{v:?}"),
            Self::Path(v) => format!("{v:?}"),
            Self::BrokenValue(v) => format!("{v:?}"),
        }
    }
}

impl From<ValueSend> for ValueReceive {
    fn from(v: ValueSend) -> Self {
        match v {
            ValueSend::Null => Self::Null,
            ValueSend::Boolean(v) => Self::Boolean(v),
            ValueSend::Integer(v) => Self::Integer(v),
            ValueSend::Float(v) => Self::Float(v),
            ValueSend::Bytes(v) => Self::Bytes(v),
            ValueSend::String(v) => Self::String(v),
            ValueSend::List(v) => Self::List(v.into_iter().map(Into::into).collect()),
            ValueSend::Map(v) => Self::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

/// A value the driver received but could not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenValue {
    pub(crate) inner: BrokenValueInner,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BrokenValueInner {
    Reason(String),
    /// A struct with an unknown tag. The raw fields are kept around so that
    /// version translators can recover known structs from nested positions
    /// (e.g., unbound relationships inside a path).
    UnknownStruct {
        tag: u8,
        fields: VecDeque<ValueReceive>,
    },
    InvalidStruct {
        reason: String,
    },
}

impl BrokenValue {
    pub fn reason(&self) -> &str {
        match &self.inner {
            BrokenValueInner::Reason(reason) => reason,
            BrokenValueInner::UnknownStruct { .. } => "received an unknown packstream struct",
            BrokenValueInner::InvalidStruct { reason } => reason,
        }
    }
}

impl From<BrokenValueInner> for BrokenValue {
    fn from(inner: BrokenValueInner) -> Self {
        BrokenValue { inner }
    }
}
