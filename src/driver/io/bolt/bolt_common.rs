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

use crate::error_::DriverError;
use crate::value::{BrokenValueInner, ValueReceive};

pub(super) const TAG_SUCCESS: u8 = 0x70;
pub(super) const TAG_RECORD: u8 = 0x71;
pub(super) const TAG_IGNORED: u8 = 0x7E;
pub(super) const TAG_FAILURE: u8 = 0x7F;

pub(super) const TAG_NODE: u8 = b'N';
pub(super) const TAG_RELATIONSHIP: u8 = b'R';
pub(super) const TAG_UNBOUND_RELATIONSHIP: u8 = b'r';
pub(super) const TAG_PATH: u8 = b'P';

macro_rules! value_as {
    ($variant:ident, $value:expr, $name:literal, $type_name:literal $($format_arg:tt)*) => {
        match $value {
            ValueReceive::$variant(i) => i,
            v => {
                return invalid_struct(format!(
                    concat!(
                        "expected ",
                        $name,
                        " to be ",
                        $type_name,
                        ", found {0:?}"
                    ),
                    v
                    $($format_arg)*
                ));
            }
        }
    };
}

macro_rules! as_int {
    ($value:expr, $name:literal $($format_arg:tt)*) => {
        value_as!(Integer, $value, $name, "integer" $($format_arg)*)
    };
}

macro_rules! as_string {
    ($value:expr, $name:literal $($format_arg:tt)*) => {
        value_as!(String, $value, $name, "string" $($format_arg)*)
    };
}

macro_rules! as_map {
    ($value:expr, $name:literal $($format_arg:tt)*) => {
        value_as!(Map, $value, $name, "map" $($format_arg)*)
    };
}

macro_rules! as_vec {
    ($value:expr, $name:literal $($format_arg:tt)*) => {
        value_as!(List, $value, $name, "list" $($format_arg)*)
    };
}

macro_rules! as_node {
    ($value:expr, $name:literal $($format_arg:tt)*) => {
        value_as!(Node, $value, $name, "Node" $($format_arg)*)
    };
}

#[inline]
pub(super) fn invalid_struct(reason: impl Into<String>) -> ValueReceive {
    let reason = reason.into();
    ValueReceive::BrokenValue(BrokenValueInner::InvalidStruct { reason }.into())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[allow(dead_code)] // kept for the next protocol feature that needs gating
pub(super) enum ServerAwareBoltVersion {
    V4x4,
    V5x0,
}

impl ServerAwareBoltVersion {
    #[inline]
    fn protocol_version(&self) -> &'static str {
        match self {
            ServerAwareBoltVersion::V4x4 => "4.4",
            ServerAwareBoltVersion::V5x0 => "5.0",
        }
    }

    #[inline]
    fn min_server_version(&self) -> &'static str {
        match self {
            ServerAwareBoltVersion::V4x4 => "4.4",
            ServerAwareBoltVersion::V5x0 => "5.0",
        }
    }
}

#[inline]
#[allow(dead_code)] // kept for the next protocol feature that needs gating
pub(super) fn unsupported_protocol_feature_error(
    name: &str,
    current_version: ServerAwareBoltVersion,
    needed_version: ServerAwareBoltVersion,
) -> DriverError {
    DriverError::InvalidConfig {
        message: format!(
            "{name} is not supported via bolt version {}, requires at least server version {}",
            current_version.protocol_version(),
            needed_version.min_server_version(),
        ),
    }
}
