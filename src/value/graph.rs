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

//! Graph entities as they appear in query results.

use std::collections::HashMap;

use super::ValueReceive;

/// A node in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Numeric id of the node. Deprecated on the server side in favor of
    /// [`Node::element_id`], but still transmitted by every supported
    /// protocol version.
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, ValueReceive>,
    /// String id of the node. On protocol version 4.4 this is synthesized
    /// from [`Node::id`] as the server does not transmit element ids yet.
    pub element_id: String,
}

/// A relationship in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
    pub start_node_element_id: String,
    pub end_node_element_id: String,
}

/// A relationship without start and end node information, as found in
/// [`Path`]s, which encode that information in their indices instead.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
}

/// An alternating sequence of nodes and relationships.
///
/// `indices` is the raw wire representation: pairs of (signed relationship
/// index, node index) describing how to walk `nodes` and `relationships`
/// starting from `nodes[0]`. A negative relationship index means the
/// relationship is traversed against its direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    pub indices: Vec<i64>,
}
