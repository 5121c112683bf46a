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

use std::collections::VecDeque;

use super::super::bolt5x0::Bolt5x0StructTranslator;
use super::super::bolt_common::*;
use super::super::packstream::PackStreamSerializer;
use super::super::BoltStructTranslator;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::{BrokenValue, BrokenValueInner, ValueReceive, ValueSend};

/// Protocol version 4.4 sends graph structs without element ids.
/// They are synthesized from the numeric ids so higher layers see a uniform
/// shape regardless of the negotiated version.
#[derive(Debug, Default)]
pub(crate) struct Bolt4x4StructTranslator {
    bolt5x0_translator: Bolt5x0StructTranslator,
}

impl BoltStructTranslator for Bolt4x4StructTranslator {
    fn serialize<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        value: &ValueSend,
    ) -> Result<(), S::Error> {
        self.bolt5x0_translator.serialize(serializer, value)
    }

    fn deserialize_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        let size = fields.len();
        let mut fields = VecDeque::from(fields);
        match tag {
            TAG_NODE => {
                if size != 3 {
                    return invalid_struct(format!(
                        "expected 3 fields for node struct b'N', found {size}"
                    ));
                }
                let id = as_int!(fields.pop_front().unwrap(), "node id");
                let raw_labels = as_vec!(fields.pop_front().unwrap(), "node labels");
                let mut labels = Vec::with_capacity(raw_labels.len());
                for label in raw_labels {
                    labels.push(as_string!(label, "node label"));
                }
                let properties = as_map!(fields.pop_front().unwrap(), "node properties");
                ValueReceive::Node(Node {
                    id,
                    labels,
                    properties,
                    element_id: format!("{id}"),
                })
            }
            TAG_RELATIONSHIP => {
                if size != 5 {
                    return invalid_struct(format!(
                        "expected 5 fields for relationship struct b'R', found {size}"
                    ));
                }
                let id = as_int!(fields.pop_front().unwrap(), "relationship id");
                let start_node_id =
                    as_int!(fields.pop_front().unwrap(), "relationship start_node_id");
                let end_node_id = as_int!(fields.pop_front().unwrap(), "relationship end_node_id");
                let type_ = as_string!(fields.pop_front().unwrap(), "relationship type");
                let properties = as_map!(fields.pop_front().unwrap(), "relationship properties");
                ValueReceive::Relationship(Relationship {
                    id,
                    start_node_id,
                    end_node_id,
                    type_,
                    properties,
                    element_id: format!("{id}"),
                    start_node_element_id: format!("{start_node_id}"),
                    end_node_element_id: format!("{end_node_id}"),
                })
            }
            TAG_PATH => {
                if size != 3 {
                    return invalid_struct(format!(
                        "expected 3 fields for path struct b'P', found {size}"
                    ));
                }
                let raw_nodes = as_vec!(fields.pop_front().unwrap(), "path nodes");
                let mut nodes = Vec::with_capacity(raw_nodes.len());
                for node in raw_nodes {
                    nodes.push(as_node!(node, "path node"));
                }
                let relationships = match fields.pop_front().unwrap() {
                    ValueReceive::List(v) => {
                        let mut relationships = Vec::with_capacity(v.len());
                        for relationship in v {
                            relationships.push(match relationship {
                                ValueReceive::BrokenValue(BrokenValue {
                                    inner:
                                        BrokenValueInner::UnknownStruct {
                                            tag: rel_tag,
                                            fields: mut rel_fields,
                                        },
                                }) if rel_tag == TAG_UNBOUND_RELATIONSHIP => {
                                    let rel_size = rel_fields.len();
                                    if rel_size != 3 {
                                        return invalid_struct(format!(
                                            "expected 3 fields for unbound relationship \
                                             struct b'r', found {rel_size}",
                                        ));
                                    }
                                    let id = as_int!(
                                        rel_fields.pop_front().unwrap(),
                                        "unbound relationship id"
                                    );
                                    let type_ = as_string!(
                                        rel_fields.pop_front().unwrap(),
                                        "unbound relationship type"
                                    );
                                    let properties = as_map!(
                                        rel_fields.pop_front().unwrap(),
                                        "unbound relationship properties"
                                    );
                                    UnboundRelationship {
                                        id,
                                        type_,
                                        properties,
                                        element_id: id.to_string(),
                                    }
                                }
                                v => {
                                    return invalid_struct(format!(
                                        "expected path relationship to be an unbound \
                                         relationship, found {v:?}"
                                    ))
                                }
                            });
                        }
                        relationships
                    }
                    v => {
                        return invalid_struct(format!(
                            "expected path relationships to be a list, found {v:?}"
                        ))
                    }
                };
                let raw_indices = as_vec!(fields.pop_front().unwrap(), "path indices");
                let mut indices = Vec::with_capacity(raw_indices.len());
                for index in raw_indices {
                    indices.push(as_int!(index, "path index"));
                }
                ValueReceive::Path(Path {
                    nodes,
                    relationships,
                    indices,
                })
            }
            _ => self
                .bolt5x0_translator
                .deserialize_struct(tag, Vec::from(fields)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_element_id_is_synthesized() {
        let value = Bolt4x4StructTranslator::default().deserialize_struct(
            TAG_NODE,
            vec![
                ValueReceive::Integer(42),
                ValueReceive::List(vec![]),
                ValueReceive::Map(Default::default()),
            ],
        );
        let node = value.try_into_node().unwrap();
        assert_eq!(node.id, 42);
        assert_eq!(node.element_id, "42");
    }

    #[test]
    fn test_relationship_element_ids_are_synthesized() {
        let value = Bolt4x4StructTranslator::default().deserialize_struct(
            TAG_RELATIONSHIP,
            vec![
                ValueReceive::Integer(1),
                ValueReceive::Integer(2),
                ValueReceive::Integer(3),
                ValueReceive::String("KNOWS".into()),
                ValueReceive::Map(Default::default()),
            ],
        );
        let relationship = value.try_into_relationship().unwrap();
        assert_eq!(relationship.element_id, "1");
        assert_eq!(relationship.start_node_element_id, "2");
        assert_eq!(relationship.end_node_element_id, "3");
    }
}
