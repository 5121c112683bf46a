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

use usize_cast::FromUsize;

use super::super::bolt_common::*;
use super::super::packstream::PackStreamSerializer;
use super::super::BoltStructTranslator;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::{BrokenValue, BrokenValueInner, ValueReceive, ValueSend};

#[derive(Debug, Default)]
pub(crate) struct Bolt5x0StructTranslator {}

impl BoltStructTranslator for Bolt5x0StructTranslator {
    fn serialize<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        value: &ValueSend,
    ) -> Result<(), S::Error> {
        match value {
            ValueSend::Null => serializer.write_null(),
            ValueSend::Boolean(b) => serializer.write_bool(*b),
            ValueSend::Integer(i) => serializer.write_int(*i),
            ValueSend::Float(f) => serializer.write_float(*f),
            ValueSend::Bytes(b) => serializer.write_bytes(b),
            ValueSend::String(s) => serializer.write_string(s),
            ValueSend::List(l) => {
                serializer.write_list_header(u64::from_usize(l.len()))?;
                for v in l {
                    self.serialize(serializer, v)?;
                }
                Ok(())
            }
            ValueSend::Map(d) => {
                serializer.write_dict_header(u64::from_usize(d.len()))?;
                for (k, v) in d {
                    serializer.write_string(k)?;
                    self.serialize(serializer, v)?;
                }
                Ok(())
            }
        }
    }

    fn deserialize_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        let size = fields.len();
        let mut fields = VecDeque::from(fields);
        match tag {
            TAG_NODE => {
                if size != 4 {
                    return invalid_struct(format!(
                        "expected 4 fields for node struct b'N', found {size}"
                    ));
                }
                let id = as_int!(fields.pop_front().unwrap(), "node id");
                let raw_labels = as_vec!(fields.pop_front().unwrap(), "node labels");
                let mut labels = Vec::with_capacity(raw_labels.len());
                for label in raw_labels {
                    labels.push(as_string!(label, "node label"));
                }
                let properties = as_map!(fields.pop_front().unwrap(), "node properties");
                let element_id = as_string!(fields.pop_front().unwrap(), "node element_id");
                ValueReceive::Node(Node {
                    id,
                    labels,
                    properties,
                    element_id,
                })
            }
            TAG_RELATIONSHIP => {
                if size != 8 {
                    return invalid_struct(format!(
                        "expected 8 fields for relationship struct b'R', found {size}"
                    ));
                }
                let id = as_int!(fields.pop_front().unwrap(), "relationship id");
                let start_node_id =
                    as_int!(fields.pop_front().unwrap(), "relationship start_node_id");
                let end_node_id = as_int!(fields.pop_front().unwrap(), "relationship end_node_id");
                let type_ = as_string!(fields.pop_front().unwrap(), "relationship type");
                let properties = as_map!(fields.pop_front().unwrap(), "relationship properties");
                let element_id = as_string!(fields.pop_front().unwrap(), "relationship element_id");
                let start_node_element_id = as_string!(
                    fields.pop_front().unwrap(),
                    "relationship start_node_element_id"
                );
                let end_node_element_id = as_string!(
                    fields.pop_front().unwrap(),
                    "relationship end_node_element_id"
                );
                ValueReceive::Relationship(Relationship {
                    id,
                    start_node_id,
                    end_node_id,
                    type_,
                    properties,
                    element_id,
                    start_node_element_id,
                    end_node_element_id,
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
                                    if rel_size != 4 {
                                        return invalid_struct(format!(
                                            "expected 4 fields for unbound relationship \
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
                                    let element_id = as_string!(
                                        rel_fields.pop_front().unwrap(),
                                        "unbound relationship element_id"
                                    );
                                    UnboundRelationship {
                                        id,
                                        type_,
                                        properties,
                                        element_id,
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
            _ => ValueReceive::BrokenValue(BrokenValue {
                inner: BrokenValueInner::UnknownStruct { tag, fields },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_map;

    fn translate(tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        Bolt5x0StructTranslator {}.deserialize_struct(tag, fields)
    }

    #[test]
    fn test_node() {
        let value = translate(
            TAG_NODE,
            vec![
                ValueReceive::Integer(1),
                ValueReceive::List(vec![ValueReceive::String("Person".into())]),
                ValueReceive::Map(
                    value_map!({"name": "Alice"})
                        .into_iter()
                        .map(|(k, v)| (k, v.into()))
                        .collect(),
                ),
                ValueReceive::String("4:abc:1".into()),
            ],
        );
        let node = value.try_into_node().unwrap();
        assert_eq!(node.id, 1);
        assert_eq!(node.labels, vec![String::from("Person")]);
        assert_eq!(node.element_id, "4:abc:1");
    }

    #[test]
    fn test_node_with_wrong_field_count_is_broken() {
        let value = translate(TAG_NODE, vec![ValueReceive::Integer(1)]);
        assert!(matches!(value, ValueReceive::BrokenValue(_)));
    }

    #[test]
    fn test_unknown_struct_is_preserved() {
        let value = translate(0x99, vec![ValueReceive::Integer(1)]);
        let ValueReceive::BrokenValue(broken) = value else {
            panic!("expected broken value, found {value:?}");
        };
        assert!(matches!(
            broken.inner,
            BrokenValueInner::UnknownStruct { tag: 0x99, .. }
        ));
    }
}
