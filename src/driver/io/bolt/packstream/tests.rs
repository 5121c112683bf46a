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

use rstest::rstest;

use super::super::BoltStructTranslator;
use super::deserialize::{PackStreamDeserializer, PackStreamDeserializerImpl};
use super::serialize::{PackStreamSerializer, PackStreamSerializerImpl};
use crate::value::{ValueReceive, ValueSend};

#[derive(Debug, Default)]
struct TestTranslator;

impl BoltStructTranslator for TestTranslator {
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
                serializer.write_list_header(l.len() as u64)?;
                for v in l {
                    self.serialize(serializer, v)?;
                }
                Ok(())
            }
            ValueSend::Map(m) => {
                serializer.write_dict_header(m.len() as u64)?;
                for (k, v) in m {
                    serializer.write_string(k)?;
                    self.serialize(serializer, v)?;
                }
                Ok(())
            }
        }
    }

    fn deserialize_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        ValueReceive::List(
            std::iter::once(ValueReceive::Integer(tag.into()))
                .chain(fields)
                .collect(),
        )
    }
}

fn decode(bytes: &[u8]) -> ValueReceive {
    let mut reader = &bytes[..];
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    let value = deserializer.load(&TestTranslator).unwrap();
    assert!(reader.is_empty(), "deserializer left bytes behind");
    value
}

fn encode(value: &ValueSend) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut serializer = PackStreamSerializerImpl::new(&mut bytes);
    TestTranslator.serialize(&mut serializer, value).unwrap();
    bytes
}

#[rstest]
#[case(vec![0xC0], ValueReceive::Null)]
#[case(vec![0xC2], ValueReceive::Boolean(false))]
#[case(vec![0xC3], ValueReceive::Boolean(true))]
#[case(vec![0x2A], ValueReceive::Integer(42))]
#[case(vec![0xF0], ValueReceive::Integer(-16))]
#[case(vec![0xC8, 0x80], ValueReceive::Integer(-128))]
#[case(vec![0xC9, 0x80, 0x00], ValueReceive::Integer(-32_768))]
#[case(vec![0xCA, 0x80, 0x00, 0x00, 0x00], ValueReceive::Integer(-2_147_483_648))]
#[case(
    vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    ValueReceive::Integer(i64::MIN)
)]
#[case(
    vec![0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A],
    ValueReceive::Float(1.1)
)]
#[case(vec![0xCC, 0x02, 0x01, 0x02], ValueReceive::Bytes(vec![1, 2]))]
#[case(vec![0x80], ValueReceive::String(String::new()))]
#[case(
    vec![0x85, 0x68, 0x65, 0x6C, 0x6C, 0x6F],
    ValueReceive::String(String::from("hello"))
)]
#[case(vec![0x90], ValueReceive::List(vec![]))]
#[case(
    vec![0x92, 0x01, 0x02],
    ValueReceive::List(vec![ValueReceive::Integer(1), ValueReceive::Integer(2)])
)]
#[case(vec![0xA0], ValueReceive::Map(Default::default()))]
fn test_decode(#[case] bytes: Vec<u8>, #[case] expected: ValueReceive) {
    assert_eq!(decode(&bytes), expected);
}

#[test]
fn test_decode_dict() {
    let bytes = vec![0xA1, 0x81, 0x61, 0x01];
    let value = decode(&bytes);
    let map = value.try_into_map().unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("a"), Some(&ValueReceive::Integer(1)));
}

#[test]
fn test_decode_struct_goes_through_translator() {
    // B1 tag=0x42 with a single int field
    let bytes = vec![0xB1, 0x42, 0x07];
    let value = decode(&bytes);
    assert_eq!(
        value,
        ValueReceive::List(vec![ValueReceive::Integer(0x42), ValueReceive::Integer(7)])
    );
}

#[test]
fn test_decode_unknown_marker() {
    let bytes = vec![0xDF];
    let mut reader = &bytes[..];
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    let res = deserializer.load(&TestTranslator);
    assert!(res.is_err());
}

#[rstest]
#[case(ValueSend::Null)]
#[case(ValueSend::Boolean(true))]
#[case(ValueSend::Integer(0))]
#[case(ValueSend::Integer(-17))]
#[case(ValueSend::Integer(128))]
#[case(ValueSend::Integer(32_768))]
#[case(ValueSend::Integer(2_147_483_648))]
#[case(ValueSend::Float(-0.5))]
#[case(ValueSend::Bytes(vec![0xFF; 300]))]
#[case(ValueSend::String("x".repeat(16)))]
#[case(ValueSend::String("x".repeat(256)))]
#[case(ValueSend::List(vec![ValueSend::Integer(1), ValueSend::String("two".into())]))]
fn test_round_trip(#[case] value: ValueSend) {
    let bytes = encode(&value);
    let decoded = decode(&bytes);
    let expected: ValueReceive = value.into();
    assert_eq!(decoded, expected);
}

#[test]
fn test_round_trip_nested_map() {
    let value = ValueSend::Map(
        [(
            String::from("outer"),
            ValueSend::Map(
                [(String::from("inner"), ValueSend::Integer(1))]
                    .into_iter()
                    .collect(),
            ),
        )]
        .into_iter()
        .collect(),
    );
    let bytes = encode(&value);
    let decoded = decode(&bytes);
    let expected: ValueReceive = value.into();
    assert_eq!(decoded, expected);
}

#[test]
fn test_marker_sizes() {
    // tiny string border: 15 chars inline, 16 chars require 0xD0
    assert_eq!(encode(&ValueSend::String("x".repeat(15)))[0], 0x8F);
    assert_eq!(encode(&ValueSend::String("x".repeat(16)))[0], 0xD0);
    // tiny int border
    assert_eq!(encode(&ValueSend::Integer(127)), vec![0x7F]);
    assert_eq!(encode(&ValueSend::Integer(-16)), vec![0xF0]);
    assert_eq!(encode(&ValueSend::Integer(-17)), vec![0xC8, 0xEF]);
}
