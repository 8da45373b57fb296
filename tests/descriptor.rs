//! Type-descriptor reflection: JSON export, parsing, and schema-directed
//! format transformation.

use once_cell::sync::Lazy;
use serde_json::json;
use soia::{
    init_module, parse_type_descriptor, record_serializer, Encoded, EnumRegistration, Format,
    JsonFlavor, Serializer, StructRegistration, UnrecognizedEnum, UnrecognizedFields,
};

#[derive(Debug, Clone, PartialEq, Default)]
struct Tree {
    label: String,
    children: Vec<Tree>,
    unrecognized: UnrecognizedFields,
}

impl Tree {
    fn serializer() -> Serializer<Tree> {
        static SERIALIZER: Lazy<Serializer<Tree>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }

    fn leaf(label: &str) -> Tree {
        Tree {
            label: label.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Unknown(UnrecognizedEnum),
    Nil,
    Tree(Tree),
}

impl Node {
    fn serializer() -> Serializer<Node> {
        static SERIALIZER: Lazy<Serializer<Node>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }
}

fn tree_array() -> Serializer<Vec<Tree>> {
    soia::array_serializer(Tree::serializer())
}

fn init() {
    static INIT: Lazy<()> = Lazy::new(|| {
        init_module(
            "tests/descriptor.soia",
            vec![
                StructRegistration::new(
                    "Tree",
                    Tree::serializer(),
                    |t| &t.unrecognized,
                    |t, u| t.unrecognized = u,
                )
                .field(
                    "label",
                    0,
                    soia::string_serializer,
                    |t| &t.label,
                    |t, v| t.label = v,
                )
                .field(
                    "children",
                    1,
                    tree_array,
                    |t| &t.children,
                    |t, v| t.children = v,
                )
                .removed(&[2])
                .into(),
                EnumRegistration::new("Node", Node::serializer(), Node::Unknown, |v| match v {
                    Node::Unknown(u) => Some(u),
                    _ => None,
                })
                .constant("NIL", 1, || Node::Nil, |v| matches!(v, Node::Nil))
                .value("tree", 2, Tree::serializer, Node::Tree, |v| match v {
                    Node::Tree(t) => Some(t),
                    _ => None,
                })
                .into(),
            ],
        )
        .unwrap();
    });
    Lazy::force(&INIT);
}

#[test]
fn primitive_descriptor_json() {
    let descriptor = soia::int32_serializer().type_descriptor();
    assert_eq!(
        descriptor.as_json(),
        json!({"type": {"kind": "primitive", "value": "int32"}, "records": []})
    );
}

#[test]
fn container_descriptor_json() {
    let descriptor = soia::optional_serializer(soia::array_serializer(soia::string_serializer()))
        .type_descriptor();
    assert_eq!(
        descriptor.as_json(),
        json!({
            "type": {
                "kind": "optional",
                "value": {
                    "kind": "array",
                    "value": {"item": {"kind": "primitive", "value": "string"}},
                },
            },
            "records": [],
        })
    );
}

#[test]
fn keyed_array_descriptor_carries_key_chain() {
    init();
    let descriptor = soia::keyed_array_serializer(Tree::serializer(), "label")
        .unwrap()
        .type_descriptor();
    let json = descriptor.as_json();
    assert_eq!(json["type"]["value"]["key_chain"], json!("label"));
}

#[test]
fn recursive_record_descriptor_json() {
    init();
    let descriptor = Tree::serializer().type_descriptor();
    assert_eq!(
        descriptor.as_json(),
        json!({
            "type": {"kind": "record", "value": "tests/descriptor.soia:Tree"},
            "records": [{
                "kind": "struct",
                "id": "tests/descriptor.soia:Tree",
                "fields": [
                    {
                        "name": "label",
                        "number": 0,
                        "type": {"kind": "primitive", "value": "string"},
                    },
                    {
                        "name": "children",
                        "number": 1,
                        "type": {
                            "kind": "array",
                            "value": {
                                "item": {
                                    "kind": "record",
                                    "value": "tests/descriptor.soia:Tree",
                                },
                            },
                        },
                    },
                ],
                "removed_fields": [2],
            }],
        })
    );
}

#[test]
fn enum_descriptor_omits_type_for_constants() {
    init();
    let json = Node::serializer().type_descriptor().as_json();
    let records = json["records"].as_array().unwrap();
    let node = records
        .iter()
        .find(|r| r["id"] == json!("tests/descriptor.soia:Node"))
        .unwrap();
    assert_eq!(node["kind"], json!("enum"));
    assert_eq!(node["fields"][0], json!({"name": "NIL", "number": 1}));
    assert_eq!(node["fields"][1]["name"], json!("tree"));
    assert!(node["fields"][1]["type"].is_object());
    // The transitive closure includes Tree.
    assert!(records
        .iter()
        .any(|r| r["id"] == json!("tests/descriptor.soia:Tree")));
}

#[test]
fn parse_round_trips_structurally() {
    init();
    for descriptor in [
        soia::int32_serializer().type_descriptor(),
        soia::optional_serializer(Tree::serializer()).type_descriptor(),
        Tree::serializer().type_descriptor(),
        Node::serializer().type_descriptor(),
    ] {
        let exported = descriptor.as_json();
        let parsed = parse_type_descriptor(&exported).unwrap();
        assert_eq!(parsed.as_json(), exported);
    }
}

#[test]
fn parse_rejects_dangling_references() {
    let bad = json!({
        "type": {"kind": "record", "value": "m:Missing"},
        "records": [],
    });
    assert!(matches!(
        parse_type_descriptor(&bad),
        Err(soia::Error::UnknownRecordReference(_))
    ));
}

fn sample_tree() -> Tree {
    Tree {
        label: "root".to_string(),
        children: vec![Tree::leaf("a"), Tree::leaf("b")],
        unrecognized: UnrecognizedFields::default(),
    }
}

#[test]
fn transform_matches_typed_serialization() {
    init();
    let s = Tree::serializer();
    let value = sample_tree();
    let descriptor = s.type_descriptor();

    let bytes = Encoded::Bytes(s.to_bytes(&value));
    // bytes -> readable JSON equals the typed readable rendering.
    assert_eq!(
        descriptor.transform(&bytes, Format::ReadableJson).unwrap(),
        Encoded::Json(s.to_json_code(&value, JsonFlavor::Readable))
    );
    // bytes -> dense JSON equals the typed dense rendering.
    assert_eq!(
        descriptor.transform(&bytes, Format::DenseJson).unwrap(),
        Encoded::Json(s.to_json_code(&value, JsonFlavor::Dense))
    );
    // dense JSON -> bytes equals the typed encoding.
    let dense = Encoded::Json(s.to_json_code(&value, JsonFlavor::Dense));
    assert_eq!(descriptor.transform(&dense, Format::Bytes).unwrap(), bytes);
    // readable JSON -> bytes round-trips too.
    let readable = Encoded::Json(s.to_json_code(&value, JsonFlavor::Readable));
    assert_eq!(descriptor.transform(&readable, Format::Bytes).unwrap(), bytes);
}

#[test]
fn transform_through_a_parsed_descriptor() {
    init();
    let s = Tree::serializer();
    let value = sample_tree();
    // A descriptor rebuilt from JSON transforms identically: it is backed by
    // generic record definitions, not generated types.
    let parsed = parse_type_descriptor(&s.type_descriptor().as_json()).unwrap();
    let bytes = Encoded::Bytes(s.to_bytes(&value));
    assert_eq!(
        parsed.transform(&bytes, Format::DenseJson).unwrap(),
        Encoded::Json(s.to_json_code(&value, JsonFlavor::Dense))
    );
}

#[test]
fn transform_preserves_unknown_slots() {
    init();
    let descriptor = Tree::serializer().type_descriptor();
    // Slots: label, children, removed, plus one unknown.
    let mut bytes = b"soia".to_vec();
    bytes.extend_from_slice(&[
        0xfa, 0x04, // 4 slots
        0xf3, 0x01, 0x78, // label "x"
        0x00, // children
        0x00, // removed slot
        0xf9, 0x05, 0x06, // unknown slot: [5, 6]
    ]);
    let source = Encoded::Bytes(bytes.clone().into());

    let dense = descriptor.transform(&source, Format::DenseJson).unwrap();
    assert_eq!(dense, Encoded::Json("[\"x\",0,0,[5,6]]".to_string()));
    // And back to the identical bytes.
    assert_eq!(
        descriptor.transform(&dense, Format::Bytes).unwrap(),
        Encoded::Bytes(bytes.into())
    );
}

#[test]
fn transform_enum_values() {
    init();
    let s = Node::serializer();
    let descriptor = s.type_descriptor();
    let value = Node::Tree(sample_tree());
    let bytes = Encoded::Bytes(s.to_bytes(&value));
    assert_eq!(
        descriptor.transform(&bytes, Format::DenseJson).unwrap(),
        Encoded::Json(s.to_json_code(&value, JsonFlavor::Dense))
    );
    assert_eq!(
        descriptor.transform(&bytes, Format::ReadableJson).unwrap(),
        Encoded::Json(s.to_json_code(&value, JsonFlavor::Readable))
    );
    let readable = Encoded::Json(s.to_json_code(&value, JsonFlavor::Readable));
    assert_eq!(
        descriptor.transform(&readable, Format::Bytes).unwrap(),
        bytes
    );
}

#[test]
fn descriptor_json_code_is_pretty() {
    let code = soia::int32_serializer().type_descriptor().as_json_code();
    assert!(code.contains('\n'));
    let parsed = parse_type_descriptor(&serde_json::from_str(&code).unwrap()).unwrap();
    assert_eq!(
        parsed.as_json(),
        soia::int32_serializer().type_descriptor().as_json()
    );
}
