//! End-to-end coverage of the record serializers, using hand-written record
//! types shaped exactly like generated code.

use once_cell::sync::Lazy;
use serde_json::json;
use soia::{
    init_module, record_serializer, EnumRegistration, JsonFlavor, Serializer, StructRegistration,
    Timestamp, UnrecognizedEnum, UnrecognizedFields,
};

#[derive(Debug, Clone, PartialEq, Default)]
struct Point {
    x: i32,
    y: i32,
    unrecognized: UnrecognizedFields,
}

impl Point {
    fn serializer() -> Serializer<Point> {
        static SERIALIZER: Lazy<Serializer<Point>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }

    fn new(x: i32, y: i32) -> Point {
        Point {
            x,
            y,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct User {
    id: i64,
    name: String,
    home: Point,
    visited: Vec<Point>,
    nickname: Option<String>,
    created: Timestamp,
    unrecognized: UnrecognizedFields,
}

impl User {
    fn serializer() -> Serializer<User> {
        static SERIALIZER: Lazy<Serializer<User>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Weekday {
    Unknown(UnrecognizedEnum),
    Monday,
    Tuesday,
    Saturday,
}

impl Weekday {
    fn serializer() -> Serializer<Weekday> {
        static SERIALIZER: Lazy<Serializer<Weekday>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }
}

impl Default for Weekday {
    fn default() -> Weekday {
        Weekday::Unknown(UnrecognizedEnum::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Unknown(UnrecognizedEnum),
    Empty,
    Circle(f64),
    Point(Point),
    Label(String),
}

impl Shape {
    fn serializer() -> Serializer<Shape> {
        static SERIALIZER: Lazy<Serializer<Shape>> = Lazy::new(record_serializer);
        SERIALIZER.clone()
    }
}

fn optional_string() -> Serializer<Option<String>> {
    soia::optional_serializer(soia::string_serializer())
}

fn point_array() -> Serializer<Vec<Point>> {
    soia::array_serializer(Point::serializer())
}

fn init() {
    static INIT: Lazy<()> = Lazy::new(|| {
        init_module(
            "tests/records.soia",
            vec![
                StructRegistration::new(
                    "Point",
                    Point::serializer(),
                    |p| &p.unrecognized,
                    |p, u| p.unrecognized = u,
                )
                .field("x", 0, soia::int32_serializer, |p| &p.x, |p, v| p.x = v)
                .field("y", 1, soia::int32_serializer, |p| &p.y, |p, v| p.y = v)
                .into(),
                StructRegistration::new(
                    "User",
                    User::serializer(),
                    |u| &u.unrecognized,
                    |u, v| u.unrecognized = v,
                )
                .field("id", 0, soia::int64_serializer, |u| &u.id, |u, v| u.id = v)
                .field(
                    "name",
                    1,
                    soia::string_serializer,
                    |u| &u.name,
                    |u, v| u.name = v,
                )
                .field("home", 2, Point::serializer, |u| &u.home, |u, v| u.home = v)
                .field(
                    "visited",
                    3,
                    point_array,
                    |u| &u.visited,
                    |u, v| u.visited = v,
                )
                .field(
                    "nickname",
                    5,
                    optional_string,
                    |u| &u.nickname,
                    |u, v| u.nickname = v,
                )
                .field(
                    "created",
                    6,
                    soia::timestamp_serializer,
                    |u| &u.created,
                    |u, v| u.created = v,
                )
                .removed(&[4])
                .into(),
                EnumRegistration::new(
                    "Weekday",
                    Weekday::serializer(),
                    Weekday::Unknown,
                    |v| match v {
                        Weekday::Unknown(u) => Some(u),
                        _ => None,
                    },
                )
                .constant("MONDAY", 1, || Weekday::Monday, |v| {
                    matches!(v, Weekday::Monday)
                })
                .constant("TUESDAY", 2, || Weekday::Tuesday, |v| {
                    matches!(v, Weekday::Tuesday)
                })
                .constant("SATURDAY", 6, || Weekday::Saturday, |v| {
                    matches!(v, Weekday::Saturday)
                })
                .removed(&[3])
                .into(),
                EnumRegistration::new("Shape", Shape::serializer(), Shape::Unknown, |v| match v {
                    Shape::Unknown(u) => Some(u),
                    _ => None,
                })
                .constant("EMPTY", 2, || Shape::Empty, |v| matches!(v, Shape::Empty))
                .value(
                    "circle",
                    1,
                    soia::float64_serializer,
                    Shape::Circle,
                    |v| match v {
                        Shape::Circle(radius) => Some(radius),
                        _ => None,
                    },
                )
                .value("point", 5, Point::serializer, Shape::Point, |v| match v {
                    Shape::Point(p) => Some(p),
                    _ => None,
                })
                .value(
                    "label",
                    6,
                    soia::string_serializer,
                    Shape::Label,
                    |v| match v {
                        Shape::Label(s) => Some(s),
                        _ => None,
                    },
                )
                .into(),
            ],
        )
        .unwrap();
    });
    Lazy::force(&INIT);
}

fn with_magic(tail: &[u8]) -> Vec<u8> {
    let mut out = b"soia".to_vec();
    out.extend_from_slice(tail);
    out
}

#[test]
fn default_struct_is_one_zero_byte() {
    init();
    let s = Point::serializer();
    assert_eq!(s.to_bytes(&Point::default()).as_ref(), b"soia\x00");
    assert_eq!(s.from_bytes(b"soia\x00").unwrap(), Point::default());
    // The empty-array wire also decodes to the default.
    assert_eq!(s.from_bytes(b"soia\xf6").unwrap(), Point::default());
    assert!(s.is_default(&Point::default()));
}

#[test]
fn struct_golden_vectors() {
    init();
    let s = Point::serializer();
    assert_eq!(
        s.to_bytes(&Point::new(10, 11)).as_ref(),
        &with_magic(&[0xf9, 0x0a, 0x0b])[..]
    );
    // Trailing defaults are trimmed from the written slots.
    assert_eq!(
        s.to_bytes(&Point::new(3, 0)).as_ref(),
        &with_magic(&[0xf7, 0x03])[..]
    );
    // A default before a non-default writes the zero filler.
    assert_eq!(
        s.to_bytes(&Point::new(0, 5)).as_ref(),
        &with_magic(&[0xf9, 0x00, 0x05])[..]
    );
    assert_eq!(s.from_bytes(b"soia\xf9\x00\x05").unwrap(), Point::new(0, 5));
}

#[test]
fn struct_decodes_older_and_newer_data() {
    init();
    let s = User::serializer();
    // Older writer: fewer slots; the rest stay default.
    let user = s.from_bytes(&with_magic(&[0xf9, 0x07, 0xf3, 0x01, 0x41])).unwrap();
    assert_eq!(user.id, 7);
    assert_eq!(user.name, "A");
    assert_eq!(user.home, Point::default());

    // Newer writer: extra slots are skipped without preserve mode.
    let bytes = with_magic(&[
        0xfa, 0x08, // 8 slots
        0x01, // id
        0xf3, 0x01, 0x41, // name "A"
        0x00, // home (default filler)
        0x00, // visited
        0x00, // removed slot 4
        0x00, // nickname
        0x00, // created
        0xf9, 0x05, 0x06, // unknown slot 7: [5, 6]
    ]);
    let user = s.from_bytes(&bytes).unwrap();
    assert_eq!(user.id, 1);
    assert!(user.unrecognized.is_empty());
    // Dropped unknowns re-encode without the extra slots.
    assert_eq!(
        s.to_bytes(&user).as_ref(),
        &with_magic(&[0xf9, 0x01, 0xf3, 0x01, 0x41])[..]
    );
}

#[test]
fn struct_preserves_unknown_slots_byte_for_byte() {
    init();
    let s = User::serializer();
    let bytes = with_magic(&[
        0xfa, 0x08, 0x01, 0xf3, 0x01, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf9, 0x05, 0x06,
    ]);
    let user = s.from_bytes_keep_unrecognized(&bytes).unwrap();
    assert!(!user.unrecognized.is_empty());
    assert!(!s.is_default(&user));
    assert_eq!(s.to_bytes(&user).as_ref(), &bytes[..]);

    // The unknown suffix also shows up in dense JSON.
    assert_eq!(
        s.to_json(&user, JsonFlavor::Dense),
        json!([1, "A", 0, 0, 0, 0, 0, [5, 6]])
    );
    // Readable JSON is lossy and drops it.
    assert_eq!(
        s.to_json(&user, JsonFlavor::Readable),
        json!({"id": 1, "name": "A"})
    );
}

#[test]
fn struct_preserves_unknown_slots_from_json() {
    init();
    let s = User::serializer();
    let dense = json!([1, "A", 0, 0, 0, 0, 0, [5, 6]]);
    let user = s.from_json_keep_unrecognized(&dense).unwrap();
    assert_eq!(s.to_json(&user, JsonFlavor::Dense), dense);
    // JSON-captured unknowns re-encode to the same bytes as the original.
    assert_eq!(
        s.to_bytes(&user).as_ref(),
        &with_magic(&[
            0xfa, 0x08, 0x01, 0xf3, 0x01, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf9, 0x05, 0x06,
        ])[..]
    );
    // Without preserve mode the suffix is dropped.
    let user = s.from_json(&dense).unwrap();
    assert!(user.unrecognized.is_empty());
}

#[test]
fn unknown_fields_never_cross_record_types() {
    init();
    let users = User::serializer();
    let bytes = with_magic(&[
        0xfa, 0x08, 0x01, 0xf3, 0x01, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf9, 0x05, 0x06,
    ]);
    let user = users.from_bytes_keep_unrecognized(&bytes).unwrap();

    // Smuggle the captured payload into a different record type.
    let mut point = Point::new(1, 2);
    point.unrecognized = user.unrecognized.clone();
    assert_eq!(
        Point::serializer().to_bytes(&point).as_ref(),
        &with_magic(&[0xf9, 0x01, 0x02])[..]
    );
}

#[test]
fn struct_readable_json() {
    init();
    let s = User::serializer();
    let user = User {
        id: 8,
        name: "Ana".to_string(),
        home: Point::new(1, 2),
        visited: vec![Point::new(3, 4)],
        nickname: Some("a".to_string()),
        created: Timestamp::from_unix_millis(1_692_999_034_586),
        unrecognized: UnrecognizedFields::default(),
    };
    assert_eq!(
        s.to_json(&user, JsonFlavor::Readable),
        json!({
            "id": 8,
            "name": "Ana",
            "home": {"x": 1, "y": 2},
            "visited": [{"x": 3, "y": 4}],
            "nickname": "a",
            "created": {
                "unix_millis": 1_692_999_034_586i64,
                "formatted": "2023-08-25T21:30:34.586Z",
            },
        })
    );
    // Readable decoding matches by name and ignores unknown keys.
    let decoded = s
        .from_json(&json!({"name": "Ana", "bogus": 1, "id": 8}))
        .unwrap();
    assert_eq!(decoded.name, "Ana");
    assert_eq!(decoded.id, 8);
    let round = s.from_json(&s.to_json(&user, JsonFlavor::Readable)).unwrap();
    assert_eq!(round, user);
}

#[test]
fn struct_dense_json_round_trip() {
    init();
    let s = User::serializer();
    let user = User {
        id: 8,
        name: "Ana".to_string(),
        home: Point::new(1, 2),
        visited: vec![Point::new(3, 4), Point::default()],
        nickname: None,
        created: Timestamp::from_unix_millis(5),
        unrecognized: UnrecognizedFields::default(),
    };
    let dense = s.to_json(&user, JsonFlavor::Dense);
    assert_eq!(
        dense,
        json!([8, "Ana", [1, 2], [[3, 4], []], 0, 0, 5])
    );
    assert_eq!(s.from_json(&dense).unwrap(), user);
    assert_eq!(s.from_bytes(&s.to_bytes(&user)).unwrap(), user);
}

#[test]
fn enum_constant_vectors() {
    init();
    let s = Weekday::serializer();
    assert_eq!(s.to_bytes(&Weekday::Monday).as_ref(), b"soia\x01");
    assert_eq!(s.to_bytes(&Weekday::Saturday).as_ref(), b"soia\x06");
    assert_eq!(s.to_bytes(&Weekday::default()).as_ref(), b"soia\x00");
    assert_eq!(s.from_bytes(b"soia\x01").unwrap(), Weekday::Monday);
    assert_eq!(s.from_bytes(b"soia\x00").unwrap(), Weekday::default());
    assert!(s.is_default(&Weekday::default()));
    assert!(!s.is_default(&Weekday::Monday));

    assert_eq!(s.to_json(&Weekday::Monday, JsonFlavor::Dense), json!(1));
    assert_eq!(s.to_json(&Weekday::Monday, JsonFlavor::Readable), json!("MONDAY"));
    assert_eq!(s.to_json(&Weekday::default(), JsonFlavor::Readable), json!("?"));
    assert_eq!(s.from_json(&json!("MONDAY")).unwrap(), Weekday::Monday);
    assert_eq!(s.from_json(&json!(2)).unwrap(), Weekday::Tuesday);
    // Readable inputs may be numeric.
    assert_eq!(s.from_json(&json!("2")).unwrap(), Weekday::Tuesday);
    assert_eq!(s.from_json(&json!("?")).unwrap(), Weekday::default());
}

#[test]
fn enum_value_variant_wire_branches() {
    init();
    let s = Shape::serializer();
    // Numbers 1..=4 use the single-byte discriminators.
    assert_eq!(
        s.to_bytes(&Shape::Circle(2.5)).as_ref(),
        &with_magic(&[0xfb, 0xf1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x40])[..]
    );
    // Numbers >= 5 take wire 248 followed by the number.
    assert_eq!(
        s.to_bytes(&Shape::Point(Point::new(1, 2))).as_ref(),
        &with_magic(&[0xf8, 0x05, 0xf9, 0x01, 0x02])[..]
    );
    assert_eq!(
        s.from_bytes(&with_magic(&[0xfb, 0xf1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x40]))
            .unwrap(),
        Shape::Circle(2.5)
    );
    assert_eq!(
        s.from_bytes(&with_magic(&[0xf8, 0x05, 0xf9, 0x01, 0x02])).unwrap(),
        Shape::Point(Point::new(1, 2))
    );
    assert_eq!(s.to_bytes(&Shape::Empty).as_ref(), b"soia\x02");
}

#[test]
fn enum_value_variant_json() {
    init();
    let s = Shape::serializer();
    assert_eq!(
        s.to_json(&Shape::Circle(2.5), JsonFlavor::Dense),
        json!([1, 2.5])
    );
    assert_eq!(
        s.to_json(&Shape::Circle(2.5), JsonFlavor::Readable),
        json!({"kind": "circle", "value": 2.5})
    );
    assert_eq!(s.from_json(&json!([1, 2.5])).unwrap(), Shape::Circle(2.5));
    assert_eq!(
        s.from_json(&json!({"kind": "circle", "value": 2.5})).unwrap(),
        Shape::Circle(2.5)
    );
    assert_eq!(
        s.from_json(&json!({"kind": "label", "value": "hi"})).unwrap(),
        Shape::Label("hi".to_string())
    );
    assert_eq!(
        s.to_json(&Shape::Label("hi".to_string()), JsonFlavor::Dense),
        json!([6, "hi"])
    );
}

#[test]
fn enum_number_must_match_variant_kind() {
    init();
    // A bare number naming a value variant fails.
    assert!(Shape::serializer().from_bytes(b"soia\x01").is_err());
    assert!(Shape::serializer().from_json(&json!(1)).is_err());
    // A payload attached to a constant fails.
    assert!(Weekday::serializer()
        .from_bytes(&with_magic(&[0xfb, 0x05]))
        .is_err());
    assert!(Weekday::serializer().from_json(&json!([1, 5])).is_err());
}

#[test]
fn enum_unknown_variants() {
    init();
    let s = Weekday::serializer();
    // Unknown constant number: dropped by default.
    assert_eq!(s.from_bytes(b"soia\x09").unwrap(), Weekday::default());
    // Removed number: dropped even in preserve mode.
    assert_eq!(
        s.from_bytes_keep_unrecognized(b"soia\x03").unwrap(),
        Weekday::default()
    );
    // Unknown number in preserve mode re-encodes verbatim.
    let preserved = s.from_bytes_keep_unrecognized(b"soia\x09").unwrap();
    assert!(!s.is_default(&preserved));
    assert_eq!(s.to_bytes(&preserved).as_ref(), b"soia\x09");

    // Unknown value variant with payload.
    let bytes = with_magic(&[0xf8, 0x09, 0xf3, 0x02, 0x68, 0x69]);
    let preserved = s.from_bytes_keep_unrecognized(&bytes).unwrap();
    assert_eq!(s.to_bytes(&preserved).as_ref(), &bytes[..]);
    assert_eq!(s.to_json(&preserved, JsonFlavor::Dense), json!([9, "hi"]));
    assert_eq!(s.to_json(&preserved, JsonFlavor::Readable), json!("?"));
    // And the same through dense JSON.
    let from_json = s.from_json_keep_unrecognized(&json!([9, "hi"])).unwrap();
    assert_eq!(s.to_bytes(&from_json).as_ref(), &bytes[..]);

    // Without preserve mode, the unknown collapses to UNKNOWN.
    assert_eq!(s.from_bytes(&bytes).unwrap(), Weekday::default());
}

#[test]
fn enum_unknowns_never_cross_record_types() {
    init();
    let weekday = Weekday::serializer()
        .from_bytes_keep_unrecognized(b"soia\x09")
        .unwrap();
    let Weekday::Unknown(payload) = weekday else {
        panic!("expected unknown variant");
    };
    // Same payload presented through a different enum encodes as UNKNOWN.
    assert_eq!(
        Shape::serializer().to_bytes(&Shape::Unknown(payload)).as_ref(),
        b"soia\x00"
    );
}

#[test]
fn nested_records_round_trip() {
    init();
    let s = User::serializer();
    let user = User {
        id: 1,
        name: "Bea".to_string(),
        home: Point::new(-3, 7),
        visited: vec![Point::new(1, 1), Point::new(2, 2), Point::new(3, 3)],
        nickname: Some(String::new()),
        created: Timestamp::from_unix_millis(-1),
        unrecognized: UnrecognizedFields::default(),
    };
    let bytes = s.to_bytes(&user);
    assert_eq!(s.from_bytes(&bytes).unwrap(), user);
    for flavor in [JsonFlavor::Dense, JsonFlavor::Readable] {
        let code = s.to_json_code(&user, flavor);
        assert_eq!(s.from_json_code(&code).unwrap(), user, "{flavor:?}: {code}");
    }
}

#[test]
fn duplicate_registration_is_an_error() {
    init();
    let result = init_module(
        "tests/records.soia",
        vec![StructRegistration::new(
            "Point",
            Point::serializer(),
            |p: &Point| &p.unrecognized,
            |p, u| p.unrecognized = u,
        )
        .into()],
    );
    assert!(matches!(result, Err(soia::Error::DuplicateRecord(_))));
}

#[test]
fn registration_validates_field_numbers() {
    init();

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Bad {
        a: i32,
        b: i32,
        unrecognized: UnrecognizedFields,
    }
    impl Bad {
        fn serializer() -> Serializer<Bad> {
            static SERIALIZER: Lazy<Serializer<Bad>> = Lazy::new(record_serializer);
            SERIALIZER.clone()
        }
    }

    let result = init_module(
        "tests/records_bad.soia",
        vec![StructRegistration::new(
            "Bad",
            Bad::serializer(),
            |x: &Bad| &x.unrecognized,
            |x, u| x.unrecognized = u,
        )
        .field("a", 1, soia::int32_serializer, |x| &x.a, |x, v| x.a = v)
        .field("b", 1, soia::int32_serializer, |x| &x.b, |x, v| x.b = v)
        .into()],
    );
    assert!(matches!(
        result,
        Err(soia::Error::DuplicateFieldNumber { number: 1, .. })
    ));
}
