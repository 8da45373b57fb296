#![warn(missing_docs)]
#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]

mod containers;
mod descriptor;
mod error;
mod io;
mod primitives;
mod records;
mod rpc;
mod serializer;
mod timestamp;
mod wire;

pub use containers::{array_serializer, keyed_array_serializer, optional_serializer};
pub use descriptor::{
    parse_type_descriptor, Encoded, FieldDescriptor, Format, PrimitiveType, RecordDescriptor,
    RecordKind, TypeDescriptor,
};
pub use error::{Error, Result};
pub use primitives::{
    bool_serializer, bytes_serializer, float32_serializer, float64_serializer, int32_serializer,
    int64_serializer, string_serializer, timestamp_serializer, uint64_serializer,
};
pub use records::{
    init_module, record_serializer, EnumRegistration, Registration, StructRegistration,
    UnrecognizedEnum, UnrecognizedFields,
};
pub use rpc::{HttpMethod, Method, RpcResponse, Service, ServiceClient};
pub use serializer::{JsonFlavor, Serializer};
pub use timestamp::Timestamp;

#[cfg(test)]
mod test {
    use crate::JsonFlavor;

    #[test]
    fn seed_int32() {
        let s = crate::int32_serializer();
        assert_eq!(s.to_json_code(&232, JsonFlavor::Dense), "232");
        assert_eq!(s.to_bytes(&232).as_ref(), b"soia\xe8\xe8\x00");
        assert_eq!(s.from_bytes(b"soia\xe8\xe8\x00").unwrap(), 232);
    }

    #[test]
    fn seed_optional_null() {
        let s = crate::optional_serializer(crate::int32_serializer());
        assert_eq!(s.to_json_code(&None, JsonFlavor::Dense), "null");
        assert_eq!(s.to_bytes(&None).as_ref(), b"soia\xff");
        assert_eq!(s.from_bytes(b"soia\xff").unwrap(), None);
    }
}
