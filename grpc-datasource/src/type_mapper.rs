//! Mapping between GraphQL types and protobuf field kinds.

use std::fmt;

use apollo_compiler::Schema;
use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use serde::Serialize;
use serde::Serializer;

use crate::mapping::EnumValueMapping;
use crate::mapping::GrpcMapping;

/// The protobuf kind of a message field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DataType {
    String,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    Bool,
    Bytes,
    Enum,
    Message,
    Unknown,
}

impl DataType {
    /// The kind of a GraphQL named type. List and non-null wrappers are described by
    /// [`TypeShape`] instead.
    pub fn from_named_type(schema: &Schema, type_name: &str) -> DataType {
        match type_name {
            "ID" | "String" => DataType::String,
            "Int" => DataType::Int32,
            "Float" => DataType::Double,
            "Boolean" => DataType::Bool,
            _ => match schema.types.get(type_name) {
                Some(ExtendedType::Scalar(_)) => DataType::String,
                Some(ExtendedType::Enum(_)) => DataType::Enum,
                Some(
                    ExtendedType::Object(_)
                    | ExtendedType::Interface(_)
                    | ExtendedType::Union(_)
                    | ExtendedType::InputObject(_),
                ) => DataType::Message,
                None => DataType::Unknown,
            },
        }
    }

    pub fn proto_type_name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::Bytes => "bytes",
            DataType::Enum => "enum",
            DataType::Message => "message",
            DataType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proto_type_name())
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.proto_type_name())
    }
}

/// Nullability of one level of a nested list.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LevelInfo {
    pub optional: bool,
}

/// Describes a list that protobuf represents with one wrapper message per level.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ListMetadata {
    pub nesting_level: usize,
    /// Outermost level first.
    pub level_info: Vec<LevelInfo>,
}

impl ListMetadata {
    pub fn is_optional(&self, level: usize) -> bool {
        self.level_info.get(level).is_some_and(|info| info.optional)
    }
}

/// How a GraphQL wrapped type is laid out on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeShape {
    /// A non-null single level list: a plain `repeated` field.
    pub repeated: bool,
    /// A nullable non-list value.
    pub optional: bool,
    /// Any other list, carried through wrapper messages.
    pub list_metadata: Option<ListMetadata>,
}

impl TypeShape {
    pub fn of(ty: &Type) -> TypeShape {
        let mut levels = Vec::new();
        let mut current = ty;
        loop {
            match current {
                Type::List(inner) => {
                    levels.push(LevelInfo { optional: true });
                    current = inner;
                }
                Type::NonNullList(inner) => {
                    levels.push(LevelInfo { optional: false });
                    current = inner;
                }
                Type::Named(_) | Type::NonNullNamed(_) => break,
            }
        }
        match levels.as_slice() {
            [] => TypeShape {
                repeated: false,
                optional: !ty.is_non_null(),
                list_metadata: None,
            },
            [LevelInfo { optional: false }] => TypeShape {
                repeated: true,
                optional: false,
                list_metadata: None,
            },
            _ => TypeShape {
                repeated: false,
                optional: false,
                list_metadata: Some(ListMetadata {
                    nesting_level: levels.len(),
                    level_info: levels,
                }),
            },
        }
    }
}

/// Translates enum values between GraphQL and protobuf through the configured tables.
///
/// Values missing from the table map to `None`, which callers render as `null`.
#[derive(Clone, Copy, Debug)]
pub struct EnumMapper<'a> {
    mapping: &'a GrpcMapping,
}

impl<'a> EnumMapper<'a> {
    pub fn new(mapping: &'a GrpcMapping) -> Self {
        Self { mapping }
    }

    pub fn to_target(&self, enum_name: &str, value: &str) -> Option<&'a str> {
        let values = self.mapping.enum_values(enum_name);
        find(values, |mapping| mapping.value == value)
            .or_else(|| find(values, |mapping| mapping.target_value == value))
            .map(|mapping| mapping.target_value.as_str())
    }

    pub fn to_graphql(&self, enum_name: &str, target_value: &str) -> Option<&'a str> {
        let values = self.mapping.enum_values(enum_name);
        find(values, |mapping| mapping.target_value == target_value)
            .or_else(|| find(values, |mapping| mapping.value == target_value))
            .map(|mapping| mapping.value.as_str())
    }
}

fn find(
    values: &[EnumValueMapping],
    predicate: impl Fn(&EnumValueMapping) -> bool,
) -> Option<&EnumValueMapping> {
    values.iter().find(|mapping| predicate(mapping))
}
