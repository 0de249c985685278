//! Intermediate Symbol Format (ISF) document model.
//!
//! ISF is a JSON document with four mandatory sections (`base_types`,
//! `user_types`, `enums`, `symbols`) and a free-form `metadata` block.
//! These structs mirror the document one-to-one; conversion into the
//! catalog's own types happens in `Catalog::from_document`.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(crate) struct IsfDocument {
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub base_types: BTreeMap<String, IsfBaseType>,
    pub user_types: BTreeMap<String, IsfUserType>,
    pub enums: BTreeMap<String, IsfEnum>,
    pub symbols: BTreeMap<String, IsfSymbol>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsfBaseType {
    pub kind: String,
    pub size: u64,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_endian")]
    pub endian: String,
}

fn default_endian() -> String {
    "little".to_string()
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsfUserType {
    pub kind: String,
    pub size: u64,
    pub fields: BTreeMap<String, IsfField>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsfField {
    pub offset: u64,
    #[serde(rename = "type")]
    pub type_desc: IsfTypeDescriptor,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum IsfTypeDescriptor {
    Base {
        name: String,
    },
    Pointer {
        subtype: Box<IsfTypeDescriptor>,
    },
    Array {
        count: u64,
        subtype: Box<IsfTypeDescriptor>,
    },
    Bitfield {
        bit_position: u32,
        bit_length: u32,
        #[serde(rename = "type")]
        base: Box<IsfTypeDescriptor>,
    },
    Struct {
        name: String,
    },
    Union {
        name: String,
    },
    Class {
        name: String,
    },
    Enum {
        name: String,
    },
    Function {},
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsfEnum {
    pub base: String,
    pub size: u64,
    pub constants: BTreeMap<String, i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsfSymbol {
    pub address: u64,
    #[serde(rename = "type", default)]
    pub type_desc: Option<IsfTypeDescriptor>,
    /// Base64-encoded bytes
    #[serde(default)]
    pub constant_data: Option<String>,
}
