use crate::common::{catalogs, Image, PageTables};
use memstrata::objects::utility::{array_to_string, or_not_applicable, pointer_to_string, read_cstring, unicode_string};
use memstrata::objects::Field;
use memstrata::symbols::TypeRef;
use memstrata::{Catalog, CellValue, Context, IntelLayer, Object, PagingMode, StrataError, Value};
use serde_json::json;
use std::sync::Arc;

fn sample_catalog() -> Catalog {
    let doc = json!({
        "metadata": {},
        "base_types": {
            "pointer": {"kind": "int", "size": 8, "signed": false, "endian": "little"},
            "char": {"kind": "char", "size": 1, "signed": true, "endian": "little"},
            "unsigned int": {"kind": "int", "size": 4, "signed": false, "endian": "little"}
        },
        "user_types": {
            "_U": {"kind": "union", "size": 4, "fields": {
                "AsUlong": {"offset": 0, "type": {"kind": "base", "name": "unsigned int"}},
                "AsBytes": {"offset": 0, "type": {"kind": "array", "count": 4,
                    "subtype": {"kind": "base", "name": "char"}}}
            }},
            "_S": {"kind": "struct", "size": 24, "fields": {
                "Kind": {"offset": 0, "type": {"kind": "enum", "name": "_KIND"}},
                "Data": {"offset": 4, "type": {"kind": "union", "name": "_U"}},
                "Name": {"offset": 8, "type": {"kind": "pointer",
                    "subtype": {"kind": "base", "name": "char"}}},
                "Count": {"offset": 16, "type": {"kind": "bitfield", "bit_position": 3, "bit_length": 5,
                    "type": {"kind": "base", "name": "unsigned int"}}}
            }}
        },
        "enums": {
            "_KIND": {"base": "unsigned int", "size": 4, "constants": {"Event": 1, "Mutant": 2}}
        },
        "symbols": {
            "sample": {"address": 0x100, "type": {"kind": "struct", "name": "_S"}}
        }
    });
    Catalog::from_json_str(&doc.to_string()).unwrap()
}

fn sample_image() -> Image {
    let mut image = Image::new(0x1000);
    image
        .u32(0x100, 2)
        .bytes(0x104, b"WXYZ")
        .u64(0x108, 0x200)
        .u32(0x110, 0b1011_1000)
        .cstr(0x200, "abc");
    image.bytes(0x204, &[b'z'; 300]);
    image
}

#[test]
fn members_cover_exact_byte_ranges() {
    let layer = sample_image().layer("raw");
    let catalog = Arc::new(sample_catalog());
    let s = Object::cast(Arc::clone(&layer), 0x100, "_S", catalog).unwrap();

    let data = s.member("Data").unwrap();
    assert_eq!(data.offset(), 0x104);
    assert_eq!(data.bytes().unwrap(), layer.read(0x104, 4).unwrap());
    assert_eq!(s.bytes().unwrap().len(), 24);

    // Union members overlay the same bytes
    assert_eq!(data.read_u64("AsUlong").unwrap(), u32::from_le_bytes(*b"WXYZ") as u64);
    assert_eq!(data.member("AsBytes").unwrap().offset(), data.member("AsUlong").unwrap().offset());

    assert_eq!(s.read("Kind").unwrap().label(), Some("Mutant"));
    assert_eq!(s.read("Count").unwrap(), Value::UInt(0b10111));
    assert!(matches!(s.field("Data").unwrap(), Field::Object(_)));
}

#[test]
fn reads_go_back_to_the_layer() {
    let catalog = Arc::new(sample_catalog());
    let original = Object::cast(sample_image().layer("raw"), 0x100, "_S", Arc::clone(&catalog)).unwrap();

    let mut changed = sample_image();
    changed.u32(0x100, 1);
    let rebound = Object::new(changed.layer("raw"), original.offset(), original.type_ref().clone(), catalog);

    assert_eq!(original.read("Kind").unwrap().label(), Some("Mutant"));
    assert_eq!(rebound.read("Kind").unwrap().label(), Some("Event"));
    assert_eq!(original.read("Kind").unwrap(), original.read("Kind").unwrap());
}

#[test]
fn c_strings_stop_at_nul_or_limit() {
    let layer = sample_image().layer("raw");
    assert_eq!(read_cstring(layer.as_ref(), 0x200, 255).unwrap(), "abc");
    assert_eq!(read_cstring(layer.as_ref(), 0x204, 4).unwrap(), "zzzz");
    assert_eq!(read_cstring(layer.as_ref(), 0x204, 255).unwrap().len(), 255);

    let catalog = Arc::new(sample_catalog());
    let s = Object::cast(Arc::clone(&layer), 0x100, "_S", catalog).unwrap();
    assert_eq!(pointer_to_string(&s.member("Name").unwrap(), 255).unwrap(), "abc");
    assert!(pointer_to_string(&s.member("Name").unwrap(), 0).is_err());
}

#[test]
fn char_arrays_stop_at_nul_within_their_count() {
    let catalog = Arc::new(sample_catalog());
    // "abc\0" followed by non-NUL filler, ten chars declared
    let name = Object::array(sample_image().layer("raw"), 0x200, TypeRef::Base("char".into()), 10, catalog);
    assert_eq!(array_to_string(&name, 255).unwrap(), "abc");
    assert_eq!(array_to_string(&name, 2).unwrap(), "ab");

    let filler = name.at_offset(0x204);
    assert_eq!(array_to_string(&filler, 255).unwrap(), "zzzzzzzzzz");
}

#[test]
fn c_string_at_end_of_layer() {
    let mut image = Image::new(0x1000);
    image.bytes(0xffb, b"tail\0");
    let layer = image.layer("raw");
    assert_eq!(read_cstring(layer.as_ref(), 0xffb, 255).unwrap(), "tail");

    image.bytes(0xffb, b"tails");
    let layer = image.layer("raw");
    let err = read_cstring(layer.as_ref(), 0xffb, 255).unwrap_err();
    assert!(matches!(err, StrataError::InvalidAddress { .. }));
}

#[test]
fn pointer_into_paged_out_memory() {
    let mut pt = PageTables::new(0x20000, 0x10000);
    pt.map(0x40_0000, 0x3000).swap_out(0x40_2000, 0x0007_7000);
    pt.image.u32(0x3000, 1).u64(0x3008, 0x40_2010);
    let layer = Arc::new(IntelLayer::new(
        "virtual",
        pt.physical("physical"),
        0x10000,
        PagingMode::intel32e(),
    ));
    let s = Object::cast(layer, 0x40_0000, "_S", Arc::new(sample_catalog())).unwrap();
    let name = s.member("Name").unwrap();

    let err = pointer_to_string(&name, 255).unwrap_err();
    assert!(matches!(err, StrataError::PagedInvalidAddress { address: 0x40_2010, .. }));
    assert!(name.dereference().unwrap_err().is_paged());
    assert_eq!(or_not_applicable(pointer_to_string(&name, 255)).unwrap(), CellValue::NotApplicable);
    assert_eq!(
        or_not_applicable(s.read("Kind").map(|v| v.to_string())).unwrap(),
        CellValue::Str("Event".into())
    );
}

#[test]
fn counted_utf16_strings() {
    let mut image = Image::new(0x400);
    let length = image.utf16(0x100, "Hello");
    image.u16(0x10, length as u16).u16(0x12, length as u16).u64(0x18, 0x100);
    let catalog = Arc::new(catalogs::windows());
    let s = Object::cast(image.layer("raw"), 0x10, "_UNICODE_STRING", catalog).unwrap();
    assert_eq!(unicode_string(&s, 0x1000).unwrap(), "Hello");
    assert_eq!(unicode_string(&s, 4).unwrap(), "He");
}

#[test]
fn context_resolves_qualified_type_names() {
    let mut context = Context::new();
    context.add_layer(sample_image().layer("raw")).unwrap();
    context.add_catalog("sample", sample_catalog()).unwrap();
    context.add_catalog("nt", catalogs::windows()).unwrap();

    let s = context.object("nt", "raw", "sample!_S", 0x100).unwrap();
    assert_eq!(s.read("Kind").unwrap().label(), Some("Mutant"));
    let entry = context.object("nt", "raw", "_LIST_ENTRY", 0x108).unwrap();
    assert_eq!(entry.read_u64("Flink").unwrap(), 0x200);

    assert!(matches!(
        context.object("nt", "raw", "_S", 0),
        Err(StrataError::UnknownType(_))
    ));
    assert!(matches!(context.catalog("missing"), Err(StrataError::UnknownCatalog(_))));
}

#[test]
fn module_symbols_apply_the_kernel_offset() {
    let mut context = Context::new();
    context.add_layer(sample_image().layer("raw")).unwrap();
    context.add_catalog("sample", sample_catalog()).unwrap();

    let module = context.module("sample", "raw").unwrap();
    assert_eq!(module.object_from_symbol("sample").unwrap().offset(), 0x100);

    let shifted = module.clone().with_kernel_offset(-0x100);
    assert_eq!(shifted.symbol_address("sample").unwrap(), 0);
    let shifted = shifted.with_kernel_offset(-0x100);
    assert_eq!(shifted.symbol_address("sample").unwrap(), 0);
    assert!(matches!(module.symbol_address("nope"), Err(StrataError::UnknownSymbol(_))));
}
