use crate::common::{create_temp_file, PageTables};
use memstrata::config::{LayerSpec, SessionConfig};
use memstrata::layers::intel::PagingKind;
use memstrata::layers::MappedRange;
use memstrata::{Context, IntelLayer, Layer, PagingMode, StrataError};
use std::sync::Arc;

const DTB: u64 = 0x10000;
const HIGH_VA: u64 = 0xffff_8000_0000_1000;

/// Two virtually contiguous pages backed by scattered frames, a swapped-out
/// page, another resident page, and one kernel-half mapping.
fn tables() -> PageTables {
    let mut pt = PageTables::new(0x20000, DTB);
    pt.map(0x40_0000, 0x3000)
        .map(0x40_1000, 0x7000)
        .swap_out(0x40_2000, 0x1234_5000)
        .map(0x40_3000, 0x5000)
        .map(HIGH_VA, 0x9000);
    pt.image.bytes(0x3ffc, b"ABCD").bytes(0x7000, b"EFGH").bytes(0x5000, b"IJKL").bytes(0x9000, b"high");
    pt
}

fn virtual_layer() -> IntelLayer {
    IntelLayer::new("virtual", tables().physical("physical"), DTB, PagingMode::intel32e())
}

#[test]
fn read_spans_scattered_frames() {
    let layer = virtual_layer();
    assert_eq!(layer.read(0x40_0ffc, 8).unwrap(), b"ABCDEFGH");
    let t = layer.translate(0x40_1002).unwrap();
    assert_eq!(t.offset, 0x7002);
    assert_eq!(t.layer, "physical");
}

#[test]
fn read_into_swapped_page_reports_page_address() {
    let layer = virtual_layer();
    let err = layer.read(0x40_1ffe, 4).unwrap_err();
    assert!(err.is_paged());
    assert_eq!(err.address(), Some(0x40_2000));
    assert!(matches!(err, StrataError::PagedInvalidAddress { entry: 0x1234_5000, .. }));
}

#[test]
fn unmapped_address_is_not_paged() {
    let layer = virtual_layer();
    let err = layer.translate(0x7000_0000).unwrap_err();
    assert!(err.is_address_error());
    assert!(!err.is_paged());
}

#[test]
fn high_half_addresses_are_masked() {
    let layer = virtual_layer();
    let masked = HIGH_VA & layer.address_mask();
    assert_eq!(masked, 0x8000_0000_1000);
    assert_eq!(layer.translate(HIGH_VA).unwrap(), layer.translate(masked).unwrap());
    assert_eq!(layer.read(HIGH_VA, 4).unwrap(), b"high");
}

#[test]
fn mapped_ranges_coalesce_contiguous_pages() {
    let layer = virtual_layer();
    assert_eq!(
        layer.mapped_ranges(),
        vec![
            MappedRange { start: 0x40_0000, length: 0x2000 },
            MappedRange { start: 0x40_3000, length: 0x1000 },
            MappedRange { start: 0x8000_0000_1000, length: 0x1000 },
        ]
    );
}

#[test]
fn validity_and_padded_reads_respect_holes() {
    let layer = virtual_layer();
    assert!(layer.is_valid(0x40_0000, 0x2000));
    assert!(!layer.is_valid(0x40_1000, 0x2000));

    let padded = layer.read_padded(0x40_1ffc, 0x1008);
    assert_eq!(padded.len(), 0x1008);
    assert!(padded[4..0x1004].iter().all(|&b| b == 0));
    assert_eq!(&padded[0x1004..], b"IJKL");
}

#[test]
fn stacked_layers_translate_back_to_their_base() {
    let layer = virtual_layer();
    let base = layer.base().unwrap();
    assert_eq!(base.name(), "physical");
    let t = layer.translate(0x40_3010).unwrap();
    assert_eq!(base.read(t.offset, 1).unwrap(), layer.read(0x40_3010, 1).unwrap());
}

#[test]
fn context_builds_stack_from_config() {
    let capture = create_temp_file(&tables().image.data);
    let config = SessionConfig {
        layers: vec![
            LayerSpec::File {
                name: "physical".into(),
                path: capture.path().to_path_buf(),
            },
            LayerSpec::Intel {
                name: "virtual".into(),
                base_layer: "physical".into(),
                dtb: DTB,
                paging_mode: PagingKind::Intel32e,
            },
        ],
        ..SessionConfig::default()
    };
    let context = Context::from_config(&config).unwrap();
    assert_eq!(context.layer_names().collect::<Vec<_>>(), vec!["physical", "virtual"]);

    let t = context.translate("virtual", 0x40_0010).unwrap();
    assert_eq!(t.offset, 0x3010);
    assert_eq!(t.layer, "physical");
    assert!(matches!(context.layer("missing"), Err(StrataError::UnknownLayer(_))));
}

#[test]
fn duplicate_layer_names_are_rejected() {
    let mut context = Context::new();
    let physical = tables().physical("physical");
    context.add_layer(Arc::clone(&physical)).unwrap();
    assert!(matches!(context.add_layer(physical), Err(StrataError::DuplicateLayer(_))));
}
