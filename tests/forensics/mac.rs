use crate::common::{catalogs, Image};
use memstrata::aslr::{resolve_module, SignatureAnchor};
use memstrata::objects::utility::array_to_string;
use memstrata::os::mac::trustedbsd::UNKNOWN_MODULE;
use memstrata::os::mac::{list_modules, module_ranges, CheckTrustedBsd};
use memstrata::{CellValue, Context, Plugin};

const SLIDE: u64 = 0x3000;

/// A slid XNU image: version string, a three-slot policy list and a kext
/// list whose last entry points back at the first.
fn kernel(policy_name: u64) -> Image {
    let mut image = Image::new(0x10000);
    image.cstr(0x1000 + SLIDE, "Darwin Kernel Version 20.6.0");

    // _mac_policy_list: staticmax 2, entries at 0x5000
    let list = 0x1100 + SLIDE;
    image.u32(list + 8, 2).u64(list + 24, 0x5000);
    // slot 0 -> policy at 0x5100, slot 1 empty, slot 2 outside the capture
    image.u64(0x5000, 0x5100).u64(0x5008, 0).u64(0x5010, 0x0010_0000);
    image.u64(0x5100, policy_name).u64(0x5120, 0x5300);
    image.cstr(0x5200, "Sandbox");
    // The last handler sits exactly at the end of com.example.driver
    image.u64(0x5300, 0x8010).u64(0x5308, 0).u64(0x5310, 0x0dea_d000).u64(0x5318, 0x9100);

    // kmod -> 0x6000 -> 0x6100 -> 0x6000 (cycle)
    image.u64(0x1200 + SLIDE, 0x6000);
    image.u64(0x6000, 0x6100).cstr(0x6010, "com.apple.security.sandbox");
    image.u64(0x60a0, 0x8000).u64(0x60a8, 0x1000);
    image.u64(0x6100, 0x6000).cstr(0x6110, "com.example.driver");
    image.u64(0x61a0, 0x9000).u64(0x61a8, 0x100);
    image
}

fn context(image: &Image) -> Context {
    let mut context = Context::new();
    context.add_layer(image.layer("memory")).unwrap();
    context.add_catalog("xnu", catalogs::mac()).unwrap();
    context
}

#[test]
fn kext_list_walk_stops_on_cycle() {
    let context = context(&kernel(0x5200));
    let kernel = resolve_module(&context, "memory", "xnu", &SignatureAnchor::mac()).unwrap();
    assert_eq!(kernel.kernel_offset(), SLIDE as i64);

    let names: Vec<String> = list_modules(&kernel)
        .unwrap()
        .map(|kmod| array_to_string(&kmod.member("name").unwrap(), 64).unwrap())
        .collect();
    assert_eq!(names, vec!["com.apple.security.sandbox", "com.example.driver"]);

    let ranges = module_ranges(&kernel, 64).unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges.owner_of(0x90ff).unwrap().name, "com.example.driver");
    assert!(ranges.owner_of(0x9100).is_none());
    assert_eq!(ranges.owner_of_inclusive(0x9100).unwrap().name, "com.example.driver");
}

#[test]
fn handlers_are_attributed_to_their_module() {
    let context = context(&kernel(0x5200));
    let plugin = CheckTrustedBsd::new("memory", "xnu");
    let rows: Vec<Vec<CellValue>> = plugin
        .run(&context)
        .unwrap()
        .collect_rows()
        .unwrap()
        .into_iter()
        .map(|row| row.values)
        .collect();

    assert_eq!(
        rows,
        vec![
            vec![
                CellValue::Str("mpo_audit_check_postselect".into()),
                CellValue::Str("Sandbox".into()),
                CellValue::Str("com.apple.security.sandbox".into()),
                CellValue::Hex(0x8010),
            ],
            vec![
                CellValue::Str("mpo_bpfdesc_label_associate".into()),
                CellValue::Str("Sandbox".into()),
                CellValue::Str(UNKNOWN_MODULE.into()),
                CellValue::Hex(0x0dea_d000),
            ],
            vec![
                CellValue::Str("mpo_bpfdesc_label_destroy".into()),
                CellValue::Str("Sandbox".into()),
                CellValue::Str("com.example.driver".into()),
                CellValue::Hex(0x9100),
            ],
        ]
    );
    assert_eq!(CheckTrustedBsd::columns().len(), 4);
}

#[test]
fn unreadable_policy_name_is_not_applicable() {
    let context = context(&kernel(0x0020_0000));
    let plugin = CheckTrustedBsd::new("memory", "xnu");
    let rows = plugin.run(&context).unwrap().collect_rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.values[1] == CellValue::NotApplicable));
}
