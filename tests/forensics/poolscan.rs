use crate::common::{catalogs, Image};
use memstrata::config::{ScanConfig, SessionConfig};
use memstrata::os::windows::classes::InfoMask;
use memstrata::os::windows::{register_classes, KMutant, ListEntry, MutantScan, ObjectHeader, PoolScanner};
use memstrata::scanner::{scan, scan_parallel, StructureCheck};
use memstrata::{CellValue, Context, Object, Plugin};
use std::sync::Arc;

const TAG: &[u8] = b"Muta";

/// Lay out a mutant allocation at `pool` and return the body address.
///
/// Named mutants carry creator and name info headers, so the object header
/// sits 0x40 bytes past the pool header.
fn write_mutant(image: &mut Image, pool: u64, name: Option<(&str, u64)>) -> u64 {
    let (mask, header, blocks) = match name {
        Some(_) => (InfoMask::CREATOR_INFO | InfoMask::NAME_INFO, pool + 0x50, 12),
        None => (InfoMask::empty(), pool + 0x10, 8),
    };
    image.u8(pool + 2, blocks).u8(pool + 3, 2).bytes(pool + 4, TAG);
    image.u64(header, 1).u64(header + 8, 1).u8(header + 0x1a, mask.bits());
    if let Some((text, buffer)) = name {
        let name_info = pool + 0x10;
        let length = if (buffer as usize) < image.data.len() {
            image.utf16(buffer, text)
        } else {
            text.len() * 2
        };
        image
            .u16(name_info + 8, length as u16)
            .u16(name_info + 10, length as u16)
            .u64(name_info + 16, buffer);
    }
    header + 0x30
}

fn context(image: &Image, classed: bool, scan: ScanConfig) -> Context {
    let mut catalog = catalogs::windows();
    if classed {
        register_classes(&mut catalog).unwrap();
    }
    let mut context = Context::with_config(SessionConfig {
        scan,
        ..SessionConfig::default()
    });
    context.add_layer(image.layer("memory")).unwrap();
    context.add_catalog("nt", catalog).unwrap();
    context
}

fn pool_objects(context: &Context) -> Vec<(u64, u64)> {
    let catalog = context.catalog("nt").unwrap();
    let constraints = PoolScanner::builtin_constraints(catalog, &[TAG]).unwrap();
    PoolScanner::generate_pool_scan(context, "memory", "nt", constraints)
        .unwrap()
        .map(|found| (found.header.offset(), found.object.offset()))
        .collect()
}

#[test]
fn only_well_formed_allocations_are_reported() {
    let mut image = Image::new(0x3000);
    let body = write_mutant(&mut image, 0x1000, Some(("Gl0bal", 0x2000)));
    // Incidental tag with a block too small for a mutant
    image.u8(0x1802, 1).bytes(0x1804, TAG);
    // Tag whose pool header would run past the end of the capture
    image.u8(0x2ff8, 12).bytes(0x2ffa, TAG);

    let context = context(&image, true, ScanConfig::default());
    assert_eq!(body, 0x1080);
    assert_eq!(pool_objects(&context), vec![(0x1000, 0x1080)]);
}

#[test]
fn tags_straddling_window_seams_are_found_once() {
    let mut image = Image::new(0x2000);
    write_mutant(&mut image, 0x11fa, None);
    write_mutant(&mut image, 0x1400, None);
    let config = ScanConfig {
        chunk_size: 0x100,
        ..ScanConfig::default()
    };
    let context = context(&image, false, config.clone());
    assert_eq!(pool_objects(&context), vec![(0x11fa, 0x11fa + 0x40), (0x1400, 0x1440)]);

    let layer = Arc::clone(context.layer("memory").unwrap());
    let catalog = Arc::clone(context.catalog("nt").unwrap());
    let constraints = || PoolScanner::builtin_constraints(&catalog, &[TAG]).unwrap();
    let serial: Vec<u64> = scan(Arc::clone(&layer), Arc::clone(&catalog), constraints(), &config)
        .unwrap()
        .map(|hit| hit.offset)
        .collect();
    let parallel: Vec<u64> = scan_parallel(layer, Arc::clone(&catalog), constraints(), &config)
        .unwrap()
        .into_iter()
        .map(|hit| hit.offset)
        .collect();
    assert_eq!(serial, vec![0x11fe, 0x1404]);
    assert_eq!(serial, parallel);
}

#[test]
fn builtin_constraints_follow_the_catalog() {
    let catalog = catalogs::windows();
    let tags = [b"Muta".as_slice(), b"Proc".as_slice(), b"Zzzz".as_slice()];
    let constraints = PoolScanner::builtin_constraints(&catalog, &tags).unwrap();
    assert_eq!(constraints.len(), 1);
    let mutant = &constraints[0];
    assert_eq!(mutant.label, "Mutant");
    assert_eq!(mutant.tag_offset, 4);
    assert_eq!(mutant.body_type.as_deref(), Some("_KMUTANT"));
    assert!(matches!(
        &mutant.checks[..],
        [StructureCheck::MemberRange { member, min: 8, max: u64::MAX }] if member == "BlockSize"
    ));
}

fn mutant_rows(classed: bool) -> Vec<Vec<CellValue>> {
    let mut image = Image::new(0x3000);
    write_mutant(&mut image, 0x1000, Some(("Gl0bal", 0x2000)));
    write_mutant(&mut image, 0x1400, None);
    write_mutant(&mut image, 0x1800, Some(("Lost", 0x9000_0000)));
    let context = context(&image, classed, ScanConfig::default());

    let plugin = MutantScan::new("memory", "nt");
    let grid = plugin.run(&context).unwrap();
    assert_eq!(grid.columns(), MutantScan::columns().as_slice());
    grid.collect_rows().unwrap().into_iter().map(|row| row.values).collect()
}

#[test]
fn mutantscan_reports_names_or_sentinel() {
    let expected = vec![
        vec![CellValue::Hex(0x1080), CellValue::Str("Gl0bal".into())],
        vec![CellValue::Hex(0x1440), CellValue::Str(String::new())],
        vec![CellValue::Hex(0x1880), CellValue::NotApplicable],
    ];
    assert_eq!(mutant_rows(true), expected);
    assert_eq!(mutant_rows(false), expected);
    assert_eq!(MutantScan::NAME, "windows.mutantscan");
}

#[test]
fn classes_navigate_headers_and_lists() {
    let mut image = Image::new(0x3000);
    let first = write_mutant(&mut image, 0x1000, Some(("Gl0bal", 0x2000)));
    let second = write_mutant(&mut image, 0x1400, None);
    // head -> first.MutantListEntry -> second.MutantListEntry -> head
    image.u64(0x100, first + 0x18).u64(first + 0x18, second + 0x18).u64(second + 0x18, 0x100);
    let context = context(&image, true, ScanConfig::default());

    let mutant = context.object("nt", "memory", "_KMUTANT", first).unwrap();
    let classed = mutant.as_class::<KMutant>().unwrap();
    assert_eq!(classed.object_header().unwrap().offset(), 0x1050);
    assert_eq!(classed.name(64).unwrap().as_deref(), Some("Gl0bal"));

    let header = context.object("nt", "memory", "_OBJECT_HEADER", 0x1410).unwrap();
    let header = header.as_class::<ObjectHeader>().unwrap();
    assert!(header.name_info().unwrap().is_none());
    assert_eq!(header.body_as("_KMUTANT").unwrap().offset(), second);
    assert!(header.as_class::<KMutant>().is_none());

    let head = context.object("nt", "memory", "_LIST_ENTRY", 0x100).unwrap();
    let walk = head.as_class::<ListEntry>().unwrap().to_list("_KMUTANT", "MutantListEntry");
    let members: Vec<u64> = walk.map(|m| m.map(|m: Object| m.offset()).unwrap()).collect();
    assert_eq!(members, vec![first, second]);
}
