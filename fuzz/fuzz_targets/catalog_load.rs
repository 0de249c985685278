#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(catalog) = memstrata::Catalog::from_slice(data) {
        let names: Vec<String> = catalog.symbol_names().map(str::to_string).collect();
        for name in &names {
            let _ = catalog.resolve_symbol(name);
        }
        for name in ["pointer", "_EPROCESS", "task_struct"] {
            let _ = catalog.size_of_type(name);
        }
    }
});
