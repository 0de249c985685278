#![no_main]
use libfuzzer_sys::fuzz_target;
use memstrata::{BufferLayer, IntelLayer, Layer, PagingMode};
use std::sync::Arc;

// First 8 bytes pick the address, the rest is physical memory with its root
// table at offset 0.
fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let address = u64::from_le_bytes(data[..8].try_into().unwrap());
    let physical: Arc<dyn Layer> = Arc::new(BufferLayer::new("physical", bytes::Bytes::copy_from_slice(&data[8..])));
    for mode in [PagingMode::intel32(), PagingMode::pae(), PagingMode::intel32e()] {
        let layer = IntelLayer::new("virtual", Arc::clone(&physical), 0, mode);
        let _ = layer.translate(address);
        let _ = layer.read(address, 16);
    }
});
