#![no_main]
use libfuzzer_sys::fuzz_target;

// First two bytes pick the highest position; the rest is the token text.
// Highest stays small so a long run cannot allocate a huge bitmap.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let highest = u32::from(u16::from_le_bytes([data[0], data[1]])) & 0x3fff;
    let Ok(token) = std::str::from_utf8(&data[2..]) else {
        return;
    };
    if let Ok(bitmap) = dyn_codec::decode(token, highest) {
        let again = dyn_codec::encode(&bitmap);
        assert_eq!(dyn_codec::decode(again.as_str(), bitmap.highest()).ok(), Some(bitmap));
    }
});
