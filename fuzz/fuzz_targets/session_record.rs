#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(snapshot) = session_core::persist::from_binary(data) {
        let bytes = session_core::persist::to_binary(&snapshot);
        assert_eq!(session_core::persist::from_binary(&bytes).ok(), Some(snapshot));
    }
});
