#![no_main]

use framed_net::core::message::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz body extraction with arbitrary widths
    if data.is_empty() {
        return;
    }

    let (widths, body) = data.split_at(data.len() / 2);
    let Ok(mut msg) = Message::<u32>::from_parts(0, body.to_vec()) else {
        return;
    };
    for width in widths {
        let before = msg.body_len();
        match width % 4 {
            0 => drop(msg.pop::<u8>()),
            1 => drop(msg.pop::<u16>()),
            2 => drop(msg.pop::<u32>()),
            _ => drop(msg.pop::<u64>()),
        }
        assert!(msg.body_len() <= before);
        assert_eq!(msg.header().size as usize, msg.body_len());
    }
});
