#![no_main]

use bytes::BytesMut;
use framed_net::core::codec::MessageCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Fuzz frame decoding - test for panics, over-allocation, infinite loops
    let mut codec = MessageCodec::<u32>::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_msg)) = codec.decode(&mut buf) {}
});
