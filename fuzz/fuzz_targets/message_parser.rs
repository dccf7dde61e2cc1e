#![no_main]
use libfuzzer_sys::fuzz_target;

use std::{collections::VecDeque, fs::File, os::unix::io::OwnedFd};
use wayrt_backend::{
    protocol::{AllowNull, ArgumentType},
    wire::parse_message,
};

fn get_arg_types(data: &[u8]) -> [ArgumentType; 16] {
    use ArgumentType::*;

    let mut res = [Int; 16];
    assert_eq!(data.len(), 16);
    for (res, byte) in res.iter_mut().zip(data) {
        *res = match byte & 0b1111 {
            0 | 8 => Int,
            1 | 9 => Uint,
            2 | 10 => Fixed,
            3 => Str(AllowNull::No),
            11 => Str(AllowNull::Yes),
            4 => Object(AllowNull::No),
            12 => Object(AllowNull::Yes),
            5 | 13 => NewId,
            6 | 14 => Array,
            _ => Fd,
        }
    }
    res
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 17 {
        return;
    }
    // between 0 and 4 file descriptors are available
    let mut fds: VecDeque<OwnedFd> = (0..data[0] % 5)
        .filter_map(|_| File::open("/dev/null").ok().map(OwnedFd::from))
        .collect();
    // 16 `ArgumentType`s
    let args = get_arg_types(&data[1..17]);
    let mut raw = &data[17..];
    // parse as many messages as the buffer holds
    while let Ok((_, rest)) = parse_message(raw, &args, &mut fds) {
        if rest.len() >= raw.len() {
            break;
        }
        raw = rest;
    }
});
