#![no_main]

use libfuzzer_sys::fuzz_target;
use scanmacho::{get_machomhflags, get_machomhtype, parse};

fuzz_target!(|data: &[u8]| {
    let Ok(parsed) = parse(data) else {
        return;
    };
    for image in parsed.images() {
        assert!(image.commands_size() <= image.header.sizeofcmds as usize);
        assert!(image.offset() + image.len() <= data.len());
        let _ = get_machomhtype(image.header.filetype);
        let _ = get_machomhflags(image.header.flags);
        for name in image.needed() {
            let _ = name.to_string_lossy();
        }
    }
});
