//! Writes a pattern across a few awkward ranges of a running array server
//! and reads it back through the block cache.
//!
//! Usage: `roundtrip [ip] [port]`.
use blockarray::{ArrayClient, ArrayConfig, LruCache};
use log::info;
use std::env;
use std::error::Error;

const RANGES: [(u32, usize); 4] = [
    // Touches blocks 0 to 2 of disk 0.
    (250, 300),
    // Ends on the last byte of disk 0.
    (65280, 256),
    // Crosses from disk 0 into disk 1.
    (65281, 256),
    // The last kilobyte of the array.
    (1_047_552, 1024),
];

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let ip = args.get(1).map(String::as_str).unwrap_or("127.0.0.1");
    let port = match args.get(2) {
        Some(port) => port.parse()?,
        None => 3333,
    };

    let mut client = ArrayClient::connect(ip, port, ArrayConfig::default(), LruCache::new(64)?)?;
    client.mount()?;

    for (i, &(addr, len)) in RANGES.iter().enumerate() {
        let data: Vec<u8> = (0..len).map(|b| (b as u8) ^ (i as u8 * 0x3b)).collect();
        client.write_at(addr, &data)?;

        let mut readback = vec![0; len];
        client.read_at(addr, &mut readback)?;
        if readback != data {
            return Err(format!("range {}+{} read back different bytes", addr, len).into());
        }
        info!("Range {}+{} verified.", addr, len);
    }

    client.cache().log_hit_rate();
    client.unmount()?;
    client.disconnect();
    Ok(())
}
