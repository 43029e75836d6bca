//! Serves an emulated device array over TCP, one client at a time.
//!
//! Usage: `array-server [port] [image]`. Without an image the disks live in
//! a temporary file and vanish on exit.
use blockarray::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use blockarray::server::DeviceArray;
use blockarray::Geometry;
use log::{error, info};
use std::env;
use std::error::Error;
use std::fs::OpenOptions;
use std::net::TcpListener;
use std::path::Path;

const DEFAULT_PORT: u16 = 3333;

fn open_storage(image: Option<&String>, geometry: &Geometry) -> std::io::Result<FileBlockEmulator> {
    let block_size = geometry.block_size() as usize;
    let blocks = geometry.total_blocks();
    match image {
        Some(path) if Path::new(path).exists() => {
            info!("Reopening disk image {}.", path);
            FileBlockEmulator::open_disk(path, block_size, blocks)
        }
        Some(path) => {
            info!("Creating disk image {}.", path);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)?;
            FileBlockEmulatorBuilder::from(file)
                .with_block_size(block_size)
                .with_block_count(blocks)
                .build()
        }
        None => FileBlockEmulatorBuilder::from(tempfile::tempfile()?)
            .with_block_size(block_size)
            .with_block_count(blocks)
            .build(),
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let port = match args.get(1) {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let geometry = Geometry::default();
    let storage = open_storage(args.get(2), &geometry)?;
    let mut array = DeviceArray::new(storage, geometry)?;

    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(
        "Serving {} disks of {} blocks on port {}.",
        geometry.disks(),
        geometry.blocks_per_disk(),
        port
    );
    loop {
        if let Err(e) = array.serve_one(&listener) {
            error!("Connection failed: {}", e);
        }
    }
}
