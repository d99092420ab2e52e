use std::process;

use rangedev::{Backend, Device, DeviceConfig};

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // arguments:
    // - "<url|config.json> <offset> <length>" to read through the device
    // - "<url> <offset> <length> <cache>" to read through a block cache
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 && args.len() != 5 {
        println!("Usage:");
        println!("  Without cache: {} <url> <offset> <length>", args[0]);
        println!("  With cache:    {} <url> <offset> <length> <cache>", args[0]);
        println!("  From config:   {} <config.json> <offset> <length>", args[0]);
        process::exit(1);
    }

    let config = if args[1].ends_with(".json") {
        match DeviceConfig::load(&args[1]) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                process::exit(1);
            }
        }
    } else {
        let mut config = DeviceConfig::new(args[1].clone());
        config.cache = args.get(4).map(Into::into);
        config
    };

    let (offset, length) = match (args[2].parse::<u64>(), args[3].parse::<usize>()) {
        (Ok(offset), Ok(length)) => (offset, length),
        _ => {
            eprintln!("Offset and length must be numbers");
            process::exit(1);
        }
    };

    let device = match Device::open(&config) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            process::exit(1);
        }
    };

    match device.size() {
        Ok(size) => println!("Device size: {} bytes", size),
        Err(e) => {
            eprintln!("Failed to query size: {}", e);
            process::exit(1);
        }
    }

    let mut buffer = vec![0u8; length];
    let n = match device.read_at(&mut buffer, offset) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Failed to read {} bytes at {}: {}", length, offset, e);
            process::exit(1);
        }
    };
    println!("Read {} bytes at {}", n, offset);
    for (i, line) in buffer[..n].chunks(16).take(8).enumerate() {
        let hex: Vec<String> = line.iter().map(|byte| format!("{:02x}", byte)).collect();
        println!("{:08x}  {}", offset + (i * 16) as u64, hex.join(" "));
    }

    if let Some(snapshot) = device.metrics() {
        snapshot.report();
        println!("Cache hits: {} of {} blocks", snapshot.hits, snapshot.total);
    }
}
