//! wrapfs mount demo
//!
//! Builds an in-memory namespace with an ext4-like backing filesystem at
//! `/lower`, registers wrapfs, mounts it and prints the resulting instance:
//! 1. namespace setup
//! 2. wrapfs registration
//! 3. mount
//! 4. root and tier report
//! 5. unmount and unload

use std::sync::Arc;

use clap::Parser;
use wrapfs::pool::BuddyPool;
use wrapfs::vfs::{FileSystemRegistry, MountFlags, Namespace};
use wrapfs::{exit_wrapfs, init_wrapfs, MountRequest, WrapfsConfig, WrapfsEnv, WrapfsMountTable};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mount wrapfs over an in-memory namespace")]
struct Args {
    /// Lower directory to stack on.
    #[arg(long, default_value = "/lower")]
    lower: String,

    /// Mount point.
    #[arg(long, default_value = "/mnt/wrapfs")]
    target: String,

    /// Tier list, `label:/path,...`.
    #[arg(long)]
    tiers: Option<String>,

    /// JSON configuration document.
    #[arg(long)]
    config: Option<String>,

    /// Size of the memory pool backing wrapfs objects, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pool_bytes: usize,

    /// Suppress the mount message.
    #[arg(long)]
    silent: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(doc) => WrapfsConfig::from_json(doc).expect("bad config"),
        None => WrapfsConfig::default(),
    };

    println!("Step 1: namespace");
    let ns = Arc::new(Namespace::with_config(&config));
    ns.mkdir("/lower").expect("mkdir /lower");
    let lower_sb = ns
        .mount_backing("/lower", "ext4", 1 << 40)
        .expect("mount backing fs");
    for dir in ["/lower/ssd", "/lower/hdd", "/mnt"] {
        ns.mkdir(dir).expect("mkdir");
    }
    ns.symlink("/lower/fast", "/lower/ssd").expect("symlink");
    println!("  ext4 on /lower (dev {}), active {}\n", lower_sb.s_dev(), lower_sb.active());

    println!("Step 2: register wrapfs");
    let pool = Arc::new(BuddyPool::new(args.pool_bytes));
    let registry = FileSystemRegistry::new();
    let env = WrapfsEnv::new(ns.clone())
        .with_pool(pool.clone())
        .with_config(config);
    let fs = init_wrapfs(&registry, env).expect("register wrapfs");
    println!("  registered types: {:?}\n", registry.names());

    println!("Step 3: mount {} on {}", args.lower, args.target);
    let table = WrapfsMountTable::new();
    let mut request = MountRequest::new(&args.lower);
    if let Some(tiers) = &args.tiers {
        request = request.with_tiers(tiers);
    }
    if args.silent {
        request = request.with_flags(MountFlags::SILENT);
    }
    let sb = match fs.mount(&table, &args.target, &request) {
        Ok(sb) => sb,
        Err(e) => {
            println!("  mount failed: {} (errno {})", e, e.errno());
            std::process::exit(1);
        }
    };
    println!("  dev {}, maxbytes {}, lower active {}\n", sb.s_dev(), sb.s_maxbytes(), lower_sb.active());

    println!("Step 4: instance");
    let root = sb.root();
    if let Some(inode) = root.inode() {
        println!("  root ino {} ({:?}), revalidate {}", inode.ino(), inode.kind(), root.revalidate());
    }
    println!("  options: {}", sb.show_options());
    if let Some(tiers) = sb.tiers() {
        let report = serde_json::to_string_pretty(&tiers.report()).expect("serialize report");
        println!("  tiers: {}", report);
    }
    println!("  pool in use: {} bytes\n", pool.in_use());

    println!("Step 5: unmount and unload");
    drop(sb);
    fs.umount(&table, &args.target).expect("umount");
    exit_wrapfs(&registry, &fs).expect("unload");
    println!("  lower active {}, pool in use {} bytes", lower_sb.active(), pool.in_use());
}
