//! Asset Hot-Reloading Demo
//!
//! Watches a directory and prints a line whenever `demo.txt` changes:
//! - The file system manager installs its watcher on the first load
//! - Watcher threads queue reloads on the dispatch queue
//! - The main loop drains the queue once per tick, running the listeners
//!
//! Usage: `cargo run -p relic-assets --example hot_reload -- [directory]`,
//! then edit `<directory>/demo.txt`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relic_assets::{AssetHandle, FileSystemAssetManager, registry};
use relic_core::dispatch::MainThreadRunner;

fn main() {
    relic_core::logging::init();

    let directory = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assets"));
    let demo = directory.join("demo.txt");
    if !demo.exists() {
        std::fs::create_dir_all(&directory).expect("Failed to create asset directory");
        std::fs::write(&demo, "Edit this file while the demo runs.\n").expect("Failed to write demo.txt");
    }

    let mut runner = MainThreadRunner::new();
    runner.enable();

    let assets = FileSystemAssetManager::new(&directory);
    registry::register("demo", &assets).expect("Failed to register asset manager");

    let text = registry::load::<String>("demo:/demo").expect("Failed to load demo.txt");
    println!("Loaded demo.txt:\n{}", text);

    let handle = registry::get_handle("demo:/demo")
        .expect("Failed to look up demo.txt")
        .expect("demo.txt disappeared");
    handle.add_listener(Arc::new(|handle: &AssetHandle| match handle.get::<String>() {
        Some(text) => println!("demo.txt reloaded (version {}):\n{}", handle.version(), text),
        None => println!("demo.txt was removed (version {})", handle.version()),
    }));

    println!("Watching {} - press Ctrl+C to exit", directory.display());
    loop {
        if let Err(e) = runner.run_pending() {
            tracing::error!("Reload failed: {}", e);
        }
        relic_core::profiling::new_frame();
        std::thread::sleep(Duration::from_millis(100));
    }
}
