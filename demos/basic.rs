//! Minimal end-to-end demo: open a cache, write some bytes, mark them
//! uploaded, close, and reopen to show recovery rehydrating the same state.

use tempfile::tempdir;
use walcache::{Cache, CacheConfig};

fn main() {
    env_logger::init();

    let dir = tempdir().expect("create temp dir");
    let config = CacheConfig::new(dir.path());

    {
        let cache = Cache::open(config.clone()).expect("open cache");
        cache
            .write(b"greeting", b"hello from walcache")
            .expect("write");
        cache
            .mark_block_uploaded(b"greeting", 0, 0)
            .expect("mark uploaded");
        println!("state before close: {:?}", cache.get_state(b"greeting"));
        cache.close().expect("close");
    }

    let cache = Cache::open(config).expect("reopen cache");
    let bytes = cache.read(b"greeting", 20).expect("read");
    println!(
        "recovered {:?} ({:?})",
        String::from_utf8_lossy(&bytes),
        cache.get_state(b"greeting")
    );
}
