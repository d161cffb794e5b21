//! Integration tests for concurrent access to a shared cache.
//!
//! Many threads racing on the same key must end up sharing one program, and
//! identical code uploaded under different keys must share storage no matter
//! which key arrives first.

use std::sync::{Arc, Barrier};
use std::thread;

use progcache::{
    ArenaUploader, CacheId, CacheKey, CompiledOutput, ProgramCache, ProgramRef, StageInfo,
};
use progcache_common::{CacheUuid, DeviceIdentity};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn identity() -> DeviceIdentity {
    DeviceIdentity::new(0x8086, 0x4680, CacheUuid::from_bytes([0x42; 16]))
}

fn shared_cache() -> Arc<ProgramCache> {
    Arc::new(ProgramCache::new(
        identity(),
        Arc::new(ArenaUploader::new(16384, 64)),
        true,
    ))
}

fn output(code: &[u8], param: u32) -> CompiledOutput {
    CompiledOutput {
        code: code.to_vec(),
        info: StageInfo {
            params: vec![param],
            ..Default::default()
        },
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Insert-once
// ---------------------------------------------------------------------------

#[test]
fn racing_uploads_of_one_key_yield_one_program() {
    const THREADS: usize = 8;
    let cache = shared_cache();
    let barrier = Arc::new(Barrier::new(THREADS));
    let key = CacheKey::from_raw(CacheId::Fragment, vec![1, 2, 3, 4]);

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || -> ProgramRef {
                barrier.wait();
                match cache.search(&key) {
                    Some(hit) => hit,
                    None => cache
                        .upload(key, output(&[i as u8; 32], i as u32))
                        .unwrap(),
                }
            })
        })
        .collect();

    let results: Vec<ProgramRef> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(cache.len(), 1);
    let stored = cache.search(&key).unwrap();
    for program in &results {
        assert!(Arc::ptr_eq(program, &stored));
    }
}

#[test]
fn concurrent_distinct_keys_all_land() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;
    let cache = shared_cache();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = CacheKey::from_raw(CacheId::Vertex, vec![t as u8, i as u8]);
                    let code = vec![t as u8, i as u8, 0xff];
                    cache.upload(key, output(&code, 0)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.len(), THREADS * PER_THREAD);
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let key = CacheKey::from_raw(CacheId::Vertex, vec![t as u8, i as u8]);
            assert_eq!(cache.search(&key).unwrap().code(), vec![t as u8, i as u8, 0xff]);
        }
    }
}

#[test]
fn concurrent_search_while_merging() {
    let dst = shared_cache();
    let src = shared_cache();
    for i in 0..32u8 {
        src.upload(CacheKey::from_raw(CacheId::Compute, vec![i]), output(&[i; 8], 0))
            .unwrap();
    }

    let reader = {
        let dst = Arc::clone(&dst);
        thread::spawn(move || {
            for _ in 0..100 {
                for i in 0..32u8 {
                    if let Some(p) = dst.search(&CacheKey::from_raw(CacheId::Compute, vec![i])) {
                        assert_eq!(p.code(), vec![i; 8]);
                    }
                }
            }
        })
    };

    assert_eq!(dst.merge(&[&src]), 32);
    reader.join().unwrap();
    assert_eq!(dst.len(), 32);
}

// ---------------------------------------------------------------------------
// Content deduplication
// ---------------------------------------------------------------------------

#[test]
fn identical_code_shares_storage_in_either_order() {
    let code = b"identical machine code".to_vec();
    let a = CacheKey::from_raw(CacheId::Vertex, vec![0xa]);
    let b = CacheKey::from_raw(CacheId::Vertex, vec![0xb]);

    for (first, second) in [(&a, &b), (&b, &a)] {
        let cache = shared_cache();
        let p1 = cache.upload(first.clone(), output(&code, 1)).unwrap();
        let p2 = cache.upload(second.clone(), output(&code, 2)).unwrap();

        assert!(p1.code_region().same_storage(p2.code_region()));
        assert_eq!(p1.info().params, vec![1]);
        assert_eq!(p2.info().params, vec![2]);
        assert_eq!(cache.len(), 2);
    }
}

#[test]
fn dedup_spans_stages() {
    let cache = shared_cache();
    let vs = cache
        .upload(CacheKey::from_raw(CacheId::Vertex, vec![1]), output(b"same", 0))
        .unwrap();
    let cs = cache
        .upload(CacheKey::from_raw(CacheId::Compute, vec![1]), output(b"same", 0))
        .unwrap();
    assert!(vs.code_region().same_storage(cs.code_region()));
}

#[test]
fn different_code_gets_different_storage() {
    let cache = shared_cache();
    let a = cache
        .upload(CacheKey::from_raw(CacheId::Vertex, vec![1]), output(b"aaaa", 0))
        .unwrap();
    let b = cache
        .upload(CacheKey::from_raw(CacheId::Vertex, vec![2]), output(b"aaab", 0))
        .unwrap();
    assert!(!a.code_region().same_storage(b.code_region()));
}

// ---------------------------------------------------------------------------
// Key identity
// ---------------------------------------------------------------------------

#[test]
fn key_identity_needs_stage_length_and_bytes() {
    let cache = shared_cache();
    cache
        .upload(CacheKey::from_raw(CacheId::Vertex, vec![1, 2, 3]), output(b"x", 0))
        .unwrap();

    assert!(cache.search(&CacheKey::from_raw(CacheId::Vertex, vec![1, 2, 3])).is_some());
    assert!(cache.search(&CacheKey::from_raw(CacheId::Fragment, vec![1, 2, 3])).is_none());
    assert!(cache.search(&CacheKey::from_raw(CacheId::Vertex, vec![1, 2])).is_none());
    assert!(cache.search(&CacheKey::from_raw(CacheId::Vertex, vec![1, 2, 4])).is_none());
}
