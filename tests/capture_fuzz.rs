//! Randomized exercising of the capture manager's exclusivity invariant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use verid::{
    CameraConstraints, CaptureKind, CaptureResourceManager, DeviceCapabilities, HeadlessPlatform,
    VerificationError,
};

fn headless_manager() -> CaptureResourceManager {
    CaptureResourceManager::new(
        Arc::new(HeadlessPlatform),
        DeviceCapabilities::default(),
        CameraConstraints::default(),
    )
}

#[tokio::test]
async fn randomized_acquire_release_never_leaks() {
    let manager = headless_manager();
    let mut rng = StdRng::seed_from_u64(0x1D5E);

    for _ in 0..1000 {
        let kind = if rng.gen_bool(0.5) {
            CaptureKind::Camera
        } else {
            CaptureKind::Nfc
        };
        let handle = manager.acquire(kind).await.unwrap();
        assert!(manager.is_held(kind));
        assert_eq!(
            manager.acquire(kind).await.unwrap_err(),
            VerificationError::CaptureBusy { kind }
        );

        // Handles free the slot whether released explicitly, twice, or
        // only by drop.
        match rng.gen_range(0..3) {
            0 => handle.release(),
            1 => {
                handle.release();
                handle.release();
            }
            _ => {}
        }
        drop(handle);
        assert!(!manager.is_held(kind));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_acquire_admits_one_holder_at_a_time() {
    let manager = Arc::new(headless_manager());
    let holders = Arc::new(AtomicUsize::new(0));
    let grants = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let holders = Arc::clone(&holders);
        let grants = Arc::clone(&grants);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                match manager.acquire(CaptureKind::Camera).await {
                    Ok(handle) => {
                        let live = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        assert_eq!(live, 1, "two holders of the camera at once");
                        grants.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        holders.fetch_sub(1, Ordering::SeqCst);
                        drop(handle);
                    }
                    Err(VerificationError::CaptureBusy { .. }) => {
                        tokio::task::yield_now().await;
                    }
                    Err(other) => panic!("unexpected error {other:?}"),
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(grants.load(Ordering::SeqCst) > 0);
    assert!(!manager.is_held(CaptureKind::Camera));
}
