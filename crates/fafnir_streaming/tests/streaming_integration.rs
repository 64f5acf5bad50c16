//! End-to-end streaming scenarios against real files.
//!
//! These walk the full path: TOML config, request, priority queue,
//! page-mapped load, budgets, references, expiry and teardown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fafnir_streaming::{
    ResourceCategory, ResourceId, ResourcePriority, ResourceRequest, ResourceState,
    StreamingAllocator, StreamingConfig,
};

fn temp_resource(tag: &str, bytes: &[u8]) -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("test_streaming_{tag}_{id}.bin"));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn test_config() -> StreamingConfig {
    StreamingConfig::from_toml_str(
        r#"
        max_concurrent_operations = 4
        cache_timeout_seconds = 5.0

        [budgets]
        geometry_bytes = 65536
        texture_bytes = 4096
        audio_bytes = 65536
        animation_bytes = 4096
        script_bytes = 4096
        "#,
    )
    .unwrap()
}

#[test]
fn test_full_load_access_unload_cycle() {
    let mesh = temp_resource("mesh", &[0x11u8; 1000]);
    let streaming = StreamingAllocator::new(test_config());

    let id = streaming.request_resource(
        ResourceRequest::new(ResourceId(1), &mesh, ResourceCategory::Geometry)
            .with_priority(ResourcePriority::High),
    );
    assert_eq!(streaming.resource_state(id), Some(ResourceState::Loading));

    streaming.update(0.016);
    assert_eq!(streaming.resource_state(id), Some(ResourceState::Resident));

    let checksum: u32 = streaming
        .access_resource(id, |bytes| bytes.iter().map(|&b| u32::from(b)).sum())
        .unwrap();
    assert_eq!(checksum, 0x11 * 1000);

    assert!(streaming.unload_resource(id));
    streaming.update(0.016);
    assert_eq!(streaming.resource_state(id), Some(ResourceState::Unloaded));
    assert_eq!(streaming.budgets().get(ResourceCategory::Geometry).used, 0);

    std::fs::remove_file(&mesh).ok();
}

#[test]
fn test_budgets_fail_independently() {
    // Texture budget is one page; geometry is generous.
    let big_texture = temp_resource("tex", &[0x22u8; 8192]);
    let small_mesh = temp_resource("mesh", &[0x33u8; 512]);
    let streaming = StreamingAllocator::new(test_config());

    let texture = streaming.request_resource(ResourceRequest::new(
        ResourceId(10),
        &big_texture,
        ResourceCategory::Texture,
    ));
    let mesh = streaming.request_resource(ResourceRequest::new(
        ResourceId(11),
        &small_mesh,
        ResourceCategory::Geometry,
    ));
    streaming.update(0.016);

    // The texture failed its budget; the sibling category is untouched.
    assert_eq!(streaming.resource_state(texture), Some(ResourceState::Failed));
    assert_eq!(streaming.resource_state(mesh), Some(ResourceState::Resident));
    assert_eq!(streaming.budgets().get(ResourceCategory::Texture).used, 0);
    assert!(streaming.budgets().get(ResourceCategory::Geometry).used > 0);

    std::fs::remove_file(&big_texture).ok();
    std::fs::remove_file(&small_mesh).ok();
}

#[test]
fn test_load_callback_sees_bytes() {
    let clip = temp_resource("anim", &[0x44u8; 128]);
    let streaming = StreamingAllocator::new(test_config());
    let seen = Arc::new(AtomicUsize::new(0));

    let seen_in_callback = Arc::clone(&seen);
    streaming.request_resource(
        ResourceRequest::new(ResourceId(20), &clip, ResourceCategory::Animation).with_callback(
            Box::new(move |_, bytes| {
                seen_in_callback.store(bytes.len(), Ordering::SeqCst);
            }),
        ),
    );
    streaming.update(0.016);

    // The callback saw the whole mapped range (page-rounded).
    assert!(seen.load(Ordering::SeqCst) >= 128);

    std::fs::remove_file(&clip).ok();
}

#[test]
fn test_idle_expiry_spares_the_protected() {
    let config = test_config();
    let a = temp_resource("a", &[1u8; 64]);
    let b = temp_resource("b", &[2u8; 64]);
    let c = temp_resource("c", &[3u8; 64]);
    let streaming = StreamingAllocator::new(config);

    let expiring = streaming.request_resource(
        ResourceRequest::new(ResourceId(30), &a, ResourceCategory::Geometry).with_auto_unload(),
    );
    let critical = streaming.request_resource(
        ResourceRequest::new(ResourceId(31), &b, ResourceCategory::Geometry)
            .with_priority(ResourcePriority::Critical)
            .with_auto_unload(),
    );
    let pinned = streaming.request_resource(
        ResourceRequest::new(ResourceId(32), &c, ResourceCategory::Geometry).with_auto_unload(),
    );
    streaming.update(0.016);
    assert!(streaming.reference_resource(pinned));

    // Idle well past the 5-second timeout.
    for _ in 0..10 {
        streaming.update(1.0);
    }

    assert_eq!(streaming.resource_state(expiring), Some(ResourceState::Unloaded));
    assert_eq!(streaming.resource_state(critical), Some(ResourceState::Resident));
    assert_eq!(streaming.resource_state(pinned), Some(ResourceState::Resident));
    assert_eq!(streaming.stats().expired, 1);

    std::fs::remove_file(&a).ok();
    std::fs::remove_file(&b).ok();
    std::fs::remove_file(&c).ok();
}

#[test]
fn test_distance_drives_load_order_as_reference_moves() {
    let mut config = test_config();
    config.max_concurrent_operations = 1;
    let near_file = temp_resource("near", &[1u8; 64]);
    let far_file = temp_resource("far", &[2u8; 64]);
    let streaming = StreamingAllocator::new(config);

    let far = streaming.request_resource(
        ResourceRequest::new(ResourceId(40), &far_file, ResourceCategory::Geometry)
            .with_position([5000.0, 0.0, 0.0]),
    );
    let near = streaming.request_resource(
        ResourceRequest::new(ResourceId(41), &near_file, ResourceCategory::Geometry)
            .with_position([50.0, 0.0, 0.0]),
    );

    // The player stands near the origin: the near resource wins the tick.
    streaming.set_reference_point([0.0, 0.0, 0.0]);
    streaming.update(0.016);
    assert_eq!(streaming.resource_state(near), Some(ResourceState::Resident));
    assert_eq!(streaming.resource_state(far), Some(ResourceState::Loading));

    streaming.update(0.016);
    assert_eq!(streaming.resource_state(far), Some(ResourceState::Resident));

    std::fs::remove_file(&near_file).ok();
    std::fs::remove_file(&far_file).ok();
}

#[test]
fn test_clear_non_critical_then_reload() {
    let a = temp_resource("clear_a", &[1u8; 64]);
    let b = temp_resource("clear_b", &[2u8; 64]);
    let streaming = StreamingAllocator::new(test_config());

    let ordinary = streaming.request_resource(ResourceRequest::new(
        ResourceId(50),
        &a,
        ResourceCategory::Geometry,
    ));
    let critical = streaming.request_resource(
        ResourceRequest::new(ResourceId(51), &b, ResourceCategory::Geometry)
            .with_priority(ResourcePriority::Critical),
    );
    streaming.update(0.016);

    assert_eq!(streaming.clear_non_critical(), 1);
    streaming.update(0.016);
    assert_eq!(streaming.resource_state(ordinary), Some(ResourceState::Unloaded));
    assert_eq!(streaming.resource_state(critical), Some(ResourceState::Resident));

    // The cleared resource comes back on request.
    streaming.request_resource(ResourceRequest::new(ordinary, &a, ResourceCategory::Geometry));
    streaming.update(0.016);
    assert_eq!(streaming.resource_state(ordinary), Some(ResourceState::Resident));

    std::fs::remove_file(&a).ok();
    std::fs::remove_file(&b).ok();
}
