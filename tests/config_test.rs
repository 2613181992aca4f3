//! Tests for config module

use std::time::Duration;

use upload_engine::{chunk_size_for, Category, Config, ConfigOptions, UploadMode};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[test]
fn test_config_default_values() {
    let config = Config::new(ConfigOptions::default()).unwrap();
    assert_eq!(config.mode, UploadMode::Standard);
    assert_eq!(config.upload_cutoff, 50 * MIB);
    assert_eq!(config.nohash_size, 100 * MIB);
    assert_eq!(config.min_chunk_size, 5 * MIB);
    assert_eq!(config.max_chunk_size, 5 * GIB);
    assert_eq!(config.max_chunk_count, 10_000);
    assert_eq!(config.hash_memory_threshold, 10 * MIB);
    assert_eq!(config.max_sign_rounds, 3);
    assert_eq!(config.request_timeout, Duration::from_secs(60));
}

#[test]
fn test_config_default_pacer() {
    let config = Config::new(ConfigOptions::default()).unwrap();
    assert_eq!(
        config.pacer.min_delay(Category::Listing),
        Duration::from_millis(250)
    );
    assert_eq!(
        config.pacer.min_delay(Category::DownloadLink),
        Duration::from_millis(300)
    );
    assert_eq!(
        config.pacer.min_delay(Category::Mutation),
        Duration::from_millis(250)
    );
    assert_eq!(config.pacer.max_delay, Duration::from_secs(2));
    assert_eq!(config.pacer.decay_constant, 2);
    assert_eq!(config.pacer.attack_constant, 1);
}

#[test]
fn test_config_default_retry() {
    let config = Config::new(ConfigOptions::default()).unwrap();
    assert_eq!(config.retry.max_attempts, 10);
    assert_eq!(config.retry.max_elapsed, Duration::from_secs(300));
    assert_eq!(config.retry.base_delay, Duration::from_millis(500));
    assert_eq!(config.retry.max_backoff, Duration::from_secs(30));
    assert_eq!(config.retry.throttle_delay, Duration::from_secs(5));
}

#[test]
fn test_config_overrides_applied() {
    let config = Config::new(ConfigOptions {
        mode: Some(UploadMode::FastUpload),
        upload_cutoff: Some(8 * MIB),
        bulk_transfer_delay: Some(Duration::from_millis(20)),
        pacer_max_delay: Some(Duration::from_secs(4)),
        retry_max_attempts: Some(4),
        throttle_delay: Some(Duration::from_secs(1)),
        chunk_attempts: Some(5),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(config.mode, UploadMode::FastUpload);
    assert_eq!(config.upload_cutoff, 8 * MIB);
    assert_eq!(
        config.pacer.min_delay(Category::BulkTransfer),
        Duration::from_millis(20)
    );
    assert_eq!(config.pacer.max_delay, Duration::from_secs(4));
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.throttle_delay, Duration::from_secs(1));
    assert_eq!(config.chunk_attempts, 5);
    // Untouched categories keep their defaults
    assert_eq!(
        config.pacer.min_delay(Category::UploadInit),
        Duration::from_millis(500)
    );
}

#[test]
fn test_config_rejects_zero_attempts() {
    let retry = Config::new(ConfigOptions {
        retry_max_attempts: Some(0),
        ..Default::default()
    });
    assert!(retry.unwrap_err().to_string().contains("max_attempts"));

    let chunk = Config::new(ConfigOptions {
        chunk_attempts: Some(0),
        ..Default::default()
    });
    assert!(chunk.unwrap_err().to_string().contains("chunk_attempts"));
}

#[test]
fn test_config_rejects_bad_chunk_limits() {
    assert!(Config::new(ConfigOptions {
        min_chunk_size: Some(0),
        ..Default::default()
    })
    .is_err());
    assert!(Config::new(ConfigOptions {
        max_chunk_count: Some(0),
        ..Default::default()
    })
    .is_err());
    assert!(Config::new(ConfigOptions {
        max_chunk_count: Some(u32::MAX as u64 + 1),
        ..Default::default()
    })
    .is_err());
}

#[test]
fn test_chunk_size_table() {
    assert_eq!(chunk_size_for(MIB), 16 * MIB);
    assert_eq!(chunk_size_for(128 * MIB), 32 * MIB);
    assert_eq!(chunk_size_for(300 * MIB), 64 * MIB);
    assert_eq!(chunk_size_for(GIB), 128 * MIB);
    assert_eq!(chunk_size_for(4 * GIB), 256 * MIB);
    assert_eq!(chunk_size_for(u64::MAX), 512 * MIB);
}

#[test]
fn test_upload_mode_display_roundtrip() {
    for mode in [
        UploadMode::Standard,
        UploadMode::DedupOnly,
        UploadMode::FastUpload,
        UploadMode::TransferOnly,
    ] {
        assert_eq!(UploadMode::from_str_lossy(&mode.to_string()), mode);
    }
}
