//! `progcache verify`: check that blobs load cleanly.

use std::path::Path;

use progcache::LoadOutcome;
use progcache_common::DeviceIdentity;
use progcache_config::CacheConfig;

use crate::context::{blob_identity, load_settings, offline_device, read_blob};
use crate::{GlobalArgs, VerifyArgs};

/// Outcome of verifying one blob.
#[derive(Debug)]
enum Verdict {
    Ok { entries: usize },
    Failed(String),
}

fn verify_blob(config: &CacheConfig, identity: DeviceIdentity, data: &[u8]) -> Verdict {
    let cache = offline_device(config, identity).create_cache(None);
    match cache.load(data) {
        LoadOutcome::Loaded { entries } => Verdict::Ok { entries },
        LoadOutcome::Partial { entries, error } => {
            Verdict::Failed(format!("{error} after {entries} entries"))
        }
        LoadOutcome::Rejected(error) => Verdict::Failed(error.to_string()),
        LoadOutcome::Disabled => Verdict::Failed("cache disabled".to_string()),
    }
}

fn identity_for(
    adopt: bool,
    config: &CacheConfig,
    data: &[u8],
) -> Result<DeviceIdentity, Box<dyn std::error::Error>> {
    if adopt {
        blob_identity(data)
    } else {
        Ok(config.device.identity())
    }
}

/// Runs the `progcache verify` command.
///
/// Returns exit code 0 if every blob loaded completely, 1 otherwise.
pub fn run(args: &VerifyArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_settings(global)?;
    let mut failed = 0;

    for path in &args.blobs {
        let verdict = check_file(&config, args.adopt_identity, path)?;
        match verdict {
            Verdict::Ok { entries } => {
                if !global.quiet {
                    eprintln!("      ok {} ({entries} entries)", path.display());
                }
            }
            Verdict::Failed(reason) => {
                failed += 1;
                eprintln!("  failed {}: {reason}", path.display());
            }
        }
    }

    Ok(if failed > 0 { 1 } else { 0 })
}

fn check_file(
    config: &CacheConfig,
    adopt: bool,
    path: &Path,
) -> Result<Verdict, Box<dyn std::error::Error>> {
    let data = read_blob(path)?;
    Ok(match identity_for(adopt, config, &data) {
        Ok(identity) => verify_blob(config, identity, &data),
        Err(e) => Verdict::Failed(e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use progcache::{CacheId, CacheKey, CompiledOutput};
    use progcache_common::CacheUuid;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(0x8086, 0x1912, CacheUuid::from_bytes([8; 16]))
    }

    fn blob() -> Vec<u8> {
        let cache = offline_device(&CacheConfig::default(), identity()).create_cache(None);
        cache
            .upload(
                CacheKey::from_raw(CacheId::Blit, vec![1, 1]),
                CompiledOutput {
                    code: vec![5; 12],
                    ..Default::default()
                },
            )
            .unwrap();
        cache.serialize(None).data
    }

    #[test]
    fn matching_identity_passes() {
        let verdict = verify_blob(&CacheConfig::default(), identity(), &blob());
        assert!(matches!(verdict, Verdict::Ok { entries: 1 }));
    }

    #[test]
    fn configured_identity_mismatch_fails() {
        let config = CacheConfig::default();
        let data = blob();
        let configured = identity_for(false, &config, &data).unwrap();
        match verify_blob(&config, configured, &data) {
            Verdict::Failed(reason) => assert!(reason.contains("device_id")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn adopted_identity_checks_structure_only() {
        let config = CacheConfig::default();
        let data = blob();
        let adopted = identity_for(true, &config, &data).unwrap();
        assert_eq!(adopted, identity());
        assert!(matches!(
            verify_blob(&config, adopted, &data),
            Verdict::Ok { .. }
        ));

        let cut = &data[..data.len() - 2];
        assert!(matches!(
            verify_blob(&config, adopted, cut),
            Verdict::Failed(_)
        ));
    }

    #[test]
    fn unreadable_header_fails_file_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"xx").unwrap();
        let verdict = check_file(&CacheConfig::default(), true, &path).unwrap();
        assert!(matches!(verdict, Verdict::Failed(_)));
    }
}
