//! `progcache merge`: combine several blobs into one.

use std::path::Path;

use progcache::{LoadOutcome, ProgramCache};

use crate::context::{blob_identity, load_settings, offline_device, read_blob};
use crate::{GlobalArgs, MergeArgs};

/// Loads every input into its own cache and merges them into `target` in
/// order. Returns the number of inputs that did not load completely.
fn merge_blobs(
    target: &ProgramCache,
    inputs: &[(&Path, Vec<u8>)],
    make: impl Fn() -> ProgramCache,
) -> usize {
    let mut failures = 0;
    let mut sources = Vec::with_capacity(inputs.len());

    for (path, data) in inputs {
        let cache = make();
        match cache.load(data) {
            LoadOutcome::Loaded { entries } => {
                tracing::debug!(path = %path.display(), entries, "loaded input");
            }
            LoadOutcome::Partial { entries, error } => {
                tracing::warn!(path = %path.display(), entries, %error, "input partially loaded");
                failures += 1;
            }
            LoadOutcome::Rejected(error) => {
                tracing::warn!(path = %path.display(), %error, "input rejected");
                failures += 1;
            }
            LoadOutcome::Disabled => failures += 1,
        }
        sources.push(cache);
    }

    let refs: Vec<&ProgramCache> = sources.iter().collect();
    target.merge(&refs);
    failures
}

/// Runs the `progcache merge` command.
///
/// Returns exit code 1 if any input was rejected or damaged; the output is
/// still written with whatever loaded.
pub fn run(args: &MergeArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_settings(global)?;

    let mut inputs = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        inputs.push((path.as_path(), read_blob(path)?));
    }

    let identity = match (args.adopt_identity, inputs.first()) {
        (true, Some((_, data))) => blob_identity(data)?,
        _ => config.device.identity(),
    };
    let device = offline_device(&config, identity);
    let target = device.create_cache(None);

    let failures = merge_blobs(&target, &inputs, || device.create_cache(None));

    let blob = target.serialize(None);
    std::fs::write(&args.output, &blob.data)
        .map_err(|e| format!("cannot write {}: {e}", args.output.display()))?;

    if !global.quiet {
        eprintln!(
            "    Merged {} entries from {} blobs into {}",
            blob.entry_count,
            inputs.len(),
            args.output.display()
        );
    }

    Ok(if failures > 0 { 1 } else { 0 })
}
