//! `progcache inspect`: summarize the header and entries of a blob.

use progcache::codec::read_header;
use progcache::{CacheHeader, LoadOutcome, ProgramCache, ProgramRef};
use serde::Serialize;

use crate::context::{load_settings, offline_device, read_blob};
use crate::{GlobalArgs, InspectArgs, ReportFormat};

#[derive(Debug, Serialize)]
struct BlobReport {
    header_size: u32,
    header_version: u32,
    vendor_id: u32,
    device_id: u32,
    uuid: String,
    declared_entries: u32,
    entries: Vec<EntryReport>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct EntryReport {
    stage: &'static str,
    key_size: usize,
    code_size: usize,
    constant_size: usize,
    params: usize,
    system_values: usize,
    scratch: u32,
    xfb: bool,
    surfaces: usize,
    samplers: usize,
}

impl EntryReport {
    fn new(program: &ProgramRef) -> Self {
        let info = program.info();
        Self {
            stage: program.key().id().name(),
            key_size: program.key().data().len(),
            code_size: program.code_size(),
            constant_size: program.constant_data().len(),
            params: info.nr_params(),
            system_values: info.system_values.len(),
            scratch: info.total_scratch,
            xfb: program.xfb().is_some(),
            surfaces: program.bind_map().surfaces.len(),
            samplers: program.bind_map().samplers.len(),
        }
    }
}

fn build_report(
    header: &CacheHeader,
    declared: u32,
    cache: &ProgramCache,
    error: Option<String>,
) -> BlobReport {
    let mut programs = cache.entries();
    programs.sort_by(|a, b| {
        (a.key().id().as_raw(), a.key().data()).cmp(&(b.key().id().as_raw(), b.key().data()))
    });

    BlobReport {
        header_size: header.header_size,
        header_version: header.header_version,
        vendor_id: header.vendor_id,
        device_id: header.device_id,
        uuid: header.uuid.to_string(),
        declared_entries: declared,
        entries: programs.iter().map(EntryReport::new).collect(),
        error,
    }
}

fn render_text(report: &BlobReport) -> String {
    let mut out = format!(
        "header: size {} version {} device {:04x}:{:04x} uuid {}\n",
        report.header_size, report.header_version, report.vendor_id, report.device_id, report.uuid
    );
    out.push_str(&format!(
        "entries: {} declared, {} loaded\n",
        report.declared_entries,
        report.entries.len()
    ));
    for entry in &report.entries {
        out.push_str(&format!(
            "  {:<4} key {:>4}B  code {:>6}B  const {:>5}B  params {:>3}  scratch {:>6}  bindings {}/{}{}\n",
            entry.stage,
            entry.key_size,
            entry.code_size,
            entry.constant_size,
            entry.params,
            entry.scratch,
            entry.surfaces,
            entry.samplers,
            if entry.xfb { "  xfb" } else { "" },
        ));
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("error: {error}\n"));
    }
    out
}

/// Runs the `progcache inspect` command.
///
/// The blob is loaded under its own identity, so any device's blob can be
/// inspected. Returns exit code 1 if the entries did not all load.
pub fn run(args: &InspectArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_settings(global)?;
    let data = read_blob(&args.blob)?;
    let (header, declared) = read_header(&data)?;

    let device = offline_device(&config, header.identity());
    let cache = device.create_cache(None);
    let error = match cache.load(&data) {
        LoadOutcome::Loaded { .. } => None,
        LoadOutcome::Partial { error, .. } | LoadOutcome::Rejected(error) => Some(error.to_string()),
        LoadOutcome::Disabled => Some("cache disabled".to_string()),
    };
    let failed = error.is_some();

    let report = build_report(&header, declared, &cache, error);
    match args.format {
        ReportFormat::Text => print!("{}", render_text(&report)),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if failed { 1 } else { 0 })
}
