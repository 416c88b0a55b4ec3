use std::fs;
use std::io::Read;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use zip::ZipArchive;

use crate::classfile::{Decoded, parse_unit};
use crate::error::{EntryError, EntryOutcome, SkipReason};
use crate::ir::{CallKind, CallSite, Method, Unit};
use crate::report::{JarScanResult, ModDescriptor, Report, parse_mod_metadata};

const ARCHIVE_EXTENSION: &str = "jar";
const CLASS_SUFFIX: &str = ".class";
const METADATA_ENTRY: &str = "mcmod.info";
const ENTRY_SIZE_MARGIN: u64 = 4;

/// Exact call signature the scanner looks for.
#[derive(Clone, Debug)]
pub(crate) struct ScanRule {
    call: CallSite,
}

impl ScanRule {
    pub(crate) fn new(call: CallSite) -> Self {
        Self { call }
    }

    /// `String.contains(CharSequence)` invoked virtually.
    pub(crate) fn string_contains() -> Self {
        Self::new(CallSite::new(
            "java/lang/String",
            "contains",
            "(Ljava/lang/CharSequence;)Z",
            CallKind::Virtual,
        ))
    }

    /// Whether `method` calls the rule's target; stops at the first hit.
    pub(crate) fn matches(&self, method: &Method) -> bool {
        method
            .instructions
            .iter()
            .filter_map(|instruction| instruction.call_site())
            .any(|call| *call == self.call)
    }

    /// Match identifiers for every method of `unit` containing the call, one per method.
    pub(crate) fn scan_unit(&self, unit: &Unit) -> Vec<String> {
        unit.methods
            .iter()
            .filter(|method| self.matches(method))
            .map(|method| method.match_id(&unit.name))
            .collect()
    }
}

/// Counters accumulated over a scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ScanStats {
    pub(crate) archives: usize,
    pub(crate) units: usize,
    pub(crate) partial_units: usize,
    pub(crate) oversized_entries: usize,
    pub(crate) failed_entries: usize,
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.archives += other.archives;
        self.units += other.units;
        self.partial_units += other.partial_units;
        self.oversized_entries += other.oversized_entries;
        self.failed_entries += other.failed_entries;
    }
}

/// Archive results in traversal order plus counters.
pub(crate) struct ScanOutput {
    pub(crate) jars: Vec<JarScanResult>,
    pub(crate) stats: ScanStats,
}

/// What one archive entry contributed.
#[derive(Debug)]
enum EntryFinding {
    Matches(Vec<String>),
    Metadata(Vec<ModDescriptor>),
    PartialMatches(Vec<String>),
}

/// Read-only walker over a directory of archives.
pub(crate) struct Scanner {
    rule: ScanRule,
    parallel: bool,
}

impl Scanner {
    pub(crate) fn new(rule: ScanRule) -> Self {
        Self {
            rule,
            parallel: false,
        }
    }

    pub(crate) fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Scan `root` and stamp the findings into a [`Report`].
    pub(crate) fn report(&self, root: &Path, platform_version: &str) -> Report {
        let output = self.scan(root);
        Report::new(platform_version, output.jars)
    }

    pub(crate) fn scan(&self, root: &Path) -> ScanOutput {
        let started_at = Instant::now();
        let mut archives = Vec::new();
        collect_archives(root, &mut archives);

        let scans: Vec<(Option<JarScanResult>, ScanStats)> = if self.parallel {
            archives
                .par_iter()
                .map(|path| self.scan_archive(root, path))
                .collect()
        } else {
            archives
                .iter()
                .map(|path| self.scan_archive(root, path))
                .collect()
        };

        let mut stats = ScanStats::default();
        let mut jars = Vec::new();
        for (result, archive_stats) in scans {
            stats += archive_stats;
            jars.extend(result);
        }
        log::info!(
            "scanned {} archive(s), {} class(es) in {}ms: \
             {} with matches, {} partial, {} oversized, {} unreadable",
            stats.archives,
            stats.units,
            started_at.elapsed().as_millis(),
            jars.len(),
            stats.partial_units,
            stats.oversized_entries,
            stats.failed_entries
        );
        ScanOutput { jars, stats }
    }

    fn scan_archive(&self, root: &Path, path: &Path) -> (Option<JarScanResult>, ScanStats) {
        let mut stats = ScanStats::default();
        let mut archive = match open_archive(path) {
            Ok(archive) => archive,
            Err(err) => {
                log::warn!("{err:#}, skip");
                return (None, stats);
            }
        };
        stats.archives += 1;

        let mut methods = Vec::new();
        let mut mods = Vec::new();
        for index in 0..archive.len() {
            let (entry_name, outcome) = match archive.by_index(index) {
                Ok(mut entry) => {
                    let name = entry.name().to_string();
                    let size = entry.size();
                    let outcome = self.scan_entry(&name, size, &mut entry);
                    (name, outcome)
                }
                Err(source) => {
                    let name = format!("entry #{index}");
                    let outcome = EntryOutcome::Failed(EntryError::Open {
                        entry: name.clone(),
                        source,
                    });
                    (name, outcome)
                }
            };
            match outcome {
                EntryOutcome::Scanned(EntryFinding::Matches(found)) => {
                    stats.units += 1;
                    methods.extend(found);
                }
                EntryOutcome::Scanned(EntryFinding::PartialMatches(found)) => {
                    stats.units += 1;
                    stats.partial_units += 1;
                    methods.extend(found);
                }
                EntryOutcome::Scanned(EntryFinding::Metadata(found)) => mods = found,
                EntryOutcome::Skipped(SkipReason::Oversized { declared }) => {
                    stats.oversized_entries += 1;
                    log::info!(
                        "class file {entry_name} ({declared} bytes) in {} is too large, skip",
                        path.display()
                    );
                }
                EntryOutcome::Skipped(SkipReason::NotRelevant) => {}
                EntryOutcome::Failed(err @ EntryError::Metadata { .. }) => {
                    mods = Vec::new();
                    log::info!("{err} in {}, skip", path.display());
                }
                EntryOutcome::Failed(err) => {
                    stats.failed_entries += 1;
                    log::info!("{err} in {}, skip", path.display());
                }
            }
        }

        let name = archive_name(root, path);
        (JarScanResult::new(name, methods, mods), stats)
    }

    fn scan_entry(
        &self,
        name: &str,
        declared_size: u64,
        reader: &mut impl Read,
    ) -> EntryOutcome<EntryFinding> {
        if name.ends_with(CLASS_SUFFIX) {
            if exceeds_entry_limit(declared_size) {
                return EntryOutcome::Skipped(SkipReason::Oversized {
                    declared: declared_size,
                });
            }
            let data = match read_entry(name, reader) {
                Ok(data) => data,
                Err(err) => return EntryOutcome::Failed(err),
            };
            match parse_unit(&data) {
                Ok(Decoded::Complete(unit)) => {
                    EntryOutcome::Scanned(EntryFinding::Matches(self.rule.scan_unit(&unit)))
                }
                Ok(Decoded::Partial { unit, error }) => {
                    log::info!(
                        "decoding of class {} failed ({error:#}), continuing with {} method(s)",
                        unit.name,
                        unit.methods.len()
                    );
                    EntryOutcome::Scanned(EntryFinding::PartialMatches(self.rule.scan_unit(&unit)))
                }
                Err(err) => EntryOutcome::Failed(EntryError::Undecodable {
                    entry: name.to_string(),
                    reason: format!("{err:#}"),
                }),
            }
        } else if name == METADATA_ENTRY {
            let data = match read_entry(name, reader) {
                Ok(data) => data,
                Err(err) => return EntryOutcome::Failed(err),
            };
            match parse_mod_metadata(&data) {
                Ok(mods) => EntryOutcome::Scanned(EntryFinding::Metadata(mods)),
                Err(err) => EntryOutcome::Failed(EntryError::Metadata {
                    entry: name.to_string(),
                    reason: format!("{err:#}"),
                }),
            }
        } else {
            EntryOutcome::Skipped(SkipReason::NotRelevant)
        }
    }
}

/// Entries whose declared size plus margin does not fit a signed 32-bit length are never read.
pub(crate) fn exceeds_entry_limit(declared_size: u64) -> bool {
    declared_size.saturating_add(ENTRY_SIZE_MARGIN) > i32::MAX as u64
}

fn read_entry(name: &str, reader: &mut impl Read) -> Result<Vec<u8>, EntryError> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|source| EntryError::Read {
            entry: name.to_string(),
            source,
        })?;
    Ok(data)
}

fn open_archive(path: &Path) -> Result<ZipArchive<fs::File>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
}

/// Depth-first walk collecting archive paths; directory listings are sorted.
fn collect_archives(dir: &Path, archives: &mut Vec<PathBuf>) {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) => {
            log::debug!("cannot list {}: {err}", dir.display());
            return;
        }
    };
    let mut entries: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            collect_archives(&entry, archives);
        } else if entry.is_file() && is_archive_path(&entry) {
            archives.push(entry);
        }
    }
}

fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false)
}

fn archive_name(root: &Path, path: &Path) -> String {
    path_key(path.strip_prefix(root).unwrap_or(path))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
