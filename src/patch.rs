use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use zip::ZipArchive;

use crate::classfile::{Decoded, parse_unit};
use crate::transform::{RewrittenMethod, Transformer};

/// Units changed by a patch run, in input order.
#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct PatchOutput {
    pub(crate) units: Vec<PatchedUnit>,
    pub(crate) class_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct PatchedUnit {
    pub(crate) source: String,
    pub(crate) name: String,
    pub(crate) methods: Vec<RewrittenMethod>,
}

/// Run `transform` over a class file, a jar, or a directory of either.
///
/// Only a top-level input that cannot be read is an error. Unreadable or
/// undecodable entries below it are logged and skipped.
pub(crate) fn patch_inputs(input: &Path, transform: &impl Transformer) -> Result<PatchOutput> {
    let mut output = PatchOutput::default();
    patch_path(input, true, transform, &mut output)?;
    Ok(output)
}

fn patch_path(
    path: &Path,
    strict: bool,
    transform: &impl Transformer,
    output: &mut PatchOutput,
) -> Result<()> {
    let result = if path.is_dir() {
        patch_dir(path, transform, output)
    } else {
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "class" => fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))
                .map(|data| patch_class(&path.to_string_lossy(), None, &data, transform, output)),
            "jar" => patch_jar(path, transform, output),
            _ if strict => Err(anyhow::anyhow!("unsupported input file: {}", path.display())),
            _ => Ok(()),
        }
    };
    match result {
        Err(err) if !strict => {
            log::warn!("skipping {}: {err:#}", path.display());
            Ok(())
        }
        other => other,
    }
}

fn patch_dir(path: &Path, transform: &impl Transformer, output: &mut PatchOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read directory {}", path.display()))?
    {
        match entry {
            Ok(entry) => entries.push(entry.path()),
            Err(err) => log::warn!("skipping entry under {}: {err}", path.display()),
        }
    }
    entries.sort();

    for entry in entries {
        patch_path(&entry, false, transform, output)?;
    }
    Ok(())
}

fn patch_jar(path: &Path, transform: &impl Transformer, output: &mut PatchOutput) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("{}: skipping entry #{index}: {err}", path.display());
                continue;
            }
        };
        let name = entry.name().to_string();
        let Some(unit_name) = name.strip_suffix(".class") else {
            continue;
        };
        // Same pre-filter a loader hook applies before handing bytes over.
        if !transform.accepts(unit_name) {
            output.class_count += 1;
            continue;
        }
        let source = format!("{}!/{}", path.display(), name);
        let mut data = Vec::new();
        if let Err(err) = entry.read_to_end(&mut data) {
            output.class_count += 1;
            log::warn!("{source}: read failed ({err}), not patched");
            continue;
        }
        patch_class(&source, Some(unit_name), &data, transform, output);
    }
    Ok(())
}

fn patch_class(
    source: &str,
    expected_name: Option<&str>,
    data: &[u8],
    transform: &impl Transformer,
    output: &mut PatchOutput,
) {
    output.class_count += 1;
    let mut unit = match parse_unit(data) {
        Ok(Decoded::Complete(unit)) => unit,
        Ok(Decoded::Partial { unit, error }) => {
            log::warn!("{source}: decoding of class {} failed ({error:#}), not patched", unit.name);
            return;
        }
        Err(err) => {
            log::warn!("{source}: {err:#}, not patched");
            return;
        }
    };
    if let Some(expected) = expected_name {
        if expected != unit.name {
            log::warn!("{source} declares class {}, expected {expected}", unit.name);
        }
    }
    if !transform.accepts(&unit.name) {
        return;
    }

    let methods = transform.apply(&mut unit);
    if !methods.is_empty() {
        output.units.push(PatchedUnit {
            source: source.to_string(),
            name: unit.name,
            methods,
        });
    }
}
