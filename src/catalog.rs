use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::CatalogError;
use crate::extract::has_port;
use crate::model::{EndpointInfo, ISP_UNKNOWN, REGION_UNKNOWN};

/// Entries grouped by region (lexicographic), each group in catalog order.
pub fn group<'a>(
    entries: impl IntoIterator<Item = &'a EndpointInfo>,
    prefer_port: bool,
) -> BTreeMap<String, Vec<&'a EndpointInfo>> {
    let mut groups: BTreeMap<String, Vec<&EndpointInfo>> = BTreeMap::new();
    for info in entries {
        groups.entry(clean(&info.region, REGION_UNKNOWN)).or_default().push(info);
    }
    for members in groups.values_mut() {
        if prefer_port {
            members.sort_by(|a, b| {
                has_port(&b.endpoint)
                    .cmp(&has_port(&a.endpoint))
                    .then_with(|| a.endpoint.cmp(&b.endpoint))
            });
        } else {
            members.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        }
    }
    groups
}

/// Catalog text: `endpoint#region-seq#isp`, a blank line after each region.
pub fn render<'a>(entries: impl IntoIterator<Item = &'a EndpointInfo>, prefer_port: bool) -> String {
    let mut out = String::new();
    for (region, members) in group(entries, prefer_port) {
        for (i, info) in members.iter().enumerate() {
            out.push_str(&format!(
                "{}#{}-{}#{}\n",
                info.endpoint,
                region,
                i + 1,
                clean(&info.isp, ISP_UNKNOWN)
            ));
        }
        out.push('\n');
    }
    out
}

/// Replace `path` with the rendered catalog. The previous file stays intact
/// until the new one is complete.
pub fn write<'a>(
    entries: impl IntoIterator<Item = &'a EndpointInfo>,
    path: &Path,
    prefer_port: bool,
) -> Result<(), CatalogError> {
    let text = render(entries, prefer_port);
    let io_err = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(target_dir(path)?).map_err(io_err)?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    info!("Catalog written to {:?} ({} lines)", path, text.lines().filter(|l| !l.is_empty()).count());
    Ok(())
}

/// Fails if `write` could not create its temporary file next to `path`.
pub fn ensure_writable(path: &Path) -> Result<(), CatalogError> {
    NamedTempFile::new_in(target_dir(path)?)
        .map(drop)
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn target_dir(path: &Path) -> Result<&Path, CatalogError> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(Path::new(".")),
        Some(p) => Ok(p),
        None => Err(CatalogError::NoParent {
            path: path.to_path_buf(),
        }),
    }
}

/// Field text that cannot break the line format.
fn clean(field: &str, fallback: &str) -> String {
    let cleaned = field.replace(['#', '\r', '\n'], " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}
