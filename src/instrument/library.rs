// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Instrument library scanning.
//!
//! An instrument library is a directory with one subdirectory per
//! instrument, each containing an `instrument.sss` manifest next to its
//! sample files.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::manifest::parse_manifest;

/// The manifest file name every instrument directory must contain.
pub const MANIFEST_FILE_NAME: &str = "instrument.sss";

/// An instrument discovered in a library directory. Only metadata is read
/// during a scan; samples are decoded when the instrument is loaded.
#[derive(Debug, Clone)]
pub struct InstrumentInfo {
    /// Display name: the manifest's `meta/name`, or the folder name.
    pub name: String,
    /// The manifest's `meta/author`, if any.
    pub author: String,
    /// The instrument's directory.
    pub folder: PathBuf,
    /// Path to the `instrument.sss` manifest.
    pub manifest_path: PathBuf,
}

/// Scans a library directory for instruments, sorted by name
/// (case-insensitively). Subdirectories without a manifest are ignored;
/// manifests that fail to parse still list under their folder name so the
/// problem is visible to the user.
pub fn scan_instruments(library_dir: &Path) -> Result<Vec<InstrumentInfo>, Box<dyn Error>> {
    let mut instruments = Vec::new();

    let entries = fs::read_dir(library_dir)
        .map_err(|e| format!("error reading {}: {}", library_dir.display(), e))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let folder = entry.path();
        let manifest_path = folder.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            continue;
        }

        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (name, author) = match fs::read_to_string(&manifest_path)
            .map_err(Box::<dyn Error>::from)
            .and_then(|text| Ok(parse_manifest(&text)?))
        {
            Ok(manifest) => (
                manifest.name.unwrap_or_else(|| folder_name.clone()),
                manifest.author.unwrap_or_default(),
            ),
            Err(e) => {
                warn!(path = ?manifest_path, error = %e, "Unreadable instrument manifest");
                (folder_name.clone(), String::new())
            }
        };

        debug!(name, folder = ?folder, "Found instrument");
        instruments.push(InstrumentInfo {
            name,
            author,
            folder,
            manifest_path,
        });
    }

    instruments.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.folder.cmp(&b.folder))
    });
    Ok(instruments)
}
