use std::fs::{self, File};
use std::io;
use std::path::Path;

use hotbundle_core::{Decompressor, UpdateError, UpdateResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipDecompressor;

impl Decompressor for ZipDecompressor {
    fn decompress(&self, archive: &Path, dest: &Path) -> UpdateResult<()> {
        let file =
            File::open(archive).map_err(|err| UpdateError::storage_at("open", archive, err))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|err| {
            UpdateError::Integrity(format!(
                "failed to open archive {}: {err}",
                archive.display()
            ))
        })?;

        fs::create_dir_all(dest).map_err(|err| UpdateError::storage_at("create", dest, err))?;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|err| {
                UpdateError::Integrity(format!(
                    "failed to read entry {index} of {}: {err}",
                    archive.display()
                ))
            })?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(UpdateError::Manifest(format!(
                    "archive entry escapes destination: {}",
                    entry.name()
                )));
            };
            let out_path = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)
                    .map_err(|err| UpdateError::storage_at("create", &out_path, err))?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| UpdateError::storage_at("create", parent, err))?;
            }
            let mut out_file = File::create(&out_path)
                .map_err(|err| UpdateError::storage_at("create", &out_path, err))?;
            io::copy(&mut entry, &mut out_file)
                .map_err(|err| UpdateError::storage_at("extract", &out_path, err))?;
        }

        Ok(())
    }
}
