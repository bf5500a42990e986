//! Reproducible archive creation.
//!
//! Identical directory contents always produce byte-identical archives:
//! entries are written in sorted path order under a single root folder,
//! with fixed timestamps, permissions and ownership.

use gantry_core::workflow::ArchiveFormat;
use gantry_core::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

const ZSTD_LEVEL: i32 = 3;
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// One filesystem entry to archive, relative to the source directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub relative: String,
    pub absolute: PathBuf,
    pub is_dir: bool,
}

/// Walk `source` and return its entries in sorted order.
///
/// Relative paths always use `/` as separator regardless of platform.
pub fn collect_entries(source: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    walk(source, source, &mut entries)?;
    entries.sort();
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<Entry>) -> Result<()> {
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        let file_type = item.file_type()?;
        let relative = path
            .strip_prefix(root)
            .map_err(|e| Error::Archive(format!("{}: {}", path.display(), e)))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if file_type.is_dir() {
            entries.push(Entry {
                relative,
                absolute: path.clone(),
                is_dir: true,
            });
            walk(root, &path, entries)?;
        } else if file_type.is_file() {
            entries.push(Entry {
                relative,
                absolute: path,
                is_dir: false,
            });
        }
    }
    Ok(())
}

/// Create an archive of `source` at `output`, rooted at `root_name/`.
pub fn create_archive(
    source: &Path,
    output: &Path,
    root_name: &str,
    format: ArchiveFormat,
) -> Result<()> {
    let entries = collect_entries(source)?;
    let file = File::create(output)
        .map_err(|e| Error::Archive(format!("failed to create {}: {}", output.display(), e)))?;

    match format {
        ArchiveFormat::Zip => write_zip(file, root_name, &entries),
        ArchiveFormat::TarZst => write_tar_zst(BufWriter::new(file), root_name, &entries),
    }
}

fn write_zip<W: Write + Seek>(writer: W, root_name: &str, entries: &[Entry]) -> Result<()> {
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, DateTime, ZipWriter};

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut zip = ZipWriter::new(writer);

    zip.add_directory(format!("{}/", root_name), options.unix_permissions(DIR_MODE))
        .map_err(|e| Error::Archive(format!("zip: {}", e)))?;

    for entry in entries {
        let name = format!("{}/{}", root_name, entry.relative);
        if entry.is_dir {
            zip.add_directory(format!("{}/", name), options.unix_permissions(DIR_MODE))
                .map_err(|e| Error::Archive(format!("zip: {}", e)))?;
        } else {
            zip.start_file(name, options.unix_permissions(FILE_MODE))
                .map_err(|e| Error::Archive(format!("zip: {}", e)))?;
            let mut source = File::open(&entry.absolute)?;
            std::io::copy(&mut source, &mut zip)?;
        }
    }

    zip.finish()
        .map_err(|e| Error::Archive(format!("failed to finish zip: {}", e)))?;
    Ok(())
}

fn write_tar_zst<W: Write>(writer: W, root_name: &str, entries: &[Entry]) -> Result<()> {
    let mut encoder = zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)
        .map_err(|e| Error::Archive(format!("zstd init failed: {}", e)))?;
    {
        let mut builder = tar::Builder::new(&mut encoder);
        builder.mode(tar::HeaderMode::Deterministic);

        append_dir(&mut builder, &format!("{}/", root_name))?;
        for entry in entries {
            let name = format!("{}/{}", root_name, entry.relative);
            if entry.is_dir {
                append_dir(&mut builder, &format!("{}/", name))?;
            } else {
                let mut source = File::open(&entry.absolute)?;
                let mut data = Vec::new();
                source.read_to_end(&mut data)?;

                let mut header = fixed_header(tar::EntryType::Regular, FILE_MODE);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, &name, data.as_slice())
                    .map_err(|e| Error::Archive(format!("failed to pack {}: {}", name, e)))?;
            }
        }

        builder
            .finish()
            .map_err(|e| Error::Archive(format!("failed to finish tar: {}", e)))?;
    }
    encoder
        .finish()
        .map_err(|e| Error::Archive(format!("zstd finish failed: {}", e)))?
        .flush()?;
    Ok(())
}

fn append_dir<W: Write>(builder: &mut tar::Builder<W>, name: &str) -> Result<()> {
    let mut header = fixed_header(tar::EntryType::Directory, DIR_MODE);
    header.set_size(0);
    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| Error::Archive(format!("failed to pack {}: {}", name, e)))
}

fn fixed_header(entry_type: tar::EntryType, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn build_output(dir: &Path) {
        std::fs::create_dir_all(dir.join("lib/plugins")).unwrap();
        std::fs::write(dir.join("cutevariant.exe"), b"binary").unwrap();
        std::fs::write(dir.join("lib/core.dll"), b"core").unwrap();
        std::fs::write(dir.join("lib/plugins/a.py"), b"print('a')").unwrap();
    }

    #[test]
    fn test_entries_sorted_with_forward_slashes() {
        let temp = TempDir::new().unwrap();
        build_output(temp.path());

        let names: Vec<String> = collect_entries(temp.path())
            .unwrap()
            .into_iter()
            .map(|e| e.relative)
            .collect();
        assert_eq!(
            names,
            vec!["cutevariant.exe", "lib", "lib/core.dll", "lib/plugins", "lib/plugins/a.py"]
        );
    }

    #[test]
    fn test_zip_is_reproducible() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("dist");
        build_output(&source);

        let first = temp.path().join("first.zip");
        let second = temp.path().join("second.zip");
        create_archive(&source, &first, "cutevariant-standalone-x64", ArchiveFormat::Zip).unwrap();
        create_archive(&source, &second, "cutevariant-standalone-x64", ArchiveFormat::Zip).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn test_zip_entries_under_root_folder() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("dist");
        build_output(&source);
        let output = temp.path().join("out.zip");
        create_archive(&source, &output, "app", ArchiveFormat::Zip).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("app/")));
        assert!(names.contains(&"app/lib/plugins/a.py".to_string()));
    }

    #[test]
    fn test_tar_zst_is_reproducible_and_readable() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("dist");
        build_output(&source);

        let first = temp.path().join("first.tar.zst");
        let second = temp.path().join("second.tar.zst");
        create_archive(&source, &first, "app", ArchiveFormat::TarZst).unwrap();
        create_archive(&source, &second, "app", ArchiveFormat::TarZst).unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());

        let decoder = zstd::stream::read::Decoder::new(File::open(&first).unwrap()).unwrap();
        let unpacked = temp.path().join("unpacked");
        tar::Archive::new(decoder).unpack(&unpacked).unwrap();
        assert_eq!(std::fs::read(unpacked.join("app/lib/core.dll")).unwrap(), b"core");
    }
}
