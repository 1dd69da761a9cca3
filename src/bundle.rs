//! Discovery of Mach-O files inside application bundles.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::macho::{classify_fat_magic, ImageHeader};
use crate::util::read_u32_le_at;

/// Returns true if `path` looks like a Mach-O image or fat container.
///
/// Only regular files larger than four bytes with no extension or a `.dylib`
/// extension are considered; their first four bytes must be a known magic.
pub fn is_macho_candidate(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        None | Some("dylib") => {}
        Some(_) => return false,
    }

    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() <= 4 {
        return false;
    }

    let mut magic = [0u8; 4];
    let read = File::open(path).and_then(|mut f| f.read_exact(&mut magic));
    if let Err(e) = read {
        debug!("Skipping {}: {}", path.display(), e);
        return false;
    }

    let raw = read_u32_le_at(&magic, 0);
    ImageHeader::classify_magic(raw).is_some() || classify_fat_magic(raw).is_some()
}

/// Finds every Mach-O file under `path`.
///
/// Directories are walked recursively, skipping hidden entries and without
/// following symbolic links. Entries that cannot be read are logged and skipped.
/// A file passed directly is checked the same way. Results are sorted.
pub fn find_macho_files(path: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_macho_candidate(e.path()))
        .map(DirEntry::into_path)
        .collect();

    found.sort();
    Ok(found)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::*;
    use crate::testutil::{build_fat, build_image};
    use crate::util::Endian;

    #[test]
    fn test_find_in_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Payload/Demo.app");
        fs::create_dir_all(app.join("Frameworks/Kit.framework")).unwrap();
        fs::create_dir_all(app.join(".hidden")).unwrap();

        let image = build_image(Endian::Little, &[(LC_UUID, 24)], 0x100);
        let fat = build_fat(Endian::Big, &[(CPU_TYPE_ARM64, &image)]);

        fs::write(app.join("Demo"), &image).unwrap();
        fs::write(app.join("Frameworks/Kit.framework/Kit"), &fat).unwrap();
        fs::write(app.join("Frameworks/libswift.dylib"), &image).unwrap();
        // Wrong extension, not an image, too short, hidden.
        fs::write(app.join("Assets.car"), &image).unwrap();
        fs::write(app.join("PkgInfo"), b"APPL????").unwrap();
        fs::write(app.join("Tiny"), &image[..4]).unwrap();
        fs::write(app.join(".hidden/Secret"), &image).unwrap();

        let found = find_macho_files(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                app.join("Demo"),
                app.join("Frameworks/Kit.framework/Kit"),
                app.join("Frameworks/libswift.dylib"),
            ]
        );
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Demo");
        fs::write(&path, build_image(Endian::Big, &[(LC_UUID, 24)], 0x40)).unwrap();

        assert_eq!(find_macho_files(&path).unwrap(), vec![path.clone()]);
        assert!(find_macho_files(&dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_hidden_root_is_walked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".staging");
        fs::create_dir_all(root.join(".git")).unwrap();

        let image = build_image(Endian::Little, &[(LC_UUID, 24)], 0x100);
        fs::write(root.join("Demo"), &image).unwrap();
        fs::write(root.join(".git/Demo"), &image).unwrap();

        assert_eq!(find_macho_files(&root).unwrap(), vec![root.join("Demo")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        let bundle = dir.path().join("Demo.app");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&bundle).unwrap();

        let image = build_image(Endian::Little, &[(LC_UUID, 24)], 0x100);
        fs::write(outside.join("Linked"), &image).unwrap();
        fs::write(bundle.join("Demo"), &image).unwrap();
        std::os::unix::fs::symlink(&outside, bundle.join("Frameworks")).unwrap();
        std::os::unix::fs::symlink(bundle.join("missing"), bundle.join("Dangling")).unwrap();

        assert_eq!(find_macho_files(&bundle).unwrap(), vec![bundle.join("Demo")]);
    }
}
