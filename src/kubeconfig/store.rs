// src/kubeconfig/store.rs
//
// Disk boundary of the engine. Everything above this module works on
// `CredentialDocument` values; only `StoreFile::load` and `StoreFile::commit`
// touch the shared kubeconfig.

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::document::CredentialDocument;
use crate::error::{AcquireError, Result, Stage};
use crate::utils::logging::Logger;

const BACKUP_INFIX: &str = ".backup.";
const BACKUP_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

/// Snapshot of the store as it was when the run started.
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
    original: Option<Vec<u8>>,
    document: Option<CredentialDocument>,
}

impl StoreFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let original = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(AcquireError::io(Stage::Merging, &path, e)),
        };

        let document = match &original {
            None => None,
            Some(bytes) => {
                let raw = std::str::from_utf8(bytes).map_err(|e| {
                    AcquireError::parse(
                        Stage::Merging,
                        format!("{} is not valid UTF-8: {}", path.display(), e),
                    )
                })?;
                if raw.trim().is_empty() {
                    Some(CredentialDocument::default())
                } else {
                    Some(CredentialDocument::parse(raw, Stage::Merging)?)
                }
            }
        };

        Ok(Self {
            path,
            original,
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.original.is_some()
    }

    pub fn document(&self) -> Option<&CredentialDocument> {
        self.document.as_ref()
    }

    /// Copies the pre-run bytes next to the store. Returns `None` on first run.
    pub fn backup(&self, now: DateTime<Local>) -> Result<Option<PathBuf>> {
        let Some(bytes) = &self.original else {
            return Ok(None);
        };
        let base = backup_path(&self.path, now);
        let mut candidate = base.clone();
        let mut attempt = 0u32;
        loop {
            match create_private(&candidate) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| AcquireError::io(Stage::Activating, &candidate, e))?;
                    return Ok(Some(candidate));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    let mut name = base.clone().into_os_string();
                    name.push(format!(".{}", attempt));
                    candidate = PathBuf::from(name);
                }
                Err(e) => return Err(AcquireError::io(Stage::Activating, &candidate, e)),
            }
        }
    }

    /// File the new content is renamed onto. A symlinked store resolves to
    /// its target so the link itself stays in place.
    fn write_target(&self) -> Result<PathBuf> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&self.path) {
                Ok(resolved) => Ok(resolved),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // dangling link: create the file it names
                    let link = fs::read_link(&self.path)
                        .map_err(|e| AcquireError::io(Stage::Activating, &self.path, e))?;
                    Ok(match self.path.parent() {
                        Some(dir) => dir.join(link),
                        None => link,
                    })
                }
                Err(e) => Err(AcquireError::io(Stage::Activating, &self.path, e)),
            },
            _ => Ok(self.path.clone()),
        }
    }

    /// Backs up the prior store, then replaces it with `document` through a
    /// temp file in the same directory and a rename.
    pub fn commit(
        &self,
        document: &CredentialDocument,
        logger: &mut dyn Logger,
    ) -> Result<Option<PathBuf>> {
        let yaml = document.to_yaml()?;
        let target = self.write_target()?;
        if target != self.path {
            logger.debug_log(&format!(
                "{} is a symlink; writing {}",
                self.path.display(),
                target.display()
            ));
        }
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| AcquireError::io(Stage::Activating, &parent, e))?;

        let backup = self.backup(Local::now())?;
        if let Some(backup) = &backup {
            logger.stage_log(
                Stage::Activating,
                &format!("Backed up {} to {}", self.path.display(), backup.display()),
            );
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
        logger.debug_log(&format!("Writing store through {}", temp_path.display()));

        let written = create_private(&temp_path).and_then(|mut file| {
            file.write_all(yaml.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&temp_path, &target)) {
            let _ = fs::remove_file(&temp_path);
            return Err(AcquireError::io(Stage::Activating, &target, e));
        }

        // the rename is only durable once the directory entry is on disk
        #[cfg(unix)]
        {
            if let Err(e) = File::open(&parent).and_then(|dir| dir.sync_all()) {
                logger.log(&format!(
                    "WARNING: could not sync {} after writing the store: {}",
                    parent.display(),
                    e
                ));
            }
        }

        logger.stage_log(
            Stage::Activating,
            &format!("Wrote {}", self.path.display()),
        );
        Ok(backup)
    }
}

pub fn backup_path(store: &Path, now: DateTime<Local>) -> PathBuf {
    let mut name = store.as_os_str().to_os_string();
    name.push(BACKUP_INFIX);
    name.push(now.format(BACKUP_TIMESTAMP).to_string());
    PathBuf::from(name)
}

/// Backups of `store`, newest first.
pub fn list_backups(store: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}{}*",
        glob::Pattern::escape(&store.to_string_lossy()),
        BACKUP_INFIX
    );
    let entries = glob::glob(&pattern).map_err(|e| AcquireError::config(e.to_string()))?;
    let mut backups: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
    backups.sort();
    backups.reverse();
    Ok(backups)
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::document::fixtures::WORKSTATION_YAML;
    use crate::utils::logging::MemoryLogger;
    use chrono::TimeZone;

    #[test]
    fn missing_store_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreFile::load(dir.path().join("config")).unwrap();
        assert!(!store.exists());
        assert!(store.document().is_none());
        assert_eq!(store.backup(Local::now()).unwrap(), None);
    }

    #[test]
    fn empty_store_file_is_an_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "").unwrap();

        let store = StoreFile::load(&path).unwrap();
        assert!(store.exists());
        assert!(store.document().unwrap().contexts.is_empty());
    }

    #[test]
    fn corrupt_store_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "clusters: [oops").unwrap();

        let err = StoreFile::load(&path).unwrap_err();
        assert!(matches!(err, AcquireError::Parse { stage: Stage::Merging, .. }));
    }

    #[test]
    fn backup_is_byte_identical_and_sortable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, WORKSTATION_YAML).unwrap();
        let store = StoreFile::load(&path).unwrap();

        let now = Local.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();
        let first = store.backup(now).unwrap().unwrap();
        let second = store.backup(now).unwrap().unwrap();

        assert!(first.to_string_lossy().ends_with("config.backup.20261018_093000"));
        assert!(second.to_string_lossy().ends_with("config.backup.20261018_093000.1"));
        assert_eq!(fs::read(&first).unwrap(), WORKSTATION_YAML.as_bytes());

        let listed = list_backups(&path).unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[test]
    fn commit_replaces_store_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kube/config");
        let store = StoreFile::load(&path).unwrap();
        let doc = CredentialDocument::parse(WORKSTATION_YAML, Stage::Merging).unwrap();
        let mut logger = MemoryLogger::default();

        let backup = store.commit(&doc, &mut logger).unwrap();
        assert!(backup.is_none());

        let reloaded = StoreFile::load(&path).unwrap();
        assert_eq!(reloaded.document(), Some(&doc));

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(logger.contains("Wrote"));
    }

    #[cfg(unix)]
    #[test]
    fn committed_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let store = StoreFile::load(&path).unwrap();
        let doc = CredentialDocument::parse(WORKSTATION_YAML, Stage::Merging).unwrap();
        store.commit(&doc, &mut MemoryLogger::default()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn non_utf8_store_is_a_parse_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut bytes = b"apiVersion: v1\nkind: Config\npreferences:\n  note: ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        fs::write(&path, &bytes).unwrap();

        let err = StoreFile::load(&path).unwrap_err();
        assert!(matches!(err, AcquireError::Parse { stage: Stage::Merging, .. }));
        assert!(err.to_string().contains("not valid UTF-8"));
        assert_eq!(err.exit_code(), 11);
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_store_keeps_its_link() {
        let dir = tempfile::tempdir().unwrap();
        let dotfiles = dir.path().join("dotfiles/kube");
        fs::create_dir_all(&dotfiles).unwrap();
        let real = dotfiles.join("config");
        fs::write(&real, "").unwrap();
        let link = dir.path().join("config");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let store = StoreFile::load(&link).unwrap();
        let doc = CredentialDocument::parse(WORKSTATION_YAML, Stage::Merging).unwrap();
        let backup = store.commit(&doc, &mut MemoryLogger::default()).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            CredentialDocument::parse(&fs::read_to_string(&real).unwrap(), Stage::Merging).unwrap(),
            doc
        );
        assert_eq!(backup.unwrap().parent(), Some(dir.path()));
        let leftovers = fs::read_dir(&dotfiles)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_store_creates_its_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("config");
        std::os::unix::fs::symlink("dotfiles-config", &link).unwrap();

        let store = StoreFile::load(&link).unwrap();
        assert!(!store.exists());
        let doc = CredentialDocument::parse(WORKSTATION_YAML, Stage::Merging).unwrap();
        store.commit(&doc, &mut MemoryLogger::default()).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(dir.path().join("dotfiles-config").is_file());
    }
}
