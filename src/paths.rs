use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::errors::{DosError, DosResult};

pub const DRIVE_COUNT: usize = 26;

const AUTOEXEC_BAT: &str = "@ECHO OFF\r\nSET PATH=Z:\\;C:\\\r\n\r\n";

/// A drive letter mapped onto a host directory.
pub struct MountedFolder {
    pub host_root: PathBuf,
    /// Current directory in DOS form: leading backslash, no drive, uppercase.
    pub current_dir: String,
}

/// The A:..Z: drive table. One drive is current; Z: is a per-run scratch
/// directory seeded with AUTOEXEC.BAT and kept alive for the whole run.
pub struct DriveMap {
    drives: [Option<MountedFolder>; DRIVE_COUNT],
    current: u8,
    scratch: Option<TempDir>,
}

pub fn drive_index(letter: char) -> DosResult<u8> {
    let upper = letter.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Ok(upper as u8 - b'A')
    } else {
        Err(DosError::InvalidDrive)
    }
}

pub fn drive_letter(index: u8) -> char {
    (b'A' + index) as char
}

impl DriveMap {
    pub fn new() -> Self {
        DriveMap { drives: std::array::from_fn(|_| None), current: 2, scratch: None }
    }

    pub fn mount(&mut self, letter: char, host_root: PathBuf) -> DosResult<()> {
        let index = drive_index(letter)?;
        if !host_root.is_dir() {
            return Err(DosError::PathNotFound);
        }
        debug!("mounting {}: at {}", drive_letter(index), host_root.display());
        self.drives[index as usize] =
            Some(MountedFolder { host_root, current_dir: String::from("\\") });
        Ok(())
    }

    /// Creates the scratch drive Z: in a fresh temporary directory.
    pub fn mount_scratch(&mut self) -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("AUTOEXEC.BAT"), AUTOEXEC_BAT)?;
        self.drives[DRIVE_COUNT - 1] = Some(MountedFolder {
            host_root: dir.path().to_path_buf(),
            current_dir: String::from("\\"),
        });
        self.scratch = Some(dir);
        Ok(())
    }

    pub fn is_mounted(&self, drive: u8) -> bool {
        (drive as usize) < DRIVE_COUNT && self.drives[drive as usize].is_some()
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn set_current(&mut self, drive: u8) -> DosResult<()> {
        if self.is_mounted(drive) {
            self.current = drive;
            Ok(())
        } else {
            Err(DosError::InvalidDrive)
        }
    }

    pub fn folder(&self, drive: u8) -> DosResult<&MountedFolder> {
        self.drives
            .get(drive as usize)
            .and_then(|f| f.as_ref())
            .ok_or(DosError::InvalidDrive)
    }

    /// Splits an optional `X:` prefix off a DOS path.
    pub fn split_drive<'a>(&self, path: &'a str) -> DosResult<(u8, &'a str)> {
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' {
            let index = drive_index(bytes[0] as char)?;
            Ok((index, &path[2..]))
        } else {
            Ok((self.current, path))
        }
    }

    /// Normalizes a DOS path into (drive, absolute components), resolving
    /// `.` and `..` against the drive's current directory.
    pub fn normalize(&self, dos_path: &str) -> DosResult<(u8, Vec<String>)> {
        let (drive, rest) = self.split_drive(dos_path)?;
        let rest = rest.replace('/', "\\");
        let mut components: Vec<String> = Vec::new();
        if !rest.starts_with('\\') {
            let cwd = &self.folder(drive)?.current_dir;
            components.extend(cwd.split('\\').filter(|c| !c.is_empty()).map(String::from));
        }
        for part in rest.split('\\') {
            match part.trim() {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name => components.push(name.to_string()),
            }
        }
        Ok((drive, components))
    }

    /// Maps a DOS path onto the host filesystem, recovering the stored case
    /// of every component by directory scan. With `for_creation` only the
    /// parent must exist; the missing leaf keeps its DOS spelling.
    pub fn resolve(&self, dos_path: &str, for_creation: bool) -> DosResult<PathBuf> {
        let (drive, components) = self.normalize(dos_path)?;
        let mut host = self.folder(drive)?.host_root.clone();
        let count = components.len();
        for (i, component) in components.iter().enumerate() {
            let last = i + 1 == count;
            match recover_case(&host, component) {
                Some(actual) => host.push(actual),
                None if for_creation && last => {
                    host.push(component);
                    return Ok(host);
                }
                None => {
                    return Err(if last { DosError::FileNotFound } else { DosError::PathNotFound })
                }
            }
        }
        Ok(host)
    }

    pub fn store_current_dir(&mut self, drive: u8, components: &[String]) {
        if let Some(Some(folder)) = self.drives.get_mut(drive as usize) {
            let mut dir = String::from("\\");
            dir.push_str(&components.join("\\").to_ascii_uppercase());
            folder.current_dir = dir;
        }
    }

    /// Current directory of `drive` without the leading backslash, as
    /// INT 21h 47h reports it.
    pub fn current_dir_for_report(&self, drive: u8) -> DosResult<String> {
        Ok(self.folder(drive)?.current_dir.trim_start_matches('\\').to_string())
    }
}

/// Finds the host directory entry matching `segment` case-insensitively.
fn recover_case(parent: &Path, segment: &str) -> Option<String> {
    if parent.join(segment).exists() {
        return Some(segment.to_string());
    }
    let entries = fs::read_dir(parent).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if name.eq_ignore_ascii_case(segment) {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Splits a search spec into its directory part and filename pattern.
pub fn split_spec(spec: &str) -> (&str, &str) {
    match spec.rfind(|c| c == '\\' || c == '/') {
        Some(i) => (&spec[..i], &spec[i + 1..]),
        None => {
            // a bare "C:PATTERN" is relative to the drive's current dir
            if spec.len() >= 2 && spec.as_bytes()[1] == b':' {
                (&spec[..2], &spec[2..])
            } else {
                ("", spec)
            }
        }
    }
}

/// Uppercased 8.3 rendition of a host filename, or None if it does not fit.
pub fn to_8_3(host_name: &str) -> Option<String> {
    if host_name == "." || host_name == ".." {
        return Some(host_name.to_string());
    }
    let (name, ext) = match host_name.rfind('.') {
        Some(0) => return None, // dot files have no 8.3 form
        Some(i) => (&host_name[..i], &host_name[i + 1..]),
        None => (host_name, ""),
    };
    if name.is_empty() || name.len() > 8 || ext.len() > 3 {
        return None;
    }
    let valid = |s: &str| {
        s.bytes().all(|b| b.is_ascii_graphic() && !matches!(b, b'.' | b'*' | b'?' | b'\\' | b'/'))
    };
    if !valid(name) || !(ext.is_empty() || valid(ext)) {
        return None;
    }
    let mut out = name.to_ascii_uppercase();
    if !ext.is_empty() {
        out.push('.');
        out.push_str(&ext.to_ascii_uppercase());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn map_with_c(root: &Path) -> DriveMap {
        let mut map = DriveMap::new();
        map.mount('C', root.to_path_buf()).unwrap();
        map.set_current(2).unwrap();
        map
    }

    #[test]
    fn resolves_with_case_recovery() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("Games")).unwrap();
        File::create(tmp.path().join("Games/Hello.Com")).unwrap();
        let map = map_with_c(tmp.path());
        let host = map.resolve("C:\\GAMES\\HELLO.COM", false).unwrap();
        assert_eq!(host, tmp.path().join("Games/Hello.Com"));
    }

    #[test]
    fn missing_leaf_vs_missing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let map = map_with_c(tmp.path());
        assert_eq!(map.resolve("C:\\NOPE.TXT", false), Err(DosError::FileNotFound));
        assert_eq!(map.resolve("C:\\NO\\NOPE.TXT", false), Err(DosError::PathNotFound));
        let created = map.resolve("C:\\NEW.TXT", true).unwrap();
        assert_eq!(created, tmp.path().join("NEW.TXT"));
    }

    #[test]
    fn relative_paths_use_the_current_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        File::create(tmp.path().join("sub/a.txt")).unwrap();
        let mut map = map_with_c(tmp.path());
        map.store_current_dir(2, &[String::from("SUB")]);
        let host = map.resolve("A.TXT", false).unwrap();
        assert_eq!(host, tmp.path().join("sub/a.txt"));
        // and .. climbs back out
        let root = map.resolve("..", false).unwrap();
        assert_eq!(root, tmp.path().to_path_buf());
    }

    #[test]
    fn scratch_drive_carries_autoexec() {
        let mut map = DriveMap::new();
        map.mount_scratch().unwrap();
        let host = map.resolve("Z:\\AUTOEXEC.BAT", false).unwrap();
        let content = fs::read_to_string(host).unwrap();
        assert!(content.starts_with("@ECHO OFF\r\n"));
        assert!(content.contains("SET PATH=Z:\\;C:\\"));
    }

    #[test]
    fn spec_splitting() {
        assert_eq!(split_spec("C:\\DIR\\*.TXT"), ("C:\\DIR", "*.TXT"));
        assert_eq!(split_spec("*.TXT"), ("", "*.TXT"));
        assert_eq!(split_spec("C:*.TXT"), ("C:", "*.TXT"));
    }

    #[test]
    fn eight_three_rendition() {
        assert_eq!(to_8_3("hello.com").as_deref(), Some("HELLO.COM"));
        assert_eq!(to_8_3("noext").as_deref(), Some("NOEXT"));
        assert_eq!(to_8_3("toolongname.txt"), None);
        assert_eq!(to_8_3("a.toolong"), None);
        assert_eq!(to_8_3(".gitignore"), None);
    }
}
