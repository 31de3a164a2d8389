use bitflags::bitflags;
use log::{debug, trace};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use crate::clock;
use crate::cp850;
use crate::errors::{DosError, DosResult, StreamError, StreamResult};
use crate::memory::SegOff;
use crate::paths;
use crate::psp::{Psp, JFT_CLOSED, JFT_ENTRIES};
use crate::wildcard;
use crate::Services;

bitflags! {
    /// DOS directory-entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    /// Low bits of AL for INT 21h 3Dh.
    pub fn from_access_byte(al: u8) -> DosResult<OpenMode> {
        match al & 0x07 {
            0 => Ok(OpenMode::Read),
            1 => Ok(OpenMode::Write),
            2 => Ok(OpenMode::ReadWrite),
            _ => Err(DosError::AccessCodeInvalid),
        }
    }

    fn readable(self) -> bool {
        self != OpenMode::Write
    }
    fn writable(self) -> bool {
        self != OpenMode::Read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    Con,
    Aux,
    Prn,
    Clock,
    Nul,
}

impl DeviceId {
    /// Character devices shadow files of the same name; the directory part,
    /// an extension and a trailing colon are all ignored (CON == C:\CON.TXT).
    pub fn from_name(name: &str) -> Option<DeviceId> {
        let base = name.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(name);
        let base = base.split('.').next().unwrap_or(base).trim_end_matches(':');
        match base.to_ascii_uppercase().as_str() {
            "CON" => Some(DeviceId::Con),
            "AUX" => Some(DeviceId::Aux),
            "PRN" => Some(DeviceId::Prn),
            "CLOCK" | "CLOCK$" => Some(DeviceId::Clock),
            "NUL" => Some(DeviceId::Nul),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceId::Con => "CON",
            DeviceId::Aux => "AUX",
            DeviceId::Prn => "PRN",
            DeviceId::Clock => "CLOCK$",
            DeviceId::Nul => "NUL",
        }
    }
}

/// What an open stream is bound to.
pub enum StreamBacking {
    HostFile { file: File, path: PathBuf },
    Device(DeviceId),
    StdIn,
    StdOut,
}

/// One System File Table record, shared between handles via refcount.
pub struct SftEntry {
    pub backing: StreamBacking,
    pub mode: OpenMode,
    pub position: u32,
    pub refs: u16,
    pub name: String,
    pub date: u16,
    pub time: u16,
}

impl SftEntry {
    fn is_device(&self) -> bool {
        !matches!(self.backing, StreamBacking::HostFile { .. })
    }
}

struct FindState {
    pattern: String,
    attributes: FileAttributes,
    entries: fs::ReadDir,
}

/// Per-process handle tables over a process-wide SFT, plus the directory
/// search state and the guest-designated DTA.
pub struct FileManager {
    services: Services,
    sft: Vec<Option<SftEntry>>,
    dta: SegOff,
    search: Option<FindState>,
}

impl FileManager {
    pub fn new(services: &Services) -> Self {
        FileManager {
            services: services.clone(),
            sft: Vec::new(),
            dta: SegOff::default(),
            search: None,
        }
    }

    fn current_psp(&self) -> Psp {
        Psp::at(&self.services.bus, self.services.psps.borrow().current())
    }

    fn now_stamp(&self) -> (u16, u16) {
        let clk = self.services.clock.borrow();
        (clock::encode_dos_date(clk.date()), clock::encode_dos_time(clk.time()))
    }

    fn alloc_sft(&mut self, entry: SftEntry) -> usize {
        for (index, slot) in self.sft.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return index;
            }
        }
        self.sft.push(Some(entry));
        self.sft.len() - 1
    }

    fn free_jft_slot(&self, psp: &Psp) -> DosResult<u16> {
        let limit = psp.max_open_files().min(JFT_ENTRIES as u16);
        for handle in 0..limit {
            if psp.jft_entry(handle) == JFT_CLOSED {
                return Ok(handle);
            }
        }
        Err(DosError::TooManyOpenFiles)
    }

    fn sft_index(&self, psp: &Psp, handle: u16) -> DosResult<usize> {
        if handle >= psp.max_open_files() {
            return Err(DosError::InvalidHandle);
        }
        let slot = psp.jft_entry(handle);
        if slot == JFT_CLOSED {
            return Err(DosError::InvalidHandle);
        }
        match self.sft.get(slot as usize) {
            Some(Some(_)) => Ok(slot as usize),
            _ => Err(DosError::InvalidHandle),
        }
    }

    fn entry_mut(&mut self, handle: u16) -> DosResult<&mut SftEntry> {
        let psp = self.current_psp();
        let index = self.sft_index(&psp, handle)?;
        self.sft[index].as_mut().ok_or(DosError::InvalidHandle)
    }

    fn install(&mut self, psp: &Psp, entry: SftEntry) -> DosResult<u16> {
        let handle = self.free_jft_slot(psp)?;
        let index = self.alloc_sft(entry);
        psp.set_jft_entry(handle, index as u8);
        Ok(handle)
    }

    /// The shell PSP's standard handles: stdin, stdout, stderr on the
    /// console, then AUX and PRN.
    pub fn install_default_handles(&mut self) {
        let psp = self.current_psp();
        let (date, time) = self.now_stamp();
        let streams = vec![
            (StreamBacking::StdIn, OpenMode::Read, "CON"),
            (StreamBacking::StdOut, OpenMode::Write, "CON"),
            (StreamBacking::StdOut, OpenMode::Write, "CON"),
            (StreamBacking::Device(DeviceId::Aux), OpenMode::ReadWrite, "AUX"),
            (StreamBacking::Device(DeviceId::Prn), OpenMode::Write, "PRN"),
        ];
        for (handle, (backing, mode, name)) in streams.into_iter().enumerate() {
            let index = self.alloc_sft(SftEntry {
                backing,
                mode,
                position: 0,
                refs: 1,
                name: name.to_string(),
                date,
                time,
            });
            psp.set_jft_entry(handle as u16, index as u8);
        }
    }

    pub fn open(&mut self, name: &str, mode: OpenMode) -> DosResult<u16> {
        if let Some(device) = DeviceId::from_name(name) {
            return self.open_device(device, mode);
        }
        let path = self.services.drives.borrow().resolve(name, false)?;
        let metadata = fs::metadata(&path).map_err(|_| DosError::FileNotFound)?;
        if metadata.is_dir() {
            return Err(DosError::AccessDenied);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(mode.writable())
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => DosError::AccessDenied,
                _ => DosError::FileNotFound,
            })?;
        let (date, time) = metadata.modified().map(clock::dos_stamp).unwrap_or(self.now_stamp());
        let display = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_ascii_uppercase())
            .unwrap_or_default();
        trace!("open {} as {:?}", display, mode);
        let psp = self.current_psp();
        self.install(
            &psp,
            SftEntry { backing: StreamBacking::HostFile { file, path }, mode, position: 0, refs: 1, name: display, date, time },
        )
    }

    pub fn open_device(&mut self, device: DeviceId, mode: OpenMode) -> DosResult<u16> {
        let (date, time) = self.now_stamp();
        let psp = self.current_psp();
        self.install(
            &psp,
            SftEntry {
                backing: StreamBacking::Device(device),
                mode,
                position: 0,
                refs: 1,
                name: device.name().to_string(),
                date,
                time,
            },
        )
    }

    /// INT 21h 3Ch: create or truncate.
    pub fn create(&mut self, name: &str, attributes: FileAttributes) -> DosResult<u16> {
        if let Some(device) = DeviceId::from_name(name) {
            return self.open_device(device, OpenMode::ReadWrite);
        }
        let path = self.services.drives.borrow().resolve(name, true)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|_| DosError::AccessDenied)?;
        if attributes.contains(FileAttributes::READ_ONLY) {
            debug!("create {}: read-only attribute deferred until close", path.display());
        }
        let (date, time) = self.now_stamp();
        let display = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_ascii_uppercase())
            .unwrap_or_default();
        let psp = self.current_psp();
        self.install(
            &psp,
            SftEntry {
                backing: StreamBacking::HostFile { file, path },
                mode: OpenMode::ReadWrite,
                position: 0,
                refs: 1,
                name: display,
                date,
                time,
            },
        )
    }

    fn release_sft(&mut self, index: usize) {
        if let Some(entry) = self.sft.get_mut(index).and_then(Option::as_mut) {
            entry.refs -= 1;
            if entry.refs == 0 {
                // dropping the record closes the host stream
                self.sft[index] = None;
            }
        }
    }

    pub fn close(&mut self, handle: u16) -> DosResult<()> {
        let psp = self.current_psp();
        let index = self.sft_index(&psp, handle)?;
        psp.set_jft_entry(handle, JFT_CLOSED);
        self.release_sft(index);
        Ok(())
    }

    pub fn read(&mut self, handle: u16, destination: SegOff, length: u16) -> StreamResult<u16> {
        let bus = self.services.bus.clone();
        let clock_record = {
            use chrono::Timelike;
            let clk = self.services.clock.borrow();
            let days = chrono::NaiveDate::from_ymd_opt(1980, 1, 1)
                .map(|epoch| clk.date().signed_duration_since(epoch).num_days() as u16)
                .unwrap_or(0);
            let time = clk.time();
            let [lo, hi] = days.to_le_bytes();
            [lo, hi, time.minute() as u8, time.hour() as u8, clk.centiseconds(), time.second() as u8]
        };
        let entry = self.entry_mut(handle)?;
        if !entry.mode.readable() {
            return Err(DosError::AccessDenied.into());
        }
        let mut buf = vec![0u8; length as usize];
        let copied = match &mut entry.backing {
            StreamBacking::HostFile { file, .. } => {
                file.seek(SeekFrom::Start(entry.position as u64))
                    .map_err(StreamError::Unrecoverable)?;
                let n = file.read(&mut buf).map_err(StreamError::Unrecoverable)?;
                entry.position += n as u32;
                n
            }
            StreamBacking::StdIn | StreamBacking::Device(DeviceId::Con) => {
                io::stdin().read(&mut buf).map_err(StreamError::Unrecoverable)?
            }
            StreamBacking::Device(DeviceId::Clock) => {
                let n = buf.len().min(clock_record.len());
                buf[..n].copy_from_slice(&clock_record[..n]);
                n
            }
            _ => 0, // NUL, AUX, PRN and output streams read as empty
        };
        bus.borrow_mut().write_bytes(destination.physical(), &buf[..copied]);
        Ok(copied as u16)
    }

    pub fn write(&mut self, handle: u16, source: SegOff, length: u16) -> StreamResult<u16> {
        let data = self.services.bus.borrow().read_bytes(source.physical(), length as usize);
        let entry = self.entry_mut(handle)?;
        if !entry.mode.writable() {
            return Err(DosError::AccessDenied.into());
        }
        match &mut entry.backing {
            StreamBacking::HostFile { file, .. } => {
                if length == 0 {
                    // zero-length write truncates at the current position
                    file.set_len(entry.position as u64).map_err(StreamError::Unrecoverable)?;
                    return Ok(0);
                }
                file.seek(SeekFrom::Start(entry.position as u64))
                    .map_err(StreamError::Unrecoverable)?;
                file.write_all(&data).map_err(StreamError::Unrecoverable)?;
                entry.position += data.len() as u32;
                Ok(data.len() as u16)
            }
            StreamBacking::StdOut | StreamBacking::Device(DeviceId::Con) | StreamBacking::Device(DeviceId::Prn) => {
                let text = cp850::decode(&data);
                let stdout = io::stdout();
                let mut out = stdout.lock();
                out.write_all(text.as_bytes()).map_err(StreamError::Unrecoverable)?;
                out.flush().map_err(StreamError::Unrecoverable)?;
                Ok(length)
            }
            // AUX, NUL and CLOCK$ swallow writes
            StreamBacking::Device(_) => Ok(length),
            StreamBacking::StdIn => Err(DosError::AccessDenied.into()),
        }
    }

    pub fn seek(&mut self, handle: u16, origin: u8, offset: i32) -> StreamResult<u32> {
        let entry = self.entry_mut(handle)?;
        let end = match &entry.backing {
            StreamBacking::HostFile { file, .. } => {
                file.metadata().map_err(StreamError::Unrecoverable)?.len() as i64
            }
            _ => 0,
        };
        let base = match origin {
            0 => 0,
            1 => entry.position as i64,
            2 => end,
            _ => return Err(DosError::FunctionInvalid.into()),
        };
        let target = base + offset as i64;
        if target < 0 {
            return Err(DosError::DataInvalid.into());
        }
        entry.position = target as u32;
        Ok(entry.position)
    }

    pub fn duplicate(&mut self, handle: u16) -> DosResult<u16> {
        let psp = self.current_psp();
        let index = self.sft_index(&psp, handle)?;
        let new_handle = self.free_jft_slot(&psp)?;
        psp.set_jft_entry(new_handle, index as u8);
        if let Some(entry) = self.sft[index].as_mut() {
            entry.refs += 1;
        }
        Ok(new_handle)
    }

    pub fn force_duplicate(&mut self, source: u16, target: u16) -> DosResult<()> {
        let psp = self.current_psp();
        let index = self.sft_index(&psp, source)?;
        if target >= psp.max_open_files() {
            return Err(DosError::InvalidHandle);
        }
        if source == target {
            return Ok(());
        }
        let old = psp.jft_entry(target);
        if old != JFT_CLOSED {
            self.release_sft(old as usize);
        }
        psp.set_jft_entry(target, index as u8);
        if let Some(entry) = self.sft[index].as_mut() {
            entry.refs += 1;
        }
        Ok(())
    }

    /// EXEC: the child starts with a copy of the parent's JFT, sharing the
    /// SFT records.
    pub fn clone_jft(&mut self, parent_segment: u16, child_segment: u16) {
        let parent = Psp::at(&self.services.bus, parent_segment);
        let child = Psp::at(&self.services.bus, child_segment);
        for handle in 0..JFT_ENTRIES as u16 {
            let slot = parent.jft_entry(handle);
            child.set_jft_entry(handle, slot);
            if slot != JFT_CLOSED {
                if let Some(entry) = self.sft.get_mut(slot as usize).and_then(Option::as_mut) {
                    entry.refs += 1;
                }
            }
        }
    }

    /// Terminate: drop every handle the PSP still holds.
    pub fn close_all(&mut self, psp_segment: u16) {
        let psp = Psp::at(&self.services.bus, psp_segment);
        for handle in 0..JFT_ENTRIES as u16 {
            let slot = psp.jft_entry(handle);
            if slot != JFT_CLOSED {
                psp.set_jft_entry(handle, JFT_CLOSED);
                self.release_sft(slot as usize);
            }
        }
    }

    pub fn set_dta(&mut self, dta: SegOff) {
        self.dta = dta;
    }

    pub fn dta(&self) -> SegOff {
        self.dta
    }

    /// INT 21h 44h/00h device information word.
    pub fn device_info(&mut self, handle: u16) -> DosResult<u16> {
        let drive = self.services.drives.borrow().current() as u16;
        let entry = self.entry_mut(handle)?;
        Ok(match &entry.backing {
            StreamBacking::HostFile { .. } => drive,
            StreamBacking::Device(DeviceId::Nul) => 0x8084,
            StreamBacking::Device(DeviceId::Clock) => 0x8088,
            _ => 0x80D3, // console-ish character device
        })
    }

    pub fn commit(&mut self, handle: u16) -> StreamResult<()> {
        let entry = self.entry_mut(handle)?;
        if let StreamBacking::HostFile { file, .. } = &mut entry.backing {
            file.sync_all().map_err(StreamError::Unrecoverable)?;
        }
        Ok(())
    }

    /// INT 21h 57h.
    pub fn file_times(&mut self, handle: u16) -> DosResult<(u16, u16)> {
        let entry = self.entry_mut(handle)?;
        Ok((entry.date, entry.time))
    }

    pub fn set_file_times(&mut self, handle: u16, date: u16, time: u16) -> DosResult<()> {
        let entry = self.entry_mut(handle)?;
        entry.date = date;
        entry.time = time;
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> DosResult<()> {
        let path = self.services.drives.borrow().resolve(name, false)?;
        if path.is_dir() {
            return Err(DosError::AccessDenied);
        }
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => DosError::AccessDenied,
            _ => DosError::FileNotFound,
        })
    }

    pub fn rename(&mut self, old: &str, new: &str) -> DosResult<()> {
        let drives = self.services.drives.borrow();
        let (old_drive, _) = drives.normalize(old)?;
        let (new_drive, _) = drives.normalize(new)?;
        if old_drive != new_drive {
            return Err(DosError::NotSameDevice);
        }
        let from = drives.resolve(old, false)?;
        let to = drives.resolve(new, true)?;
        if to.exists() {
            return Err(DosError::AccessDenied);
        }
        drop(drives);
        fs::rename(from, to).map_err(|_| DosError::AccessDenied)
    }

    pub fn attributes(&self, name: &str) -> DosResult<FileAttributes> {
        let path = self.services.drives.borrow().resolve(name, false)?;
        let metadata = fs::metadata(&path).map_err(|_| DosError::FileNotFound)?;
        Ok(host_attributes(&metadata))
    }

    pub fn set_attributes(&self, name: &str, attributes: FileAttributes) -> DosResult<()> {
        let path = self.services.drives.borrow().resolve(name, false)?;
        let metadata = fs::metadata(&path).map_err(|_| DosError::FileNotFound)?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(attributes.contains(FileAttributes::READ_ONLY));
        fs::set_permissions(&path, permissions).map_err(|_| DosError::AccessDenied)
    }

    pub fn make_directory(&mut self, name: &str) -> DosResult<()> {
        let path = self.services.drives.borrow().resolve(name, true)?;
        if path.exists() {
            return Err(DosError::AccessDenied);
        }
        fs::create_dir(&path).map_err(|_| DosError::PathNotFound)
    }

    pub fn remove_directory(&mut self, name: &str) -> DosResult<()> {
        let (drive, components) = self.services.drives.borrow().normalize(name)?;
        let path = self
            .services
            .drives
            .borrow()
            .resolve(name, false)
            .map_err(|_| DosError::PathNotFound)?;
        if !path.is_dir() {
            return Err(DosError::PathNotFound);
        }
        let mut dos_form = String::from("\\");
        dos_form.push_str(&components.join("\\").to_ascii_uppercase());
        if self.services.drives.borrow().folder(drive)?.current_dir == dos_form {
            return Err(DosError::RemoveCurrentDir);
        }
        fs::remove_dir(&path).map_err(|_| DosError::AccessDenied)
    }

    pub fn change_directory(&mut self, name: &str) -> DosResult<()> {
        let (drive, components) = self.services.drives.borrow().normalize(name)?;
        let path = self
            .services
            .drives
            .borrow()
            .resolve(name, false)
            .map_err(|_| DosError::PathNotFound)?;
        if !path.is_dir() {
            return Err(DosError::PathNotFound);
        }
        self.services.drives.borrow_mut().store_current_dir(drive, &components);
        Ok(())
    }

    /// INT 21h 47h; `selector` 0 means the default drive, 1 = A:.
    pub fn current_directory(&self, selector: u8) -> DosResult<String> {
        let drives = self.services.drives.borrow();
        let drive = if selector == 0 { drives.current() } else { selector - 1 };
        drives.current_dir_for_report(drive)
    }

    pub fn find_first(&mut self, spec: &str, attributes: FileAttributes) -> DosResult<()> {
        let (dir_part, pattern) = paths::split_spec(spec);
        if pattern.is_empty() {
            return Err(DosError::FileNotFound);
        }
        let directory = self
            .services
            .drives
            .borrow()
            .resolve(dir_part, false)
            .map_err(|_| DosError::PathNotFound)?;
        let entries = fs::read_dir(&directory).map_err(|_| DosError::PathNotFound)?;
        trace!("find-first {} in {}", pattern, directory.display());
        self.search =
            Some(FindState { pattern: pattern.to_ascii_uppercase(), attributes, entries });
        self.find_next()
    }

    /// Pulls host directory entries one at a time until one matches the
    /// pattern, then deposits the record in the DTA.
    pub fn find_next(&mut self) -> DosResult<()> {
        let record = {
            let state = self.search.as_mut().ok_or(DosError::NoMoreFiles)?;
            let mut found = None;
            for entry in &mut state.entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                let host_name = entry.file_name();
                let host_name = match host_name.to_str() {
                    Some(n) => n,
                    None => continue,
                };
                let name = match paths::to_8_3(host_name) {
                    Some(n) => n,
                    None => continue,
                };
                if !wildcard::matches(&name, &state.pattern) {
                    continue;
                }
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                let attributes = host_attributes(&metadata);
                if attributes.contains(FileAttributes::DIRECTORY)
                    && !state.attributes.contains(FileAttributes::DIRECTORY)
                {
                    continue;
                }
                // fall back to the DOS epoch when the host has no mtime
                let (date, time) = metadata.modified().map(clock::dos_stamp).unwrap_or((0x0021, 0));
                let size = if metadata.is_dir() { 0 } else { metadata.len() as u32 };
                found = Some((attributes, time, date, size, name));
                break;
            }
            found
        };
        match record {
            Some((attributes, time, date, size, name)) => {
                self.write_dta_record(attributes, time, date, size, &name);
                Ok(())
            }
            None => Err(DosError::NoMoreFiles),
        }
    }

    // DTA search record: attribute at +15h, time, date, size, then the
    // space-padded 8+3 name, zero terminated.
    fn write_dta_record(
        &self,
        attributes: FileAttributes,
        time: u16,
        date: u16,
        size: u32,
        name: &str,
    ) {
        let base = self.dta.physical();
        let mut padded = [b' '; 11];
        let (stem, ext) = match name.find('.') {
            Some(i) => (&name[..i], &name[i + 1..]),
            None => (name, ""),
        };
        for (i, b) in stem.bytes().take(8).enumerate() {
            padded[i] = b;
        }
        for (i, b) in ext.bytes().take(3).enumerate() {
            padded[8 + i] = b;
        }
        let mut bus = self.services.bus.borrow_mut();
        bus.write_u8(base + 0x15, attributes.bits());
        bus.write_u16(base + 0x16, time);
        bus.write_u16(base + 0x18, date);
        bus.write_u32(base + 0x1A, size);
        bus.write_bytes(base + 0x1E, &padded);
        bus.write_u8(base + 0x1E + 11, 0);
    }

    // -- console helpers for the classic INT 21h character services --

    pub fn console_write(&mut self, bytes: &[u8]) -> StreamResult<()> {
        let text = cp850::decode(bytes);
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(text.as_bytes()).map_err(StreamError::Unrecoverable)?;
        out.flush().map_err(StreamError::Unrecoverable)
    }

    /// Blocking single-byte console read; EOF reads as ^Z.
    pub fn console_read_byte(&mut self) -> StreamResult<u8> {
        let mut byte = [0u8; 1];
        match io::stdin().read(&mut byte) {
            Ok(0) => Ok(0x1A),
            Ok(_) => Ok(byte[0]),
            Err(e) => Err(StreamError::Unrecoverable(e)),
        }
    }

    /// Buffered line input for INT 21h 0Ah.
    pub fn console_read_line(&mut self, capacity: usize) -> StreamResult<Vec<u8>> {
        let mut line = String::new();
        io::stdin().read_line(&mut line).map_err(StreamError::Unrecoverable)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let mut bytes = cp850::encode(&line);
        bytes.truncate(capacity);
        Ok(bytes)
    }
}

fn host_attributes(metadata: &fs::Metadata) -> FileAttributes {
    if metadata.is_dir() {
        FileAttributes::DIRECTORY
    } else if metadata.permissions().readonly() {
        FileAttributes::READ_ONLY | FileAttributes::ARCHIVE
    } else {
        FileAttributes::ARCHIVE
    }
}
