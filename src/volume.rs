//! Volume handle management for NTFS volumes.
//!
//! A [`Volume`] exclusively owns its OS handle from `open` until drop; the
//! handle is released on every exit path, including the close+reopen
//! performed when a live handle goes stale mid-collection.

use std::mem::size_of;
use std::path::Path;

use log::{debug, warn};
use windows::{
    Win32::{
        Foundation::{
            CloseHandle, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_NOT_READY,
            ERROR_PATH_NOT_FOUND, HANDLE,
        },
        Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation},
        Storage::FileSystem::{
            CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_GENERIC_READ, FILE_SHARE_READ,
            FILE_SHARE_WRITE, GetVolumeNameForVolumeMountPointW, OPEN_EXISTING,
        },
        System::Threading::{GetCurrentProcess, OpenProcessToken},
    },
    core::HSTRING,
};

use crate::errors::CollectorError;

/// An open, exclusively-owned handle to an NTFS volume device.
#[derive(Debug)]
pub struct Volume {
    pub(crate) handle: HANDLE,
    name: String,
    device_path: String,
}

impl Volume {
    /// Opens a volume from a configuration identifier: a drive letter form
    /// (`"C"`, `"C:"`, `"C:\"`) or a mount point path.
    pub fn open(volume: &str) -> Result<Self, CollectorError> {
        let trimmed = volume.trim_end_matches(['\\', '/']);
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(letter), Some(':'), None) | (Some(letter), None, None)
                if letter.is_ascii_alphabetic() =>
            {
                Self::from_drive_letter(letter)
            }
            _ => Self::from_mount_point(Path::new(volume)),
        }
    }

    /// Opens a volume by drive letter.
    pub fn from_drive_letter(drive_letter: char) -> Result<Self, CollectorError> {
        let letter = drive_letter.to_ascii_uppercase();
        // https://learn.microsoft.com/en-us/windows/win32/fileio/obtaining-a-volume-handle-for-change-journal-operations
        // To obtain a handle to a volume for use with update sequence number
        // (USN) change journal operations, call the CreateFile function with
        // the lpFileName parameter set to a string of the following form: \\.\X:
        let device_path = format!(r"\\.\{}:", letter);
        let handle = open_device(&device_path)?;
        Ok(Volume {
            handle,
            name: format!("{}:", letter),
            device_path,
        })
    }

    /// Opens a volume by mount point path.
    pub fn from_mount_point(mount_point: &Path) -> Result<Self, CollectorError> {
        // GetVolumeNameForVolumeMountPointW requires a trailing backslash
        let mount_path = format!("{}\\", mount_point.to_string_lossy().trim_end_matches('\\'));

        let mut volume_name = [0u16; 64]; // Enough space for a volume GUID path
        if let Err(err) = unsafe {
            GetVolumeNameForVolumeMountPointW(&HSTRING::from(&mount_path), &mut volume_name)
        } {
            warn!(
                "GetVolumeNameForVolumeMountPointW failed, mount_point={}, error={:?}",
                mount_path, err
            );
            return Err(CollectorError::VolumeUnavailable(
                mount_point.to_string_lossy().to_string(),
            ));
        }

        let end = volume_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(volume_name.len());
        let volume_guid = String::from_utf16_lossy(&volume_name[..end]);
        debug!("Volume GUID: {}", volume_guid);

        // The trailing backslash must go before CreateFileW sees the path
        let device_path = volume_guid.trim_end_matches('\\').to_string();
        let handle = open_device(&device_path)?;
        Ok(Volume {
            handle,
            name: mount_point.to_string_lossy().to_string(),
            device_path,
        })
    }

    /// The configuration-facing volume name (`"C:"` or the mount point path).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces a stale handle with a freshly opened one. The old handle is
    /// closed even if the reopen fails.
    pub(crate) fn reopen(&mut self) -> Result<(), CollectorError> {
        let stale = std::mem::replace(&mut self.handle, HANDLE::default());
        if !stale.is_invalid() {
            unsafe {
                let _ = CloseHandle(stale);
            }
        }
        self.handle = open_device(&self.device_path)?;
        Ok(())
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if !self.handle.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

/// Opens the raw volume device with read sharing and backup semantics.
fn open_device(device_path: &str) -> Result<HANDLE, CollectorError> {
    if !is_elevated()? {
        return Err(CollectorError::PermissionDenied);
    }

    match unsafe {
        CreateFileW(
            &HSTRING::from(device_path),
            FILE_GENERIC_READ.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )
    } {
        Ok(handle) => Ok(handle),
        Err(err) if err == ERROR_ACCESS_DENIED.into() => Err(CollectorError::PermissionDenied),
        Err(err)
            if err == ERROR_FILE_NOT_FOUND.into()
                || err == ERROR_PATH_NOT_FOUND.into()
                || err == ERROR_NOT_READY.into() =>
        {
            Err(CollectorError::VolumeUnavailable(device_path.to_string()))
        }
        Err(err) => Err(CollectorError::WinApiError(err)),
    }
}

/// Journal access requires membership in the Administrators group.
fn is_elevated() -> Result<bool, CollectorError> {
    let mut token: HANDLE = HANDLE::default();
    unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)? };

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned_length = 0;

    let result = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned_length,
        )
    };
    unsafe {
        let _ = CloseHandle(token);
    }
    result?;

    Ok(elevation.TokenIsElevated != 0)
}
