//! I/O endpoints a loaded module may expose, and how to find them.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open, non-blocking handle on an endpoint.
pub trait EndpointHandle: Send {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Issue one control request; returns the driver's return value.
    fn control(&mut self, code: u64) -> io::Result<i32>;
}

/// Something the probes can open, possibly from several threads at once.
pub trait Endpoint: Send + Sync {
    /// Path or name used in reports.
    fn path(&self) -> String;

    fn open(&self) -> io::Result<Box<dyn EndpointHandle>>;
}

/// Finds the endpoint a module exposes.
pub trait EndpointLocator: Send + Sync {
    fn locate(&self, module_name: &str) -> Option<Arc<dyn Endpoint>>;
}

/// A character device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    path: PathBuf,
}

impl DeviceNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct DeviceHandle {
    file: File,
}

impl EndpointHandle for DeviceHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn control(&mut self, code: u64) -> io::Result<i32> {
        let request = control_request(code)?;
        // SAFETY: the fd is owned by `self.file` and stays open for the call;
        // the argument is a plain integer, never dereferenced by us.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request, 0 as libc::c_ulong) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }
}

/// The request type is `c_ulong` on glibc but `c_int` on musl.
fn control_request(code: u64) -> io::Result<libc::Ioctl> {
    libc::Ioctl::try_from(code).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("control code {code:#x} does not fit the ioctl request type"),
        )
    })
}

impl Endpoint for DeviceNode {
    fn path(&self) -> String {
        self.path.display().to_string()
    }

    /// Read-write if permitted, otherwise write-only.
    fn open(&self) -> io::Result<Box<dyn EndpointHandle>> {
        let open = |read: bool| {
            OpenOptions::new()
                .read(read)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)
        };
        let file = match open(true) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => open(false)?,
            Err(e) => return Err(e),
        };
        Ok(Box::new(DeviceHandle { file }))
    }
}

/// Conventional node names tried before scanning.
pub fn candidate_names(module_name: &str) -> [String; 4] {
    [
        module_name.to_string(),
        format!("{module_name}0"),
        format!("{module_name}_dev"),
        format!("{module_name}-dev"),
    ]
}

/// Looks for `/dev/<name>` and its usual variants, then for any entry under
/// the device root whose name contains the module name.
#[derive(Debug, Clone)]
pub struct DeviceLocator {
    device_root: PathBuf,
}

impl DeviceLocator {
    pub fn new(device_root: impl Into<PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
        }
    }

    pub fn find(&self, module_name: &str) -> Option<PathBuf> {
        if module_name.is_empty() {
            return None;
        }
        candidate_names(module_name)
            .iter()
            .map(|name| self.device_root.join(name))
            .find(|p| p.exists())
            .or_else(|| scan(&self.device_root, module_name))
    }
}

fn scan(root: &Path, module_name: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(module_name))
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

impl EndpointLocator for DeviceLocator {
    fn locate(&self, module_name: &str) -> Option<Arc<dyn Endpoint>> {
        self.find(module_name)
            .map(|path| Arc::new(DeviceNode::new(path)) as Arc<dyn Endpoint>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_keeps_value() {
        let request = control_request(0x8004).unwrap();
        assert_eq!(u64::try_from(request).unwrap(), 0x8004);
    }

    #[cfg(target_env = "musl")]
    #[test]
    fn test_control_request_rejects_oversized_code() {
        let err = control_request(1 << 40).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(not(target_env = "musl"))]
    #[test]
    fn test_control_request_accepts_wide_code_on_glibc() {
        assert!(control_request(1 << 40).is_ok());
    }

    #[test]
    fn test_conventional_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello0"), b"").unwrap();
        std::fs::write(dir.path().join("hello_extra"), b"").unwrap();
        let locator = DeviceLocator::new(dir.path());
        assert_eq!(locator.find("hello"), Some(dir.path().join("hello0")));
    }

    #[test]
    fn test_scan_fallback_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zz_hello_b"), b"").unwrap();
        std::fs::write(dir.path().join("my_hello_a"), b"").unwrap();
        std::fs::create_dir(dir.path().join("hello_dir_only")).unwrap();
        let locator = DeviceLocator::new(dir.path());
        assert_eq!(locator.find("hello"), Some(dir.path().join("my_hello_a")));
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DeviceLocator::new(dir.path());
        assert!(locator.locate("hello").is_none());
        assert!(DeviceLocator::new(dir.path().join("missing")).find("x").is_none());
        assert!(locator.find("").is_none());
    }

    #[test]
    fn test_regular_file_as_device_node() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello");
        std::fs::write(&path, b"").unwrap();
        let node = DeviceNode::new(&path);
        let mut handle = node.open().unwrap();
        assert_eq!(handle.write(b"abc").unwrap(), 3);
        // Regular files do not implement device control requests.
        assert!(handle.control(0x5401).is_err());
    }
}
