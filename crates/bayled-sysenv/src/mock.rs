//! In-memory [`SysEnv`] fake for unit tests (feature `mock`).
//!
//! Backs the call-count assertions the design document's testable
//! properties need (e.g. "a second identical `set` issues zero hardware
//! writes") without touching real hardware.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{IpmiReply, IpmiRequest, SgIoReply, SgIoRequest, SysEnv};

/// Records of every mutating call the mock observed, for assertions.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    /// `(path, value)` for every [`SysEnv::write_attr`] call, in order.
    pub attr_writes: Vec<(PathBuf, String)>,
    /// Every [`SysEnv::pci_config_write`] call, in order.
    pub pci_writes: Vec<(PathBuf, u16, Vec<u8>)>,
    /// Every [`SysEnv::sg_io`] call, in order.
    pub sg_io_calls: Vec<(PathBuf, Vec<u8>)>,
    /// Every [`SysEnv::ipmi_command`] call, in order.
    pub ipmi_calls: Vec<IpmiRequest>,
    /// Every `sleep` duration requested, in order.
    pub sleeps: Vec<Duration>,
}

/// In-memory fake of the host environment.
#[derive(Default)]
pub struct MockSysEnv {
    attrs: RefCell<HashMap<PathBuf, String>>,
    links: RefCell<HashMap<PathBuf, PathBuf>>,
    dirs: RefCell<HashMap<PathBuf, Vec<PathBuf>>>,
    dev_attrs: RefCell<HashMap<PathBuf, (u32, u32)>>,
    pci_config: RefCell<HashMap<PathBuf, Vec<u8>>>,
    shared_mem: RefCell<HashMap<String, Vec<u8>>>,
    sg_io_reply: RefCell<Option<SgIoReply>>,
    ipmi_reply: RefCell<Option<IpmiReply>>,
    log: RefCell<CallLog>,
}

impl MockSysEnv {
    /// Creates an empty mock with no attributes, links, or directories set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a sysfs text attribute.
    pub fn set_attr(&self, path: impl Into<PathBuf>, value: impl Into<String>) {
        self.attrs.borrow_mut().insert(path.into(), value.into());
    }

    /// Seeds a symlink target (e.g. a `driver` sysfs link).
    pub fn set_link(&self, path: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.links.borrow_mut().insert(path.into(), target.into());
    }

    /// Seeds the listing for a directory.
    pub fn set_dir(&self, path: impl Into<PathBuf>, entries: Vec<PathBuf>) {
        self.dirs.borrow_mut().insert(path.into(), entries);
    }

    /// Seeds the `(major, minor)` pair for a block device's `dev` attribute.
    pub fn set_dev(&self, path: impl Into<PathBuf>, major: u32, minor: u32) {
        self.dev_attrs
            .borrow_mut()
            .insert(path.into(), (major, minor));
    }

    /// Seeds a PCI device's config-space bytes (at least as large as any
    /// offset under test touches).
    pub fn set_pci_config(&self, pci_path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.pci_config.borrow_mut().insert(pci_path.into(), bytes);
    }

    /// Sets the fixed reply the next (and every subsequent) [`SysEnv::sg_io`] call returns.
    pub fn set_sg_io_reply(&self, reply: SgIoReply) {
        *self.sg_io_reply.borrow_mut() = Some(reply);
    }

    /// Sets the fixed reply the next (and every subsequent) [`SysEnv::ipmi_command`] call returns.
    pub fn set_ipmi_reply(&self, reply: IpmiReply) {
        *self.ipmi_reply.borrow_mut() = Some(reply);
    }

    /// Returns a snapshot of every call observed so far.
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.borrow().clone()
    }

    /// Returns the current value of a PCI config-space region, if seeded.
    #[must_use]
    pub fn pci_config(&self, pci_path: &Path) -> Option<Vec<u8>> {
        self.pci_config.borrow().get(pci_path).cloned()
    }

    /// Returns the current contents of a shared-memory region, if created.
    #[must_use]
    pub fn shared_mem(&self, name: &str) -> Option<Vec<u8>> {
        self.shared_mem.borrow().get(name).cloned()
    }
}

impl SysEnv for MockSysEnv {
    fn read_attr(&self, path: &Path) -> io::Result<String> {
        self.attrs
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn write_attr(&self, path: &Path, value: &str) -> io::Result<()> {
        self.log
            .borrow_mut()
            .attr_writes
            .push((path.to_path_buf(), value.to_owned()));
        self.attrs
            .borrow_mut()
            .insert(path.to_path_buf(), value.to_owned());
        Ok(())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.links
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.dirs
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn exists(&self, path: &Path) -> bool {
        self.attrs.borrow().contains_key(path)
            || self.links.borrow().contains_key(path)
            || self.dirs.borrow().contains_key(path)
            || self.dev_attrs.borrow().contains_key(path)
    }

    fn read_dev_attr(&self, path: &Path) -> io::Result<(u32, u32)> {
        self.dev_attrs
            .borrow()
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn sleep(&self, dur: Duration) {
        self.log.borrow_mut().sleeps.push(dur);
    }

    fn pci_config_read(&self, pci_path: &Path, offset: u16, buf: &mut [u8]) -> io::Result<()> {
        let table = self.pci_config.borrow();
        let bytes = table
            .get(pci_path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "config space read past end"));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn pci_config_write(&self, pci_path: &Path, offset: u16, buf: &[u8]) -> io::Result<()> {
        self.log
            .borrow_mut()
            .pci_writes
            .push((pci_path.to_path_buf(), offset, buf.to_vec()));
        let mut table = self.pci_config.borrow_mut();
        let bytes = table
            .get_mut(pci_path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "config space write past end"));
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sg_io(&self, dev_path: &Path, req: &SgIoRequest) -> io::Result<SgIoReply> {
        self.log
            .borrow_mut()
            .sg_io_calls
            .push((dev_path.to_path_buf(), req.cdb.clone()));
        Ok(self.sg_io_reply.borrow().clone().unwrap_or_default())
    }

    fn ipmi_command(&self, req: &IpmiRequest) -> io::Result<IpmiReply> {
        self.log.borrow_mut().ipmi_calls.push(req.clone());
        Ok(self.ipmi_reply.borrow().clone().unwrap_or_default())
    }

    fn with_locked_shared_mem(
        &self,
        name: &str,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> io::Result<()> {
        let mut table = self.shared_mem.borrow_mut();
        let region = table.entry(name.to_owned()).or_insert_with(|| vec![0u8; size]);
        if region.len() < size {
            region.resize(size, 0);
        }
        f(region);
        Ok(())
    }
}
