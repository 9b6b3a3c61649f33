//! Production [`SysEnv`] backed by real Linux syscalls.
//!
//! Sysfs attributes go through plain `std::fs`. `SG_IO`, PCI config space,
//! and IPMI go through raw `ioctl`/`pread`/`pwrite` calls built on `libc`;
//! the shared-memory cache uses `nix`'s `flock` wrapper plus `mmap`.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{Flock, FlockArg};

use crate::{IpmiReply, IpmiRequest, SgDirection, SgIoReply, SgIoRequest, SysEnv};

/// `ioctl` request number for `SG_IO` (`<scsi/sg.h>`).
const SG_IO: libc::c_ulong = 0x2285;

/// `sg_io_hdr_t` direction: device reads from host.
const SG_DXFER_TO_DEV: i32 = -2;
/// `sg_io_hdr_t` direction: device writes to host.
const SG_DXFER_FROM_DEV: i32 = -3;

/// Mirrors `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
struct SgIoHdr {
    interface_id: i32,
    dxfer_direction: i32,
    cmd_len: u8,
    mx_sb_len: u8,
    iovec_count: u16,
    dxfer_len: u32,
    dxferp: *mut libc::c_void,
    cmdp: *mut u8,
    sbp: *mut u8,
    timeout: u32,
    flags: u32,
    pack_id: i32,
    usr_ptr: *mut libc::c_void,
    status: u8,
    masked_status: u8,
    msg_status: u8,
    sb_len_wr: u8,
    host_status: u16,
    driver_status: u16,
    resid: i32,
    duration: u32,
    info: u32,
}

/// `ioctl` request number for the IPMI character-device command send
/// (`IPMICTL_SEND_COMMAND` from `<linux/ipmi.h>`).
const IPMICTL_SEND_COMMAND: libc::c_ulong = 0x8028_6903;
/// `ioctl` request number for reading a pending IPMI response
/// (`IPMICTL_RECEIVE_MSG_TRUNC`).
const IPMICTL_RECEIVE_MSG_TRUNC: libc::c_ulong = 0xc028_6911;

#[repr(C)]
struct IpmiSystemInterfaceAddr {
    addr_type: i32,
    channel: i16,
    lun: u8,
}

#[repr(C)]
struct IpmiMsg {
    netfn: u8,
    cmd: u8,
    data_len: u16,
    data: *mut u8,
}

#[repr(C)]
struct IpmiReq {
    addr: *mut libc::c_void,
    addr_len: u32,
    msgid: i64,
    msg: IpmiMsg,
}

#[repr(C)]
struct IpmiRecv {
    recv_type: i32,
    addr: *mut libc::c_void,
    addr_len: u32,
    msgid: i64,
    msg: IpmiMsg,
}

const IPMI_SYSTEM_INTERFACE_ADDR_TYPE: i32 = 0x0c;
const IPMI_BMC_CHANNEL: i16 = 0xf;

/// Path to the default local IPMI device, opened lazily per command.
const IPMI_DEVICE: &str = "/dev/ipmi0";

/// Production [`SysEnv`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSysEnv;

impl SysEnv for LinuxSysEnv {
    fn read_attr(&self, path: &Path) -> io::Result<String> {
        Ok(fs::read_to_string(path)?.trim_end_matches('\n').to_owned())
    }

    fn write_attr(&self, path: &Path, value: &str) -> io::Result<()> {
        fs::write(path, value)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dev_attr(&self, path: &Path) -> io::Result<(u32, u32)> {
        let raw = self.read_attr(&path.join("dev"))?;
        let (major, minor) = raw
            .split_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed dev attribute"))?;
        let major: u32 = major
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric major"))?;
        let minor: u32 = minor
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric minor"))?;
        Ok((major, minor))
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }

    fn pci_config_read(&self, pci_path: &Path, offset: u16, buf: &mut [u8]) -> io::Result<()> {
        let mut f = fs::File::open(pci_path.join("config"))?;
        f.seek(SeekFrom::Start(u64::from(offset)))?;
        f.read_exact(buf)
    }

    fn pci_config_write(&self, pci_path: &Path, offset: u16, buf: &[u8]) -> io::Result<()> {
        let mut f = fs::OpenOptions::new().write(true).open(pci_path.join("config"))?;
        f.seek(SeekFrom::Start(u64::from(offset)))?;
        f.write_all(buf)
    }

    fn sg_io(&self, dev_path: &Path, req: &SgIoRequest) -> io::Result<SgIoReply> {
        let file = fs::OpenOptions::new().read(true).write(true).open(dev_path)?;
        let mut sense = [0u8; 32];
        let mut cdb = req.cdb.clone();
        let mut buffer = req.buffer.clone();

        let dxfer_direction = match req.direction {
            SgDirection::ToDevice => SG_DXFER_TO_DEV,
            SgDirection::FromDevice => SG_DXFER_FROM_DEV,
        };

        let mut hdr = SgIoHdr {
            interface_id: i32::from(b'S'),
            dxfer_direction,
            cmd_len: cdb.len() as u8,
            mx_sb_len: sense.len() as u8,
            iovec_count: 0,
            dxfer_len: buffer.len() as u32,
            dxferp: buffer.as_mut_ptr().cast(),
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: req.timeout_ms,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: `hdr` points at buffers (`cdb`, `buffer`, `sense`) that
        // outlive the call and are sized to match the lengths passed in.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), SG_IO, std::ptr::addr_of_mut!(hdr)) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(SgIoReply {
            buffer,
            status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
        })
    }

    fn ipmi_command(&self, req: &IpmiRequest) -> io::Result<IpmiReply> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(IPMI_DEVICE)?;

        let mut addr = IpmiSystemInterfaceAddr {
            addr_type: IPMI_SYSTEM_INTERFACE_ADDR_TYPE,
            channel: IPMI_BMC_CHANNEL,
            lun: 0,
        };
        let mut data = req.data.clone();
        let mut send = IpmiReq {
            addr: std::ptr::addr_of_mut!(addr).cast(),
            addr_len: std::mem::size_of::<IpmiSystemInterfaceAddr>() as u32,
            msgid: 1,
            msg: IpmiMsg {
                netfn: req.netfn,
                cmd: req.cmd,
                data_len: data.len() as u16,
                data: data.as_mut_ptr(),
            },
        };

        // SAFETY: `send` references `addr` and `data`, both still alive and
        // correctly sized for this call.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                IPMICTL_SEND_COMMAND,
                std::ptr::addr_of_mut!(send),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // Wait for the asynchronous reply to become readable; the kernel
        // manages the timeout internally (spec.md §5: "no explicit timeout").
        let mut pfd = [libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        // SAFETY: `pfd` is a single well-formed `pollfd` for this call.
        let rc = unsafe { libc::poll(pfd.as_mut_ptr(), 1, -1) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut reply_data = vec![0u8; 256];
        let mut reply_addr = IpmiSystemInterfaceAddr {
            addr_type: 0,
            channel: 0,
            lun: 0,
        };
        let mut recv = IpmiRecv {
            recv_type: 0,
            addr: std::ptr::addr_of_mut!(reply_addr).cast(),
            addr_len: std::mem::size_of::<IpmiSystemInterfaceAddr>() as u32,
            msgid: 0,
            msg: IpmiMsg {
                netfn: 0,
                cmd: 0,
                data_len: reply_data.len() as u16,
                data: reply_data.as_mut_ptr(),
            },
        };
        // SAFETY: `recv` references `reply_addr`/`reply_data`, both sized
        // and alive for this call; the kernel writes at most `data_len` bytes.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                IPMICTL_RECEIVE_MSG_TRUNC,
                std::ptr::addr_of_mut!(recv),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let len = recv.msg.data_len as usize;
        reply_data.truncate(len);
        let completion_code = reply_data.first().copied().unwrap_or(0xff);
        let data = reply_data.into_iter().skip(1).collect();
        Ok(IpmiReply {
            completion_code,
            data,
        })
    }

    fn with_locked_shared_mem(
        &self,
        name: &str,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> io::Result<()> {
        let path = shm_path(name);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from_raw_os_error(errno as i32))?;

        let metadata = locked.metadata()?;
        if metadata.len() < size as u64 {
            locked.set_len(size as u64)?;
        }

        // SAFETY: the region is sized to `size` (just ensured above) and
        // the fd stays open for the duration of the mapping; the lock held
        // by `locked` prevents concurrent mutation from another process.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                locked.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: `addr`/`size` were just validated by a successful `mmap`.
        let slice = unsafe { std::slice::from_raw_parts_mut(addr.cast::<u8>(), size) };
        f(slice);

        // SAFETY: `addr`/`size` match the earlier `mmap` call exactly.
        unsafe { libc::munmap(addr, size) };
        // `locked` drops here, releasing the `flock` when its fd closes.
        Ok(())
    }
}

/// Canonical path for a named shared-memory cache file.
///
/// Real POSIX shared memory (`shm_open`) lives under `/dev/shm`; the cache
/// name from `SPEC_FULL.md` (`/ledmon_amd_sgpio_cache`) is used verbatim as
/// the file name there.
fn shm_path(name: &str) -> PathBuf {
    let trimmed = name.trim_start_matches('/');
    PathBuf::from("/dev/shm").join(trimmed)
}
