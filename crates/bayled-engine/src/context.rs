//! The `Engine` context: owns the controller/device/enclosure registries
//! and orchestrates `scan` (`spec.md` §4.0, §4.1, §4.2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bayled_core::{BlockDevice, Controller, DeviceKey, EnclosureId, Error, LogConfig, LogSink, Pattern, ProbeFilter};
use bayled_enclosure::Enclosure;
use bayled_sysenv::SysEnv;
use bayled_transports::dell_ipmi;

/// Summary of one `scan()` call, returned for logging/diagnostics purposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReport {
    /// Controllers discovered and classified.
    pub controllers: usize,
    /// Block devices successfully bound to a controller.
    pub devices: usize,
    /// SES enclosures loaded.
    pub enclosures: usize,
}

/// Per-device flush failures, collected rather than short-circuited
/// (`spec.md` §4.14, §7: "a flush failure on one device never aborts the
/// flush loop over others").
pub type FlushReport = Vec<(DeviceKey, Error)>;

/// The engine context (`spec.md` §3 calls the source's equivalent `Context`;
/// this crate's public name is `Engine`, per `SPEC_FULL.md` §4.0).
///
/// Owns the controller registry, the block-device table, and the enclosure
/// table; replaces all three atomically on a successful `scan`. Holds no
/// open file descriptors itself — every I/O call borrows a `&impl SysEnv`
/// for its duration.
pub struct Engine {
    pub(crate) controllers: Vec<Controller>,
    pub(crate) devices: HashMap<DeviceKey, BlockDevice>,
    pub(crate) enclosures: HashMap<EnclosureId, Enclosure>,
    /// Cached per-controller Dell iDRAC generation, queried at most once
    /// per controller per scan generation (`spec.md` §4.10, "on first use").
    pub(crate) dell_generations: HashMap<bayled_core::ControllerId, dell_ipmi::Generation>,
    /// Controllers whose MG9098 backplane identity has already been
    /// confirmed this scan generation (`spec.md` §4.12, "on first use").
    pub(crate) amd_backplane_validated: std::collections::HashSet<bayled_core::ControllerId>,
    timestamp: Option<Instant>,
    pub(crate) log: LogConfig,
    filter: ProbeFilter,
}

fn parse_host_id(block_path: &Path) -> Option<u32> {
    block_path.components().find_map(|c| {
        let s = c.as_os_str().to_str()?;
        let digits = s.strip_prefix("host")?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    })
}

impl Engine {
    /// Constructs an empty context; performs no I/O (`SPEC_FULL.md` §4.0).
    #[must_use]
    pub fn new(filter: ProbeFilter) -> Self {
        Self {
            controllers: Vec::new(),
            devices: HashMap::new(),
            enclosures: HashMap::new(),
            dell_generations: HashMap::new(),
            amd_backplane_validated: std::collections::HashSet::new(),
            timestamp: None,
            log: LogConfig::default(),
            filter,
        }
    }

    /// Replaces the engine's log sink (`spec.md` §6 `log_fd_set`).
    pub fn set_log_sink(&mut self, sink: impl LogSink + 'static) {
        self.log.set_sink(sink);
    }

    /// Replaces the engine's minimum forwarded log level (`spec.md` §6 `log_level_set`).
    pub fn set_log_level(&mut self, level: log::LevelFilter) {
        self.log.set_level(level);
    }

    /// Monotonic timestamp of the last successful `scan`, or `None` before
    /// the first one (`spec.md` §9, "Global timestamp").
    #[must_use]
    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    /// The current controller registry.
    #[must_use]
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// The current block-device table, keyed by canonical sysfs path.
    #[must_use]
    pub fn devices(&self) -> &HashMap<DeviceKey, BlockDevice> {
        &self.devices
    }

    /// Looks up a block device by its canonical sysfs path.
    #[must_use]
    pub fn device(&self, key: &DeviceKey) -> Option<&BlockDevice> {
        self.devices.get(key)
    }

    /// Resolves a `/dev` node to the canonical sysfs key `set`/`flush`
    /// expect (`spec.md` §6 `device_name_lookup`).
    #[must_use]
    pub fn device_name_lookup(&self, devnode: &Path) -> Option<DeviceKey> {
        self.devices
            .values()
            .find(|device| device.devnode == devnode)
            .map(|device| device.sysfs_path.clone())
    }

    /// Whether `controller`'s kind has a known LED transport
    /// (`spec.md` §6 `is_management_supported`).
    #[must_use]
    pub fn is_management_supported(&self, controller: bayled_core::ControllerId) -> bool {
        self.controllers
            .get(controller.0 as usize)
            .is_some_and(|c| !matches!(c.kind, bayled_core::ControllerKind::Unknown))
    }

    /// Walks the device tree, classifies controllers, binds block devices,
    /// and loads enclosures, replacing the engine's registries on success.
    ///
    /// Old state is kept if `pci_root`/`block_root`/`enclosure_root` itself
    /// cannot be listed (probing failed outright, before anything was
    /// committed); a controller, device, or enclosure that individually
    /// fails to classify/bind/load is simply omitted and logged at `DEBUG`
    /// (`spec.md` §4.1, §7).
    pub fn scan<S: SysEnv>(
        &mut self,
        sysenv: &S,
        pci_root: &Path,
        block_root: &Path,
        enclosure_root: &Path,
        dmi_product_name: Option<&str>,
        dell_idrac_query_succeeds: impl Fn(&Path) -> bool,
    ) -> Result<ScanReport, Error> {
        let block_entries = sysenv.read_dir(block_root)?;
        let enclosure_entries = sysenv.read_dir(enclosure_root)?;

        let controllers = bayled_probe::probe_controllers(
            sysenv,
            pci_root,
            &self.filter,
            dell_idrac_query_succeeds,
            dmi_product_name,
        );

        let mut enclosures = HashMap::new();
        for (index, class_path) in enclosure_entries.into_iter().enumerate() {
            let devnode = sysenv
                .read_link(&class_path.join("device"))
                .unwrap_or_else(|_| class_path.clone());
            match Enclosure::load(sysenv, devnode) {
                Ok(enclosure) => {
                    enclosures.insert(EnclosureId(index as u32), enclosure);
                }
                Err(err) => {
                    self.log.emit(
                        log::Level::Debug,
                        &format!("enclosure at {} failed to load: {err}", class_path.display()),
                    );
                }
            }
        }

        let mut devices = HashMap::new();
        for block_path in block_entries {
            let host_id = parse_host_id(&block_path);
            let scsi_host_dir: PathBuf = host_id
                .map(|id| PathBuf::from(format!("/sys/class/scsi_host/host{id}")))
                .unwrap_or_default();
            match bayled_probe::bind_block_device(sysenv, &controllers, &block_path, &scsi_host_dir, host_id, None) {
                Ok(device) => {
                    devices.insert(device.sysfs_path.clone(), device);
                }
                Err(err) => {
                    self.log.emit(
                        log::Level::Debug,
                        &format!("block device at {} failed to bind: {err}", block_path.display()),
                    );
                }
            }
        }

        let report = ScanReport {
            controllers: controllers.len(),
            devices: devices.len(),
            enclosures: enclosures.len(),
        };

        self.controllers = controllers;
        self.enclosures = enclosures;
        self.devices = devices;
        self.dell_generations.clear();
        self.amd_backplane_validated.clear();
        self.timestamp = Some(Instant::now());
        self.log.emit(
            log::Level::Debug,
            &format!(
                "scan complete: {} controllers, {} devices, {} enclosures",
                report.controllers, report.devices, report.enclosures
            ),
        );
        Ok(report)
    }

    /// Records `pattern` as the device's `current`; issues no I/O
    /// (`spec.md` §4 "State machine": "a set writes the new pattern to
    /// current, leaves previous untouched").
    pub fn set(&mut self, key: &DeviceKey, pattern: Pattern) -> Result<(), Error> {
        let device = self
            .devices
            .get_mut(key)
            .ok_or_else(|| Error::InvalidPath(format!("no such device: {}", key.display())))?;
        device.current = pattern;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_core::{ControlPath, ControllerId};
    use bayled_sysenv::mock::MockSysEnv;

    #[test]
    fn new_context_does_no_io() {
        let sysenv = MockSysEnv::new();
        let _engine = Engine::new(ProbeFilter::default());
        assert!(sysenv.log().attr_writes.is_empty());
    }

    #[test]
    fn scan_of_unreadable_root_preserves_old_state() {
        let sysenv = MockSysEnv::new();
        let mut engine = Engine::new(ProbeFilter::default());
        engine.devices.insert(
            PathBuf::from("/sys/block/sda"),
            BlockDevice::new(
                PathBuf::from("/sys/block/sda"),
                PathBuf::from("/dev/sda"),
                ControllerId(0),
                ControlPath::Controller { path: PathBuf::from("/x") },
            ),
        );
        // MockSysEnv::read_dir errors (NotFound) for any directory that was
        // never seeded via `set_dir`.
        let err = engine
            .scan(
                &sysenv,
                Path::new("/sys/bus/pci/devices"),
                Path::new("/sys/block"),
                Path::new("/sys/class/enclosure"),
                None,
                |_| false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
        assert_eq!(engine.devices.len(), 1);
    }

    #[test]
    fn set_on_unknown_device_is_invalid_path() {
        let mut engine = Engine::new(ProbeFilter::default());
        let err = engine.set(&PathBuf::from("/sys/block/sda"), Pattern::Locate).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[test]
    fn device_name_lookup_resolves_devnode_to_sysfs_key() {
        let mut engine = Engine::new(ProbeFilter::default());
        let key = PathBuf::from("/sys/block/sda");
        engine.devices.insert(
            key.clone(),
            BlockDevice::new(
                key.clone(),
                PathBuf::from("/dev/sda"),
                ControllerId(0),
                ControlPath::AhciScsiHost { scsi_host_dir: PathBuf::from("/sys/class/scsi_host/host0") },
            ),
        );
        assert_eq!(engine.device_name_lookup(Path::new("/dev/sda")), Some(key));
        assert_eq!(engine.device_name_lookup(Path::new("/dev/sdb")), None);
    }

    #[test]
    fn is_management_supported_is_false_for_unknown_controller_kind() {
        let mut engine = Engine::new(ProbeFilter::default());
        engine.controllers.push(Controller::new(PathBuf::from("/sys/bus/pci/devices/0000:00:1f.2"), bayled_core::ControllerKind::Ahci));
        engine.controllers.push(Controller::new(PathBuf::from("/sys/bus/pci/devices/0000:00:1f.3"), bayled_core::ControllerKind::Unknown));
        assert!(engine.is_management_supported(ControllerId(0)));
        assert!(!engine.is_management_supported(ControllerId(1)));
        assert!(!engine.is_management_supported(ControllerId(2)));
    }

    #[test]
    fn set_records_current_without_io() {
        let sysenv = MockSysEnv::new();
        let mut engine = Engine::new(ProbeFilter::default());
        let key = PathBuf::from("/sys/block/sda");
        engine.devices.insert(
            key.clone(),
            BlockDevice::new(
                key.clone(),
                PathBuf::from("/dev/sda"),
                ControllerId(0),
                ControlPath::AhciScsiHost { scsi_host_dir: PathBuf::from("/sys/class/scsi_host/host0") },
            ),
        );
        engine.set(&key, Pattern::Locate).unwrap();
        assert_eq!(engine.devices[&key].current, Pattern::Locate);
        assert_eq!(engine.devices[&key].previous, Pattern::None_);
        assert!(sysenv.log().attr_writes.is_empty());
    }
}
