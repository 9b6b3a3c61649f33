//! AMD SGPIO transport: the three-register frame plus the cross-process
//! blink-generator cache (`spec.md` §4.11, §5, §6, §8 invariant 5).

use bayled_core::{Error, Pattern};
use bayled_sysenv::SysEnv;

use crate::tables;

/// Cache filename and size (`spec.md` §6).
const CACHE_NAME: &str = "ledmon_amd_sgpio_cache";
const CACHE_SIZE: usize = 1024;
/// Bytes per per-group record: `{drive_leds[4]: {error, locate, activity}, blink_gen_a, blink_gen_b, rsvd:u16}`.
/// The field list's explicit `u8`/`u16` widths sum to 16 bytes (4 drives × 3
/// bytes + 2 generator bytes + 2 reserved bytes), used here rather than the
/// surrounding prose's "12 bytes each".
const RECORD_SIZE: usize = 16;

/// One cache record: four drive LED triples plus the alternating
/// blink-generator assignment for this group of four bays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GroupRecord {
    drive_leds: [[u8; 3]; 4],
    blink_gen_a: u8,
    blink_gen_b: u8,
}

impl GroupRecord {
    fn decode(bytes: &[u8]) -> Self {
        let mut rec = GroupRecord::default();
        for (i, led) in rec.drive_leds.iter_mut().enumerate() {
            led.copy_from_slice(&bytes[i * 3..i * 3 + 3]);
        }
        rec.blink_gen_a = bytes[12];
        rec.blink_gen_b = bytes[13];
        rec
    }

    fn encode(self, out: &mut [u8]) {
        for (i, led) in self.drive_leds.iter().enumerate() {
            out[i * 3..i * 3 + 3].copy_from_slice(led);
        }
        out[12] = self.blink_gen_a;
        out[13] = self.blink_gen_b;
        out[14] = 0;
        out[15] = 0;
    }
}

/// `(ata_port - 1) / 4` group index, and the drive's position within it.
fn group_of(ata_port: u32) -> (usize, usize) {
    let zero_based = ata_port.saturating_sub(1);
    ((zero_based / 4) as usize, (zero_based % 4) as usize)
}

/// Assembles and writes the three-register frame for `ata_port`, updating
/// the shared blink-generator cache. Alternates blink generator A/B across
/// successive distinct patterns in the same group (invariant 5).
pub fn set(
    sysenv: &impl SysEnv,
    em_buffer: &std::path::Path,
    ata_port: u32,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let encoding = tables::sff8489_encoding(current).ok_or_else(|| Error::invalid_state(current))?;
    let (group, slot) = group_of(ata_port);

    let mut write_result = Ok(());
    let mut snapshot = None;
    sysenv.with_locked_shared_mem(CACHE_NAME, CACHE_SIZE, &mut |mem| {
        let offset = group * RECORD_SIZE;
        let Some(record_bytes) = mem.get(offset..offset + RECORD_SIZE) else {
            write_result = Err(Error::DataError(format!("group {group} past cache capacity")));
            return;
        };
        let mut record = GroupRecord::decode(record_bytes);
        snapshot = Some(record);

        record.drive_leds[slot] = [encoding.error, encoding.locate, encoding.activity];
        // Alternate generator assignment across successive distinct patterns.
        let ibpi_code = tables::ibpi_pattern_code(current).unwrap_or(0);
        if record.blink_gen_a == 0 {
            record.blink_gen_a = ibpi_code;
        } else {
            record.blink_gen_b = ibpi_code;
            std::mem::swap(&mut record.blink_gen_a, &mut record.blink_gen_b);
        }

        record.encode(&mut mem[offset..offset + RECORD_SIZE]);
    })?;

    let amd_register = build_amd_register();
    let config_register = build_config_register(group_of(ata_port).0 as u8);
    let tx_register = build_tx_register(&snapshot.unwrap_or_default());

    if let Err(e) = write_registers(sysenv, em_buffer, amd_register, config_register, tx_register) {
        write_result = Err(e);
    }
    write_result?;
    Ok(true)
}

fn build_amd_register() -> u32 {
    // Initiator bit set, no polarity flip, bypass disabled, return-to-normal enabled.
    0x1
}

fn build_config_register(group: u8) -> u32 {
    u32::from(group) << 24
}

fn build_tx_register(record: &GroupRecord) -> u32 {
    let mut value = 0u32;
    for (i, led) in record.drive_leds.iter().enumerate() {
        let byte = (led[0] << 5) | (led[1] << 3) | led[2];
        value |= u32::from(byte) << (i * 8);
    }
    value
}

fn write_registers(
    sysenv: &impl SysEnv,
    em_buffer: &std::path::Path,
    amd: u32,
    cfg: u32,
    tx: u32,
) -> Result<(), Error> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&amd.to_le_bytes());
    payload.extend_from_slice(&cfg.to_le_bytes());
    payload.extend_from_slice(&tx.to_le_bytes());
    sysenv.write_attr(em_buffer, &hex_encode(&payload))?;
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;
    use std::path::PathBuf;

    fn em_buffer() -> PathBuf {
        PathBuf::from("/sys/class/scsi_host/host0/em_buffer")
    }

    /// Scenario S6: `ata_port=5` groups to `(5-1)/4 = 1`.
    #[test]
    fn scenario_s6_ata_port_5_maps_to_group_1() {
        assert_eq!(group_of(5), (1, 0));
    }

    #[test]
    fn set_rebuild_writes_em_buffer_and_mutates_one_group() {
        let sysenv = MockSysEnv::new();
        let wrote = set(&sysenv, &em_buffer(), 5, Pattern::Normal, Pattern::Rebuild).unwrap();
        assert!(wrote);
        assert_eq!(sysenv.log().attr_writes.len(), 1);

        let cache = sysenv.shared_mem(CACHE_NAME).unwrap();
        let group1 = GroupRecord::decode(&cache[RECORD_SIZE..RECORD_SIZE * 2]);
        assert_eq!(group1.drive_leds[0][0], 0x02); // error bit, per Sff8489 rebuild encoding
        assert_eq!(group1.blink_gen_a, 0x07); // ibpi_pattern[REBUILD]
    }

    #[test]
    fn blink_generator_alternates_across_distinct_patterns() {
        let sysenv = MockSysEnv::new();
        set(&sysenv, &em_buffer(), 5, Pattern::Normal, Pattern::Rebuild).unwrap();
        set(&sysenv, &em_buffer(), 5, Pattern::Rebuild, Pattern::Locate).unwrap();

        let cache = sysenv.shared_mem(CACHE_NAME).unwrap();
        let group1 = GroupRecord::decode(&cache[RECORD_SIZE..RECORD_SIZE * 2]);
        assert_ne!(group1.blink_gen_a, 0);
    }

    #[test]
    fn repeat_set_is_a_no_op() {
        let sysenv = MockSysEnv::new();
        set(&sysenv, &em_buffer(), 5, Pattern::Normal, Pattern::Locate).unwrap();
        let wrote_again = set(&sysenv, &em_buffer(), 5, Pattern::Locate, Pattern::Locate).unwrap();
        assert!(!wrote_again);
        assert_eq!(sysenv.log().attr_writes.len(), 1);
    }
}
