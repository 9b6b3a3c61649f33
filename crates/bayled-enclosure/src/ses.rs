//! SES-2 page layouts (`SPEC_FULL.md` §4.3).
//!
//! Pages are kept as raw byte buffers and walked with explicit offsets
//! rather than cast through a `#[repr(C)]` struct — the element lists are
//! variable-length and vendor descriptor text makes a fixed layout unsafe
//! to assume (`spec.md` §9, "Raw binary layouts as pack/unpack functions").

use bayled_core::{Error, Pattern};

/// SCSI protocol identifier for SAS, used to recognize relevant
/// Additional Element Status descriptors in page 10.
const PROTOCOL_SAS: u8 = 0x6;

/// Element type codes this crate understands; everything else in page 1's
/// type descriptor list is skipped.
const ELEMENT_TYPE_DEVICE_SLOT: u8 = 0x01;
const ELEMENT_TYPE_ARRAY_DEVICE_SLOT: u8 = 0x17;

/// One entry from a page 1 type descriptor header list.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    pub element_type: u8,
    pub num_elements: u8,
}

impl TypeDescriptor {
    fn is_slot_like(self) -> bool {
        matches!(
            self.element_type,
            ELEMENT_TYPE_DEVICE_SLOT | ELEMENT_TYPE_ARRAY_DEVICE_SLOT
        )
    }
}

/// Parses a page 1 (Configuration) buffer into its type descriptor header
/// list. Tolerates truncated vendor text past the last header it can fully
/// read; never panics on short input.
pub fn parse_page1(bytes: &[u8]) -> Result<Vec<TypeDescriptor>, Error> {
    if bytes.len() < 8 {
        return Err(Error::DataError("page 1 shorter than fixed header".into()));
    }
    let mut offset = 8usize;
    let encl_desc_len = *bytes
        .get(offset + 3)
        .ok_or_else(|| Error::DataError("page 1 truncated in enclosure descriptor".into()))?
        as usize;
    offset += 4 + encl_desc_len;

    let mut descriptors = Vec::new();
    while offset + 4 <= bytes.len() {
        let element_type = bytes[offset];
        let num_elements = bytes[offset + 1];
        descriptors.push(TypeDescriptor {
            element_type,
            num_elements,
        });
        offset += 4;
    }
    Ok(descriptors)
}

/// Number of elements belonging to device-slot-like types, in page 1 order.
/// The overall status element that precedes each type's per-element list is
/// not counted; `bayled-enclosure` only tracks individual slot state.
pub fn slot_like_element_count(descriptors: &[TypeDescriptor]) -> usize {
    descriptors
        .iter()
        .filter(|d| d.is_slot_like())
        .map(|d| d.num_elements as usize)
        .sum()
}

/// One parsed Additional Element Status descriptor naming a SAS-attached
/// slot (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SesSlot {
    pub element_index: u16,
    pub sas_address: u64,
}

/// Parses page 10 (Additional Element Status) into the SAS-attached slot
/// list, skipping non-SAS descriptors. `element_index` is the descriptor's
/// explicit index when EIP is set, otherwise the running sequential
/// position across *all* descriptors (SAS and non-SAS alike).
pub fn parse_page10(bytes: &[u8]) -> Result<Vec<SesSlot>, Error> {
    if bytes.len() < 8 {
        return Err(Error::DataError("page 10 shorter than fixed header".into()));
    }
    let mut offset = 8usize;
    let mut seq = 0u16;
    let mut slots = Vec::new();

    while offset + 2 <= bytes.len() {
        let byte0 = bytes[offset];
        let eip = byte0 & 0x10 != 0;
        let protocol = byte0 & 0x0f;
        let desc_len = bytes[offset + 1] as usize;
        let total_len = 2 + desc_len;
        if offset + total_len > bytes.len() {
            // Truncated tail: return what was parsed so far rather than error.
            break;
        }
        let desc = &bytes[offset..offset + total_len];

        let element_index = if eip {
            *desc.get(3).unwrap_or(&0) as u16
        } else {
            seq
        };

        if protocol == PROTOCOL_SAS {
            let sas_off = if eip { 12 } else { 4 };
            if let Some(addr_bytes) = desc.get(sas_off..sas_off + 8) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(addr_bytes);
                slots.push(SesSlot {
                    element_index,
                    sas_address: u64::from_be_bytes(raw),
                });
            }
        }

        seq += 1;
        offset += total_len;
    }
    Ok(slots)
}

/// One 4-byte element in page 2 (Enclosure Control/Status), either a
/// Device Slot or Array Device Slot control/status element
/// (`spec.md` §4.3, §4.4 pattern-to-encoding table).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page2Element {
    pub byte0: u8,
    pub byte1: u8,
    pub byte2: u8,
    pub byte3: u8,
}

impl Page2Element {
    /// Byte 0: select bit, set on every active write (`spec.md` §4.6).
    const SELECT: u8 = 0x80;
    /// Byte 0: predicted-failure carry, preserved across writes rather than
    /// driven by any pattern directly (`spec.md` §8, "PRDFAIL carry ...
    /// preserved bit 6 of byte 0").
    const PRDFAIL_CARRY: u8 = 0x40;
    /// Byte 1: request rebuild/remap (`spec.md` §8 scenario S2: REBUILD
    /// writes `{0x80, 0x02, 0, 0}`).
    const REBUILD: u8 = 0x02;
    /// Byte 2: request identify.
    const IDENT: u8 = 0x01;
    /// Byte 2: predicted failure.
    const PFA: u8 = 0x40;
    /// Byte 2: in a critical (degraded) array.
    const ICA: u8 = 0x08;
    /// Byte 3: fault.
    const FAULT: u8 = 0x80;
    /// Byte 3: hot spare.
    const HOTSPARE: u8 = 0x02;
    /// Byte 3: in a failed array.
    const IFA: u8 = 0x10;

    #[must_use]
    pub fn ident(self) -> bool {
        self.byte2 & Self::IDENT != 0
    }

    #[must_use]
    pub fn fault(self) -> bool {
        self.byte3 & Self::FAULT != 0
    }

    fn select_preserving_prdfail(&mut self) {
        self.byte0 = Self::SELECT | (self.byte0 & Self::PRDFAIL_CARRY);
    }

    /// Applies one [`Pattern`]'s encoding to this element, per the
    /// pattern→SES-2 mapping `bayled-transports` is built against
    /// (`spec.md` §4.4, §4.6). `array_slot` selects whether byte 3 is used
    /// (Array Device Slot) or left at zero (plain Device Slot).
    pub fn apply_pattern(&mut self, pattern: Pattern, array_slot: bool) -> Result<(), Error> {
        if pattern == Pattern::LocateOff {
            self.select_preserving_prdfail();
            self.byte2 &= 0x4e;
            self.byte3 &= 0x3c;
            return Ok(());
        }

        self.select_preserving_prdfail();
        self.byte1 = 0;
        self.byte2 = 0;
        self.byte3 = 0;
        match pattern {
            Pattern::Normal | Pattern::OneshotNormal | Pattern::None_ => {}
            Pattern::Locate => self.byte2 |= Self::IDENT,
            Pattern::FailedDrive => self.byte3 |= Self::FAULT,
            Pattern::Rebuild => self.byte1 |= Self::REBUILD,
            Pattern::Pfa => self.byte2 |= Self::PFA,
            Pattern::HotSpare => self.byte3 |= Self::HOTSPARE,
            Pattern::Degraded => self.byte2 |= Self::ICA,
            Pattern::FailedArray => self.byte3 |= Self::IFA,
            Pattern::LocateAndFail => {
                self.byte2 |= Self::IDENT;
                self.byte3 |= Self::FAULT;
            }
            other => return Err(Error::not_supported(other)),
        }
        if !array_slot {
            self.byte3 = 0;
        }
        Ok(())
    }
}

/// Reads the element at 1-based `element_index` position within page 2's
/// per-element list (the first 4 bytes after the 8-byte header are the
/// overall status element at index 0 and are skipped).
pub fn read_element(page2: &[u8], element_index: u16) -> Result<Page2Element, Error> {
    let offset = element_offset(element_index);
    let bytes = page2
        .get(offset..offset + 4)
        .ok_or_else(|| Error::DataError(format!("page 2 too short for element {element_index}")))?;
    Ok(Page2Element {
        byte0: bytes[0],
        byte1: bytes[1],
        byte2: bytes[2],
        byte3: bytes[3],
    })
}

/// Writes `element` back into `page2` at `element_index`, growing the
/// buffer if necessary.
pub fn write_element(page2: &mut Vec<u8>, element_index: u16, element: Page2Element) {
    let offset = element_offset(element_index);
    if page2.len() < offset + 4 {
        page2.resize(offset + 4, 0);
    }
    page2[offset] = element.byte0;
    page2[offset + 1] = element.byte1;
    page2[offset + 2] = element.byte2;
    page2[offset + 3] = element.byte3;
}

fn element_offset(element_index: u16) -> usize {
    8 + 4 + (element_index as usize) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page1_fixture() -> Vec<u8> {
        let mut p = vec![0u8; 8];
        p[3] = 0; // page length placeholder, unused by parser
        p.push(0); // enclosure descriptor length byte at offset 8+3=11
        p[11] = 0;
        p.extend_from_slice(&[ELEMENT_TYPE_ARRAY_DEVICE_SLOT, 4, 0, 0]);
        p.extend_from_slice(&[0x05, 2, 0, 0]); // unrelated element type, skipped
        p
    }

    #[test]
    fn parses_type_descriptor_list() {
        let page = page1_fixture();
        let descriptors = parse_page1(&page).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(slot_like_element_count(&descriptors), 4);
    }

    fn page10_fixture() -> Vec<u8> {
        let mut p = vec![0u8; 8];
        // Descriptor 0: EIP set, SAS, element_index=3, addr at +12.
        let mut d0 = vec![0x10 | PROTOCOL_SAS, 14, 0, 3];
        d0.extend_from_slice(&[0u8; 8]); // pad to offset 12 from desc start
        d0.extend_from_slice(&0xAABBCCDD_EEFF0011u64.to_be_bytes());
        p.extend_from_slice(&d0);
        p
    }

    #[test]
    fn parses_sas_slot_with_eip() {
        let page = page10_fixture();
        let slots = parse_page10(&page).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].element_index, 3);
        assert_eq!(slots[0].sas_address, 0xAABBCCDD_EEFF0011);
    }

    #[test]
    fn truncated_page10_returns_partial() {
        let mut page = page10_fixture();
        page.truncate(page.len() - 2);
        let slots = parse_page10(&page).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn rebuild_matches_scenario_s2_bytes() {
        let mut el = Page2Element::default();
        el.apply_pattern(Pattern::Rebuild, true).unwrap();
        assert_eq!(
            (el.byte0, el.byte1, el.byte2, el.byte3),
            (0x80, 0x02, 0x00, 0x00)
        );
    }

    #[test]
    fn locate_off_clears_ident_but_preserves_prdfail_carry() {
        let mut el = Page2Element::default();
        el.byte0 = 0x40; // PRDFAIL carry already latched by firmware.
        el.apply_pattern(Pattern::Locate, true).unwrap();
        assert!(el.ident());
        el.byte0 |= 0x40;
        el.apply_pattern(Pattern::LocateOff, true).unwrap();
        assert!(!el.ident());
        assert_eq!(el.byte0 & 0x40, 0x40);
    }

    #[test]
    fn device_slot_zeroes_byte3() {
        let mut el = Page2Element::default();
        el.apply_pattern(Pattern::LocateAndFail, false).unwrap();
        assert_eq!(el.byte3, 0);
        assert!(el.ident());
    }

    #[test]
    fn write_then_read_element() {
        let mut page2 = vec![0u8; 8];
        let mut el = Page2Element::default();
        el.apply_pattern(Pattern::FailedDrive, true).unwrap();
        write_element(&mut page2, 2, el);
        let read_back = read_element(&page2, 2).unwrap();
        assert!(read_back.fault());
    }
}
