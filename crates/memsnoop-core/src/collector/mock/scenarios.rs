//! Pre-built mock targets for testing.
//!
//! These scenarios lay out a small process in `/proc` together with a
//! pagemap image and an idle bitmap, plus helpers that play the kernel's
//! part between rounds (mapping pages, clearing idle bits on access).

use super::filesystem::MockFs;
use crate::collector::idle::bits;

/// Pid used by [`MockFs::snooped_process`] in tests.
pub const SCENARIO_PID: u32 = 4321;

/// Idle bitmap location used by the scenarios.
pub const SCENARIO_BITMAP: &str = "/sys/kernel/mm/page_idle/bitmap";

/// Bitmap size of the scenarios: 512 frames.
pub const SCENARIO_BITMAP_BYTES: usize = 64;

impl MockFs {
    /// Creates a filesystem holding one traceable process.
    ///
    /// Layout (virtual page -> PFN, `-` = not resident):
    ///
    /// ```text
    /// 0x400..=0x402   r-xp /usr/bin/target   100, 101, -
    /// 0x600           rw-p /usr/bin/target   300
    ///                 (one malformed line)
    /// 0x1000..=0x1003 rw-p [heap]            64, 65, 66, 67
    /// 0x2000..=0x2001 rw-p [stack]           -, 5
    /// ```
    ///
    /// The bitmap starts zeroed: every frame reads as accessed until the
    /// first mark-idle.
    pub fn snooped_process(pid: u32) -> Self {
        let fs = Self::new();

        fs.add_file(
            format!("/proc/{}/maps", pid),
            "\
00400000-00403000 r-xp 00000000 08:01 131                                /usr/bin/target
00600000-00601000 rw-p 00002000 08:01 131                                /usr/bin/target
this line is not a mapping
01000000-01004000 rw-p 00000000 00:00 0                                  [heap]
02000000-02002000 rw-p 00000000 00:00 0                                  [stack]
",
        );
        fs.add_file(
            format!("/proc/{}/stat", pid),
            format!("{} (target) S 1 {} {} 0 -1 4194304 120 0 0 0 5 3 0 0 20 0 1 0 100", pid, pid, pid),
        );
        fs.add_file(format!("/proc/{}/statm", pid), "2048 512 128 3 0 400 0\n");
        fs.add_file(
            format!("/proc/{}/io", pid),
            "\
rchar: 123456
wchar: 65432
syscr: 120
syscw: 40
read_bytes: 4096
write_bytes: 8192
cancelled_write_bytes: 0
",
        );
        fs.add_binary(format!("/proc/{}/pagemap", pid), Vec::new());

        for (vpn, pfn) in [
            (0x400, 100),
            (0x401, 101),
            (0x600, 300),
            (0x1000, 64),
            (0x1001, 65),
            (0x1002, 66),
            (0x1003, 67),
            (0x2001, 5),
        ] {
            fs.map_page(pid, vpn, pfn);
        }
        // Cover the last VMA completely so reads are not short.
        fs.set_pagemap_entry(pid, 0x2000, 0);

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
",
        );
        fs.add_file(
            "/sys/kernel/mm/transparent_hugepage/enabled",
            "always madvise [never]\n",
        );
        fs.add_idle_bitmap(SCENARIO_BITMAP, vec![0; SCENARIO_BITMAP_BYTES]);

        fs
    }

    /// Writes a raw pagemap entry for virtual page `vpn`, growing the image
    /// as needed.
    pub fn set_pagemap_entry(&self, pid: u32, vpn: u64, entry: u64) {
        self.modify(format!("/proc/{}/pagemap", pid), |image| {
            let start = vpn as usize * bits::PAGEMAP_ENTRY_SIZE;
            let end = start + bits::PAGEMAP_ENTRY_SIZE;
            if image.len() < end {
                image.resize(end, 0);
            }
            image[start..end].copy_from_slice(&entry.to_le_bytes());
        });
    }

    /// Makes virtual page `vpn` resident in frame `pfn`.
    pub fn map_page(&self, pid: u32, vpn: u64, pfn: u64) {
        self.set_pagemap_entry(pid, vpn, (1 << 63) | (pfn & bits::PFN_MASK));
    }

    /// Simulates an access to frame `pfn`: clears its idle bit.
    pub fn touch_pfn(&self, pfn: u64) {
        self.modify(SCENARIO_BITMAP, |bitmap| {
            if let Some(byte) = bitmap.get_mut((pfn / 8) as usize) {
                *byte &= !(1 << (pfn % 8));
            }
        });
    }

    /// Simulates an access to virtual page `vpn`; no-op unless resident.
    pub fn touch_page(&self, pid: u32, vpn: u64) {
        let image = self
            .contents(format!("/proc/{}/pagemap", pid))
            .unwrap_or_default();
        if let Some(entry) = bits::entry_at(&image, vpn as usize) {
            if bits::is_resident(entry) {
                self.touch_pfn(bits::pfn_of(entry));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_snooped_process_layout() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        let image = fs
            .contents(format!("/proc/{}/pagemap", SCENARIO_PID))
            .unwrap();
        assert_eq!(image.len(), (0x2001 + 1) * 8);

        let entry = bits::entry_at(&image, 0x600).unwrap();
        assert!(bits::is_resident(entry));
        assert_eq!(bits::pfn_of(entry), 300);
        assert!(!bits::is_resident(bits::entry_at(&image, 0x402).unwrap()));
        assert!(fs.exists(Path::new(SCENARIO_BITMAP)));
    }

    #[test]
    fn test_touch_page_clears_idle_bit() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        fs.modify(SCENARIO_BITMAP, |b| b.fill(0xFF));

        fs.touch_page(SCENARIO_PID, 0x1001); // pfn 65
        let bitmap = fs.contents(SCENARIO_BITMAP).unwrap();
        assert_eq!(bitmap[8], 0b1111_1101);
        assert!(bits::is_active(65, &bitmap));
        assert!(!bits::is_active(64, &bitmap));

        fs.touch_page(SCENARIO_PID, 0x2000); // not resident
        assert_eq!(fs.contents(SCENARIO_BITMAP).unwrap(), bitmap);
    }

    #[test]
    fn test_scenario_text_files_parse() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        let stat = fs
            .read_to_string(Path::new(&format!("/proc/{}/stat", SCENARIO_PID)))
            .unwrap();
        assert_eq!(
            crate::collector::procfs::parser::parse_stat_state(&stat),
            Ok('S')
        );
    }
}
