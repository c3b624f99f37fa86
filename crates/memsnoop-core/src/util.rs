//! Small system queries.

use nix::unistd::{SysconfVar, sysconf};

use crate::model::DEFAULT_PAGE_SIZE;

/// System page size in bytes (falls back to 4096 if sysconf fails).
pub fn page_size() -> u64 {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => DEFAULT_PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
