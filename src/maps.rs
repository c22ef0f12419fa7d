//! Default [`RangeEnumerator`] for Linux, backed by `/proc/self/maps`.

use std::{fs, path::PathBuf};

use log::debug;

use crate::{
  protection::PageProtection,
  range::{FileMapping, MemoryRange, RangeDetails},
  scan::RangeEnumerator,
};

const PROC_SELF_MAPS: &str = "/proc/self/maps";

/// Enumerates the calling process's mappings.
///
/// The file is read in full before any callback runs, so callers are free
/// to map and unmap memory while enumerating.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMapsEnumerator;

impl RangeEnumerator for ProcMapsEnumerator {
  fn enumerate_ranges(
    &self,
    prot: PageProtection,
    func: &mut dyn FnMut(&RangeDetails) -> bool,
  ) {
    let maps = match fs::read_to_string(PROC_SELF_MAPS) {
      Ok(maps) => maps,
      Err(e) => {
        debug!("reading {PROC_SELF_MAPS} failed: {e}");
        return;
      }
    };

    enumerate_maps(&maps, prot, func);
  }
}

fn enumerate_maps(
  maps: &str,
  prot: PageProtection,
  func: &mut dyn FnMut(&RangeDetails) -> bool,
) {
  for details in maps.lines().filter_map(parse_line) {
    if !details.protection.contains(prot) {
      continue;
    }
    if !func(&details) {
      break;
    }
  }
}

/// Parses one line of the form
/// `7f1c2a000000-7f1c2a021000 r-xp 00000000 08:01 1234 /usr/lib/libc.so.6`.
fn parse_line(line: &str) -> Option<RangeDetails> {
  let mut fields = line.split_ascii_whitespace();

  let (start, end) = fields.next()?.split_once('-')?;
  let start = usize::from_str_radix(start, 16).ok()?;
  let end = usize::from_str_radix(end, 16).ok()?;
  if end <= start {
    return None;
  }

  let perms = fields.next()?.as_bytes();
  let mut protection = PageProtection::NO_ACCESS;
  if perms.first() == Some(&b'r') {
    protection |= PageProtection::READ;
  }
  if perms.get(1) == Some(&b'w') {
    protection |= PageProtection::WRITE;
  }
  if perms.get(2) == Some(&b'x') {
    protection |= PageProtection::EXECUTE;
  }

  let offset = u64::from_str_radix(fields.next()?, 16).ok()?;
  let _device = fields.next()?;
  let _inode = fields.next()?;

  let range = MemoryRange::new(start, end - start);

  // Paths may contain spaces; take the remainder of the line.
  let file = line
    .find('/')
    .map(|at| line[at..].trim_end())
    .filter(|path| !path.is_empty())
    .map(|path| FileMapping {
      path: PathBuf::from(path),
      offset,
      size: range.size as u64,
    });

  Some(RangeDetails {
    range,
    protection,
    file,
  })
}
