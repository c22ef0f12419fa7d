use std::io::Read;

use rpagealloc::{
  AddressSpec, PageProtection, allocate, allocate_pages, allocate_pages_near, decommit, free_pages, protect,
  query_allocation_range, query_page_size, release,
};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mappings with `pmap`, `gdb` or
/// `cat /proc/<pid>/maps` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// A function we pretend to hook. Trampolines for it must be reachable by a
/// rel32 jump, i.e. within ±2 GiB.
#[inline(never)]
fn hook_site() -> u32 {
  42
}

fn main() {
  // RUST_LOG=rpagealloc=trace shows every gap the near search looks at.
  env_logger::init();

  let page_size = query_page_size();
  println!("PID = {}, page size = {page_size:#x}", std::process::id());

  unsafe {
    // --------------------------------------------------------------------
    // 1) Three read/write pages. One more, hidden, page holds the size.
    // --------------------------------------------------------------------
    let pages = allocate_pages(3, PageProtection::READ_WRITE).expect("allocate_pages failed");
    let backing = query_allocation_range(pages, 3 * page_size);
    println!("\n[1] allocate_pages(3, RW) = {pages:?}");
    println!(
      "[1] backing region = {:#x}..{:#x} ({} bytes)",
      backing.base_address,
      backing.end(),
      backing.size
    );

    pages.as_ptr().write_bytes(0xAB, 3 * page_size);
    println!("[1] Filled the usable pages with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) One page near the hook site.
    // --------------------------------------------------------------------
    let target = hook_site as fn() -> u32 as usize;
    let spec = AddressSpec::new(target, i32::MAX as usize);
    let near = allocate_pages_near(1, PageProtection::READ_WRITE, &spec).expect("no gap near the hook site");
    let near_backing = query_allocation_range(near, page_size);
    println!("\n[2] hook site at {target:#x}");
    println!(
      "[2] allocate_pages_near = {near:?}, distance = {:#x}",
      spec.distance_to(near_backing.base_address)
    );

    // `ret`, then lock the page to R+X like a finished trampoline.
    near.as_ptr().write(0xC3);
    if protect(near, page_size, PageProtection::READ_EXECUTE) {
      println!("[2] Trampoline page is now R-X");
    }

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) A raw region aligned to 64 KiB.
    // --------------------------------------------------------------------
    let alignment = 64 * 1024;
    let size = 4 * page_size;
    let raw = allocate(None, size, alignment, PageProtection::READ_WRITE).expect("allocate failed");
    println!(
      "\n[3] allocate({size:#x}, align {alignment:#x}) = {raw:?}, addr % align = {}",
      raw.as_ptr() as usize % alignment
    );

    raw.as_ptr().write_bytes(0xCD, size);
    println!("[3] decommit = {}", decommit(raw, size));
    println!("[3] first byte after decommit = {:#x}", raw.as_ptr().read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Give everything back.
    // --------------------------------------------------------------------
    println!("\n[4] release(raw) = {}", release(raw, size));
    println!("[4] free_pages(near) = {}", free_pages(near));
    println!("[4] free_pages(pages) = {}", free_pages(pages));
  }
}
