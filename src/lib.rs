//! # rpagealloc - Page Allocator for Code Patching
//!
//! This crate hands out whole pages of virtual memory straight from the OS
//! (`mmap(2)`), with explicit read/write/execute protection, and can place
//! them **near a given address**. Trampolines and hooks need the latter:
//! freshly allocated code must be reachable from the patched instruction by a
//! short relative branch.
//!
//! ## Overview
//!
//! ```text
//!   Near Allocation:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                      PROCESS ADDRESS SPACE                           │
//!   │                                                                      │
//!   │   ┌──────┐   gap   ┌──────────┐    gap     ┌──────┐   gap  ┌─────┐   │
//!   │   │ .so  │░░░░░░░░░│  heap    │▓▓▓▓▓▓▓▓▓▓▓▓│ .so  │░░░░░░░░│stack│   │
//!   │   └──────┘         └──────────┘  ▲         └──────┘        └─────┘   │
//!   │                          ▲       │                                   │
//!   │                          │    new pages                              │
//!   │                        target                                        │
//!   │                     ◄──── max_distance ────►                         │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Occupied ranges come from an enumerator; the gaps between them are
//!   tried in order until one is close enough and can be claimed.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rpagealloc
//!   ├── align       - Alignment macros (align_up!, align_down!)
//!   ├── protection  - PageProtection flags and their PROT_* mapping
//!   ├── range       - MemoryRange, AddressSpec, RangeDetails
//!   ├── sys         - mmap/munmap/mprotect/madvise wrappers, page size
//!   ├── header      - Hidden size header in front of page allocations
//!   ├── scan        - RangeEnumerator and free-range synthesis
//!   ├── maps        - /proc/self/maps enumerator (Linux)
//!   ├── raw         - Aligned allocate/free, commit/decommit/release
//!   └── pages       - allocate_pages, allocate_pages_near, free_pages
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rpagealloc::{AddressSpec, PageProtection, allocate_pages_near, free_pages};
//!
//! fn main() {
//!     let hook_site = main as usize;
//!
//!     unsafe {
//!         // Two pages within ±2 GiB of the hook site.
//!         let spec = AddressSpec::new(hook_site, 1 << 31);
//!         let code = allocate_pages_near(2, PageProtection::READ_WRITE, &spec)
//!             .expect("no gap near the hook site");
//!
//!         code.as_ptr().write(0xC3); // ret
//!
//!         free_pages(code);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! Every page allocation carries one hidden header page:
//!
//! ```text
//!   allocate_pages(3, prot):
//!   ┌───────────────┬───────────────┬───────────────┬───────────────┐
//!   │ header (R)    │    page 1     │    page 2     │    page 3     │
//!   │ size: 4 pages │    (prot)     │    (prot)     │    (prot)     │
//!   └───────────────┴───────────────┴───────────────┴───────────────┘
//!                   ▲
//!                   └── Pointer returned to user
//! ```
//!
//! Aligned raw allocations over-allocate and give the slack back:
//!
//! ```text
//!   ┌────────┬──────────────────────────────┬──────────┐
//!   │ prefix │  size bytes, aligned start   │  suffix  │
//!   └────────┴──────────────────────────────┴──────────┘
//!     munmap                                   munmap
//! ```
//!
//! ## Error Handling
//!
//! Allocation failures come back as `None`, everything else as `false`. The
//! reason is logged through the [`log`] facade at `debug` level. A fixed
//! mapping that loses a race inside the near search is not a failure: the
//! search just moves on to the next gap.
//!
//! ## Limitations
//!
//! - **Unix-only**: requires `libc` and `mmap(2)`.
//! - **Near search is Linux-only** by default; elsewhere, bring your own
//!   [`RangeEnumerator`] and call [`allocate_pages_near_with`].
//! - **Page granularity**: no small-object allocation.
//!
//! ## Safety
//!
//! The allocators deal in raw memory. Allocation and release functions are
//! `unsafe`; pointers must be handed back with the size they were created
//! with.

pub mod align;
mod header;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod maps;
mod pages;
mod protection;
mod range;
mod raw;
mod scan;
mod sys;

pub use header::AllocationHeader;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use maps::ProcMapsEnumerator;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use pages::allocate_pages_near;
pub use pages::{allocate_pages, allocate_pages_near_with, free_pages, query_allocation_range};
pub use protection::PageProtection;
pub use range::{AddressSpec, FileMapping, MemoryRange, RangeDetails};
pub use raw::{allocate, commit, decommit, free, protect, release};
pub use scan::{RangeEnumerator, enumerate_free_ranges};
pub use sys::{MemoryError, query_page_size};
