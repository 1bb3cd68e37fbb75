//! Arena allocator for JITs.
use std::io;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache,
    Memory,
    SystemInformation::{GetSystemInfo, SYSTEM_INFO},
    Threading::GetCurrentProcess,
};

const REGION_MIN_LEN: usize = 1 << 16;

/// Size of a memory page, the granularity of protection changes.
#[cfg(target_family = "unix")]
fn page_size() -> usize {
    rustix::param::page_size()
}

/// Size of a memory page, the granularity of protection changes.
#[cfg(target_family = "windows")]
fn page_size() -> usize {
    let mut info = SYSTEM_INFO::default();
    unsafe { GetSystemInfo(&raw mut info) };
    info.dwPageSize as usize
}

/// A memory mapped region.
#[derive(Clone, Copy)]
struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: changing the protection can be done from any thread
unsafe impl Send for Region {}

impl Region {
    fn map(addr_hint: Option<usize>, len: usize) -> io::Result<Self> {
        let len = len.max(REGION_MIN_LEN).next_multiple_of(page_size());

        #[cfg(target_family = "unix")]
        let region = unsafe {
            mman::mmap_anonymous(
                addr_hint
                    .map(std::ptr::without_provenance_mut)
                    .unwrap_or_default(),
                len,
                ProtFlags::empty(),
                MapFlags::PRIVATE,
            )
        }?;

        #[cfg(target_family = "windows")]
        let region = unsafe {
            let addr_hint_ptr = addr_hint.map(|addr| std::ptr::without_provenance(addr));
            let result = Memory::VirtualAlloc(
                addr_hint_ptr,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_NOACCESS,
            );

            if !result.is_null() {
                result
            } else {
                Memory::VirtualAlloc(
                    None,
                    len,
                    Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                    Memory::PAGE_NOACCESS,
                )
            }
        };

        let ptr = NonNull::new(region.cast()).ok_or_else(io::Error::last_os_error)?;
        Ok(Self { ptr, len })
    }

    /// Changes the protection of the pages in `range`, which must be page aligned.
    unsafe fn protect(&self, range: Range<usize>, protection: Protection) -> io::Result<()> {
        let start = unsafe { self.ptr.add(range.start) };
        let length = range.len();

        #[cfg(target_family = "unix")]
        unsafe {
            let flags = match protection {
                Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
            };

            mman::mprotect(start.as_ptr().cast(), length, flags)?;
        }

        #[cfg(target_family = "windows")]
        unsafe {
            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);
            let flags = match protection {
                Protection::ReadExec => Memory::PAGE_EXECUTE_READ,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
            };

            Memory::VirtualProtect(start.as_ptr().cast(), length, flags, &raw mut previous)
                .map_err(io::Error::from)?;
        }

        Ok(())
    }

    unsafe fn unmap(&self) {
        #[cfg(target_family = "unix")]
        unsafe {
            if let Err(e) = mman::munmap(self.ptr.as_ptr().cast(), self.len) {
                tracing::error!("failed to unmap jit region: {e}");
            }
        }

        #[cfg(target_family = "windows")]
        unsafe {
            if let Err(e) = Memory::VirtualFree(self.ptr.as_ptr().cast(), 0, Memory::MEM_RELEASE) {
                tracing::error!("failed to free jit region: {e}");
            }
        }
    }
}

/// A block of memory handed out by an [`Allocator`].
///
/// Every allocation starts on a page of its own, so the pages it spans are never written or
/// re-protected by later allocations. It stays valid until its allocator is reset or dropped.
pub struct Allocation<K>(NonNull<[u8]>, PhantomData<K>);

impl<K> Allocation<K> {
    /// Returns a pointer to the allocation.
    ///
    /// # Safety
    /// The data behind the pointer may only be accessed while the allocator this allocation comes
    /// from has not been reset or dropped.
    #[inline(always)]
    pub unsafe fn as_ptr(&self) -> NonNull<[u8]> {
        self.0
    }

    /// Length of the allocation in bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// SAFETY: the pages of an allocation are never touched by the allocator until it is reset, which
// requires every allocation to be gone
unsafe impl<K> Send for Allocation<K> {}

// SAFETY: allocations are immutable once handed out
unsafe impl<K> Sync for Allocation<K> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadExec,
    ReadWrite,
}

pub trait AllocKind {
    const PROTECTION: Protection;
}

pub struct Exec;
impl AllocKind for Exec {
    const PROTECTION: Protection = Protection::ReadExec;
}

pub struct ReadWrite;
impl AllocKind for ReadWrite {
    const PROTECTION: Protection = Protection::ReadWrite;
}

pub struct Allocator<K: AllocKind> {
    /// Every mapped region. The last one is the active one.
    regions: Vec<Region>,
    /// Offset into the active region
    offset: usize,
    /// Bytes handed out, across every region
    used: usize,
    /// Phantom
    _phantom: PhantomData<K>,
}

impl<K> Allocator<K>
where
    K: AllocKind,
{
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
            offset: 0,
            used: 0,
            _phantom: PhantomData,
        }
    }

    /// Total length of the allocations handed out since creation or the last reset.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Reserves `length` bytes starting on a fresh page. Returns the region, the page range
    /// covering the allocation and the allocation itself.
    fn allocate_inner(
        &mut self,
        alignment: usize,
        length: usize,
    ) -> io::Result<(Region, Range<usize>, Allocation<K>)> {
        assert!(length > 0);

        // pages holding earlier allocations may be in use and must keep their protection
        let page = page_size();
        let alignment = alignment.max(1).next_power_of_two().max(page);
        let effective_offset = self.offset.next_multiple_of(alignment);

        let fits = self
            .regions
            .last()
            .and_then(|r| r.len.checked_sub(effective_offset))
            .is_some_and(|remaining| remaining >= length);

        if !fits {
            let hint = self
                .regions
                .last()
                .map(|r| unsafe { r.ptr.add(r.len) }.addr().get());

            self.regions.push(Region::map(hint, length)?);
            self.offset = 0;
            return self.allocate_inner(alignment, length);
        }

        let Some(&region) = self.regions.last() else {
            unreachable!("a region was just mapped");
        };

        let start = unsafe { region.ptr.add(effective_offset) };
        self.offset = effective_offset + length;
        self.used += length;

        let pages = effective_offset..(effective_offset + length).next_multiple_of(page);
        Ok((
            region,
            pages,
            Allocation(NonNull::slice_from_raw_parts(start, length), PhantomData),
        ))
    }

    /// Copies `data` into a new allocation aligned to `alignment` and to the page size.
    ///
    /// Only the pages of the new allocation change protection, so earlier allocations stay
    /// usable from other threads meanwhile.
    pub fn allocate(&mut self, alignment: usize, data: &[u8]) -> io::Result<Allocation<K>> {
        let (region, pages, alloc) = self.allocate_inner(alignment, data.len())?;

        unsafe {
            region.protect(pages.clone(), Protection::ReadWrite)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), alloc.0.as_ptr().cast(), data.len());
            if K::PROTECTION != Protection::ReadWrite {
                region.protect(pages, K::PROTECTION)?;
            }

            #[cfg(target_family = "windows")]
            {
                let process = GetCurrentProcess();
                FlushInstructionCache(process, Some(alloc.0.as_ptr().cast()), data.len())
                    .map_err(io::Error::from)?;
            }
        }

        Ok(alloc)
    }

    /// Unmaps every region.
    ///
    /// # Safety
    /// No allocation from this allocator may be accessed after this call.
    pub unsafe fn reset(&mut self) {
        for region in self.regions.drain(..) {
            unsafe { region.unmap() };
        }

        self.offset = 0;
        self.used = 0;
    }
}

impl<K: AllocKind> Default for Allocator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AllocKind> Drop for Allocator<K> {
    fn drop(&mut self) {
        // SAFETY: allocations cannot outlive the allocator they come from
        unsafe { self.reset() };
    }
}
