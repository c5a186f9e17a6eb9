use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::OpenOptions,
    mem::size_of,
    path::{Path, PathBuf},
};

/// Owned procedural buffer handed out to parallel regions as raw [`SharedSliceMut`] views.
///
/// Backed either by an ordinary `Vec<T>` (the default) or by a memory-mapped scratch
/// file created under a caller-supplied directory, so that per-worker state for very
/// large graphs can be spilled out of RAM. File-backed buffers unlink their scratch
/// file on drop.
#[derive(Debug)]
pub struct AbstractedProceduralMemoryMut<T> {
    slice: SharedSliceMut<T>,
    _vec: Vec<T>,
    mmap: Option<MmapMut>,
    path: Option<PathBuf>,
}

/// Read-only counterpart of [`SharedSliceMut`]: wraps borrowed CSR arrays (the
/// input graph's offsets, degrees, edges, weights) for worker threads without
/// fabricating write access to them.
#[derive(Debug)]
pub(crate) struct SharedSlice<T> {
    ptr: *const T,
    len: usize,
}

#[derive(Debug)]
pub struct SharedSliceMut<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T> Send for SharedSlice<T> {}
unsafe impl<T> Sync for SharedSlice<T> {}

// ptr + len regardless of T, so the view is copyable even for atomic elements
impl<T> Copy for SharedSlice<T> {}

impl<T> Clone for SharedSlice<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

#[allow(dead_code)]
impl<T> SharedSlice<T> {
    pub(crate) fn new(ptr: *const T, len: usize) -> Self {
        SharedSlice::<T> { ptr, len }
    }

    #[inline(always)]
    pub(crate) fn get(&self, idx: usize) -> &T {
        assert!(idx < self.len, "index {} >= len {}", idx, self.len);
        unsafe { &*self.ptr.add(idx) }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

unsafe impl<T> Send for SharedSliceMut<T> {}
unsafe impl<T> Sync for SharedSliceMut<T> {}

// ptr + len regardless of T, so the view is copyable even for atomic elements
impl<T> Copy for SharedSliceMut<T> {}

impl<T> Clone for SharedSliceMut<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

#[allow(dead_code)]
impl<T> SharedSliceMut<T> {
    pub(crate) fn new(ptr: *mut T, len: usize) -> Self {
        SharedSliceMut::<T> { ptr, len }
    }

    pub(crate) fn from_slice(slice: &mut [T]) -> Self {
        SharedSliceMut::<T> {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Read-only view of the same memory.
    #[inline(always)]
    pub(crate) fn as_read_only(&self) -> SharedSlice<T> {
        SharedSlice::new(self.ptr, self.len)
    }

    /// Reinterprets the view as a view of an equally-sized type. Used to run plain
    /// integer arithmetic (e.g. prefix scans) over atomic counter buffers once the
    /// concurrent phase that needed the atomics is over.
    #[inline(always)]
    pub(crate) unsafe fn cast<U>(&self) -> Option<SharedSliceMut<U>> {
        if size_of::<T>() != size_of::<U>() {
            return None;
        }
        Some(SharedSliceMut {
            ptr: self.ptr as *mut U,
            len: self.len,
        })
    }

    #[inline(always)]
    pub(crate) fn get(&self, idx: usize) -> &T {
        assert!(idx < self.len, "index {} >= len {}", idx, self.len);
        unsafe { &*self.ptr.add(idx) }
    }

    #[inline(always)]
    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut T {
        assert!(idx < self.len, "index {} >= len {}", idx, self.len);
        unsafe { &mut *self.ptr.add(idx) }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub(crate) fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline(always)]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    #[inline(always)]
    pub(crate) fn slice(&self, start: usize, end: usize) -> Option<&[T]> {
        assert!(start <= end && end <= self.len);
        unsafe { Some(std::slice::from_raw_parts(self.ptr.add(start), end - start)) }
    }

    #[inline(always)]
    pub(crate) fn write_slice(&mut self, idx: usize, slice: &[T]) -> Option<usize> {
        assert!(idx + slice.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(slice.as_ptr(), self.ptr.add(idx), slice.len());
        };
        Some(idx + slice.len())
    }
}

#[allow(dead_code)]
impl<T: Default> AbstractedProceduralMemoryMut<T> {
    /// Allocates a zero-initialized buffer of `len` elements. When `mmap_dir` is
    /// given the buffer lives in a freshly-created scratch file mapped into memory,
    /// otherwise in an ordinary vector.
    pub(crate) fn abst_mem_mut(
        tag: &str,
        len: usize,
        mmap_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        match mmap_dir {
            Some(dir) => Self::file_backed(&scratch_file_name(dir, tag), len),
            None => Ok(Self::in_mem(len)),
        }
    }

    pub(crate) fn in_mem(len: usize) -> Self {
        let mut vec: Vec<T> = (0..len).map(|_| T::default()).collect();
        let slice = SharedSliceMut::<T>::new(vec.as_mut_ptr(), len);
        AbstractedProceduralMemoryMut {
            slice,
            _vec: vec,
            mmap: None,
            path: None,
        }
    }

    /// Creates (truncating) a scratch file of `len * size_of::<T>()` bytes and maps
    /// it mutably. `set_len` zero-fills, which is a valid bit pattern for every
    /// buffer element type used by the engine.
    pub(crate) fn file_backed(path: &Path, len: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        let file_len = (len * size_of::<T>()).max(1) as u64;
        file.set_len(file_len)?;
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let slice = SharedSliceMut::<T>::new(mmap.as_mut_ptr() as *mut T, len);
        Ok(AbstractedProceduralMemoryMut {
            slice,
            _vec: Vec::new(),
            mmap: Some(mmap),
            path: Some(path.to_path_buf()),
        })
    }
}

#[allow(dead_code)]
impl<T> AbstractedProceduralMemoryMut<T> {
    #[inline(always)]
    pub(crate) fn shared_slice(&self) -> SharedSliceMut<T> {
        self.slice.clone()
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> &T {
        self.slice.get(idx)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        self.slice.get_mut(idx)
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.slice.ptr, self.slice.len) }
    }

    #[inline(always)]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.slice.ptr, self.slice.len) }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.slice.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.slice.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn scratch_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl<T> Drop for AbstractedProceduralMemoryMut<T> {
    fn drop(&mut self) {
        // unmap before unlinking the scratch file
        self.mmap.take();
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Unique scratch file path under `dir` for a buffer named `tag`.
fn scratch_file_name(dir: &Path, tag: &str) -> PathBuf {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    dir.join(format!("gve_louvain_{pid}_{nanos}_{tag}.buf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_mem_buffer_reads_back_writes() {
        let mut mem = AbstractedProceduralMemoryMut::<usize>::in_mem(16);
        for i in 0..16 {
            *mem.get_mut(i) = i * i;
        }
        let view = mem.shared_slice();
        assert_eq!(*view.get(7), 49);
        assert_eq!(mem.as_slice()[15], 225);
        assert_eq!(mem.len(), 16);
    }

    #[test]
    fn views_alias_the_same_memory() {
        let mem = AbstractedProceduralMemoryMut::<f64>::in_mem(4);
        let mut a = mem.shared_slice();
        let b = mem.shared_slice();
        *a.get_mut(2) = 2.5;
        assert_eq!(*b.get(2), 2.5);
    }

    #[test]
    fn write_slice_copies_contents() {
        let mem = AbstractedProceduralMemoryMut::<usize>::in_mem(8);
        let mut view = mem.shared_slice();
        view.write_slice(2, &[9, 8, 7]);
        assert_eq!(view.slice(2, 5).unwrap(), &[9, 8, 7]);
    }

    #[test]
    fn read_only_view_tracks_the_buffer() {
        let mut mem = AbstractedProceduralMemoryMut::<usize>::in_mem(4);
        let ro = mem.shared_slice().as_read_only();
        *mem.get_mut(1) = 5;
        assert_eq!(*ro.get(1), 5);
        assert_eq!(ro.as_slice(), &[0, 5, 0, 0]);
        assert_eq!(ro.len(), 4);
    }

    #[test]
    fn cast_requires_equal_layout() {
        let mem = AbstractedProceduralMemoryMut::<usize>::in_mem(4);
        let view = mem.shared_slice();
        assert!(unsafe { view.cast::<u8>() }.is_none());
        let as_atomic = unsafe { view.cast::<std::sync::atomic::AtomicUsize>() }.unwrap();
        assert_eq!(as_atomic.len(), 4);
    }

    #[test]
    fn file_backed_buffer_is_zeroed_and_unlinked_on_drop() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = std::env::temp_dir();
        let mem =
            AbstractedProceduralMemoryMut::<usize>::abst_mem_mut("drop_test", 32, Some(&dir))?;
        let path = mem.scratch_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(mem.as_slice().iter().all(|&v| v == 0));
        drop(mem);
        assert!(!path.exists());
        Ok(())
    }
}
