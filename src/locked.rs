use crate::{AllocError, Heap, Ptr, Region};

/// Wrapper struct containing a mutex-locked [`Heap`].
///
/// Each operation takes the lock for its duration only. To run several
/// operations under one lock, or to read payloads, use [`Locked::lock`].
#[derive(Debug)]
pub struct Locked<R: lock_api::RawMutex, S: Region> {
    mutex: lock_api::Mutex<R, Heap<S>>,
}

impl<R: lock_api::RawMutex, S: Region> Locked<R, S> {
    /// Wrap `heap` in a mutex. See also [`Heap::lock`].
    pub const fn new(heap: Heap<S>) -> Self {
        Self { mutex: lock_api::Mutex::new(heap) }
    }

    /// Lock the mutex and access the inner [`Heap`].
    pub fn lock(&self) -> lock_api::MutexGuard<'_, R, Heap<S>> {
        self.mutex.lock()
    }

    /// Try to lock the mutex and access the inner [`Heap`].
    pub fn try_lock(&self) -> Option<lock_api::MutexGuard<'_, R, Heap<S>>> {
        self.mutex.try_lock()
    }

    /// Retrieve the inner [`Heap`].
    pub fn into_inner(self) -> Heap<S> {
        self.mutex.into_inner()
    }

    /// See [`Heap::allocate`].
    pub fn allocate(&self, size: usize) -> Result<Ptr, AllocError> {
        self.mutex.lock().allocate(size)
    }

    /// See [`Heap::free`].
    pub fn free(&self, ptr: Option<Ptr>) -> Result<(), AllocError> {
        self.mutex.lock().free(ptr)
    }

    /// See [`Heap::resize`].
    pub fn resize(&self, ptr: Option<Ptr>, size: usize) -> Result<Option<Ptr>, AllocError> {
        self.mutex.lock().resize(ptr, size)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use crate::{Heap, VecRegion};

    #[test]
    fn locked_operations() {
        let locked = Heap::init(VecRegion::new()).unwrap().lock::<spin::Mutex<()>>();

        let ptr = locked.allocate(24).unwrap();
        locked.lock().payload_mut(ptr).unwrap()[..24].fill(0x5a);

        let guard = locked.lock();
        assert!(locked.try_lock().is_none());
        drop(guard);

        let ptr = locked.resize(Some(ptr), 240).unwrap().unwrap();
        assert!(locked.lock().payload(ptr).unwrap()[..24].iter().all(|&b| b == 0x5a));
        locked.free(Some(ptr)).unwrap();

        let heap = locked.into_inner();
        heap.validate().unwrap();
        assert_eq!(heap.free_blocks().count(), 1);
    }

    #[test]
    fn shared_between_threads() {
        let locked = Heap::init(VecRegion::new()).unwrap().lock::<spin::Mutex<()>>();

        std::thread::scope(|scope| {
            for t in 0..4u8 {
                let locked = &locked;
                scope.spawn(move || {
                    let mut ptrs = Vec::new();
                    for i in 1..=100 {
                        let ptr = locked.allocate(i * 3).unwrap();
                        locked.lock().payload_mut(ptr).unwrap()[..i * 3].fill(t);
                        ptrs.push((ptr, i * 3));
                    }
                    for (ptr, len) in ptrs {
                        assert!(locked.lock().payload(ptr).unwrap()[..len].iter().all(|&b| b == t));
                        locked.free(Some(ptr)).unwrap();
                    }
                });
            }
        });

        let heap = locked.into_inner();
        heap.validate().unwrap();
        assert!(heap.blocks().all(|b| !b.allocated || b.size == crate::TAGS_SIZE));
    }
}
