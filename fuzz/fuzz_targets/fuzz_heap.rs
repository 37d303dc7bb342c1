#![no_main]

use tagfit::*;

use libfuzzer_sys::fuzz_target;

use libfuzzer_sys::arbitrary::Arbitrary;

#[derive(Arbitrary, Debug)]
enum Actions {
    /// Allocate `size` bytes
    Alloc { size: u16 },
    /// Free the ith allocation
    Free { index: u8 },
    /// Resize the ith allocation, possibly to zero
    Resize { index: u8, new_size: u16 },
    /// Free something that isn't a live allocation
    Bogus { offset: u16 },
}
use Actions::*;

fuzz_target!(|input: (u16, Vec<Actions>)| {
    let (limit, actions) = input;
    // error-scanning validates the heap after every operation
    let Ok(mut heap) = Heap::init(VecRegion::with_limit(limit as usize * 16)) else { return };

    // ptr, requested size, fill byte
    let mut allocations: Vec<(Ptr, usize, u8)> = vec![];

    for (step, action) in actions.into_iter().enumerate() {
        let byte = step as u8;

        match action {
            Alloc { size } => match heap.allocate(size as usize) {
                Ok(ptr) => {
                    heap.payload_mut(ptr).unwrap()[..size as usize].fill(byte);
                    allocations.push((ptr, size as usize, byte));
                }
                Err(AllocError::InvalidSize) => assert_eq!(size, 0),
                Err(err) => assert_eq!(err, AllocError::OutOfMemory),
            },
            Free { index } => {
                if index as usize >= allocations.len() { continue; }

                let (ptr, size, fill) = allocations.swap_remove(index as usize);
                assert!(heap.payload(ptr).unwrap()[..size].iter().all(|&b| b == fill));
                heap.free(Some(ptr)).unwrap();
                assert!(heap.free(Some(ptr)).is_err());
            }
            Resize { index, new_size } => {
                if index as usize >= allocations.len() { continue; }

                let (ptr, size, fill) = allocations[index as usize];
                let new_size = new_size as usize;

                match heap.resize(Some(ptr), new_size) {
                    Ok(None) => {
                        assert_eq!(new_size, 0);
                        allocations.swap_remove(index as usize);
                    }
                    Ok(Some(new_ptr)) => {
                        let payload = heap.payload_mut(new_ptr).unwrap();
                        assert!(payload[..size.min(new_size)].iter().all(|&b| b == fill));
                        payload[..new_size].fill(byte);
                        allocations[index as usize] = (new_ptr, new_size, byte);
                    }
                    Err(err) => {
                        assert_eq!(err, AllocError::OutOfMemory);
                        assert!(heap.payload(ptr).unwrap()[..size].iter().all(|&b| b == fill));
                    }
                }
            }
            Bogus { offset } => {
                let Some(ptr) = Ptr::new(offset as usize) else { continue };
                if allocations.iter().any(|&(live, _, _)| live == ptr) { continue; }

                assert!(heap.free(Some(ptr)).is_err());
            }
        }

        let counters = *heap.counters();
        assert_eq!(counters.allocation_count, allocations.len());
        assert_eq!(counters.heap_bytes, heap.heap_size());
        assert_eq!(counters.fragment_count, heap.free_blocks().count());
    }

    for (ptr, _, _) in allocations {
        heap.free(Some(ptr)).unwrap();
    }

    heap.validate().unwrap();
    assert!(heap.free_blocks().count() <= 1);
});
