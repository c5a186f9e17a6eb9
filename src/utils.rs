use crate::shared_slice::{AbstractedProceduralMemoryMut, SharedSliceMut};

use crossbeam::thread;
use std::sync::{Arc, Barrier};

/// Checks that `val` is a finite `f64`. Outputs a result with a custom error message.
///
/// Used to catch corrupt edge weights propagating through the floating-point
/// accumulators, which the engine treats as an invalid-input failure.
///
/// # Arguments
///
/// * `val`: `f64` --- the value to be checked.
/// * `op_description`: `&str` --- the custom error message.
///
#[inline(always)]
pub(crate) fn ensure_finite(
    val: f64,
    op_description: &str,
) -> Result<f64, Box<dyn std::error::Error>> {
    if !val.is_finite() {
        return Err(format!("error non-finite value at {op_description} = {val}").into());
    }
    Ok(val)
}

/// Fork-join parallel sweep over `[0, n)` split into one contiguous range per worker.
///
/// `body` receives `(tid, range)`; the sequential case is the trivial `threads == 1`
/// instantiation of the same code path.
pub(crate) fn parallel_for<F>(
    n: usize,
    threads: usize,
    body: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Fn(usize, std::ops::Range<usize>) + Sync,
{
    let threads = threads.max(1);
    let load = n.div_ceil(threads);
    thread::scope(|scope| {
        for tid in 0..threads {
            let body = &body;
            scope.spawn(move |_| {
                let begin = std::cmp::min(tid * load, n);
                let end = std::cmp::min(begin + load, n);
                body(tid, begin..end);
            });
        }
    })
    .map_err(|e| -> Box<dyn std::error::Error> { format!("{:?}", e).into() })
}

/// In-place two-phase parallel exclusive prefix scan over `values[0..n]`.
///
/// Phase one has each worker sum its range into a per-worker partial, phase two
/// (after a barrier) rewrites the range to the running prefix offset by the partials
/// of all lower-ranked workers. Returns the total sum.
pub(crate) fn exclusive_scan_parallel(
    values: SharedSliceMut<usize>,
    n: usize,
    threads: usize,
) -> Result<usize, Box<dyn std::error::Error>> {
    let threads = threads.max(1);
    let load = n.div_ceil(threads);
    let partials = AbstractedProceduralMemoryMut::<usize>::in_mem(threads);
    let synchronize = Arc::new(Barrier::new(threads));
    thread::scope(|scope| {
        for tid in 0..threads {
            let mut values = values;
            let mut partials = partials.shared_slice();
            let synchronize = Arc::clone(&synchronize);
            scope.spawn(move |_| {
                let begin = std::cmp::min(tid * load, n);
                let end = std::cmp::min(begin + load, n);
                let mut sum = 0usize;
                for i in begin..end {
                    sum += *values.get(i);
                }
                *partials.get_mut(tid) = sum;
                synchronize.wait();
                let mut running = 0usize;
                for t in 0..tid {
                    running += *partials.get(t);
                }
                for i in begin..end {
                    let v = *values.get(i);
                    *values.get_mut(i) = running;
                    running += v;
                }
            });
        }
    })
    .map_err(|e| -> Box<dyn std::error::Error> { format!("{:?}", e).into() })?;
    Ok(partials.as_slice().iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parallel_for_covers_every_index_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
        let n = 1003;
        let hits: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(n, 7, |_, range| {
            for i in range {
                hits[i].fetch_add(1, Ordering::Relaxed);
            }
        })?;
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        Ok(())
    }

    #[test]
    fn parallel_for_handles_more_threads_than_work() -> Result<(), Box<dyn std::error::Error>> {
        let seen = AtomicUsize::new(0);
        parallel_for(3, 16, |_, range| {
            seen.fetch_add(range.len(), Ordering::Relaxed);
        })?;
        assert_eq!(seen.load(Ordering::Relaxed), 3);
        Ok(())
    }

    #[test]
    fn exclusive_scan_matches_serial_reference() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::rng();
        for threads in [1, 2, 5, 8] {
            let n = 517;
            let input: Vec<usize> = (0..n).map(|_| rng.random_range(0..9)).collect();
            let mut values = input.clone();
            let total = exclusive_scan_parallel(
                SharedSliceMut::from_slice(values.as_mut_slice()),
                n,
                threads,
            )?;
            let mut expected = vec![0usize; n];
            let mut running = 0;
            for i in 0..n {
                expected[i] = running;
                running += input[i];
            }
            assert_eq!(values, expected, "threads = {threads}");
            assert_eq!(total, running);
        }
        Ok(())
    }

    #[test]
    fn exclusive_scan_of_empty_range_is_zero() -> Result<(), Box<dyn std::error::Error>> {
        let mut values: Vec<usize> = Vec::new();
        let total =
            exclusive_scan_parallel(SharedSliceMut::from_slice(values.as_mut_slice()), 0, 4)?;
        assert_eq!(total, 0);
        Ok(())
    }

    #[test]
    fn ensure_finite_rejects_nan_and_infinity() {
        assert!(ensure_finite(1.5, "ok").is_ok());
        assert!(ensure_finite(f64::NAN, "nan").is_err());
        assert!(ensure_finite(f64::INFINITY, "inf").is_err());
    }
}
