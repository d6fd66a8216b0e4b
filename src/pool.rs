use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded};

use crate::error::KiraError;

/// Runs `work` over `jobs` on at most `workers` threads.
///
/// Results are handed to `on_complete` on the calling thread in completion
/// order. If `on_complete` fails, workers stop taking new jobs and the error is
/// returned once in-flight jobs finish. Returns the number of completions seen.
pub fn run_pool<T, R, W, C>(
    jobs: Vec<T>,
    workers: usize,
    work: W,
    mut on_complete: C,
) -> Result<usize, KiraError>
where
    T: Send,
    R: Send,
    W: Fn(&T) -> R + Sync,
    C: FnMut(T, R) -> Result<(), KiraError>,
{
    let total = jobs.len();
    if total == 0 {
        return Ok(0);
    }
    let workers = workers.clamp(1, total);
    let stop = AtomicBool::new(false);

    let (job_send, job_recv) = unbounded::<T>();
    for job in jobs {
        job_send
            .send(job)
            .map_err(|_| KiraError::WorkerPool("job queue closed".to_string()))?;
    }
    drop(job_send);

    thread::scope(|scope| {
        // a little read-ahead so workers rarely wait on the coordinator
        let (result_send, result_recv) = bounded::<(T, R)>(workers * 2);
        for _ in 0..workers {
            let jobs = job_recv.clone();
            let results = result_send.clone();
            let stop = &stop;
            let work = &work;
            scope.spawn(move || {
                for job in jobs.iter() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let result = work(&job);
                    if results.send((job, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_send);

        let mut completed = 0usize;
        for (job, result) in result_recv.iter() {
            completed += 1;
            if let Err(err) = on_complete(job, result) {
                stop.store(true, Ordering::Relaxed);
                return Err(err);
            }
        }
        if completed < total {
            return Err(KiraError::WorkerPool(format!(
                "only {completed} of {total} jobs completed"
            )));
        }
        Ok(completed)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn every_job_completes_once() {
        let jobs = (0..50).collect::<Vec<u32>>();
        let mut seen = HashSet::new();
        let completed = run_pool(jobs, 4, |job| job * 2, |job, doubled| {
            assert_eq!(doubled, job * 2);
            assert!(seen.insert(job));
            Ok(())
        })
        .unwrap();
        assert_eq!(completed, 50);
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn slow_consumer_still_sees_every_result() {
        let jobs = (0..40).collect::<Vec<u32>>();
        let mut total = 0u32;
        let completed = run_pool(jobs, 8, |job| *job, |_, value| {
            thread::sleep(Duration::from_millis(1));
            total += value;
            Ok(())
        })
        .unwrap();
        assert_eq!(completed, 40);
        assert_eq!(total, (0..40).sum::<u32>());
    }

    #[test]
    fn empty_job_list_does_nothing() {
        let completed = run_pool(Vec::<u32>::new(), 4, |_| (), |_, _| Ok(())).unwrap();
        assert_eq!(completed, 0);
    }

    #[test]
    fn callback_error_stops_the_pool() {
        let started = AtomicUsize::new(0);
        let jobs = (0..1000).collect::<Vec<u32>>();
        let err = run_pool(
            jobs,
            2,
            |_| {
                started.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            },
            |_, _| Err(KiraError::Filesystem("disk full".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, KiraError::Filesystem(_)));
        assert!(started.load(Ordering::SeqCst) < 1000);
    }
}
