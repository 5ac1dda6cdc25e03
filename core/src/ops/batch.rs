//! Running operations on many files. Every file gets its own [`Session`],
//! so no state is shared between files. Files are processed one after the
//! other unless the configuration allows more parallelism, in which case a
//! bounded pool of worker threads is used.

use std::thread::spawn;

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, unbounded};
use tracing::{debug, warn};

use crate::config::Config;

use super::{Outcome, Session, Task};

/// Runs all tasks and returns their results in the order of the tasks. A
/// failing task does not stop the others.
pub fn run_on_files(config: &Config, tasks: Vec<Task>) -> Result<Vec<Result<Outcome>>> {
    config.validate()?;
    let workers = config.parallelism.min(num_cpus::get()).min(tasks.len());

    if workers <= 1 {
        let session = Session::new(config.clone())?;
        return Ok(tasks.iter().map(|t| run_task(&session, t)).collect());
    }

    debug!(workers, tasks = tasks.len(), "Starting worker pool");
    let count = tasks.len();
    let (task_send, task_recv) = bounded::<(usize, Task)>(workers * 2);
    let (result_send, result_recv) = unbounded::<(usize, Result<Outcome>)>();

    let threads = (0..workers)
        .map(|_| {
            let task_recv = task_recv.clone();
            let result_send = result_send.clone();
            let config = config.clone();
            spawn(move || -> Result<()> {
                let session = Session::new(config)?;
                for (i, task) in task_recv {
                    result_send.send((i, run_task(&session, &task)))?;
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();
    drop(task_recv);
    drop(result_send);

    for t in tasks.into_iter().enumerate() {
        task_send.send(t)?;
    }
    drop(task_send);

    let mut results: Vec<Option<Result<Outcome>>> = (0..count).map(|_| None).collect();
    for (i, r) in result_recv {
        results[i] = Some(r);
    }

    for thread in threads {
        match thread.join() {
            Ok(r) => r?,
            Err(err) => bail!("Worker thread threw an error: {err:?}"),
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| match r {
            Some(r) => Ok(r),
            None => bail!("Task {i} was not processed"),
        })
        .collect()
}

fn run_task(session: &Session, task: &Task) -> Result<Outcome> {
    let r = session.run(task);
    if let Err(err) = &r {
        warn!(input = %task.input.display(), "Task failed: {err:#}");
    }
    r
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion};
    use tempdir::TempDir;

    use crate::{
        config::Config,
        keys::KeyScheme,
        ops::{test_support::write_points, AddKeyOptions, Operation, Outcome, Task},
    };

    use super::run_on_files;

    fn tasks(dir: &TempDir, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                let input = dir.path().join(format!("in{i}.parquet"));
                if i != 1 {
                    write_points(&input, &vec![(i as f64, i as f64); i + 1], None);
                }
                Task {
                    input,
                    output: Some(dir.path().join(format!("out{i}.parquet"))),
                    operation: Operation::AddKey {
                        scheme: KeyScheme::H3 { resolution: 3 },
                        options: AddKeyOptions::default(),
                    },
                }
            })
            .collect()
    }

    fn rows(results: &[anyhow::Result<Outcome>]) -> Vec<Option<u64>> {
        results
            .iter()
            .map(|r| match r {
                Ok(Outcome::Written(s)) => Some(s.rows),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequential() {
        let dir = TempDir::new("geokey_batch").unwrap();
        let results = run_on_files(&Config::default(), tasks(&dir, 3)).unwrap();
        assert_that!(rows(&results)).is_equal_to(vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn parallel_results_keep_task_order() {
        let dir = TempDir::new("geokey_batch").unwrap();
        let config = Config {
            parallelism: 4,
            ..Default::default()
        };
        let results = run_on_files(&config, tasks(&dir, 6)).unwrap();
        assert_that!(rows(&results)).is_equal_to(vec![
            Some(1),
            None,
            Some(3),
            Some(4),
            Some(5),
            Some(6),
        ]);
    }
}
