//! Record ids for captures and executions.

use std::sync::Mutex;
use std::time::Duration;

use ulid::{Generator, Ulid};

static GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());

/// A ULID strictly greater than every id handed out before it in this
/// process, even within the same millisecond.
pub(crate) fn next_ulid() -> Ulid {
    let mut generator = GENERATOR.lock().unwrap_or_else(|p| p.into_inner());
    loop {
        match generator.generate() {
            Ok(id) => return id,
            // Random part exhausted for this millisecond.
            Err(_) => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids: Vec<Ulid> = (0..1000).map(|_| next_ulid()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let strings: Vec<String> = ids.iter().map(Ulid::to_string).collect();
        assert!(strings.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn increasing_across_threads() {
        let mut ids: Vec<Ulid> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..250).map(|_| next_ulid()).collect::<Vec<_>>()))
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }
}
