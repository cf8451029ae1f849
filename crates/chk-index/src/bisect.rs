use tracing::trace;

/// Outcome of probing one key at one offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<V> {
    /// The key lies before the probed offset; search lower.
    TooEarly,
    /// The key lies after the probed offset; search higher.
    TooLate,
    /// The key is not present; stop searching for it.
    Absent,
    /// The key was found with this value.
    Found(V),
}

/// Bisect a byte-addressable space for many keys at once.
///
/// Every key starts at `size / 2`. Each round passes all active
/// `(offset, key)` probes to `lookup` in a single call; the step size starts
/// at `size / 2` and halves after every round but never drops below 1.
/// [`Probe::TooEarly`] moves a key down by the step, [`Probe::TooLate`]
/// moves it up, [`Probe::Absent`] drops it and [`Probe::Found`] records it.
/// The loop ends when no key is active.
///
/// A `size` of zero still costs one round: every key is probed at offset 0.
/// Duplicate keys are searched independently. Result order is unspecified.
/// An error from `lookup` aborts the search and is returned unchanged.
pub fn bisect_multi<K, V, E, F>(
    mut lookup: F,
    size: u64,
    keys: impl IntoIterator<Item = K>,
) -> Result<Vec<(K, V)>, E>
where
    F: FnMut(Vec<(i64, K)>) -> Result<Vec<((i64, K), Probe<V>)>, E>,
{
    let mut result = Vec::new();
    let mut delta = (size / 2) as i64;
    let mut active: Vec<(i64, K)> = keys.into_iter().map(|key| (delta, key)).collect();
    let mut rounds = 0usize;

    while !active.is_empty() {
        let outcomes = lookup(active)?;
        rounds += 1;
        delta = (delta / 2).max(1);
        active = Vec::with_capacity(outcomes.len());
        for ((offset, key), probe) in outcomes {
            match probe {
                Probe::TooEarly => active.push((offset - delta, key)),
                Probe::TooLate => active.push((offset + delta, key)),
                Probe::Absent => {}
                Probe::Found(value) => result.push((key, value)),
            }
        }
    }

    trace!(rounds, found = result.len(), size, "bisect_multi finished");
    Ok(result)
}
