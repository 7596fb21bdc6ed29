/// Minimizing delta debugging over `items`.
///
/// Starts with two contiguous groups and tests each group's complement.
/// A failing complement becomes the new working set and the group count
/// drops by one (never below two); otherwise the count doubles up to the
/// working-set size, and the search ends once single items have been
/// tried without progress. Complements smaller than `min_size` are never
/// tested. Errors from `is_fail` abort the search immediately.
pub fn ddmin_reduce<T, E, F>(items: Vec<T>, min_size: usize, mut is_fail: F) -> Result<Vec<T>, E>
where
    T: Clone,
    F: FnMut(&[T]) -> Result<bool, E>,
{
    let mut items = items;
    if items.len() <= min_size {
        return Ok(items);
    }

    let mut n = 2usize;
    while items.len() > min_size {
        let size = items.len().div_ceil(n);
        let mut reduced = false;

        let mut start = 0usize;
        while start < items.len() {
            let end = (start + size).min(items.len());
            if items.len() - (end - start) >= min_size {
                let complement = items[..start]
                    .iter()
                    .chain(&items[end..])
                    .cloned()
                    .collect::<Vec<_>>();
                if is_fail(&complement)? {
                    items = complement;
                    n = (n - 1).max(2);
                    reduced = true;
                    break;
                }
            }
            start = end;
        }

        if !reduced {
            if n >= items.len() {
                break;
            }
            n = (n * 2).min(items.len());
        }
    }

    Ok(items)
}
