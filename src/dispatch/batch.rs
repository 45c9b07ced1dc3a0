/// A configured size of zero or less means a single batch holding every
/// recipient.
pub fn effective_batch_size(configured: i64, recipients: usize) -> usize {
    if configured > 0 {
        usize::try_from(configured).unwrap_or(usize::MAX)
    } else {
        recipients.max(1)
    }
}

/// Consecutive slices of at most `batch_size` items, in input order.
pub fn partition<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}
