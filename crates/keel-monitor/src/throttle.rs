/// Something whose non-critical work can be paused under memory pressure.
///
/// The monitor calls [`suspend_non_critical`](Self::suspend_non_critical) on
/// every Emergency sample. Suspension is time-boxed: implementors resume on
/// their own once the clock passes `until_ms`, without a further call.
pub trait WorkThrottle: Send + Sync {
    /// Pause non-critical work until the clock reads `until_ms`. A later
    /// deadline extends the window; an earlier one is ignored.
    fn suspend_non_critical(&self, until_ms: u64);

    /// End any suspension immediately.
    fn resume(&self);

    /// The end of the current suspension window, if one is active.
    fn suspended_until(&self) -> Option<u64>;
}
