/// Progress side channel for long running stages. Never affects results.
use crate::payload::SourceId;
use constants::tiling::{PROGRESS_CHARS, PROGRESS_TEMPLATE};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver of progress updates.
pub trait ProgressSink: Sync {
    /// Begin a stage of `total` units.
    fn start(&self, total: u64, label: &str);
    /// Absolute number of units done.
    fn advance(&self, done: u64);
    fn finish(&self, message: &str);
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn start(&self, total: u64, label: &str) {
        (**self).start(total, label)
    }

    fn advance(&self, done: u64) {
        (**self).advance(done)
    }

    fn finish(&self, message: &str) {
        (**self).finish(message)
    }
}

/// Hands out one sink per source, so sources running in parallel do not
/// share a bar.
pub trait ProgressReporter: Sync {
    fn for_source(&self, source_id: &SourceId) -> Box<dyn ProgressSink + '_>;
}

/// Discards all updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: u64, _label: &str) {}
    fn advance(&self, _done: u64) {}
    fn finish(&self, _message: &str) {}
}

impl ProgressReporter for NoProgress {
    fn for_source(&self, _source_id: &SourceId) -> Box<dyn ProgressSink + '_> {
        Box::new(NoProgress)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(PROGRESS_CHARS)
}

/// Terminal progress bar.
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(bar_style());
        Self { bar }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifProgress {
    fn start(&self, total: u64, label: &str) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_message(label.to_string());
    }

    fn advance(&self, done: u64) {
        self.bar.set_position(done);
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// One stacked terminal bar per source, prefixed with the source name.
pub struct MultiSourceProgress {
    multi: MultiProgress,
}

impl MultiSourceProgress {
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    pub fn with_multi(multi: MultiProgress) -> Self {
        Self { multi }
    }

    pub fn bar_for(&self, source_id: &SourceId) -> IndicatifProgress {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_prefix(source_id.to_string());
        IndicatifProgress::with_bar(bar)
    }
}

impl Default for MultiSourceProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for MultiSourceProgress {
    fn for_source(&self, source_id: &SourceId) -> Box<dyn ProgressSink + '_> {
        Box::new(self.bar_for(source_id))
    }
}

/// Forwards `(done, total)` pairs to a callback.
///
/// As a reporter every source feeds the same callback.
pub struct CallbackProgress<F> {
    callback: F,
    total: AtomicU64,
}

impl<F: Fn(u64, u64) + Sync> CallbackProgress<F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            total: AtomicU64::new(0),
        }
    }
}

impl<F: Fn(u64, u64) + Sync> ProgressSink for CallbackProgress<F> {
    fn start(&self, total: u64, _label: &str) {
        self.total.store(total, Ordering::Relaxed);
        (self.callback)(0, total);
    }

    fn advance(&self, done: u64) {
        (self.callback)(done, self.total.load(Ordering::Relaxed));
    }

    fn finish(&self, _message: &str) {}
}

impl<F: Fn(u64, u64) + Sync> ProgressReporter for CallbackProgress<F> {
    fn for_source(&self, _source_id: &SourceId) -> Box<dyn ProgressSink + '_> {
        Box::new(self)
    }
}

/// Completed fraction in percent, tolerant of unknown totals.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;
    use std::sync::Mutex;

    #[test]
    fn callback_receives_total() {
        let seen = Mutex::new(Vec::new());
        let sink = CallbackProgress::new(|done, total| seen.lock().unwrap().push((done, total)));

        sink.start(10, "points");
        sink.advance(4);
        sink.advance(10);

        assert_eq!(*seen.lock().unwrap(), vec![(0, 10), (4, 10), (10, 10)]);
    }

    #[test]
    fn each_source_gets_its_own_bar() {
        let progress = MultiSourceProgress::with_multi(MultiProgress::with_draw_target(
            ProgressDrawTarget::hidden(),
        ));
        let a = progress.bar_for(&SourceId::new("a.laz"));
        let b = progress.bar_for(&SourceId::new("b.laz"));

        a.start(100, "points routed");
        b.start(10, "points routed");
        a.advance(40);
        b.advance(10);

        assert_eq!((a.bar.position(), a.bar.length()), (40, Some(100)));
        assert_eq!((b.bar.position(), b.bar.length()), (10, Some(10)));
        assert_eq!(a.bar.prefix(), "a.laz");
    }

    #[test]
    fn percent_of_empty_total_is_complete() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
