use std::io::Write;

/// Receives a notification after each node is processed.
///
/// `current` is 1-based and goes up to `total`. Closures taking `(current, total)` implement
/// the trait.
pub trait ProgressObserver {
    /// Called once per node, in node order.
    fn on_node(&mut self, current: usize, total: usize);
}

impl<F: FnMut(usize, usize)> ProgressObserver for F {
    fn on_node(&mut self, current: usize, total: usize) {
        self(current, total)
    }
}

/// Ignores all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_node(&mut self, _current: usize, _total: usize) {}
}

/// Prints `Processing nodes: i/n` on a single, rewritten stderr line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_node(&mut self, current: usize, total: usize) {
        let mut stderr = std::io::stderr().lock();
        let end = if current == total { "\n" } else { "" };
        // Progress output is best effort.
        let _ = write!(stderr, "\rProcessing nodes: {current}/{total}{end}");
        let _ = stderr.flush();
    }
}
