use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::{aggregator::ProgressObserver, model::Repository};

/// Terminal progress bar fed by the aggregator.
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { bar: ProgressBar::hidden() };
        }
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:30.green/blue}] {pos}/{len} ({percent}%) \
             [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        let bar = ProgressBar::new(0).with_style(style).with_message("Processing projects");
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn repository_finished(&self, processed: usize, total: usize, repository: &Repository) {
        self.bar.set_length(total as u64);
        // Notifications may arrive out of order; the bar never moves backwards.
        if processed as u64 > self.bar.position() {
            self.bar.set_position(processed as u64);
        }
        self.bar.set_message(format!("Processing projects (current: {})", repository.path));
    }

    fn suspend(&self, log: &mut dyn FnMut()) {
        self.bar.suspend(log)
    }
}
