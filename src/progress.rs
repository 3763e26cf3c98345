use indicatif::{ProgressBar, ProgressStyle};

/// Observer for transfer progress
pub trait ProgressReporter {
    fn started(&mut self, _total: usize) {}
    /// A new multiple of 5 percent has been reached
    fn milestone(&mut self, percent: u8);
    fn completed(&mut self, total: usize);
}

/// Percent progress bar on the terminal
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet { ProgressBar::hidden() } else { ProgressBar::new(100) };
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{wide_bar}] {pos:>3}%") {
            bar.set_style(style);
        }
        BarReporter { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn started(&mut self, total: usize) {
        tracing::info!("Started OTA upload of {} bytes", total);
    }

    fn milestone(&mut self, percent: u8) {
        self.bar.set_position(percent.into());
        tracing::debug!("Progress: {}%", percent);
    }

    fn completed(&mut self, total: usize) {
        self.bar.finish();
        tracing::info!("Finished OTA upload of {} bytes, peripheral should reboot", total);
    }
}

/// Collects every event, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub started: Option<usize>,
    pub milestones: Vec<u8>,
    pub completed: Option<usize>,
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn started(&mut self, total: usize) {
        self.started = Some(total);
    }

    fn milestone(&mut self, percent: u8) {
        self.milestones.push(percent);
    }

    fn completed(&mut self, total: usize) {
        self.completed = Some(total);
    }
}
