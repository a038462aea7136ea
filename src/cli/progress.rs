use std::time::Instant;

/// Item counter for one CLI command, closed by a one-line summary.
pub struct Progress {
    command: &'static str,
    total: usize,
    current: Option<String>,
    succeeded: usize,
    failed: Vec<String>,
    tallies: Vec<(&'static str, usize)>,
    started: Instant,
}

impl Progress {
    pub fn new(command: &'static str, total: usize) -> Self {
        Self {
            command,
            total,
            current: None,
            succeeded: 0,
            failed: Vec::new(),
            tallies: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn begin(&mut self, name: &str) {
        let position = self.succeeded + self.failed.len() + 1;
        println!("[{}/{}] {}", position, self.total, name);
        self.current = Some(name.to_string());
    }

    /// Closes the item opened by `begin`; failed item names are listed by `finish`.
    pub fn end(&mut self, ok: bool) {
        let name = self.current.take().unwrap_or_default();
        if ok {
            self.succeeded += 1;
        } else {
            self.failed.push(name);
        }
    }

    /// Adds `count` to the summary counter `label`.
    pub fn tally(&mut self, label: &'static str, count: usize) {
        match self.tallies.iter_mut().find(|(l, _)| *l == label) {
            Some((_, total)) => *total += count,
            None => self.tallies.push((label, count)),
        }
    }

    pub fn finish(self) {
        let counters: String = self
            .tallies
            .iter()
            .map(|(label, count)| format!(" | {label} {count}"))
            .collect();
        println!(
            "{}: {}/{} ok in {:.2}s{}",
            self.command,
            self.succeeded,
            self.total,
            self.started.elapsed().as_secs_f64(),
            counters
        );
        if !self.failed.is_empty() {
            println!("failed: {}", self.failed.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_and_tallies_accumulate() {
        let mut progress = Progress::new("apply", 2);
        progress.begin("a.patch");
        progress.end(true);
        progress.begin("b.patch");
        progress.end(false);
        progress.tally("Patches", 1);
        progress.tally("Patches", 1);

        assert_eq!(progress.succeeded, 1);
        assert_eq!(progress.failed, vec!["b.patch".to_string()]);
        assert_eq!(progress.tallies, vec![("Patches", 2)]);
    }
}
