//! Named-task stopwatch with a tabular report.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TaskTiming {
    pub name: String,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct StopWatch {
    tasks: Vec<TaskTiming>,
    running: Option<(String, Instant)>,
}

impl StopWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `name`, stopping the running task first.
    pub fn start(&mut self, name: impl Into<String>) {
        self.stop();
        self.running = Some((name.into(), Instant::now()));
    }

    pub fn stop(&mut self) {
        if let Some((name, started)) = self.running.take() {
            self.tasks.push(TaskTiming {
                name,
                elapsed: started.elapsed(),
            });
        }
    }

    /// Time `f` as task `name`.
    pub fn time<T>(&mut self, name: impl Into<String>, f: impl FnOnce() -> T) -> T {
        self.start(name);
        let out = f();
        self.stop();
        out
    }

    pub fn tasks(&self) -> &[TaskTiming] {
        &self.tasks
    }

    pub fn total(&self) -> Duration {
        self.tasks.iter().map(|t| t.elapsed).sum()
    }

    pub fn pretty_print(&self) -> String {
        let total = self.total();
        let mut out = String::new();
        let _ = writeln!(out, "StopWatch: running time = {} ms", total.as_millis());
        let _ = writeln!(out, "{}", "-".repeat(48));
        let _ = writeln!(out, "{:>10}  {:>6}  Task name", "ms", "%");
        let _ = writeln!(out, "{}", "-".repeat(48));
        for task in &self.tasks {
            let share = if total.is_zero() {
                0.0
            } else {
                task.elapsed.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            let _ = writeln!(
                out,
                "{:>10.3}  {:>5.1}%  {}",
                task.elapsed.as_secs_f64() * 1000.0,
                share,
                task.name
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stops_previous_task() {
        let mut sw = StopWatch::new();
        sw.start("one");
        sw.start("two");
        sw.stop();
        sw.stop();
        let names: Vec<_> = sw.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_time_returns_closure_output() {
        let mut sw = StopWatch::new();
        let value = sw.time("sum", || (1..=10).sum::<i32>());
        assert_eq!(value, 55);
        assert_eq!(sw.tasks().len(), 1);
        assert!(sw.pretty_print().contains("sum"));
    }
}
