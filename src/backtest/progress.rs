use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// 批次進度追蹤器
///
/// 純觀測用途：只累計計數並按間隔輸出日誌，不影響排程正確性。
/// 計數以原子操作維護，可被多個 worker 任務並發更新。
pub struct BatchProgress {
    total: usize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    started: Instant,
    report_interval: Duration,
    last_report: Mutex<Instant>,
}

impl BatchProgress {
    /// 建立進度追蹤器
    pub fn new(total: usize, report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            completed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started: now,
            report_interval,
            last_report: Mutex::new(now),
        }
    }

    /// 記錄一個成功完成的任務
    pub fn record_success(&self) -> usize {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_completed()
    }

    /// 記錄一個失敗完成的任務
    pub fn record_failure(&self) -> usize {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_completed()
    }

    fn record_completed(&self) -> usize {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.maybe_report(done);
        done
    }

    fn maybe_report(&self, done: usize) {
        if done == self.total {
            info!(
                "[{}/{}] 批次執行完畢: {} 成功 / {} 失敗, 耗時 {:.1}s",
                done,
                self.total,
                self.succeeded(),
                self.failed(),
                self.started.elapsed().as_secs_f64()
            );
            return;
        }

        let mut last = self.last_report.lock();
        if last.elapsed() >= self.report_interval {
            *last = Instant::now();
            info!(
                "[{}/{}] 任務進度: {} 成功 / {} 失敗",
                done,
                self.total,
                self.succeeded(),
                self.failed()
            );
        }
    }

    /// 目標任務總數
    pub fn total(&self) -> usize {
        self.total
    }

    /// 已完成任務數
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// 成功任務數
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// 失敗任務數
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// 批次開始至今的耗時
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters() {
        let progress = BatchProgress::new(3, Duration::from_secs(5));
        assert_eq!(progress.record_success(), 1);
        assert_eq!(progress.record_failure(), 2);
        assert_eq!(progress.record_success(), 3);
        assert_eq!(progress.completed(), 3);
        assert_eq!(progress.succeeded(), 2);
        assert_eq!(progress.failed(), 1);
    }

    #[test]
    fn test_progress_is_thread_safe() {
        use std::sync::Arc;

        let progress = Arc::new(BatchProgress::new(64, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = progress.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        p.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(progress.completed(), 64);
        assert_eq!(progress.succeeded(), 64);
    }
}
