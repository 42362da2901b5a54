//! 追加式 Trace 日志
//!
//! 单写多读：`TraceLog` 不可 Clone，只有持有者能追加；
//! `TraceView` 可随意克隆给渲染端，快照在读锁内整体拷贝，
//! 读者只会看到追加前或追加后的状态，不会看到半条记录。

use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::record::{Decomposed, MetricRecord};

type Records = Arc<RwLock<Vec<Arc<MetricRecord>>>>;

/// 会话内唯一的写入端
#[derive(Debug)]
pub struct TraceLog {
    records: Records,
}

impl TraceLog {
    /// 创建空日志（每个会话开始时新建）
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 追加一条记录，序号为 `len + 1`
    pub fn append(&mut self, decomposed: Decomposed) -> Arc<MetricRecord> {
        let mut records = self.records.write();
        let sequence = records.len() as u64 + 1;
        let record = Arc::new(MetricRecord::sequenced(sequence, decomposed));
        records.push(record.clone());
        record
    }

    /// 获取只读视图
    pub fn view(&self) -> TraceView {
        TraceView {
            records: self.records.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

/// 只读视图
#[derive(Debug, Clone)]
pub struct TraceView {
    records: Records,
}

impl TraceView {
    /// 获取当前快照，不阻塞后续追加
    pub fn snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            records: self.records.read().clone(),
        }
    }
}

/// 某一时刻日志的不可变拷贝
#[derive(Debug, Clone, Default)]
pub struct TraceSnapshot {
    records: Vec<Arc<MetricRecord>>,
}

impl TraceSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &MetricRecord> {
        self.records.iter().map(|r| r.as_ref())
    }

    pub fn last(&self) -> Option<&MetricRecord> {
        self.records.last().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn decomposed(rtt_ms: f64, db: Option<f64>) -> Decomposed {
        Decomposed {
            source_url: format!("http://localhost/api/{}", rtt_ms),
            rtt_ms,
            db_latency_ms: db,
            non_db_latency_ms: db.map(|d| rtt_ms - d),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_sequence_starts_at_one_and_has_no_gaps() {
        let mut log = TraceLog::new();
        for i in 0..5 {
            let record = log.append(decomposed(10.0 + i as f64, None));
            assert_eq!(record.sequence(), i + 1);
        }

        let snapshot = log.view().snapshot();
        let sequences: Vec<u64> = snapshot.iter().map(|r| r.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_snapshot_keeps_append_order() {
        let mut log = TraceLog::new();
        let rtts = [50.0, 60.0, 40.0];
        for rtt in rtts {
            log.append(decomposed(rtt, Some(10.0)));
        }

        let snapshot = log.view().snapshot();
        assert_eq!(snapshot.len(), 3);
        let observed: Vec<f64> = snapshot.iter().map(|r| r.rtt_ms()).collect();
        assert_eq!(observed, rtts);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let mut log = TraceLog::new();
        let view = log.view();
        log.append(decomposed(1.0, None));
        let before = view.snapshot();
        log.append(decomposed(2.0, None));

        assert_eq!(before.len(), 1);
        assert_eq!(view.snapshot().len(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_gap_free_prefixes() {
        const TOTAL: usize = 2_000;

        let mut log = TraceLog::new();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let view = log.view();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut last_len = 0;
                    while !done.load(Ordering::Acquire) {
                        let snapshot = view.snapshot();
                        assert!(snapshot.len() >= last_len, "快照长度不应回退");
                        for (i, record) in snapshot.iter().enumerate() {
                            assert_eq!(record.sequence(), i as u64 + 1);
                        }
                        last_len = snapshot.len();
                    }
                })
            })
            .collect();

        for i in 0..TOTAL {
            log.append(decomposed(i as f64, Some(0.5)));
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(log.view().snapshot().len(), TOTAL);
    }
}
