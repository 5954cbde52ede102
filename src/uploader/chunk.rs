// 上传分片管理
//
// 分片规则：
// - offset = index * chunk_size
// - length = min(chunk_size, total_size - offset)，最后一个分片为余数
// - 分片总数 = ceil(total_size / chunk_size)
//
// 已上传分片记录保存在定长的索引表中（每个索引一个槽位），
// "按索引写入（若不存在）" 的语义因此天然幂等

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// 分片切分方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 文件总大小
    total_size: u64,
    /// 分片大小
    chunk_size: u64,
}

impl ChunkPlan {
    /// 创建分片方案（分片大小至少为 1 字节）
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        Self {
            total_size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 分片数量
    pub fn chunk_count(&self) -> usize {
        self.total_size.div_ceil(self.chunk_size) as usize
    }

    /// 指定分片的字节范围，索引越界时返回 None
    pub fn range(&self, index: usize) -> Option<Range<u64>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = std::cmp::min(start + self.chunk_size, self.total_size);
        Some(start..end)
    }

    /// 指定分片的长度
    pub fn chunk_len(&self, index: usize) -> Option<u64> {
        self.range(index).map(|r| r.end - r.start)
    }

    /// 按顺序返回全部分片范围
    pub fn ranges(&self) -> impl Iterator<Item = (usize, Range<u64>)> + '_ {
        (0..self.chunk_count()).filter_map(move |i| self.range(i).map(|r| (i, r)))
    }

    /// 把分片索引切分成连续批次，每批最多 `batch_size` 个
    pub fn batches(&self, batch_size: usize) -> Vec<Range<usize>> {
        let batch_size = batch_size.max(1);
        let count = self.chunk_count();
        (0..count)
            .step_by(batch_size)
            .map(|start| start..std::cmp::min(start + batch_size, count))
            .collect()
    }
}

/// 已上传分片记录（创建后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// 分片索引
    pub index: usize,
    /// 存储路径
    pub storage_path: String,
    /// 分片大小
    pub size_bytes: u64,
    /// 上传完成时间
    pub uploaded_at: DateTime<Utc>,
    /// 实际使用的尝试次数
    pub attempts_used: u32,
}

/// 槽位写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotInsert {
    /// 写入成功
    Inserted,
    /// 该索引已存在记录，本次写入被忽略
    Occupied,
    /// 索引超出范围
    OutOfRange,
}

/// 分片记录表
///
/// 长度固定为分片总数，每个索引对应一个槽位
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkTable {
    slots: Vec<Option<ChunkRecord>>,
}

impl ChunkTable {
    /// 创建空表
    pub fn new(total_chunks: usize) -> Self {
        Self {
            slots: vec![None; total_chunks],
        }
    }

    /// 槽位数量（即分片总数）
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 已上传分片数量
    pub fn uploaded_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 是否全部上传
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    pub fn get(&self, index: usize) -> Option<&ChunkRecord> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// 若槽位为空则写入记录
    pub fn insert_if_absent(&mut self, record: ChunkRecord) -> SlotInsert {
        match self.slots.get_mut(record.index) {
            None => SlotInsert::OutOfRange,
            Some(Some(_)) => SlotInsert::Occupied,
            Some(slot) => {
                *slot = Some(record);
                SlotInsert::Inserted
            }
        }
    }

    /// 清空全部槽位（分片对象已被删除）
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// 按索引顺序返回已上传记录
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.slots.iter().flatten()
    }

    /// 所有已上传分片的存储路径
    pub fn storage_paths(&self) -> Vec<String> {
        self.records().map(|r| r.storage_path.clone()).collect()
    }

    /// 尚未上传的分片索引
    pub fn missing_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// 累计尝试次数
    pub fn total_attempts(&self) -> u64 {
        self.records().map(|r| r.attempts_used as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    fn record(index: usize, attempts: u32) -> ChunkRecord {
        ChunkRecord {
            index,
            storage_path: format!("videos/s1/chunk_{:05}", index),
            size_bytes: 10,
            uploaded_at: Utc::now(),
            attempts_used: attempts,
        }
    }

    #[test]
    fn test_chunk_plan_25mb_with_10mb_chunks() {
        let plan = ChunkPlan::new(25 * MB, 10 * MB);
        assert_eq!(plan.chunk_count(), 3);
        assert_eq!(plan.chunk_len(0), Some(10 * MB));
        assert_eq!(plan.chunk_len(1), Some(10 * MB));
        assert_eq!(plan.chunk_len(2), Some(5 * MB));
        assert_eq!(plan.range(2), Some((20 * MB)..(25 * MB)));
        assert_eq!(plan.range(3), None);
    }

    #[test]
    fn test_exact_multiple() {
        let plan = ChunkPlan::new(16 * MB, 4 * MB);
        assert_eq!(plan.chunk_count(), 4);
        assert_eq!(plan.chunk_len(3), Some(4 * MB));
    }

    #[test]
    fn test_smaller_than_one_chunk() {
        let plan = ChunkPlan::new(100, 4 * MB);
        assert_eq!(plan.chunk_count(), 1);
        assert_eq!(plan.range(0), Some(0..100));
    }

    #[test]
    fn test_batches() {
        let plan = ChunkPlan::new(50, 10);
        assert_eq!(plan.batches(2), vec![0..2, 2..4, 4..5]);
        assert_eq!(plan.batches(5), vec![0..5]);
        assert_eq!(plan.batches(0), vec![0..1, 1..2, 2..3, 3..4, 4..5]);
    }

    #[test]
    fn test_table_insert_if_absent() {
        let mut table = ChunkTable::new(3);
        assert_eq!(table.insert_if_absent(record(1, 1)), SlotInsert::Inserted);
        assert_eq!(table.insert_if_absent(record(1, 2)), SlotInsert::Occupied);
        assert_eq!(table.insert_if_absent(record(3, 1)), SlotInsert::OutOfRange);

        // 重复写入不会覆盖原记录
        assert_eq!(table.get(1).unwrap().attempts_used, 1);
        assert_eq!(table.uploaded_count(), 1);
        assert_eq!(table.missing_indices(), vec![0, 2]);
    }

    #[test]
    fn test_table_records_in_index_order() {
        let mut table = ChunkTable::new(3);
        table.insert_if_absent(record(2, 1));
        table.insert_if_absent(record(0, 3));
        table.insert_if_absent(record(1, 2));

        let indices: Vec<usize> = table.records().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(table.is_full());
        assert_eq!(table.total_attempts(), 6);
    }

    #[test]
    fn test_table_clear_keeps_capacity() {
        let mut table = ChunkTable::new(3);
        table.insert_if_absent(record(0, 1));
        table.insert_if_absent(record(2, 1));
        table.clear();
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.uploaded_count(), 0);
        assert_eq!(table.missing_indices(), vec![0, 1, 2]);
        assert_eq!(table.insert_if_absent(record(0, 2)), SlotInsert::Inserted);
    }

    #[test]
    fn test_table_serializes_as_slot_array() {
        let mut table = ChunkTable::new(2);
        table.insert_if_absent(record(1, 1));
        let json = serde_json::to_value(&table).unwrap();
        assert!(json.is_array());
        assert!(json[0].is_null());
        assert_eq!(json[1]["index"], 1);
    }

    proptest! {
        #[test]
        fn prop_chunk_lengths_cover_total(total in 1u64..10_000_000, chunk in 1u64..3_000_000) {
            let plan = ChunkPlan::new(total, chunk);
            prop_assert_eq!(plan.chunk_count() as u64, total.div_ceil(chunk));

            let sum: u64 = plan.ranges().map(|(_, r)| r.end - r.start).sum();
            prop_assert_eq!(sum, total);

            // 除最后一个分片外长度都等于分片大小
            let last = plan.chunk_count() - 1;
            for (i, r) in plan.ranges() {
                if i < last {
                    prop_assert_eq!(r.end - r.start, chunk);
                } else {
                    prop_assert!(r.end - r.start <= chunk && r.end - r.start > 0);
                }
            }
        }

        #[test]
        fn prop_batches_partition_indices(total in 1u64..500, chunk in 1u64..50, batch in 1usize..8) {
            let plan = ChunkPlan::new(total, chunk);
            let flattened: Vec<usize> = plan.batches(batch).into_iter().flatten().collect();
            let expected: Vec<usize> = (0..plan.chunk_count()).collect();
            prop_assert_eq!(flattened, expected);
            prop_assert!(plan.batches(batch).iter().all(|b| b.len() <= batch));
        }
    }
}
