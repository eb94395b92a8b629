//! Tablet 运行时状态（Version Graph + Tablet 句柄）

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::common::{OlapError, Result, RowsetId, SchemaHash, TabletId, Version};
use crate::delete_handler::DeletePredicate;
use crate::meta::{RowsetMeta, RowsetState, TabletMeta, TabletSchema};
use crate::rowset::{Rowset, RowsetReaderPtr};

// ── Version 图 ────────────────────────────────────────────────────────────────
//
// 有向图：每条边 start → end 代表一个覆盖 [start,end] 的 Rowset。
// BFS 找出覆盖 [lo,hi] 的最小 Rowset 集合，找不到即存在版本空洞。

#[derive(Debug, Default)]
pub struct VersionGraph {
    // start_version → { end_version, ... }
    adj: HashMap<i64, HashSet<i64>>,
}

impl VersionGraph {
    pub fn add_edge(&mut self, v: Version) {
        self.adj.entry(v.start).or_default().insert(v.end);
    }

    pub fn remove_edge(&mut self, v: Version) {
        if let Some(ends) = self.adj.get_mut(&v.start) {
            ends.remove(&v.end);
            if ends.is_empty() {
                self.adj.remove(&v.start);
            }
        }
    }

    /// BFS 找从 lo 到 hi 的覆盖路径，返回经过的 Version 列表。
    pub fn find_covering_path(&self, lo: i64, hi: i64) -> Option<Vec<Version>> {
        let mut queue: VecDeque<(i64, Vec<Version>)> = VecDeque::new();
        queue.push_back((lo, vec![]));
        let mut visited: HashSet<i64> = HashSet::new();
        visited.insert(lo);

        while let Some((cur, path)) = queue.pop_front() {
            if let Some(ends) = self.adj.get(&cur) {
                // 优先尝试跨度最大的边
                let mut sorted: Vec<i64> = ends.iter().copied().collect();
                sorted.sort_unstable_by(|a, b| b.cmp(a));

                for &end in &sorted {
                    let mut new_path = path.clone();
                    new_path.push(Version::new(cur, end));

                    if end == hi {
                        return Some(new_path);
                    }
                    if end < hi && !visited.contains(&(end + 1)) {
                        visited.insert(end + 1);
                        queue.push_back((end + 1, new_path));
                    }
                }
            }
        }
        None
    }
}

// ── Tablet 内部状态 ───────────────────────────────────────────────────────────

pub struct TabletInner {
    pub meta:          TabletMeta,
    pub version_graph: VersionGraph,
    /// 已发布的 Rowset（含数据句柄），与 meta.rowsets 同步
    rowsets:           HashMap<RowsetId, Rowset>,
}

impl TabletInner {
    fn new(meta: TabletMeta) -> Self {
        let mut vg = VersionGraph::default();
        for rs in meta.rowsets.values().filter(|r| r.is_visible()) {
            vg.add_edge(rs.version);
        }
        Self { meta, version_graph: vg, rowsets: HashMap::new() }
    }

    fn covering_rowsets(&self, lo: i64, hi: i64) -> Result<Vec<&Rowset>> {
        let path = self.version_graph
            .find_covering_path(lo, hi)
            .ok_or_else(|| OlapError::MissingVersions(format!("[{lo},{hi}]")))?;
        path.iter()
            .map(|v| {
                self.rowsets.values()
                    .find(|r| r.meta().version == *v && r.meta().is_visible())
                    .ok_or_else(|| OlapError::MissingVersions(format!("{v} has no data")))
            })
            .collect()
    }
}

// ── Tablet 句柄 ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Tablet(Arc<RwLock<TabletInner>>);

impl Tablet {
    pub fn new(meta: TabletMeta) -> Self {
        Self(Arc::new(RwLock::new(TabletInner::new(meta))))
    }

    // 数据不可变，锁中毒时沿用内部状态
    fn read(&self) -> RwLockReadGuard<'_, TabletInner> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TabletInner> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tablet_id(&self) -> TabletId { self.read().meta.tablet_id }

    pub fn schema_hash(&self) -> SchemaHash { self.read().meta.schema_hash }

    pub fn schema(&self) -> TabletSchema { self.read().meta.schema.clone() }

    pub fn max_version(&self) -> i64 { self.read().meta.max_version }

    /// 将一个已提交的 Rowset 发布到本 Tablet
    pub fn add_rowset(&self, mut rowset: Rowset) -> Result<()> {
        let mut inner = self.write();
        let version = rowset.meta().version;
        let duplicate = inner.meta.rowsets.contains_key(&rowset.meta().rowset_id)
            || inner.meta.rowsets.values().any(|r| r.is_visible() && r.version == version);
        if duplicate {
            return Err(OlapError::VersionExists(version));
        }
        rowset.meta_mut().state = RowsetState::Visible;
        let meta = rowset.meta().clone();
        inner.version_graph.add_edge(version);
        if version.end > inner.meta.max_version {
            inner.meta.max_version = version.end;
        }
        debug!(
            tablet_id = inner.meta.tablet_id,
            rowset_id = meta.rowset_id,
            version = %version,
            num_rows = meta.num_rows,
            "add rowset",
        );
        inner.meta.rowsets.insert(meta.rowset_id, meta);
        inner.rowsets.insert(rowset.meta().rowset_id, rowset);
        Ok(())
    }

    /// 以空 rowset 的形式在 `predicate.version` 上发布一次删除
    pub fn add_delete_predicate(&self, rowset_id: RowsetId, predicate: DeletePredicate) -> Result<()> {
        let (tablet_id, partition_id) = {
            let inner = self.read();
            (inner.meta.tablet_id, inner.meta.partition_id)
        };
        let version = Version::point(predicate.version);
        let meta = RowsetMeta::new(rowset_id, tablet_id, partition_id, version).with_delete_predicate(predicate);
        self.add_rowset(Rowset::new(meta, Vec::new()))
    }

    /// 版本不超过 `version` 的可见删除条件，按版本升序
    pub fn delete_predicates(&self, version: i64) -> Vec<DeletePredicate> {
        let inner = self.read();
        let mut preds: Vec<DeletePredicate> = inner.meta.rowsets.values()
            .filter(|r| r.is_visible() && r.version.end <= version)
            .filter_map(|r| r.delete_predicate.clone())
            .collect();
        preds.sort_by_key(|p| p.version);
        preds
    }

    /// 找出覆盖 [lo, hi] 版本范围的最小 Rowset 元数据集合
    pub fn capture_consistent_versions(&self, lo: i64, hi: i64) -> Result<Vec<RowsetMeta>> {
        let inner = self.read();
        Ok(inner.covering_rowsets(lo, hi)?.into_iter().map(|r| r.meta().clone()).collect())
    }

    /// 为读取 `version` 构建 reader：覆盖路径上每个 Rowset 各自 `create_readers`
    pub fn capture_rs_readers(&self, version: Version) -> Result<Vec<RowsetReaderPtr>> {
        let inner = self.read();
        let readers: Vec<RowsetReaderPtr> = inner.covering_rowsets(version.start, version.end)?
            .into_iter()
            .flat_map(|r| r.create_readers())
            .collect();
        debug!(tablet_id = inner.meta.tablet_id, version = %version, readers = readers.len(), "capture rowset readers");
        Ok(readers)
    }

    /// 将指定 Rowset 标记为 Stale（compaction 后调用）
    pub fn mark_rowset_stale(&self, rowset_id: RowsetId) {
        let mut inner = self.write();
        let version = match inner.meta.rowsets.get_mut(&rowset_id) {
            Some(rs) => {
                rs.mark_stale();
                rs.version
            }
            None => return,
        };
        if let Some(rs) = inner.rowsets.get_mut(&rowset_id) {
            rs.meta_mut().mark_stale();
        }
        inner.version_graph.remove_edge(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType, KeysType};
    use crate::meta::ColumnSchema;

    fn tablet() -> Tablet {
        let schema = TabletSchema::new(KeysType::Duplicate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "v", ColumnType::Int64, AggregateType::None),
        ]);
        Tablet::new(TabletMeta::new(7, 1, schema))
    }

    fn rowset(id: RowsetId, v: Version) -> Rowset {
        Rowset::new(RowsetMeta::new(id, 7, 1, v), Vec::new())
    }

    #[test]
    fn capture_prefers_widest_rowsets() {
        let t = tablet();
        t.add_rowset(rowset(1, Version::new(0, 1))).unwrap();
        t.add_rowset(rowset(2, Version::point(2))).unwrap();
        t.add_rowset(rowset(3, Version::point(3))).unwrap();
        t.add_rowset(rowset(4, Version::new(2, 3))).unwrap();
        assert_eq!(t.max_version(), 3);

        let metas = t.capture_consistent_versions(0, 3).unwrap();
        let ids: Vec<_> = metas.iter().map(|m| m.rowset_id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert!(metas.iter().all(|m| m.is_visible()));
        assert_eq!(t.capture_rs_readers(Version::new(0, 3)).unwrap().len(), 2);
    }

    #[test]
    fn delete_predicates_are_versioned_rowsets() {
        let t = tablet();
        t.add_rowset(rowset(1, Version::new(0, 1))).unwrap();
        t.add_delete_predicate(2, DeletePredicate::parse(2, &["k = 1"]).unwrap()).unwrap();
        t.add_rowset(rowset(3, Version::point(3))).unwrap();
        t.add_delete_predicate(4, DeletePredicate::parse(4, &["k >= 9"]).unwrap()).unwrap();

        let versions: Vec<_> = t.delete_predicates(3).iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![2]);
        assert_eq!(t.delete_predicates(4).len(), 2);
        assert_eq!(t.capture_rs_readers(Version::new(0, 4)).unwrap().len(), 4);
        assert!(matches!(
            t.add_delete_predicate(5, DeletePredicate::parse(3, &["k = 2"]).unwrap()),
            Err(OlapError::VersionExists(_)),
        ));
    }

    #[test]
    fn holes_and_duplicates() {
        let t = tablet();
        t.add_rowset(rowset(1, Version::new(0, 1))).unwrap();
        t.add_rowset(rowset(2, Version::point(3))).unwrap();
        assert!(matches!(t.capture_consistent_versions(0, 3), Err(OlapError::MissingVersions(_))));
        assert!(matches!(t.add_rowset(rowset(9, Version::point(3))), Err(OlapError::VersionExists(_))));

        t.add_rowset(rowset(3, Version::point(2))).unwrap();
        assert_eq!(t.capture_consistent_versions(0, 3).unwrap().len(), 3);

        t.mark_rowset_stale(3);
        assert!(t.capture_consistent_versions(0, 3).is_err());
    }
}
