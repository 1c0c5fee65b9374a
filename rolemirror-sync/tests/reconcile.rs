use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rolemirror_core::{
    Config, GroupId, MemberId, MemberRoleObservation, RoleKey, RoleRecord, RoleSet,
};
use rolemirror_sync::{
    Dispatched, FetchError, GroupState, MemberPage, MemberSource, Pipeline, PipelineError,
    ReconcileScope, RoleStore, StoreError,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemorySource {
    groups: Mutex<HashMap<GroupId, Vec<(String, Vec<String>)>>>,
    broken: Mutex<HashSet<GroupId>>,
}

impl MemorySource {
    fn set(&self, group: &str, members: &[(&str, &[&str])]) {
        let members = members
            .iter()
            .map(|(id, roles)| {
                (
                    id.to_string(),
                    roles.iter().map(|r| r.to_string()).collect(),
                )
            })
            .collect();
        self.groups
            .lock()
            .unwrap()
            .insert(GroupId::from(group), members);
    }

    fn break_group(&self, group: &str) {
        self.broken.lock().unwrap().insert(GroupId::from(group));
    }
}

#[async_trait]
impl MemberSource for MemorySource {
    async fn fetch_page(
        &self,
        group: &GroupId,
        after: Option<&MemberId>,
        limit: usize,
    ) -> Result<MemberPage, FetchError> {
        if self.broken.lock().unwrap().contains(group) {
            return Err(FetchError::Status {
                group: group.clone(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let mut all = self
            .groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default();
        all.sort();
        let members = all
            .into_iter()
            .filter(|(id, _)| after.map(|a| id.as_str() > a.as_str()).unwrap_or(true))
            .take(limit)
            .map(|(id, roles)| {
                MemberRoleObservation::new(
                    group.clone(),
                    MemberId::from(id),
                    roles.into_iter().collect(),
                )
            })
            .collect();
        Ok(MemberPage::new(members))
    }
}

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<BTreeMap<RoleKey, RoleSet>>,
    failing: Mutex<HashSet<String>>,
    upserts: AtomicUsize,
    deletes: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_delay: Option<Duration>,
}

impl MemoryStore {
    fn seeded(rows: &[(&str, &str, &[&str])]) -> Self {
        let store = Self::default();
        {
            let mut map = store.rows.lock().unwrap();
            for (g, m, roles) in rows {
                map.insert(
                    RoleKey::new(GroupId::from(*g), MemberId::from(*m)),
                    roles.iter().copied().collect(),
                );
            }
        }
        store
    }

    fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    fn records(&self) -> Vec<RoleRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|(k, roles)| RoleRecord::new(k.group.clone(), k.member.clone(), roles.clone()))
            .collect()
    }

    fn deleted(&self) -> Vec<String> {
        let mut deleted = self.deletes.lock().unwrap().clone();
        deleted.sort();
        deleted
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn load_all(&self, groups: &[GroupId]) -> Result<Vec<RoleRecord>, StoreError> {
        Ok(self
            .records()
            .into_iter()
            .filter(|r| groups.contains(&r.group_id))
            .collect())
    }

    async fn upsert(&self, record: &RoleRecord) -> Result<(), StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = record.key();
        if self.failing.lock().unwrap().contains(&key.to_string()) {
            return Err(StoreError::Unavailable(format!("rejected {key}")));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(key, record.roles.clone());
        Ok(())
    }

    async fn delete(&self, group: &GroupId, member: &MemberId) -> Result<(), StoreError> {
        let key = RoleKey::new(group.clone(), member.clone());
        if self.failing.lock().unwrap().contains(&key.to_string()) {
            return Err(StoreError::Unavailable(format!("rejected {key}")));
        }
        self.rows.lock().unwrap().remove(&key);
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

fn config(groups: &[&str]) -> Config {
    let yaml = format!(
        concat!(
            "groups: [{}]\npage_size: 2\nsync_concurrency: 4\n",
            "source:\n  base_url: http://unused\n  token: t\n",
        ),
        groups
            .iter()
            .map(|g| format!("\"{g}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Config::from_yaml(&yaml, std::path::Path::new("test.yaml")).expect("config")
}

async fn pipeline(
    groups: &[&str],
    store: &Arc<MemoryStore>,
    source: &Arc<MemorySource>,
) -> Pipeline {
    Pipeline::bootstrap(&config(groups), store.clone(), source.clone(), false)
        .await
        .expect("bootstrap")
}

fn roles(items: &[&str]) -> RoleSet {
    items.iter().copied().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prunes_exactly_the_members_that_left() {
    let store = Arc::new(MemoryStore::seeded(&[
        ("g", "1", &["a"]),
        ("g", "2", &["a"]),
        ("g", "3", &["a"]),
    ]));
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("1", &["a"]), ("3", &["a"])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let reports = pipeline.run(ReconcileScope::All).await.unwrap();

    assert_eq!(reports[0].state, GroupState::Done);
    assert_eq!(reports[0].pruned, 1);
    assert_eq!(reports[0].unchanged, 2);
    assert_eq!(store.deleted(), vec!["g:2".to_string()]);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    assert!(pipeline
        .cache()
        .get(&GroupId::from("g"), &MemberId::from("1"))
        .is_some());
}

#[tokio::test]
async fn failing_member_does_not_block_siblings_or_pruning() {
    let store = Arc::new(MemoryStore::seeded(&[("g", "gone", &["a"])]));
    store.fail_key("g:x");
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("x", &["a"]), ("y", &["b"]), ("z", &[])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.state, GroupState::Done);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.sync_failures, 1);
    assert_eq!(report.pruned, 1);
    assert_eq!(store.deleted(), vec!["g:gone".to_string()]);

    let cache = pipeline.cache();
    assert!(cache.get(&GroupId::from("g"), &MemberId::from("x")).is_none());
    assert_eq!(
        cache.get(&GroupId::from("g"), &MemberId::from("y")),
        Some(roles(&["b"]))
    );
    assert_eq!(
        cache.get(&GroupId::from("g"), &MemberId::from("z")),
        Some(RoleSet::new())
    );
}

#[tokio::test]
async fn empty_group_prunes_every_cached_member() {
    let store = Arc::new(MemoryStore::seeded(&[
        ("g", "1", &[]),
        ("g", "2", &[]),
        ("g", "3", &[]),
        ("g", "4", &[]),
        ("g", "5", &[]),
    ]));
    let source = Arc::new(MemorySource::default());
    source.set("g", &[]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.state, GroupState::Done);
    assert_eq!(report.pruned, 5);
    assert!(pipeline.cache().is_empty());
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn fetch_failure_fails_only_that_group() {
    let store = Arc::new(MemoryStore::seeded(&[("bad", "1", &["a"])]));
    let source = Arc::new(MemorySource::default());
    source.break_group("bad");
    source.set("good", &[("1", &["a"])]);

    let pipeline = pipeline(&["bad", "good"], &store, &source).await;
    let reports = pipeline.run(ReconcileScope::All).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].state, GroupState::Failed);
    assert!(reports[0].error.as_deref().unwrap().contains("503"));
    assert_eq!(reports[0].pruned, 0, "failed group must not prune");
    assert_eq!(reports[1].state, GroupState::Done);
    assert_eq!(reports[1].written, 1);
    assert!(store.deleted().is_empty());
}

#[tokio::test]
async fn cache_matches_store_after_successful_pass() {
    let store = Arc::new(MemoryStore::seeded(&[
        ("g", "1", &["old"]),
        ("g", "2", &["a"]),
        ("other", "9", &["x"]),
    ]));
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("1", &["new"]), ("3", &["a", "b"]), ("4", &[])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    pipeline.run(ReconcileScope::All).await.unwrap();

    let persisted: Vec<RoleRecord> = store
        .records()
        .into_iter()
        .filter(|r| r.group_id == GroupId::from("g"))
        .collect();
    assert_eq!(pipeline.cache().snapshot(), persisted);
    assert_eq!(
        pipeline.cache().group_len(&GroupId::from("other")),
        0,
        "unconfigured groups never enter the cache"
    );
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("1", &["a"]), ("2", &["b"]), ("3", &[])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let first = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);
    let second = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(first.written, 3);
    assert_eq!(second.written, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn members_without_id_are_skipped() {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("", &["a"]), ("1", &["a"])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.fetched, 2);
    assert_eq!(report.written, 1);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn duplicate_member_in_one_listing_is_synced_once_with_last_roles() {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("1", &["a"]), ("1", &["b"])]);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.written, 1);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
    let g = GroupId::from("g");
    let m = MemberId::from("1");
    assert_eq!(pipeline.cache().get(&g, &m), Some(roles(&["b"])));
    assert_eq!(store.records()[0].roles, roles(&["b"]));
}

#[tokio::test]
async fn member_syncs_respect_concurrency_bound() {
    let store = Arc::new(MemoryStore {
        write_delay: Some(Duration::from_millis(20)),
        ..MemoryStore::default()
    });
    let source = Arc::new(MemorySource::default());
    let ids: Vec<String> = (0..12).map(|i| format!("{i:02}")).collect();
    let no_roles: &[&str] = &[];
    let members: Vec<(&str, &[&str])> = ids.iter().map(|id| (id.as_str(), no_roles)).collect();
    source.set("g", &members);

    let pipeline = pipeline(&["g"], &store, &source).await;
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.written, 12);
    let peak = store.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in-flight writes {peak} exceeded bound");
    assert!(peak > 1, "syncs should overlap");
}

#[tokio::test]
async fn unknown_group_scope_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(MemorySource::default());
    let pipeline = pipeline(&["g"], &store, &source).await;

    let err = pipeline
        .run(ReconcileScope::Group(GroupId::from("nope")))
        .await
        .expect_err("unknown group");
    assert!(matches!(err, PipelineError::UnknownGroup(_)));
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let store = Arc::new(MemoryStore::seeded(&[("g", "stale", &[])]));
    let source = Arc::new(MemorySource::default());
    source.set("g", &[("1", &["a"])]);

    let pipeline = Pipeline::bootstrap(&config(&["g"]), store.clone(), source.clone(), true)
        .await
        .unwrap();
    let report = pipeline.run(ReconcileScope::All).await.unwrap().remove(0);

    assert_eq!(report.written, 1);
    assert_eq!(report.pruned, 1);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    assert!(store.deleted().is_empty());
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn dispatcher_routes_notifications_for_configured_groups() {
    let store = Arc::new(MemoryStore::default());
    let source = Arc::new(MemorySource::default());
    let pipeline = pipeline(&["g"], &store, &source).await;
    let dispatcher = pipeline.dispatcher();
    let g = GroupId::from("g");
    let m = MemberId::from("7");

    assert_eq!(
        dispatcher.on_member_changed(&g, &m, roles(&["a"])).await,
        Dispatched::Applied
    );
    assert_eq!(
        dispatcher.on_member_changed(&g, &m, roles(&["a"])).await,
        Dispatched::Unchanged
    );
    assert_eq!(
        dispatcher
            .on_member_changed(&GroupId::from("elsewhere"), &m, roles(&["a"]))
            .await,
        Dispatched::Ignored
    );
    assert_eq!(
        dispatcher.on_member_removed(&g, &m).await,
        Dispatched::Applied
    );
    assert!(pipeline.cache().is_empty());
    assert!(store.records().is_empty());

    store.fail_key("g:8");
    assert_eq!(
        dispatcher
            .on_member_changed(&g, &MemberId::from("8"), roles(&[]))
            .await,
        Dispatched::Failed
    );
    assert!(pipeline.cache().is_empty());
}
