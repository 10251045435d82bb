use notiq_core::store::MergeSummary;
use notiq_core::{
    ChangeNotificationBridge, Note, NotesViewModel, RecordStore, RemoteChangeNotification,
    RemoteRecordChange, StoreDescription,
};
use std::sync::mpsc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn open_view_model() -> NotesViewModel {
    let description = StoreDescription::in_memory().with_cloud_container("iCloud.NotiqTeam.notiq");
    NotesViewModel::new(RecordStore::open(description).unwrap())
}

fn start_bridge(store: &RecordStore) -> (ChangeNotificationBridge, mpsc::Receiver<MergeSummary>) {
    let (sender, receiver) = mpsc::channel();
    let bridge = ChangeNotificationBridge::start_with_hook(
        store,
        Box::new(move |_: &RemoteChangeNotification, summary: MergeSummary| {
            let _ = sender.send(summary);
        }),
    )
    .unwrap();
    (bridge, receiver)
}

fn renamed(note: &Note, title: &str) -> Note {
    let mut remote = note.clone();
    remote.title = Some(title.to_string());
    remote
}

#[test]
fn remote_merge_updates_context_but_not_the_snapshot() {
    let mut vm = open_view_model();
    let note = vm.create(Some("local"), None);
    let (bridge, merged) = start_bridge(vm.store());

    vm.store()
        .import_remote_changes(&[RemoteRecordChange::full(renamed(&note, "remote"))])
        .unwrap();
    let summary = merged.recv_timeout(WAIT).unwrap();
    assert_eq!(summary.refreshed, 1);
    assert_eq!(bridge.merged_count(), 1);

    assert_eq!(vm.notes()[0].title.as_deref(), Some("local"));
    let in_context = vm.store().view_context().object(note.id).unwrap().unwrap();
    assert_eq!(in_context.title.as_deref(), Some("remote"));

    assert_eq!(vm.refresh()[0].title.as_deref(), Some("remote"));
    bridge.stop();
}

#[test]
fn remote_inserts_and_deletes_reach_the_view_context() {
    let mut vm = open_view_model();
    let doomed = vm.create(Some("doomed"), None);
    let (bridge, merged) = start_bridge(vm.store());

    let incoming = Note::new(Some("from cloud".to_string()), None, 5);
    vm.store()
        .import_remote_changes(&[
            RemoteRecordChange::full(incoming.clone()),
            RemoteRecordChange::delete(doomed.id),
        ])
        .unwrap();
    let summary = merged.recv_timeout(WAIT).unwrap();
    assert_eq!(summary.invalidated, 1);

    assert_eq!(vm.notes().len(), 1);
    let snapshot = vm.refresh().to_vec();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, incoming.id);
    bridge.stop();
}

#[test]
fn pending_local_edit_survives_remote_merge_and_wins_on_save() {
    let mut vm = open_view_model();
    let note = vm.create(Some("local"), Some("body"));
    let (bridge, merged) = start_bridge(vm.store());

    vm.store()
        .view_context()
        .modify(note.id, |n| n.content = Some("draft".to_string()))
        .unwrap();

    let mut remote = renamed(&note, "remote");
    remote.content = Some("remote body".to_string());
    vm.store()
        .import_remote_changes(&[RemoteRecordChange::full(remote)])
        .unwrap();
    merged.recv_timeout(WAIT).unwrap();

    vm.store().save_context();
    let saved = vm.refresh()[0].clone();
    assert_eq!(saved.title.as_deref(), Some("remote"));
    assert_eq!(saved.content.as_deref(), Some("draft"));
    bridge.stop();
}

#[test]
fn notifications_carry_the_cloud_container() {
    let vm = open_view_model();
    let subscription = vm.store().subscribe_remote_changes();

    let note = Note::new(Some("cloud".to_string()), None, 1);
    vm.store()
        .import_remote_changes(&[RemoteRecordChange::full(note)])
        .unwrap();

    let notification = subscription.receiver.recv_timeout(WAIT).unwrap();
    assert_eq!(notification.container_name, "NotesContainer");
    assert_eq!(
        notification.cloud_container_id.as_deref(),
        Some("iCloud.NotiqTeam.notiq")
    );
    assert_eq!(notification.change_set.inserted.len(), 1);

    vm.store().unsubscribe_remote_changes(subscription.id);
    assert!(subscription.receiver.recv_timeout(WAIT).is_err());
}

#[test]
fn empty_imports_post_nothing() {
    let vm = open_view_model();
    let subscription = vm.store().subscribe_remote_changes();

    let change_set = vm
        .store()
        .import_remote_changes(&[RemoteRecordChange::delete(uuid::Uuid::new_v4())])
        .unwrap();
    assert!(change_set.is_empty());
    assert!(subscription.receiver.try_recv().is_err());
}

#[test]
fn stale_change_sets_are_ignored() {
    let vm = open_view_model();
    let note = vm.store().view_context().perform(|session| {
        let note = Note::new(Some("v1".to_string()), None, 1);
        session.insert(note.clone()).unwrap();
        session.save().unwrap();
        note
    });

    let older = vm
        .store()
        .import_remote_changes(&[RemoteRecordChange::full(renamed(&note, "v2"))])
        .unwrap();
    vm.store()
        .import_remote_changes(&[RemoteRecordChange::full(renamed(&note, "v3"))])
        .unwrap();

    let context = vm.store().new_background_context();
    assert_eq!(
        context.object(note.id).unwrap().unwrap().title.as_deref(),
        Some("v3")
    );
    let summary = context.merge_changes(&older);
    assert_eq!(summary, MergeSummary::default());
    assert_eq!(
        context.object(note.id).unwrap().unwrap().title.as_deref(),
        Some("v3")
    );
}
