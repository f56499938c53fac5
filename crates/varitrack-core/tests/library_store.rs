use std::sync::Arc;

use tempfile::tempdir;
use varitrack_core::{
    ManualDevice, NoopObserver, PcmFormat, SettingsStore, StoreError, TrackHandle, TrackId,
    TrackLibrary, TrackStore, TransportConfig, TransportController, TransportDeps, UserSettings,
    fixtures::write_tone_wav,
};

#[test]
fn import_list_open_and_delete_tracks() {
    let temp = tempdir().expect("tempdir should be creatable");
    let incoming = temp.path().join("incoming");
    std::fs::create_dir_all(&incoming).expect("incoming dir should be creatable");
    write_tone_wav(&incoming.join("b-side.wav"), 8_000, 1, 0.2).expect("fixture should write");
    write_tone_wav(&incoming.join("a-side.wav"), 8_000, 2, 0.1).expect("fixture should write");
    std::fs::write(incoming.join("notes.txt"), b"liner notes").expect("text should write");

    let library = TrackLibrary::new(temp.path().join("library"));
    assert!(library.list_tracks().expect("missing library lists empty").is_empty());

    library
        .import_track(&incoming.join("b-side.wav"))
        .expect("b-side should import");
    let handle = library
        .import_track(&incoming.join("a-side.wav"))
        .expect("a-side should import");
    assert_eq!(handle.id, TrackId::new("a-side.wav"));
    assert!(handle.size_bytes > 0);
    assert_eq!(handle.display_name(), "a-side");

    assert!(matches!(
        library.import_track(&incoming.join("a-side.wav")),
        Err(StoreError::AlreadyExists(_))
    ));
    assert!(matches!(
        library.import_track(&incoming.join("notes.txt")),
        Err(StoreError::UnsupportedExtension(_))
    ));

    let ids: Vec<String> = library
        .list_tracks()
        .expect("library should list")
        .into_iter()
        .map(|handle| handle.id.to_string())
        .collect();
    assert_eq!(ids, vec!["a-side.wav", "b-side.wav"]);

    let source = library.open_track(&handle).expect("track should open");
    assert_eq!(source.channels(), 2);
    assert_eq!(source.frame_length(), 800);

    library
        .delete_track(&TrackId::new("a-side.wav"))
        .expect("delete should succeed");
    assert!(matches!(
        library.open_track(&handle),
        Err(StoreError::TrackNotFound(_))
    ));
    assert!(matches!(
        library.delete_track(&TrackId::new("a-side.wav")),
        Err(StoreError::TrackNotFound(_))
    ));
    assert_eq!(library.list_tracks().expect("library should list").len(), 1);
}

#[test]
fn settings_persist_across_reopen() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("state").join("settings.json");

    let settings = SettingsStore::open(&path).expect("missing settings should open");
    assert!(!settings.repeat_enabled());
    settings
        .set_repeat_enabled(true)
        .expect("repeat should persist");

    let reopened = SettingsStore::open(&path).expect("settings should reopen");
    assert!(reopened.repeat_enabled());
    assert!(reopened.snapshot().repeat_enabled);
}

#[test]
fn corrupt_settings_fall_back_to_defaults() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("settings.json");
    std::fs::write(&path, b"{ not json").expect("corrupt payload should write");

    let settings = SettingsStore::open(&path).expect("corrupt settings should still open");
    assert!(!settings.repeat_enabled());
}

#[test]
fn controller_over_library_persists_repeat_and_navigates() {
    let temp = tempdir().expect("tempdir should be creatable");
    let root = temp.path().join("library");
    std::fs::create_dir_all(&root).expect("library dir should be creatable");
    write_tone_wav(&root.join("one.wav"), 8_000, 1, 0.1).expect("fixture should write");
    write_tone_wav(&root.join("two.wav"), 8_000, 1, 0.1).expect("fixture should write");

    let library = Arc::new(TrackLibrary::new(&root));
    let settings_path = temp.path().join("settings.json");
    let settings =
        Arc::new(SettingsStore::open(&settings_path).expect("settings should open"));
    let controller = TransportController::new(
        Box::new(ManualDevice::new(PcmFormat::new(8_000, 1))),
        TransportDeps {
            store: library.clone(),
            settings: settings.clone(),
            observer: Arc::new(NoopObserver),
        },
        TransportConfig::default(),
    );

    let first = library
        .list_tracks()
        .expect("library should list")
        .into_iter()
        .next()
        .expect("library should not be empty");
    controller.open_track(&first).expect("track should load");
    assert!(controller.next_track().expect("next should resolve"));
    assert_eq!(controller.current_track(), Some(TrackId::new("two.wav")));

    assert!(controller.toggle_repeat().expect("toggle should persist"));
    let reopened = SettingsStore::open(&settings_path).expect("settings should reopen");
    assert!(reopened.repeat_enabled());
}

#[test]
fn ids_outside_the_library_are_not_found() {
    let temp = tempdir().expect("tempdir should be creatable");
    let root = temp.path().join("library");
    std::fs::create_dir_all(&root).expect("library dir should be creatable");
    let sibling = temp.path().join("outside.wav");
    write_tone_wav(&sibling, 8_000, 1, 0.1).expect("fixture should write");
    let absolute = temp.path().join("absolute.wav");
    write_tone_wav(&absolute, 8_000, 1, 0.1).expect("fixture should write");

    let library = TrackLibrary::new(&root);
    for id in [
        TrackId::new("../outside.wav"),
        TrackId::new(absolute.to_string_lossy()),
        TrackId::new("nested/../../outside.wav"),
        TrackId::new(""),
    ] {
        assert!(
            matches!(library.delete_track(&id), Err(StoreError::TrackNotFound(_))),
            "delete of {id} should be rejected"
        );
        let handle = TrackHandle {
            id: id.clone(),
            path: sibling.clone(),
            size_bytes: 0,
        };
        assert!(
            matches!(library.open_track(&handle), Err(StoreError::TrackNotFound(_))),
            "open of {id} should be rejected"
        );
    }

    assert!(sibling.is_file());
    assert!(absolute.is_file());
}
