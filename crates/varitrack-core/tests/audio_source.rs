use tempfile::tempdir;
use varitrack_core::{
    AudioSource, ChannelLayout, SourceError, TrackId, fixtures::write_tone_wav,
};

#[test]
fn decodes_stereo_wav_metadata() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("stereo.wav");
    write_tone_wav(&path, 8_000, 2, 0.5).expect("fixture wav should be writable");

    let source = AudioSource::open(&path).expect("wav should decode");
    assert_eq!(source.id(), &TrackId::new("stereo.wav"));
    assert_eq!(source.sample_rate(), 8_000);
    assert_eq!(source.layout(), ChannelLayout::Stereo);
    assert_eq!(source.frame_length(), 4_000);
    assert!((source.duration_seconds() - 0.5).abs() < 1e-9);
    assert!(source.sample(10, 0).abs() > 0.0);
    assert!((source.sample(10, 0) - source.sample(10, 1)).abs() < f32::EPSILON);
}

#[test]
fn clones_share_the_decoded_asset() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("mono.wav");
    write_tone_wav(&path, 22_050, 1, 0.25).expect("fixture wav should be writable");

    let source = AudioSource::open(&path).expect("wav should decode");
    let clone = source.clone();
    assert!(source.same_asset(&clone));

    let reopened = AudioSource::open(&path).expect("wav should decode again");
    assert!(!source.same_asset(&reopened));
    assert_eq!(source.frame_length(), reopened.frame_length());
}

#[test]
fn garbage_bytes_are_unreadable() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("broken.wav");
    std::fs::write(&path, b"definitely not a riff header").expect("garbage should be writable");

    let error = AudioSource::open(&path).expect_err("garbage should not decode");
    let SourceError::UnreadableAudioFormat { path: reported, .. } = error;
    assert_eq!(reported, path);
}

#[test]
fn missing_file_is_unreadable() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("missing.wav");

    assert!(matches!(
        AudioSource::open(&path),
        Err(SourceError::UnreadableAudioFormat { .. })
    ));
}

#[test]
fn surround_files_are_rejected() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("quad.wav");
    write_tone_wav(&path, 8_000, 4, 0.1).expect("fixture wav should be writable");

    let error = AudioSource::open(&path).expect_err("four channels should be rejected");
    assert!(error.to_string().contains("quad.wav"));
}
