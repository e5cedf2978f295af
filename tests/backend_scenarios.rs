// Stream lifecycle scenarios against the null backend

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use jukebox_audio::{
    backend::{
        Backend, BackendId, BackendMsg, CallbackParam, DeviceState, Dispatcher,
        MessageKind, NullBackend, SignalResolver, StreamCallback, StreamId,
    },
    config::BackendConfig,
    error::BackendError,
};

fn null_backend() -> NullBackend {
    NullBackend::new(&BackendConfig::null(), Arc::new(SignalResolver::new()))
}

fn recording_callback() -> (StreamCallback, Arc<Mutex<Vec<MessageKind>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: StreamCallback = Box::new(move |param: &mut CallbackParam<'_>| {
        sink.lock().push(param.msg.kind());
    });
    (callback, log)
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_registry_tracks_live_streams() {
    let backend = null_backend();
    assert!(backend.all_streams().is_empty());

    let a = backend
        .create_stream("silence:100000", 0, recording_callback().0, None)
        .unwrap();
    let b = backend
        .create_stream("tone:440:100000", 0, recording_callback().0, None)
        .unwrap();

    let mut ids: Vec<StreamId> = backend.all_streams().iter().map(|h| h.id()).collect();
    ids.sort_by_key(|id| id.to_string());
    let mut expected = vec![a.id(), b.id()];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(ids, expected);

    // a failed creation never shows up
    let (callback, log) = recording_callback();
    let err = backend.create_stream("tone:abc:10", 0, callback, None).unwrap_err();
    assert!(matches!(err, BackendError::InvalidLocator { .. }));
    assert_eq!(backend.all_streams().len(), 2);
    assert_eq!(
        *log.lock(),
        vec![MessageKind::Create, MessageKind::DestroyUserdata]
    );

    a.destroy();
    let remaining = backend.all_streams();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), b.id());
    assert_eq!(remaining[0].backend_id(), BackendId::Null);
    assert_eq!(remaining[0].locator(), "tone:440:100000");

    drop(b);
    assert!(backend.all_streams().is_empty());
}

#[test]
fn test_device_lifecycle() {
    let config = BackendConfig {
        realtime: true,
        ..BackendConfig::null()
    };
    let backend = NullBackend::new(&config, Arc::new(SignalResolver::new()));
    assert_eq!(backend.device_state(), DeviceState::Closed);

    // opening only happens through stream creation
    assert!(matches!(
        backend.set_device_state(DeviceState::Playing),
        Err(BackendError::InvalidTransition { .. })
    ));

    let (callback, log) = recording_callback();
    let stream = backend
        .create_stream("silence:100000", 0, callback, None)
        .unwrap();
    assert_eq!(backend.device_state(), DeviceState::Playing);

    backend.set_device_state(DeviceState::Paused).unwrap();
    backend.set_device_state(DeviceState::Paused).unwrap();
    assert_eq!(backend.device_state(), DeviceState::Paused);
    backend.set_device_state(DeviceState::Playing).unwrap();

    assert!(matches!(
        backend.set_device_state(DeviceState::Closed),
        Err(BackendError::StreamsActive(1))
    ));

    stream.destroy();
    backend.set_device_state(DeviceState::Closed).unwrap();
    assert_eq!(backend.device_state(), DeviceState::Closed);

    let log = log.lock();
    assert_eq!(log.first(), Some(&MessageKind::Create));
    assert_eq!(log.last(), Some(&MessageKind::DestroyUserdata));
    assert!(!log.contains(&MessageKind::EndOfStream));
}

#[test]
fn test_message_order_of_finished_stream() {
    let backend = null_backend();
    let (callback, log) = recording_callback();

    let stream = backend
        .create_stream("video+tone:1000:250", 0, callback, None)
        .unwrap();
    assert!(wait_for(|| stream.has_ended()));
    assert_eq!(stream.contract_violations(), 0);
    drop(stream);

    let log = log.lock();
    assert_eq!(log[0], MessageKind::Create);
    assert_eq!(log[1], MessageKind::VideoDetected);
    assert_eq!(
        log.iter().filter(|k| **k == MessageKind::VideoDetected).count(),
        1
    );

    let end = log
        .iter()
        .position(|k| *k == MessageKind::EndOfStream)
        .unwrap();
    assert!(log[2..end].iter().all(|k| *k == MessageKind::Dsp));
    assert_eq!(&log[end + 1..], &[MessageKind::DestroyUserdata]);
}

#[test]
fn test_seek_moves_elapsed_time() {
    let backend = null_backend();
    let stream = backend
        .create_stream("tone:440:5000", 4000, recording_callback().0, None)
        .unwrap();

    assert!(wait_for(|| stream.has_ended()));
    assert_eq!(stream.time(), (5000, 5000));
}

#[test]
fn test_dsp_after_end_is_rejected() {
    let (callback, log) = recording_callback();
    let mut dispatcher = Dispatcher::new(BackendId::Null, StreamId::new(), callback, None);

    let mut data = vec![0.0f32; 8];
    assert!(dispatcher.send(BackendMsg::Create));
    assert!(dispatcher.send(BackendMsg::Dsp { buffer: &mut data }));
    assert!(dispatcher.send(BackendMsg::EndOfStream));
    assert!(!dispatcher.send(BackendMsg::Dsp { buffer: &mut data }));
    assert!(!dispatcher.send(BackendMsg::Create));

    assert!(dispatcher.has_ended());
    assert_eq!(dispatcher.violations(), 2);
    assert_eq!(
        *log.lock(),
        vec![MessageKind::Create, MessageKind::Dsp, MessageKind::EndOfStream]
    );
}
