//! Correlated native calls through the full dispatch path: the server asks a
//! client to run a game function, the client's response packet resolves the
//! pending callback exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use freeroam_server::server::loopback_server;
use freeroam_server::transport::InboundEvent;
use freeroam_shared::codec::{decode_frame, deserialize_payload, encode_frame, PacketType};
use freeroam_shared::config::ServerConfig;
use freeroam_shared::natives::{NativeArgument, NativeValue};
use freeroam_shared::protocol::{NativeCall, NativeResponse, NativeTickCall};

use freeroam_tests::{connect, init_tracing};

const GET_ENTITY_HEALTH: u64 = 0xEEF059FAD016D209;
const SET_WEATHER: u64 = 0x29B487C359E19889;

#[test]
fn request_response_resolves_callback_once() -> anyhow::Result<()> {
    init_tracing();
    let mut server = loopback_server(ServerConfig::default());
    let conn = connect(&mut server, 1, "Steve");
    server.transport_mut().clear_sent();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = fired.clone();
    server.request_native_from(
        conn,
        "health",
        GET_ENTITY_HEALTH,
        NativeArgument::Int(0),
        vec![NativeArgument::LocalPlayer],
        Box::new(move |value| {
            assert_eq!(value, Some(NativeValue::Int(87)));
            fired2.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert_eq!(server.pending_native_calls(), 1);

    // The outbound call carries a correlation token and a return hint.
    let frames = server.transport().frames_for(conn);
    let (ty, payload) = decode_frame(&frames[0].frame).unwrap();
    assert_eq!(ty, PacketType::NativeCall);
    let call: NativeCall = deserialize_payload(payload).unwrap();
    assert_eq!(call.hash, GET_ENTITY_HEALTH);
    assert!(call.return_hint.is_some());
    assert!(!call.correlation_id.is_empty());

    // Client answers through the normal data path.
    let response = NativeResponse {
        id: call.correlation_id.clone(),
        response: Some(NativeArgument::Int(87)),
    };
    server.transport_mut().inject(InboundEvent::Data {
        connection: conn,
        frame: encode_frame(PacketType::NativeResponse, &response),
    });
    server.tick();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(server.pending_native_calls(), 0);

    // A replayed response is discarded.
    server.transport_mut().inject(InboundEvent::Data {
        connection: conn,
        frame: encode_frame(PacketType::NativeResponse, &response),
    });
    server.tick();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn tick_calls_are_recallable_by_name() -> anyhow::Result<()> {
    init_tracing();
    let mut server = loopback_server(ServerConfig::default());
    let steve = connect(&mut server, 1, "Steve");
    let alex = connect(&mut server, 2, "Alex");
    server.transport_mut().clear_sent();

    server.start_tick_native_for_all("weather", SET_WEATHER, vec![NativeArgument::Int(3)]);
    for conn in [steve, alex] {
        let frames = server.transport().frames_for(conn);
        assert_eq!(frames.len(), 1);
        let (ty, payload) = decode_frame(&frames[0].frame).unwrap();
        assert_eq!(ty, PacketType::NativeTick);
        let wrapped: NativeTickCall = deserialize_payload(payload).unwrap();
        assert_eq!(wrapped.identifier, "weather");
        assert_eq!(wrapped.native.as_ref().map(|n| n.hash), Some(SET_WEATHER));
    }

    server.transport_mut().clear_sent();
    server.stop_tick_native_for(steve, "weather");

    let frames = server.transport().frames_for(steve);
    assert_eq!(frames.len(), 1);
    let (ty, payload) = decode_frame(&frames[0].frame).unwrap();
    assert_eq!(ty, PacketType::NativeTickRecall);
    let recall: NativeTickCall = deserialize_payload(payload).unwrap();
    assert_eq!(recall.identifier, "weather");
    assert!(recall.native.is_none());
    assert!(server.transport().frames_for(alex).is_empty());
    Ok(())
}
