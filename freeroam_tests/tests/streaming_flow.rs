//! Content delivery scenarios: the world snapshot, declared resource files,
//! and the client script bundle are streamed chunk-by-chunk after the client
//! confirms its connection, never before.

use freeroam_server::server::GameServer;
use freeroam_server::transport::{ConnectionId, Delivery, InboundEvent, LoopbackTransport};
use freeroam_shared::codec::{decode_frame, deserialize_payload, PacketType};
use freeroam_shared::config::ServerConfig;
use freeroam_shared::protocol::{
    ClientScriptBundle, FileTransferChunk, FileTransferRequest, WorldSnapshot,
};

use freeroam_tests::{connect, connect_and_confirm, init_tracing, new_log, write_resource, RecordingHost};

fn server_with_resource() -> (GameServer<LoopbackTransport>, tempfile::TempDir) {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write_resource(
        tmp.path(),
        "race1",
        r#"{
            "scripts": [ { "path": "client.js", "kind": "js", "side": "client" } ],
            "files": [ { "path": "track.dat" } ]
        }"#,
        &[
            ("client.js", b"game.onEnter(() => {});" as &[u8]),
            ("track.dat", &[0xABu8; 64]),
        ],
    );

    let mut cfg = ServerConfig::default();
    cfg.resources_dir = tmp.path().to_string_lossy().into_owned();
    let mut server = GameServer::new(
        cfg,
        LoopbackTransport::new(),
        Box::new(RecordingHost {
            log: new_log(),
            veto_chat: false,
        }),
        Box::new(freeroam_server::announce::LogAnnouncer),
    );
    server.start_resource("race1").unwrap();
    (server, tmp)
}

/// Decoded transfer stream for one connection: (packet type, request meta).
fn transfer_log(
    transport: &LoopbackTransport,
    connection: ConnectionId,
) -> Vec<(PacketType, Option<FileTransferRequest>)> {
    transport
        .frames_for(connection)
        .iter()
        .filter_map(|f| {
            let (ty, payload) = decode_frame(&f.frame)?;
            match ty {
                PacketType::FileTransferRequest => {
                    Some((ty, deserialize_payload::<FileTransferRequest>(payload)))
                }
                PacketType::FileTransferTick | PacketType::FileTransferComplete => {
                    Some((ty, None))
                }
                _ => None,
            }
        })
        .collect()
}

#[test]
fn nothing_streams_before_connection_confirmed() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    connect(&mut server, 1, "Steve");
    for _ in 0..5 {
        server.tick();
    }
    assert!(transfer_log(server.transport(), ConnectionId(1)).is_empty());
    assert!(!server.streaming().has_pending(ConnectionId(1)));
    Ok(())
}

#[test]
fn confirmed_client_receives_snapshot_files_and_scripts_in_order() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    // A vehicle so the snapshot is non-trivial.
    server.entities_mut().create(
        freeroam_server::entity::EntityKind::Vehicle(freeroam_server::entity::VehicleProps {
            model: 0x6B13F8,
            primary_color: 0,
            secondary_color: 0,
            health: 1000,
        }),
        freeroam_shared::math::Vec3::new(1.0, 2.0, 3.0),
        freeroam_shared::math::Vec3::ZERO,
    );

    let conn = connect_and_confirm(&mut server, 1, "Steve");
    assert_eq!(server.streaming().pending_jobs(conn), 3);

    // Small payloads fit one chunk: each job drains in one tick.
    for _ in 0..3 {
        server.tick();
    }
    assert!(!server.streaming().has_pending(conn));

    let log = transfer_log(server.transport(), conn);
    let requests: Vec<&FileTransferRequest> = log
        .iter()
        .filter_map(|(_, r)| r.as_ref())
        .collect();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].name, "world");
    assert_eq!(requests[1].resource, "race1");
    assert_eq!(requests[1].name, "track.dat");
    assert_eq!(requests[1].length, 64);
    assert_eq!(requests[2].name, "scripts");

    // Each request is followed by its chunk and completion.
    let types: Vec<PacketType> = log.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        types,
        vec![
            PacketType::FileTransferRequest,
            PacketType::FileTransferTick,
            PacketType::FileTransferComplete,
            PacketType::FileTransferRequest,
            PacketType::FileTransferTick,
            PacketType::FileTransferComplete,
            PacketType::FileTransferRequest,
            PacketType::FileTransferTick,
            PacketType::FileTransferComplete,
        ]
    );

    // All transfer frames ride the reliable ordered lane.
    for frame in server.transport().frames_for(conn) {
        if matches!(
            decode_frame(&frame.frame).map(|(t, _)| t),
            Some(
                PacketType::FileTransferRequest
                    | PacketType::FileTransferTick
                    | PacketType::FileTransferComplete
            )
        ) {
            assert_eq!(frame.delivery, Delivery::ReliableOrdered);
        }
    }
    Ok(())
}

#[test]
fn streamed_snapshot_and_bundle_decode() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    server.entities_mut().create(
        freeroam_server::entity::EntityKind::Vehicle(freeroam_server::entity::VehicleProps {
            model: 0x6B13F8,
            primary_color: 2,
            secondary_color: 4,
            health: 1000,
        }),
        freeroam_shared::math::Vec3::new(5.0, 0.0, 0.0),
        freeroam_shared::math::Vec3::ZERO,
    );

    let conn = connect_and_confirm(&mut server, 1, "Steve");
    for _ in 0..3 {
        server.tick();
    }

    // Reassemble each transfer's chunks by id.
    let mut bodies: std::collections::HashMap<i32, Vec<u8>> = Default::default();
    let mut names: std::collections::HashMap<i32, String> = Default::default();
    for frame in server.transport().frames_for(conn) {
        let Some((ty, payload)) = decode_frame(&frame.frame) else {
            continue;
        };
        match ty {
            PacketType::FileTransferRequest => {
                let req: FileTransferRequest = deserialize_payload(payload).unwrap();
                names.insert(req.id, req.name);
            }
            PacketType::FileTransferTick => {
                let chunk: FileTransferChunk = deserialize_payload(payload).unwrap();
                bodies.entry(chunk.id).or_default().extend(chunk.data);
            }
            _ => {}
        }
    }

    let world_id = *names.iter().find(|(_, n)| *n == "world").unwrap().0;
    let snapshot: WorldSnapshot = deserialize_payload(&bodies[&world_id]).unwrap();
    assert_eq!(snapshot.vehicles.len(), 1);

    let scripts_id = *names.iter().find(|(_, n)| *n == "scripts").unwrap().0;
    let bundle: ClientScriptBundle = deserialize_payload(&bodies[&scripts_id]).unwrap();
    assert_eq!(bundle.scripts.len(), 1);
    assert_eq!(bundle.scripts[0].resource, "race1");
    assert!(bundle.scripts[0].source.contains("onEnter"));
    Ok(())
}

#[test]
fn congested_channel_pauses_and_resumes() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    let conn = connect_and_confirm(&mut server, 1, "Steve");
    let channel = server.sessions().channel_for(conn).unwrap();
    server.transport_mut().clear_sent();

    server.transport_mut().set_congested(conn, channel, true);
    for _ in 0..3 {
        server.tick();
    }
    assert!(transfer_log(server.transport(), conn).is_empty());
    assert_eq!(server.streaming().pending_jobs(conn), 3);

    server.transport_mut().set_congested(conn, channel, false);
    for _ in 0..3 {
        server.tick();
    }
    assert!(!server.streaming().has_pending(conn));
    Ok(())
}

#[test]
fn disconnect_discards_pending_streams() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    let conn = connect_and_confirm(&mut server, 1, "Steve");
    assert!(server.streaming().has_pending(conn));

    server.transport_mut().inject(InboundEvent::StatusChanged {
        connection: conn,
        status: freeroam_server::transport::ConnectionStatus::Disconnected,
        reason: "gone".into(),
    });
    server.tick(); // removal
    server.tick(); // advance sees the missing session and drops the queue
    assert!(!server.streaming().has_pending(conn));
    Ok(())
}

#[test]
fn stop_resource_broadcasts_and_unstages_scripts() -> anyhow::Result<()> {
    let (mut server, _tmp) = server_with_resource();
    let conn = connect(&mut server, 1, "Steve");
    server.transport_mut().clear_sent();

    assert!(server.stop_resource("race1"));
    let frames = server.transport().frames_for(conn);
    assert_eq!(frames.len(), 1);
    let (ty, payload) = decode_frame(&frames[0].frame).unwrap();
    assert_eq!(ty, PacketType::StopResource);
    let notice: freeroam_shared::protocol::StopResourceNotice =
        deserialize_payload(payload).unwrap();
    assert_eq!(notice.resource, "race1");
    assert!(server.resources().client_bundle().scripts.is_empty());
    Ok(())
}
