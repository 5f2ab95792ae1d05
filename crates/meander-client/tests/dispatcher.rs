//! Dispatcher behavior against a scripted peer on a socket pair.

use std::os::unix::net::UnixStream;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use meander_client::Dispatcher;
use meander_proto::{
    frame, GlobalMode, GridSize, Message, MoveProbs, MsgType, SimState, SnapshotBegin,
    SnapshotChunk, SnapshotField, Status, WorldKind,
};

fn sample_status(current_rep: u32) -> Status {
    Status {
        sim_state: SimState::Running,
        world_kind: WorldKind::Wrap,
        size: GridSize::new(4, 4),
        probs: MoveProbs::UNIFORM,
        k_max_steps: 10,
        total_reps: 100,
        current_rep,
        mode: GlobalMode::Summary,
        multi_user: false,
        client_count: 1,
        owner_pid: 42,
    }
}

/// Peer that answers STOP_SIM with ACK and QUERY_STATUS with STATUS.
fn scripted_peer(stream: UnixStream, requests: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for _ in 0..requests {
            match frame::recv_msg(&stream).unwrap() {
                Message::StopSim { .. } => frame::send_msg(
                    &stream,
                    &Message::Ack {
                        request_type: MsgType::StopSim,
                        status: 0,
                    },
                )
                .unwrap(),
                Message::QueryStatus { .. } => {
                    frame::send_msg(&stream, &Message::Status(sample_status(7))).unwrap()
                }
                other => panic!("peer got unexpected {other:?}"),
            }
        }
    })
}

#[test]
fn concurrent_requests_serialize_and_match_their_expected_sets() {
    let (client_side, server_side) = UnixStream::pair().unwrap();
    let peer = scripted_peer(server_side, 2);
    let dispatcher = Arc::new(Dispatcher::start(client_side).unwrap());

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();

    {
        let dispatcher = Arc::clone(&dispatcher);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let reply = dispatcher
                .send_and_wait(
                    &Message::StopSim { pid: 1 },
                    &[MsgType::Ack, MsgType::Error],
                    Some(Duration::from_secs(5)),
                )
                .unwrap();
            assert!(matches!(
                reply,
                Message::Ack {
                    request_type: MsgType::StopSim,
                    status: 0
                }
            ));
        }));
    }
    {
        let dispatcher = Arc::clone(&dispatcher);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let reply = dispatcher
                .send_and_wait(
                    &Message::QueryStatus { pid: 1 },
                    &[MsgType::Status, MsgType::Error],
                    Some(Duration::from_secs(5)),
                )
                .unwrap();
            match reply {
                Message::Status(status) => assert_eq!(status.current_rep, 7),
                other => panic!("wrong reply {other:?}"),
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    peer.join().unwrap();
}

#[test]
fn async_notifications_never_satisfy_a_wait() {
    let (client_side, server_side) = UnixStream::pair().unwrap();
    let peer = thread::spawn(move || {
        // One request arrives; bury the reply under async noise.
        let request = frame::recv_msg(&server_side).unwrap();
        assert!(matches!(request, Message::StopSim { .. }));
        for rep in 1..=5 {
            frame::send_msg(
                &server_side,
                &Message::Progress {
                    current_rep: rep,
                    total_reps: 5,
                },
            )
            .unwrap();
        }
        frame::send_msg(
            &server_side,
            &Message::GlobalModeChanged {
                mode: GlobalMode::Interactive,
                changed_by_pid: 9,
            },
        )
        .unwrap();
        frame::send_msg(
            &server_side,
            &Message::Ack {
                request_type: MsgType::StopSim,
                status: 0,
            },
        )
        .unwrap();
        server_side
    });

    let dispatcher = Dispatcher::start(client_side).unwrap();
    let reply = dispatcher
        .send_and_wait(
            &Message::StopSim { pid: 1 },
            &[MsgType::Ack, MsgType::Error],
            Some(Duration::from_secs(5)),
        )
        .unwrap();
    assert!(matches!(reply, Message::Ack { .. }));
    drop(peer.join().unwrap());
}

#[test]
fn timeout_leaves_the_dispatcher_usable() {
    let (client_side, server_side) = UnixStream::pair().unwrap();
    let dispatcher = Dispatcher::start(client_side).unwrap();

    let err = dispatcher
        .send_and_wait(
            &Message::StopSim { pid: 1 },
            &[MsgType::Ack],
            Some(Duration::from_millis(50)),
        )
        .unwrap_err();
    assert!(matches!(err, meander_client::ClientError::Timeout));

    // The peer now answers both the stale stop request and a fresh
    // status query. The stale ACK arrives while STATUS is expected and
    // is dropped; the STATUS reply is latched.
    let peer = scripted_peer(server_side, 2);
    let reply = dispatcher
        .send_and_wait(
            &Message::QueryStatus { pid: 1 },
            &[MsgType::Status, MsgType::Error],
            Some(Duration::from_secs(5)),
        )
        .unwrap();
    assert!(matches!(reply, Message::Status(_)));
    peer.join().unwrap();
}

#[test]
fn snapshot_stream_assembles_through_the_reader() {
    let (client_side, server_side) = UnixStream::pair().unwrap();
    let dispatcher = Dispatcher::start(client_side).unwrap();

    let peer = thread::spawn(move || {
        let begin = SnapshotBegin {
            snapshot_id: 3,
            size: GridSize::new(2, 2),
            world_kind: WorldKind::Obstacles,
            cell_count: 4,
            included_fields: SnapshotField::Obstacles.bit() | SnapshotField::Trials.bit(),
        };
        frame::send_msg(&server_side, &Message::SnapshotBegin(begin)).unwrap();
        frame::send_msg(
            &server_side,
            &Message::SnapshotChunk(SnapshotChunk {
                snapshot_id: 3,
                field: SnapshotField::Obstacles.wire(),
                offset_bytes: 0,
                data: vec![0, 1, 1, 0],
            }),
        )
        .unwrap();
        let trials: Vec<u8> = [5u32, 6, 7, 8].iter().flat_map(|v| v.to_le_bytes()).collect();
        frame::send_msg(
            &server_side,
            &Message::SnapshotChunk(SnapshotChunk {
                snapshot_id: 3,
                field: SnapshotField::Trials.wire(),
                offset_bytes: 0,
                data: trials,
            }),
        )
        .unwrap();
        frame::send_msg(&server_side, &Message::SnapshotEnd).unwrap();
        server_side
    });

    let data = dispatcher
        .wait_for_snapshot(Duration::from_secs(5))
        .unwrap();
    assert_eq!(data.snapshot_id, 3);
    assert_eq!(data.obstacles, Some(vec![0, 1, 1, 0]));
    assert_eq!(data.trials, Some(vec![5, 6, 7, 8]));
    assert!(data.sum_steps.is_none());
    assert!(data.successes.is_none());
    drop(peer.join().unwrap());
}

#[test]
fn peer_disconnect_wakes_a_waiting_caller() {
    let (client_side, server_side) = UnixStream::pair().unwrap();
    let dispatcher = Arc::new(Dispatcher::start(client_side).unwrap());

    let waiter = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            dispatcher.send_and_wait(
                &Message::StopSim { pid: 1 },
                &[MsgType::Ack],
                None, // wait forever; the disconnect must wake us
            )
        })
    };

    thread::sleep(Duration::from_millis(100));
    drop(server_side);

    let result = waiter.join().unwrap();
    assert!(matches!(
        result,
        Err(meander_client::ClientError::Disconnected)
    ));
}
