//! End-to-end dispatch scenarios against a running driver, with worker
//! nodes simulated over the blocking transport.

use {
    std::{
        io::{Read, Write},
        net::{SocketAddr, TcpStream},
        thread,
        time::Duration,
    },
    taskgrid_dispatch::{JobStatus, SubmissionStatus, TaskCompletion},
    taskgrid_driver::{Driver, DriverConfig, DriverHandle, NodeSelector},
    taskgrid_net::{BlockingTransport, NetConfig},
    taskgrid_protocol::{
        header::PARAM_BUNDLE_ID, CommandOutcome, JobSla, TaskGraph, TaskOutcome, TaskReturn,
        WireMessage,
    },
    uuid::Uuid,
};

const MAX_MESSAGE: usize = 1_048_576;

fn test_config() -> DriverConfig {
    DriverConfig {
        net: NetConfig::dev_default(),
        max_tasks_per_bundle: 4,
        max_nodes: 10,
        node_timeout_secs: 30,
        dispatch_expiration_ms: Some(10_000),
        command_timeout_ms: 2_000,
    }
}

async fn start_driver() -> DriverHandle {
    Driver::new(test_config()).start().await.unwrap()
}

/// Perform the raw control-value handshake and identify as a node.
fn connect_node(addr: SocketAddr, node_uuid: Uuid) -> BlockingTransport {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(&7777u32.to_le_bytes()).unwrap();
    let mut control = [0u8; 4];
    stream.read_exact(&mut control).unwrap();
    let mut transport = BlockingTransport::from_stream(stream, MAX_MESSAGE);
    transport
        .send(&WireMessage::Hello {
            node_uuid,
            control_port: 7777,
            max_tasks: 8,
        })
        .unwrap();
    transport
}

/// Answer one `JobDispatch` with a success result per task.
fn answer_dispatch(transport: &mut BlockingTransport) -> Vec<u32> {
    let message = transport.receive(Some(Duration::from_secs(5))).unwrap();
    let WireMessage::JobDispatch { header, tasks } = message else {
        panic!("expected JobDispatch, got {}", message.kind());
    };
    let bundle_id: u64 = header
        .parameter(PARAM_BUNDLE_ID)
        .expect("bundle id parameter")
        .parse()
        .unwrap();
    assert_eq!(header.task_count, tasks.len(), "header must match task set");
    let positions: Vec<u32> = tasks.iter().map(|t| t.position).collect();
    let results = tasks
        .iter()
        .map(|t| TaskReturn {
            position: t.position,
            outcome: TaskOutcome::Success(vec![t.position as u8]),
        })
        .collect();
    transport
        .send(&WireMessage::JobResults {
            bundle_id,
            job_uuid: header.job_uuid,
            results,
        })
        .unwrap();
    positions
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependency_job_runs_to_completion() {
    let handle = start_driver().await;
    let addr = handle.local_addr;

    // Node thread: answer two dispatches, report what each contained.
    let (tx, rx) = std::sync::mpsc::channel();
    let node = thread::spawn(move || {
        let mut transport = connect_node(addr, Uuid::new_v4());
        for _ in 0..2 {
            let positions = answer_dispatch(&mut transport);
            tx.send(positions).unwrap();
        }
        transport
    });

    // Three tasks; task 2 depends on task 1.
    let graph = TaskGraph::new(&[(0, vec![]), (1, vec![]), (2, vec![1])]).unwrap();
    let job = handle
        .dispatcher
        .submit_job("chain", JobSla::default(), vec![vec![0], vec![1], vec![2]], Some(graph))
        .unwrap();

    {
        let job = job.clone();
        wait_until(move || job.status() == JobStatus::Complete).await;
    }
    let node_transport = node.join().unwrap();
    drop(node_transport);

    // The gated task travelled in the second bundle only.
    assert_eq!(rx.recv().unwrap(), vec![0, 1]);
    assert_eq!(rx.recv().unwrap(), vec![2]);

    assert_eq!(job.submission_status(), SubmissionStatus::Ended);
    let results = job.results();
    assert_eq!(results.len(), 3);
    for (i, (position, outcome)) in results.iter().enumerate() {
        assert_eq!(*position, i as u32);
        assert_eq!(*outcome, TaskCompletion::Success(vec![i as u8]));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_disconnect_resubmits_bundle() {
    let handle = start_driver().await;
    let addr = handle.local_addr;
    let dispatcher = handle.dispatcher.clone();

    // First node takes the dispatch and dies without answering.
    let deserter = thread::spawn(move || {
        let mut transport = connect_node(addr, Uuid::new_v4());
        let message = transport.receive(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(message.kind(), "job_dispatch");
        transport.close();
    });

    let job = handle
        .dispatcher
        .submit_job(
            "resilient",
            JobSla::default(),
            (0..4).map(|i| vec![i as u8]).collect(),
            None,
        )
        .unwrap();

    deserter.join().unwrap();

    // The lost bundle's tasks return to the queue; the job stays alive.
    {
        let job = job.clone();
        wait_until(move || job.queued_task_count() == 4).await;
    }
    assert_ne!(job.status(), JobStatus::Complete);
    assert!(dispatcher.metrics().bundles_resubmitted.get() >= 1);

    // A second node picks the work up and finishes it.
    let worker = thread::spawn(move || {
        let mut transport = connect_node(addr, Uuid::new_v4());
        answer_dispatch(&mut transport);
        transport
    });
    {
        let job = job.clone();
        wait_until(move || job.status() == JobStatus::Complete).await;
    }
    drop(worker.join().unwrap());
    assert_eq!(job.submission_status(), SubmissionStatus::Ended);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_management_cancel_semantics() {
    let handle = start_driver().await;

    // A suspended job is never dispatched and can be cancelled.
    let sla = JobSla {
        suspended: true,
        ..JobSla::default()
    };
    let job = handle
        .dispatcher
        .submit_job("held", sla, vec![vec![1], vec![2]], None)
        .unwrap();

    assert!(handle.management.cancel_job(&job.uuid()));
    assert_eq!(job.status(), JobStatus::Cancelled);
    // Repeat and unknown cancels are no-ops, not errors.
    assert!(!handle.management.cancel_job(&job.uuid()));
    assert!(!handle.management.cancel_job(&Uuid::new_v4()));

    let info = handle.management.job_info(&job.uuid()).unwrap();
    assert_eq!(info.status, JobStatus::Cancelled);
    assert_eq!(info.queued_tasks, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forward_command_result_or_error_map() {
    let handle = start_driver().await;
    let addr = handle.local_addr;
    let node_uuid = Uuid::new_v4();

    // Node thread: answer one forwarded command by echoing it reversed.
    let node = thread::spawn(move || {
        let mut transport = connect_node(addr, node_uuid);
        let message = transport.receive(Some(Duration::from_secs(5))).unwrap();
        let WireMessage::Command {
            command_id,
            payload,
        } = message
        else {
            panic!("expected Command, got {}", message.kind());
        };
        let reversed: Vec<u8> = payload.into_iter().rev().collect();
        transport
            .send(&WireMessage::CommandResponse {
                command_id,
                outcome: CommandOutcome::Success(reversed),
            })
            .unwrap();
        transport
    });

    // Wait for the node to register before forwarding.
    {
        let management = handle.management.clone();
        wait_until(move || !management.list_nodes().is_empty()).await;
    }

    let ghost = Uuid::new_v4();
    let results = handle
        .management
        .forward_command(NodeSelector::Nodes(vec![node_uuid, ghost]), vec![1, 2, 3])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results.get(&node_uuid).unwrap().as_ref().unwrap(), &vec![3, 2, 1]);
    assert!(results.get(&ghost).unwrap().is_err());

    drop(node.join().unwrap());
}
