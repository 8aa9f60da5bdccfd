mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use xtal_core::api::{
    CancellationToken, FnTask, Manager, ManagerEvent, SequentialBackend, Task, TaskState,
    ThreadedBackend,
};

fn threaded(max: usize) -> Manager {
    init_test_tracing();
    Manager::new(Arc::new(ThreadedBackend::new()), max)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_within_ceiling_all_start_immediately() {
    let mut mgr = threaded(4);
    let mut gates = Vec::new();
    let mut ids = Vec::new();
    for i in 0..4 {
        let (task, gate) = gated(&format!("t{i}"));
        ids.push(mgr.add(task, true).await);
        gates.push(gate);
    }

    assert!(mgr.pending().is_empty());
    assert_eq!(mgr.current_weight(), 4);
    for id in &ids {
        assert_eq!(mgr.state(*id), Some(TaskState::Running));
    }

    for gate in gates {
        gate.send(Ok(())).unwrap();
    }
    pump_until(&mut mgr, |m| m.num_finished() == 4).await;
    assert_eq!(mgr.current_weight(), 0);
    assert!(!mgr.busy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overflowing_task_waits_for_free_weight() {
    let mut mgr = threaded(1);
    let (t1, g1) = gated("t1");
    let (t2, g2) = gated("t2");

    let id1 = mgr.add(t1, true).await;
    let id2 = mgr.add(t2, true).await;
    assert_eq!(mgr.state(id1), Some(TaskState::Running));
    assert_eq!(mgr.state(id2), Some(TaskState::Pending));
    assert_eq!(mgr.pending(), vec![id2]);

    g1.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.state(id2) == Some(TaskState::Running)).await;
    assert_eq!(mgr.state(id1), Some(TaskState::Finished));
    assert_eq!(mgr.current_weight(), 1);

    g2.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 2).await;
    assert_eq!(mgr.current_weight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_slots_three_tasks() {
    let mut mgr = threaded(2);
    let mut rx = mgr.subscribe();
    let (t1, g1) = gated("T1");
    let (t2, g2) = gated("T2");
    let (t3, g3) = gated("T3");

    let id1 = mgr.add(t1, true).await;
    let id2 = mgr.add(t2, true).await;
    let id3 = mgr.add(t3, true).await;

    assert!(mgr.busy());
    assert_eq!(mgr.pending(), vec![id3]);
    assert_eq!(started_ids(&drain(&mut rx)), vec![id1, id2]);

    g1.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.state(id3) == Some(TaskState::Running)).await;
    assert!(mgr.pending().is_empty());

    g2.send(Ok(())).unwrap();
    g3.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 3).await;

    assert!(!mgr.busy());
    assert_eq!(mgr.num_total(), 3);
    let events = drain(&mut rx);
    assert_eq!(started_ids(&events), vec![id3]);
    assert_eq!(busy_transitions(&events), vec![false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_flips_once_each_way() {
    let mut mgr = threaded(2);
    let mut rx = mgr.subscribe();
    let (t1, g1) = gated("a");
    let (t2, g2) = gated("b");
    mgr.add(t1, true).await;
    mgr.add(t2, true).await;

    g1.send(Ok(())).unwrap();
    g2.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 2).await;

    assert_eq!(busy_transitions(&drain(&mut rx)), vec![true, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_a_queued_task_never_starts_it() {
    let mut mgr = threaded(1);
    let mut rx = mgr.subscribe();
    let runs = Arc::new(AtomicUsize::new(0));

    let (t1, g1) = gated("blocker");
    mgr.add(t1, true).await;
    let queued = mgr.add(counted("queued", runs.clone()), true).await;
    assert_eq!(mgr.state(queued), Some(TaskState::Pending));

    mgr.remove(queued).await.unwrap();
    assert_eq!(mgr.state(queued), None);
    assert!(mgr.pending().is_empty());

    g1.send(Ok(())).unwrap();
    mgr.run_until_idle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!started_ids(&drain(&mut rx)).contains(&queued));
    assert_eq!(mgr.num_finished(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_work_yields_exactly_one_terminal_event() {
    let mut mgr = threaded(1);
    let mut rx = mgr.subscribe();
    let task: Arc<dyn Task> = Arc::new(FnTask::new("explodes", |_core, _ctx| async {
        if true {
            panic!("basis set not found");
        }
        Ok(())
    }));

    let id = mgr.add(task, true).await;
    pump_until(&mut mgr, |m| m.num_finished() == 1).await;
    mgr.process_pending_events().await;

    let terminal: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|ev| {
            matches!(
                ev,
                ManagerEvent::TaskComplete { .. } | ManagerEvent::TaskError { .. }
            )
        })
        .collect();
    assert_eq!(
        terminal,
        vec![ManagerEvent::TaskError {
            task_id: id,
            message: "task panicked: basis set not found".into(),
        }]
    );
    assert_eq!(mgr.current_weight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_frees_declared_weight() {
    let mut mgr = threaded(4);
    let mut rx = mgr.subscribe();
    let (task, gate) = gated_weighted("heavy", 3);
    let id = mgr.add(task, true).await;
    assert_eq!(mgr.current_weight(), 3);

    gate.send(Err("geometry exploded".into())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 1).await;

    assert_eq!(mgr.current_weight(), 0);
    assert!(drain(&mut rx).contains(&ManagerEvent::TaskError {
        task_id: id,
        message: "geometry exploded".into(),
    }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lowering_the_ceiling_never_preempts() {
    let mut mgr = threaded(3);
    let mut gates = Vec::new();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let (task, gate) = gated(name);
        ids.push(mgr.add(task, true).await);
        gates.push(gate);
    }

    mgr.set_maximum_concurrency(1).await;
    assert_eq!(mgr.current_weight(), 3);
    for id in &ids {
        assert_eq!(mgr.state(*id), Some(TaskState::Running));
    }

    let (late, late_gate) = gated("late");
    let late_id = mgr.add(late, true).await;
    assert_eq!(mgr.state(late_id), Some(TaskState::Pending));

    let mut gates = gates.into_iter();
    for finished in 1..=2 {
        gates.next().unwrap().send(Ok(())).unwrap();
        pump_until(&mut mgr, |m| m.num_finished() == finished).await;
        assert_eq!(mgr.state(late_id), Some(TaskState::Pending));
    }

    gates.next().unwrap().send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.state(late_id) == Some(TaskState::Running)).await;
    assert_eq!(mgr.current_weight(), 1);

    late_gate.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 4).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heavy_queue_head_blocks_lighter_tasks_behind_it() {
    let mut mgr = threaded(3);
    let (running, g_running) = gated_weighted("running", 2);
    let (heavy, g_heavy) = gated_weighted("heavy", 3);
    let (light, g_light) = gated_weighted("light", 1);

    mgr.add(running, true).await;
    let heavy_id = mgr.add(heavy, true).await;
    let light_id = mgr.add(light, false).await;

    // One unit is free and `light` would fit, but `heavy` is ahead of it.
    mgr.start_next_task().await;
    assert_eq!(mgr.pending(), vec![heavy_id, light_id]);
    assert_eq!(mgr.current_weight(), 2);

    g_running.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.state(heavy_id) == Some(TaskState::Running)).await;
    assert_eq!(mgr.state(light_id), Some(TaskState::Pending));

    g_heavy.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.state(light_id) == Some(TaskState::Running)).await;

    g_light.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 3).await;
    assert_eq!(mgr.current_weight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_a_running_task_frees_weight_and_stops_it() {
    let mut mgr = threaded(1);
    let mut rx = mgr.subscribe();
    let (t1, _g1) = gated("victim");
    let (t2, g2) = gated("next");

    let id1 = mgr.add(t1.clone(), true).await;
    let id2 = mgr.add(t2, true).await;
    assert_eq!(mgr.state(id2), Some(TaskState::Pending));

    mgr.remove(id1).await.unwrap();
    assert!(t1.core().is_canceled());
    assert_eq!(mgr.state(id2), Some(TaskState::Running));
    assert_eq!(mgr.current_weight(), 1);

    g2.send(Ok(())).unwrap();
    pump_until(&mut mgr, |m| m.num_finished() == 1).await;
    assert_eq!(mgr.current_weight(), 0);

    // The victim's own terminal event arrives for a removed id and is ignored.
    let events = drain(&mut rx);
    assert!(events.contains(&ManagerEvent::TaskRemoved { task_id: id1 }));
    assert!(!events.iter().any(|ev| matches!(
        ev,
        ManagerEvent::TaskError { task_id, .. } if *task_id == id1
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_task_still_reaches_a_terminal_event() {
    let mut mgr = threaded(2);
    let mut rx = mgr.subscribe();
    let (task, _gate) = gated("long");
    let id = mgr.add(task.clone(), true).await;

    task.stop();
    pump_until(&mut mgr, |m| m.num_finished() == 1).await;

    let events: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|ev| {
            matches!(
                ev,
                ManagerEvent::TaskStopped { .. }
                    | ManagerEvent::TaskCanceled { .. }
                    | ManagerEvent::TaskError { .. }
            )
        })
        .collect();
    assert_eq!(
        events,
        vec![
            ManagerEvent::TaskStopped { task_id: id },
            ManagerEvent::TaskCanceled { task_id: id },
            ManagerEvent::TaskError {
                task_id: id,
                message: "stopped".into()
            },
        ]
    );
}

#[tokio::test]
async fn sequential_backend_drains_queue_in_order() {
    init_test_tracing();
    let mut mgr = Manager::new(Arc::new(SequentialBackend::new()), 2);
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c", "d", "e"] {
        let log = log.clone();
        let task: Arc<dyn Task> = Arc::new(FnTask::new(name, move |core, ctx| async move {
            ctx.report(100);
            log.lock().unwrap().push(core.name());
            Ok(())
        }));
        mgr.add(task, true).await;
    }
    assert_eq!(mgr.pending().len(), 3);

    mgr.run_until_idle().await;

    assert_eq!(mgr.num_finished(), 5);
    assert!(!mgr.busy());
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn progress_is_forwarded_to_listeners() {
    let mut mgr = Manager::new(Arc::new(SequentialBackend::new()), 1);
    let mut rx = mgr.subscribe();
    let task: Arc<dyn Task> = Arc::new(FnTask::new("report", |_core, ctx| async move {
        ctx.report(40);
        ctx.report_text("iteration 7");
        Ok(())
    }));

    let id = mgr.add(task, true).await;
    mgr.run_until_idle().await;

    let events = drain(&mut rx);
    assert!(events.contains(&ManagerEvent::TaskProgress {
        task_id: id,
        percent: 40
    }));
    assert!(events.contains(&ManagerEvent::TaskProgressText {
        task_id: id,
        text: "iteration 7".into()
    }));
}

#[tokio::test]
async fn dropped_inline_run_still_frees_its_weight() {
    init_test_tracing();
    let mut mgr = Manager::new(Arc::new(SequentialBackend::new()), 1);
    let (task, _gate) = gated("inline");

    // The sequential backend runs the work inside `add`; give up on it part way.
    let added = tokio::time::timeout(Duration::from_millis(200), mgr.add(task.clone(), true)).await;
    assert!(added.is_err());
    assert!(mgr.busy());

    task.stop();
    tokio::time::timeout(PUMP_TIMEOUT, mgr.run_until_idle())
        .await
        .expect("manager settled after the dropped run");

    assert!(!mgr.busy());
    assert_eq!(mgr.current_weight(), 0);
    assert_eq!(mgr.num_finished(), 1);
    assert!(task.core().is_finished());
    assert_eq!(task.core().error_message(), "task aborted before its work settled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_pump_returns_without_dropping_tasks() {
    let mut mgr = threaded(1);
    let (first, _first_gate) = gated("first");
    let (second, _second_gate) = gated("second");
    let first_id = mgr.add(first.clone(), true).await;
    let second_id = mgr.add(second, true).await;

    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let idle = tokio::time::timeout(PUMP_TIMEOUT, mgr.run_until_idle_or(&interrupt))
        .await
        .expect("pump observed the interrupt");
    assert!(!idle);
    assert_eq!(mgr.state(first_id), Some(TaskState::Running));
    assert_eq!(mgr.pending(), vec![second_id]);

    mgr.remove(second_id).await.unwrap();
    first.stop();
    mgr.run_until_idle().await;

    assert!(!mgr.busy());
    assert_eq!(mgr.num_finished(), 1);
    assert_eq!(first.core().error_message(), "stopped");
}
