//! End-to-end scenarios, scaled to milliseconds.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use taskforge::{Control, Hooks, Link, State, Task};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Lets `RUST_LOG` surface executor debug/warn traces when a scenario fails.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn two_link_chain_runs_in_order_then_finishes() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first_log = log.clone();
    let first = Link::new(Box::new(move || {
        first_log.lock().unwrap().push("hello,".to_string());
        Control::Immediate
    }))
    .with_duration(ms(40));

    let second_log = log.clone();
    let second = Link::new(Box::new(move || {
        second_log.lock().unwrap().push("world!".to_string());
        Control::Immediate
    }));

    let task = Task::once(vec![first, second]).unwrap();
    task.start(Duration::ZERO, false).unwrap();
    task.join().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["hello,", "world!"]);
    assert_eq!(task.state(), State::Finished);
}

#[test]
fn stop_mid_delay_then_continue_resumes_with_residual_only() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));

    let action_log = log.clone();
    let first = Link::new(Box::new(move || {
        action_log.lock().unwrap().push("hello,".to_string());
        Control::Immediate
    }))
    .with_duration(ms(120));

    let stop_log = log.clone();
    let cont_log = log.clone();
    let hooks = Hooks {
        on_stop: Some(Box::new(move || stop_log.lock().unwrap().push("on_stop".to_string()))),
        on_cont: Some(Box::new(move || cont_log.lock().unwrap().push("on_cont".to_string()))),
        ..Default::default()
    };
    let first = first.with_hooks(hooks);

    let second_log = log.clone();
    let second = Link::new(Box::new(move || {
        second_log.lock().unwrap().push("world!".to_string());
        Control::Immediate
    }));

    let task = Task::once(vec![first, second]).unwrap();
    task.start(Duration::ZERO, false).unwrap();

    std::thread::sleep(ms(30));
    task.stop().unwrap();
    std::thread::sleep(ms(20));
    assert_eq!(task.state(), State::Stopped);

    std::thread::sleep(ms(50));
    task.cont().unwrap();
    task.join().unwrap();

    let observed = log.lock().unwrap().clone();
    assert_eq!(observed, vec!["hello,", "on_stop", "on_cont", "world!"]);
    assert_eq!(task.state(), State::Finished);
}

#[test]
fn periodic_with_cap_runs_exactly_max_times() {
    init_tracing();
    let count = Arc::new(AtomicU32::new(0));
    let action_count = count.clone();
    let action: taskforge::BoxedAction = Box::new(move || {
        action_count.fetch_add(1, Ordering::SeqCst);
        Control::Immediate
    });

    let task = Task::periodic(action, ms(15), Some(3)).unwrap();
    task.start(Duration::ZERO, false).unwrap();
    task.join().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(task.state(), State::Finished);
}

#[test]
fn repeated_action_drives_its_own_termination() {
    init_tracing();
    // An accelerating sequence: each call requests a shorter delay until
    // the seventh call stops the loop.
    let count = Arc::new(AtomicU32::new(0));
    let action_count = count.clone();
    let action: taskforge::BoxedAction = Box::new(move || {
        let n = action_count.fetch_add(1, Ordering::SeqCst);
        match n {
            0..=4 => Control::Delay(ms(5 * (5 - n) as u64)),
            5 => Control::Immediate,
            _ => Control::Stop,
        }
    });

    let task = Task::repeated(action, None).unwrap();
    task.start(Duration::ZERO, false).unwrap();
    task.join().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 7);
    assert_eq!(task.state(), State::Finished);
}

#[test]
fn stopping_a_parent_propagates_to_its_children() {
    init_tracing();
    let parent_count = Arc::new(AtomicU32::new(0));
    let child_count = Arc::new(AtomicU32::new(0));

    let pc = parent_count.clone();
    let parent_action: taskforge::BoxedAction = Box::new(move || {
        pc.fetch_add(1, Ordering::SeqCst);
        Control::Immediate
    });
    let cc = child_count.clone();
    let child_action: taskforge::BoxedAction = Box::new(move || {
        cc.fetch_add(1, Ordering::SeqCst);
        Control::Immediate
    });

    let parent = Task::periodic(parent_action, ms(15), None).unwrap();
    let child = Task::periodic(child_action, ms(15), None).unwrap();
    parent.adopt_child(&child);

    child.start(Duration::ZERO, false).unwrap();
    parent.start(Duration::ZERO, false).unwrap();

    std::thread::sleep(ms(60));
    parent.stop().unwrap();
    std::thread::sleep(ms(40));

    assert_eq!(parent.state(), State::Stopped);
    assert_eq!(child.state(), State::Stopped);

    let parent_count_at_stop = parent_count.load(Ordering::SeqCst);
    let child_count_at_stop = child_count.load(Ordering::SeqCst);
    std::thread::sleep(ms(40));
    assert_eq!(parent_count.load(Ordering::SeqCst), parent_count_at_stop);
    assert_eq!(child_count.load(Ordering::SeqCst), child_count_at_stop);

    parent.cont().unwrap();
    std::thread::sleep(ms(40));
    assert_eq!(child.state(), State::Started);
}

#[test]
fn exception_climbs_to_the_nearest_ancestor_handler() {
    init_tracing();
    let handler_called = Arc::new(AtomicBool::new(false));

    let pc = Arc::new(AtomicU32::new(0));
    let parent_pc = pc.clone();
    let parent_action: taskforge::BoxedAction = Box::new(move || {
        parent_pc.fetch_add(1, Ordering::SeqCst);
        Control::Immediate
    });
    let parent = Task::periodic(parent_action, ms(15), None).unwrap();

    let parent_for_handler = parent.clone();
    let flag_for_handler = handler_called.clone();
    parent
        .set_hooks(Hooks {
            exc_handler: Some(Box::new(move |_payload| {
                flag_for_handler.store(true, Ordering::SeqCst);
                let _ = parent_for_handler.stop();
            })),
            ..Default::default()
        })
        .unwrap();
    parent.start(Duration::ZERO, false).unwrap();

    let child = Task::once(vec![Link::new(Box::new(|| Control::Immediate))]).unwrap();
    parent.adopt_child(&child);

    let grandchild = Task::once(vec![Link::new(Box::new(|| -> Control {
        panic!("grandchild action exploded")
    }))])
    .unwrap();
    child.adopt_child(&grandchild);

    grandchild.start(Duration::ZERO, false).unwrap();
    grandchild.join().unwrap();

    assert!(handler_called.load(Ordering::SeqCst));
    assert_eq!(grandchild.state(), State::Finished);

    std::thread::sleep(ms(30));
    assert_eq!(parent.state(), State::Stopped);
}

#[test]
fn restart_after_finish_replays_the_chain() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let action_log = log.clone();
    let link = Link::new(Box::new(move || {
        action_log.lock().unwrap().push(());
        Control::Immediate
    }));
    let task = Task::once(vec![link]).unwrap();

    task.start(Duration::ZERO, false).unwrap();
    task.join().unwrap();
    task.start(Duration::ZERO, false).unwrap();
    task.join().unwrap();

    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(task.state(), State::Finished);
}
