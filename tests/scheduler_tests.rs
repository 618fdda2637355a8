use ecusim::scheduler::{
    Clock, FailurePolicy, ManualClock, MonotonicClock, Scheduler, SchedulerError, TaskError,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Registers a task that records the clock time of every run.
fn recorder(
    scheduler: &mut Scheduler<ManualClock>,
    name: &str,
    interval_ms: u64,
) -> Rc<RefCell<Vec<u64>>> {
    let runs = Rc::new(RefCell::new(Vec::new()));
    let clock = scheduler.clock().clone();
    let sink = Rc::clone(&runs);
    scheduler.register(name, Duration::from_millis(interval_ms), move || {
        sink.borrow_mut().push(clock.now_us());
        Ok(())
    });
    runs
}

#[test]
fn test_each_task_fires_once_per_interval() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());

    let physics = recorder(&mut scheduler, "physics", 10);
    let can = recorder(&mut scheduler, "can", 50);
    let fuel = recorder(&mut scheduler, "fuel", 100);
    let diag = recorder(&mut scheduler, "diag", 1000);

    for _ in 0..2000 {
        clock.advance(Duration::from_millis(1));
        scheduler.tick().unwrap();
    }

    assert_eq!(physics.borrow().len(), 200);
    assert_eq!(can.borrow().len(), 40);
    assert_eq!(fuel.borrow().len(), 20);
    assert_eq!(diag.borrow().len(), 2);

    for window in physics.borrow().windows(2) {
        assert_eq!(window[1] - window[0], 10_000);
    }
    assert_eq!(scheduler.stats().ticks, 2000);
    assert_eq!(scheduler.stats().overruns, 0);
}

#[test]
fn test_drift_bounded_by_polling_quantum() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());
    let runs = recorder(&mut scheduler, "odd", 7);

    // Poll every 5 ms; the 7 ms task can be up to one quantum late
    for _ in 0..200 {
        clock.advance(Duration::from_millis(5));
        scheduler.tick().unwrap();
    }

    let runs = runs.borrow();
    assert!(!runs.is_empty());
    assert!(runs[0] >= 7_000 && runs[0] < 12_000);
    for window in runs.windows(2) {
        let gap = window[1] - window[0];
        assert!(gap >= 7_000, "ran twice within one interval: {gap}us");
        assert!(gap < 12_000, "drifted more than one quantum: {gap}us");
    }
}

#[test]
fn test_no_catch_up_burst_after_stall() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());
    let runs = recorder(&mut scheduler, "physics", 10);

    clock.advance(Duration::from_millis(95));
    for _ in 0..5 {
        scheduler.tick().unwrap();
    }
    assert_eq!(runs.borrow().len(), 1);
    assert_eq!(scheduler.task_stats("physics").unwrap().overruns, 1);

    clock.advance(Duration::from_millis(10));
    scheduler.tick().unwrap();
    assert_eq!(*runs.borrow(), vec![95_000, 105_000]);
}

#[test]
fn test_same_tick_tasks_run_in_registration_order() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, interval) in [("slow", 100), ("fast", 50), ("mid", 100)] {
        let log = Rc::clone(&log);
        scheduler.register(name, Duration::from_millis(interval), move || {
            log.borrow_mut().push(name);
            Ok(())
        });
    }

    clock.advance(Duration::from_millis(100));
    scheduler.tick().unwrap();
    assert_eq!(*log.borrow(), vec!["slow", "fast", "mid"]);
}

#[test]
fn test_halt_is_default_and_reports_task_name() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());
    scheduler.register("broken", Duration::from_millis(10), || {
        Err(TaskError::failed("sensor offline"))
    });

    clock.advance(Duration::from_millis(10));
    match scheduler.tick() {
        Err(SchedulerError::TaskFailed { task, source }) => {
            assert_eq!(task, "broken");
            assert_eq!(source.to_string(), "sensor offline");
        }
        other => panic!("expected task failure, got {other:?}"),
    }
}

#[test]
fn test_isolated_failure_keeps_schedule() {
    let clock = ManualClock::new();
    let mut scheduler = Scheduler::with_clock(clock.clone());
    scheduler.set_failure_policy(FailurePolicy::Isolate);

    let attempts = Rc::new(RefCell::new(0u32));
    {
        let attempts = Rc::clone(&attempts);
        scheduler.register("flaky", Duration::from_millis(10), move || {
            *attempts.borrow_mut() += 1;
            if *attempts.borrow() % 2 == 0 {
                Err(TaskError::failed("every other run"))
            } else {
                Ok(())
            }
        });
    }
    let healthy = recorder(&mut scheduler, "healthy", 10);

    for _ in 0..100 {
        clock.advance(Duration::from_millis(1));
        scheduler.tick().unwrap();
    }

    let flaky = scheduler.task_stats("flaky").unwrap();
    assert_eq!(flaky.runs, 10);
    assert_eq!(flaky.failures, 5);
    assert_eq!(healthy.borrow().len(), 10);
    assert_eq!(scheduler.failure_history().len(), 5);
    assert!(scheduler.failure_history().iter().all(|f| f.task == "flaky"));
}

#[test]
fn test_run_until_with_real_clock_stops_from_other_thread() {
    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let mut scheduler = Scheduler::with_clock(MonotonicClock::new());
    let runs = Rc::new(RefCell::new(0u32));
    {
        let runs = Rc::clone(&runs);
        scheduler.register("tick", Duration::from_millis(5), move || {
            *runs.borrow_mut() += 1;
            Ok(())
        });
    }

    scheduler.run_until(&stop).unwrap();
    stopper.join().unwrap();

    assert!(*runs.borrow() >= 1);
    assert!(scheduler.stats().ticks > 1);
}
